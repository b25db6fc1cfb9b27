//! Persisted preference storage for the provider registry.
//!
//! Stores hold the full ordered entry list; order defines resolution
//! priority, so every save writes the whole list.

use std::path::{Path, PathBuf};

use parking_lot::Mutex;

use crate::provider::registry::{ProviderRegistryEntry, RegistryError};

/// Load/save contract for the ordered registry entry list.
pub trait RegistryStore: Send + Sync {
    /// Loads the persisted entries, empty when nothing was saved yet.
    ///
    /// # Errors
    /// - `RegistryError::Store` - Stored data unreadable or corrupt
    fn load(&self) -> Result<Vec<ProviderRegistryEntry>, RegistryError>;

    /// Replaces the persisted entries.
    ///
    /// # Errors
    /// - `RegistryError::Store` - Data could not be written
    fn save(&self, entries: &[ProviderRegistryEntry]) -> Result<(), RegistryError>;
}

/// JSON file store.
///
/// Writes go to a `.tmp` sibling that is renamed over the target, so a
/// crash mid-save keeps the previous file intact.
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self.path.file_name().unwrap_or_default().to_os_string();
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

impl RegistryStore for JsonFileStore {
    fn load(&self) -> Result<Vec<ProviderRegistryEntry>, RegistryError> {
        let data = match std::fs::read(&self.path) {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        serde_json::from_slice(&data).map_err(|e| RegistryError::Store {
            reason: format!("{} is corrupt: {e}", self.path.display()),
        })
    }

    fn save(&self, entries: &[ProviderRegistryEntry]) -> Result<(), RegistryError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let json = serde_json::to_vec_pretty(entries).map_err(|e| RegistryError::Store {
            reason: e.to_string(),
        })?;

        let temp = self.temp_path();
        std::fs::write(&temp, json)?;
        std::fs::rename(&temp, &self.path)?;

        tracing::debug!("Saved {} registry entries to {}", entries.len(), self.path.display());
        Ok(())
    }
}

/// In-memory store.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<Vec<ProviderRegistryEntry>>,
    saves: Mutex<usize>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a store pre-populated with `entries`.
    pub fn with_entries(entries: Vec<ProviderRegistryEntry>) -> Self {
        Self {
            entries: Mutex::new(entries),
            saves: Mutex::new(0),
        }
    }

    /// Number of successful saves so far.
    pub fn save_count(&self) -> usize {
        *self.saves.lock()
    }

    /// Snapshot of the stored entries.
    pub fn stored(&self) -> Vec<ProviderRegistryEntry> {
        self.entries.lock().clone()
    }
}

impl RegistryStore for MemoryStore {
    fn load(&self) -> Result<Vec<ProviderRegistryEntry>, RegistryError> {
        Ok(self.entries.lock().clone())
    }

    fn save(&self, entries: &[ProviderRegistryEntry]) -> Result<(), RegistryError> {
        *self.entries.lock() = entries.to_vec();
        *self.saves.lock() += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;
    use crate::test_fixtures::sample_metadata;

    #[test]
    fn test_json_store_missing_file_is_empty() {
        let dir = TempDir::new().unwrap();
        let store = JsonFileStore::new(dir.path().join("registry.json"));

        assert!(store.load().unwrap().is_empty());
    }

    #[test]
    fn test_json_store_preserves_order() {
        let dir = TempDir::new().unwrap();
        let store = JsonFileStore::new(dir.path().join("nested").join("registry.json"));

        let mut disabled = ProviderRegistryEntry::new(sample_metadata("beta", 4));
        disabled.is_enabled = false;
        let entries = vec![ProviderRegistryEntry::new(sample_metadata("alpha", 1)), disabled];

        store.save(&entries).unwrap();
        let loaded = store.load().unwrap();

        assert_eq!(loaded, entries);
        assert!(!dir.path().join("nested").join("registry.json.tmp").exists());
    }

    #[test]
    fn test_json_store_reports_corruption() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("registry.json");
        std::fs::write(&path, b"{ not json").unwrap();

        let result = JsonFileStore::new(&path).load();
        assert!(matches!(result, Err(RegistryError::Store { .. })));
    }
}
