//! Ordered registry of installed providers.
//!
//! List order is resolution priority. Reads take a shared lock and return
//! snapshots; every mutation is persisted through the [`RegistryStore`]
//! before it becomes visible, under a single writer lock.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::media::FilmKind;
use crate::provider::ProviderApi;
use crate::provider::metadata::ProviderMetadata;
use crate::provider::store::{MemoryStore, RegistryStore};

/// Errors raised by registry operations.
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("Index {index} out of bounds for {len} providers")]
    IndexOutOfBounds { index: usize, len: usize },

    #[error("Provider {provider_id} is not registered")]
    ProviderNotFound { provider_id: String },

    #[error("Preference store failure: {reason}")]
    Store { reason: String },

    #[error("Preference store I/O failure: {0}")]
    Io(#[from] std::io::Error),
}

/// Installed provider and its user preferences.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderRegistryEntry {
    pub metadata: ProviderMetadata,
    pub is_enabled: bool,
    /// Temporarily skipped without user involvement
    pub is_in_maintenance: bool,
    pub installed_version_code: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bundle_path: Option<PathBuf>,
}

impl ProviderRegistryEntry {
    /// Entry for a freshly installed provider, enabled by default.
    pub fn new(metadata: ProviderMetadata) -> Self {
        Self {
            is_enabled: true,
            is_in_maintenance: metadata.status.is_unavailable(),
            installed_version_code: metadata.version_code,
            bundle_path: None,
            metadata,
        }
    }

    pub fn with_bundle_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.bundle_path = Some(path.into());
        self
    }

    pub fn id(&self) -> &str {
        &self.metadata.id
    }

    /// Whether automatic resolution may use this provider.
    pub fn is_eligible(&self) -> bool {
        self.is_enabled && !self.is_in_maintenance
    }
}

/// Ordered provider list shared between the UI and the resolver.
pub struct ProviderRegistry {
    entries: RwLock<Vec<ProviderRegistryEntry>>,
    providers: RwLock<HashMap<String, Arc<dyn ProviderApi>>>,
    store: Arc<dyn RegistryStore>,
}

impl ProviderRegistry {
    /// Loads the registry from its preference store.
    ///
    /// # Errors
    /// - `RegistryError::Store` / `RegistryError::Io` - Store unreadable
    pub fn load(store: Arc<dyn RegistryStore>) -> Result<Self, RegistryError> {
        let entries = store.load()?;
        tracing::info!("Loaded {} registered providers", entries.len());

        Ok(Self {
            entries: RwLock::new(entries),
            providers: RwLock::new(HashMap::new()),
            store,
        })
    }

    /// Empty registry backed by a [`MemoryStore`].
    pub fn in_memory() -> Self {
        Self {
            entries: RwLock::new(Vec::new()),
            providers: RwLock::new(HashMap::new()),
            store: Arc::new(MemoryStore::new()),
        }
    }

    /// Snapshot of all entries in priority order.
    pub fn entries(&self) -> Vec<ProviderRegistryEntry> {
        self.entries.read().clone()
    }

    pub fn get(&self, provider_id: &str) -> Option<ProviderRegistryEntry> {
        self.entries
            .read()
            .iter()
            .find(|e| e.id() == provider_id)
            .cloned()
    }

    pub fn position(&self, provider_id: &str) -> Option<usize> {
        self.entries.read().iter().position(|e| e.id() == provider_id)
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Registers an installed provider.
    ///
    /// A provider already present keeps its position and enabled flag and
    /// has its metadata replaced; otherwise the entry is appended.
    ///
    /// # Errors
    /// - `RegistryError::Store` / `RegistryError::Io` - Persisting failed
    pub fn add(&self, entry: ProviderRegistryEntry) -> Result<usize, RegistryError> {
        tracing::debug!("Registering provider {}", entry.id());

        self.mutate(|entries| {
            match entries.iter().position(|e| e.id() == entry.id()) {
                Some(index) => {
                    let existing = &mut entries[index];
                    existing.is_in_maintenance = entry.is_in_maintenance;
                    existing.installed_version_code = entry.installed_version_code;
                    existing.metadata = entry.metadata;
                    if entry.bundle_path.is_some() {
                        existing.bundle_path = entry.bundle_path;
                    }
                    Ok(index)
                }
                None => {
                    entries.push(entry);
                    Ok(entries.len() - 1)
                }
            }
        })
    }

    /// Removes a provider and detaches its implementation.
    ///
    /// # Errors
    /// - `RegistryError::ProviderNotFound` - No entry with this id
    /// - `RegistryError::Store` / `RegistryError::Io` - Persisting failed
    pub fn remove(&self, provider_id: &str) -> Result<ProviderRegistryEntry, RegistryError> {
        let removed = self.mutate(|entries| {
            let index = entries
                .iter()
                .position(|e| e.id() == provider_id)
                .ok_or_else(|| not_found(provider_id))?;
            Ok(entries.remove(index))
        })?;

        self.providers.write().remove(provider_id);
        tracing::info!("Removed provider {} from registry", provider_id);
        Ok(removed)
    }

    /// Exchanges the entries at `from` and `to` and persists the new order.
    ///
    /// Equal indices are a no-op.
    ///
    /// # Errors
    /// - `RegistryError::IndexOutOfBounds` - Either index past the end
    /// - `RegistryError::Store` / `RegistryError::Io` - Persisting failed
    pub fn swap(&self, from: usize, to: usize) -> Result<(), RegistryError> {
        if from == to {
            return Ok(());
        }

        self.mutate(|entries| {
            let len = entries.len();
            for index in [from, to] {
                if index >= len {
                    return Err(RegistryError::IndexOutOfBounds { index, len });
                }
            }
            entries.swap(from, to);
            Ok(())
        })?;

        tracing::debug!("Swapped providers at {} and {}", from, to);
        Ok(())
    }

    /// Flips `is_enabled` of the entry at `index`, returning the new value.
    ///
    /// # Errors
    /// - `RegistryError::IndexOutOfBounds` - Index past the end
    /// - `RegistryError::Store` / `RegistryError::Io` - Persisting failed
    pub fn toggle_usage(&self, index: usize) -> Result<bool, RegistryError> {
        let enabled = self.mutate(|entries| {
            let len = entries.len();
            let entry = entries
                .get_mut(index)
                .ok_or(RegistryError::IndexOutOfBounds { index, len })?;
            entry.is_enabled = !entry.is_enabled;
            Ok(entry.is_enabled)
        })?;

        tracing::debug!("Provider at {} enabled={}", index, enabled);
        Ok(enabled)
    }

    /// Reconciles a provider announcing its runtime identity.
    ///
    /// Matches by display name. A known entry gets its maintenance flag
    /// replaced and is disabled when ignored; an unknown name is appended
    /// with placeholder metadata.
    ///
    /// # Errors
    /// - `RegistryError::Store` / `RegistryError::Io` - Persisting failed
    pub fn populate(
        &self,
        name: &str,
        is_ignored: bool,
        is_maintenance: bool,
    ) -> Result<(), RegistryError> {
        self.mutate(|entries| {
            match entries.iter_mut().find(|e| e.metadata.name == name) {
                Some(entry) => {
                    entry.is_in_maintenance = is_maintenance;
                    if is_ignored {
                        entry.is_enabled = false;
                    }
                }
                None => {
                    let mut entry = ProviderRegistryEntry::new(ProviderMetadata::placeholder(name));
                    entry.is_enabled = !is_ignored;
                    entry.is_in_maintenance = is_maintenance;
                    entries.push(entry);
                }
            }
            Ok(())
        })?;

        tracing::debug!(
            "Populated provider {} (ignored={}, maintenance={})",
            name,
            is_ignored,
            is_maintenance
        );
        Ok(())
    }

    /// Records a completed update, keeping position and preferences.
    ///
    /// Returns the bundle path the entry pointed at before the update.
    ///
    /// # Errors
    /// - `RegistryError::ProviderNotFound` - No entry with this id
    /// - `RegistryError::Store` / `RegistryError::Io` - Persisting failed
    pub fn update_installed_version(
        &self,
        provider_id: &str,
        metadata: ProviderMetadata,
        bundle_path: PathBuf,
    ) -> Result<Option<PathBuf>, RegistryError> {
        self.mutate(|entries| {
            let entry = entries
                .iter_mut()
                .find(|e| e.id() == provider_id)
                .ok_or_else(|| not_found(provider_id))?;
            entry.installed_version_code = metadata.version_code;
            entry.is_in_maintenance = metadata.status.is_unavailable();
            entry.metadata = metadata;
            Ok(entry.bundle_path.replace(bundle_path))
        })
    }

    /// Binds a loaded provider implementation to its entry.
    ///
    /// # Errors
    /// - `RegistryError::ProviderNotFound` - No entry with this id
    pub fn attach(
        &self,
        provider_id: &str,
        provider: Arc<dyn ProviderApi>,
    ) -> Result<(), RegistryError> {
        if self.position(provider_id).is_none() {
            return Err(not_found(provider_id));
        }

        self.providers
            .write()
            .insert(provider_id.to_string(), provider);
        tracing::debug!("Attached implementation for provider {}", provider_id);
        Ok(())
    }

    /// Implementation attached to `provider_id`, if any.
    pub fn provider(&self, provider_id: &str) -> Option<Arc<dyn ProviderApi>> {
        self.providers.read().get(provider_id).cloned()
    }

    /// Eligible providers able to serve `kind`, in priority order.
    ///
    /// Entries without an attached implementation are skipped.
    pub fn candidates(&self, kind: FilmKind) -> Vec<(ProviderRegistryEntry, Arc<dyn ProviderApi>)> {
        let entries = self.entries.read();
        let providers = self.providers.read();

        entries
            .iter()
            .filter(|e| e.is_eligible() && e.metadata.provider_type.supports(kind))
            .filter_map(|e| providers.get(e.id()).map(|p| (e.clone(), Arc::clone(p))))
            .collect()
    }

    fn mutate<T>(
        &self,
        change: impl FnOnce(&mut Vec<ProviderRegistryEntry>) -> Result<T, RegistryError>,
    ) -> Result<T, RegistryError> {
        let mut entries = self.entries.write();
        let mut next = entries.clone();
        let result = change(&mut next)?;

        self.store.save(&next)?;
        *entries = next;
        Ok(result)
    }
}

fn not_found(provider_id: &str) -> RegistryError {
    RegistryError::ProviderNotFound {
        provider_id: provider_id.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;
    use crate::provider::metadata::{ProviderStatus, ProviderType};
    use crate::test_fixtures::{ScriptedProvider, sample_metadata};

    fn registry_with(ids: &[&str]) -> (ProviderRegistry, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        let registry = ProviderRegistry::load(store.clone()).unwrap();
        for (i, id) in ids.iter().enumerate() {
            registry
                .add(ProviderRegistryEntry::new(sample_metadata(id, i as i64 + 1)))
                .unwrap();
        }
        (registry, store)
    }

    fn ids(registry: &ProviderRegistry) -> Vec<String> {
        registry.entries().iter().map(|e| e.id().to_string()).collect()
    }

    #[test]
    fn test_swap_persists_order() {
        let (registry, store) = registry_with(&["a", "b", "c"]);
        let saves = store.save_count();

        registry.swap(0, 2).unwrap();

        assert_eq!(ids(&registry), ["c", "b", "a"]);
        assert_eq!(store.save_count(), saves + 1);
        assert_eq!(store.stored()[0].id(), "c");
    }

    #[test]
    fn test_swap_same_index_is_noop() {
        let (registry, store) = registry_with(&["a", "b"]);
        let saves = store.save_count();

        registry.swap(1, 1).unwrap();

        assert_eq!(ids(&registry), ["a", "b"]);
        assert_eq!(store.save_count(), saves);
    }

    #[test]
    fn test_swap_out_of_bounds_leaves_order() {
        let (registry, _store) = registry_with(&["a", "b"]);

        let result = registry.swap(0, 5);

        assert!(matches!(
            result,
            Err(RegistryError::IndexOutOfBounds { index: 5, len: 2 })
        ));
        assert_eq!(ids(&registry), ["a", "b"]);
    }

    #[test]
    fn test_toggle_usage_flips_enabled() {
        let (registry, store) = registry_with(&["a", "b"]);

        assert!(!registry.toggle_usage(1).unwrap());
        assert!(!registry.get("b").unwrap().is_eligible());
        assert!(!store.stored()[1].is_enabled);

        assert!(registry.toggle_usage(1).unwrap());
        assert!(registry.toggle_usage(2).is_err());
    }

    #[test]
    fn test_add_existing_keeps_position_and_preference() {
        let (registry, _store) = registry_with(&["a", "b", "c"]);
        registry.toggle_usage(1).unwrap();

        let index = registry
            .add(ProviderRegistryEntry::new(sample_metadata("b", 99)))
            .unwrap();

        assert_eq!(index, 1);
        let entry = registry.get("b").unwrap();
        assert_eq!(entry.installed_version_code, 99);
        assert!(!entry.is_enabled);
        assert_eq!(registry.len(), 3);
    }

    #[test]
    fn test_populate_upserts_by_name() {
        let (registry, _store) = registry_with(&["a"]);
        let name = registry.get("a").unwrap().metadata.name;

        registry.populate(&name, false, true).unwrap();
        let entry = registry.get("a").unwrap();
        assert!(entry.is_enabled);
        assert!(entry.is_in_maintenance);
        assert!(!entry.is_eligible());

        registry.populate(&name, true, false).unwrap();
        let entry = registry.get("a").unwrap();
        assert!(!entry.is_enabled);
        assert!(!entry.is_in_maintenance);

        registry.populate("Newcomer", true, false).unwrap();
        assert_eq!(registry.len(), 2);
        assert!(!registry.entries()[1].is_enabled);
    }

    #[test]
    fn test_maintenance_status_carried_on_register() {
        let mut metadata = sample_metadata("down", 1);
        metadata.status = ProviderStatus::Down;

        let entry = ProviderRegistryEntry::new(metadata);

        assert!(entry.is_enabled);
        assert!(entry.is_in_maintenance);
    }

    #[test]
    fn test_failed_save_leaves_state_unchanged() {
        struct FailingStore;

        impl RegistryStore for FailingStore {
            fn load(&self) -> Result<Vec<ProviderRegistryEntry>, RegistryError> {
                Ok(vec![
                    ProviderRegistryEntry::new(sample_metadata("a", 1)),
                    ProviderRegistryEntry::new(sample_metadata("b", 1)),
                ])
            }

            fn save(&self, _entries: &[ProviderRegistryEntry]) -> Result<(), RegistryError> {
                Err(RegistryError::Store {
                    reason: "read-only".to_string(),
                })
            }
        }

        let registry = ProviderRegistry::load(Arc::new(FailingStore)).unwrap();

        assert!(registry.swap(0, 1).is_err());
        assert_eq!(ids(&registry), ["a", "b"]);
    }

    #[test]
    fn test_candidates_filter_and_order() {
        let (registry, _store) = registry_with(&["a", "b", "c", "d"]);
        for id in ["a", "b", "c"] {
            registry
                .attach(id, Arc::new(ScriptedProvider::empty(id)))
                .unwrap();
        }
        registry.toggle_usage(1).unwrap();

        let mut movies_only = sample_metadata("c", 3);
        movies_only.provider_type = ProviderType::Movie;
        let previous = registry
            .update_installed_version("c", movies_only, PathBuf::from("/data/c-v3.flx"))
            .unwrap();
        assert_eq!(previous, None);
        assert_eq!(
            registry.get("c").unwrap().bundle_path,
            Some(PathBuf::from("/data/c-v3.flx"))
        );

        let movie: Vec<String> = registry
            .candidates(FilmKind::Movie)
            .iter()
            .map(|(e, _)| e.id().to_string())
            .collect();
        let show: Vec<String> = registry
            .candidates(FilmKind::TvShow)
            .iter()
            .map(|(e, _)| e.id().to_string())
            .collect();

        assert_eq!(movie, ["a", "c"]);
        assert_eq!(show, ["a"]);
    }

    #[test]
    fn test_remove_detaches_provider() {
        let (registry, _store) = registry_with(&["a", "b"]);
        registry
            .attach("a", Arc::new(ScriptedProvider::empty("a")))
            .unwrap();

        registry.remove("a").unwrap();

        assert!(registry.provider("a").is_none());
        assert_eq!(ids(&registry), ["b"]);
        assert!(matches!(
            registry.remove("a"),
            Err(RegistryError::ProviderNotFound { .. })
        ));
        assert!(registry.attach("zzz", Arc::new(ScriptedProvider::empty("zzz"))).is_err());
    }

    proptest! {
        #[test]
        fn prop_swap_is_involution(len in 1usize..8, a in 0usize..8, b in 0usize..8) {
            let names: Vec<String> = (0..len).map(|i| format!("p{i}")).collect();
            let refs: Vec<&str> = names.iter().map(String::as_str).collect();
            let (registry, _store) = registry_with(&refs);
            let (a, b) = (a % len, b % len);
            let before = ids(&registry);

            registry.swap(a, b).unwrap();
            registry.swap(a, b).unwrap();

            prop_assert_eq!(ids(&registry), before);
        }
    }
}
