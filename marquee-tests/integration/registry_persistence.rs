//! Registry order and preferences surviving a restart.

use std::sync::Arc;

use marquee_core::config::StorageConfig;
use marquee_core::provider::{JsonFileStore, ProviderRegistry, RegistryStore};
use marquee_core::test_fixtures::{create_temp_providers_root, sample_metadata};
use marquee_core::ProviderRegistryEntry;

fn storage(root: &tempfile::TempDir) -> StorageConfig {
    StorageConfig {
        providers_root: root.path().to_path_buf(),
        user_id: "alice".to_string(),
    }
}

fn open(storage: &StorageConfig) -> ProviderRegistry {
    let store: Arc<dyn RegistryStore> = Arc::new(JsonFileStore::new(storage.registry_file()));
    ProviderRegistry::load(store).unwrap()
}

fn ids(registry: &ProviderRegistry) -> Vec<String> {
    registry
        .entries()
        .iter()
        .map(|e| e.metadata.id.clone())
        .collect()
}

#[test]
fn test_order_and_preferences_survive_reload() {
    let root = create_temp_providers_root();
    let storage = storage(&root);

    {
        let registry = open(&storage);
        for (i, id) in ["alpha", "beta", "gamma"].into_iter().enumerate() {
            registry
                .add(ProviderRegistryEntry::new(sample_metadata(id, i as i64 + 1)))
                .unwrap();
        }
        registry.swap(0, 2).unwrap();
        registry.toggle_usage(1).unwrap();
        registry.populate("Provider alpha", false, true).unwrap();
    }

    let reloaded = open(&storage);

    assert_eq!(ids(&reloaded), ["gamma", "beta", "alpha"]);
    let entries = reloaded.entries();
    assert!(!entries[1].is_enabled);
    assert!(entries[2].is_in_maintenance);
    assert!(entries[0].is_eligible());
    assert!(storage.registry_file().exists());
}

#[test]
fn test_persisted_file_uses_camel_case() {
    let root = create_temp_providers_root();
    let storage = storage(&root);

    let registry = open(&storage);
    registry
        .add(ProviderRegistryEntry::new(sample_metadata("alpha", 7)))
        .unwrap();

    let raw = std::fs::read_to_string(storage.registry_file()).unwrap();
    let json: serde_json::Value = serde_json::from_str(&raw).unwrap();

    assert_eq!(json[0]["isEnabled"], true);
    assert_eq!(json[0]["installedVersionCode"], 7);
    assert_eq!(json[0]["metadata"]["versionCode"], 7);
}

#[test]
fn test_swap_twice_restores_persisted_order() {
    let root = create_temp_providers_root();
    let storage = storage(&root);

    let registry = open(&storage);
    for id in ["a", "b", "c", "d"] {
        registry
            .add(ProviderRegistryEntry::new(sample_metadata(id, 1)))
            .unwrap();
    }

    registry.swap(1, 3).unwrap();
    registry.swap(1, 3).unwrap();

    assert_eq!(ids(&open(&storage)), ["a", "b", "c", "d"]);
}
