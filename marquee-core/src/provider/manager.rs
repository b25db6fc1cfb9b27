//! Provider lifecycle: install, uninstall and update checks.
//!
//! Composes the manifest fetcher, the installer and the registry. Update
//! checks only report status; nothing is installed unless asked.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::config::{MarqueeConfig, StorageConfig};
use crate::provider::installer::ProviderInstaller;
use crate::provider::manifest::ManifestFetcher;
use crate::provider::metadata::ProviderInstallationStatus;
use crate::provider::registry::{ProviderRegistry, ProviderRegistryEntry, RegistryError};
use crate::repository::Repository;
use crate::transport::Transport;

/// Installation status of one provider published by a repository.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderUpdate {
    pub provider_id: String,
    pub installed_version: Option<i64>,
    pub remote_version: i64,
    pub status: ProviderInstallationStatus,
}

/// Coordinates provider installation against the registry.
pub struct ProviderManager {
    fetcher: ManifestFetcher,
    installer: ProviderInstaller,
    registry: Arc<ProviderRegistry>,
    storage: StorageConfig,
}

impl ProviderManager {
    pub fn new(
        transport: Arc<dyn Transport>,
        registry: Arc<ProviderRegistry>,
        config: &MarqueeConfig,
    ) -> Self {
        Self {
            fetcher: ManifestFetcher::new(Arc::clone(&transport), &config.network),
            installer: ProviderInstaller::new(transport, &config.network),
            registry,
            storage: config.storage.clone(),
        }
    }

    pub fn registry(&self) -> &Arc<ProviderRegistry> {
        &self.registry
    }

    pub fn fetcher(&self) -> &ManifestFetcher {
        &self.fetcher
    }

    pub fn installer(&self) -> &ProviderInstaller {
        &self.installer
    }

    /// Installs a provider published by `repository` and registers it.
    ///
    /// Reinstalling a registered provider keeps its position and enabled
    /// flag.
    ///
    /// # Errors
    /// - `MarqueeError::Manifest` - Manifest unavailable or provider missing
    /// - `MarqueeError::Install` - Download failed
    /// - `MarqueeError::Registry` - Registration could not be persisted
    pub async fn install(
        &self,
        repository: &Repository,
        provider_id: &str,
    ) -> crate::Result<ProviderRegistryEntry> {
        let metadata = self.fetcher.fetch_one(repository, provider_id).await?;
        let previous = self
            .registry
            .get(provider_id)
            .and_then(|entry| entry.bundle_path);

        let bundle_path = self
            .installer
            .install_for_user(
                &metadata,
                repository,
                &self.storage.providers_root,
                &self.storage.user_id,
            )
            .await?;

        let index = self
            .registry
            .add(ProviderRegistryEntry::new(metadata).with_bundle_path(bundle_path.clone()))?;
        self.discard_stale_bundle(previous, &bundle_path).await;

        tracing::info!("Provider {} registered at position {}", provider_id, index);
        self.registry
            .get(provider_id)
            .ok_or_else(|| not_registered(provider_id))
    }

    /// Removes the provider's files and its registry entry.
    ///
    /// # Errors
    /// - `MarqueeError::Registry` - Provider not registered or persist failure
    /// - `MarqueeError::Install` - Files exist but cannot be removed
    pub async fn uninstall(&self, provider_id: &str) -> crate::Result<ProviderRegistryEntry> {
        let entry = self
            .registry
            .get(provider_id)
            .ok_or_else(|| not_registered(provider_id))?;

        if let Some(path) = &entry.bundle_path {
            self.installer.uninstall(path).await?;
        }

        Ok(self.registry.remove(provider_id)?)
    }

    /// Local status of a provider against a known remote version.
    pub fn status(&self, provider_id: &str, remote_version: Option<i64>) -> ProviderInstallationStatus {
        ProviderInstallationStatus::evaluate(
            self.registry
                .get(provider_id)
                .map(|e| e.installed_version_code),
            remote_version,
            self.installer.is_installing(provider_id),
        )
    }

    /// Compares every provider in the repository's manifest with the
    /// registry.
    ///
    /// # Errors
    /// - `MarqueeError::Manifest` - Manifest unavailable or malformed
    pub async fn check_updates(&self, repository: &Repository) -> crate::Result<Vec<ProviderUpdate>> {
        let manifest = self.fetcher.fetch_manifest(repository).await?;

        let updates: Vec<ProviderUpdate> = manifest
            .providers()
            .iter()
            .map(|remote| ProviderUpdate {
                provider_id: remote.id.clone(),
                installed_version: self
                    .registry
                    .get(&remote.id)
                    .map(|e| e.installed_version_code),
                remote_version: remote.version_code,
                status: self.status(&remote.id, Some(remote.version_code)),
            })
            .collect();

        for update in &updates {
            if update.status == ProviderInstallationStatus::Outdated {
                tracing::info!(
                    "Provider {} is outdated ({:?} < {})",
                    update.provider_id,
                    update.installed_version,
                    update.remote_version
                );
            }
        }

        Ok(updates)
    }

    /// Installs the newest published version of a registered provider.
    ///
    /// Returns the entry unchanged when already up to date.
    ///
    /// # Errors
    /// - `MarqueeError::Registry` - Provider not registered
    /// - `MarqueeError::Repository` - Stored repository URL is invalid
    /// - `MarqueeError::Manifest` / `MarqueeError::Install` - Fetch or download failed
    pub async fn update(&self, provider_id: &str) -> crate::Result<ProviderRegistryEntry> {
        let entry = self
            .registry
            .get(provider_id)
            .ok_or_else(|| not_registered(provider_id))?;
        let repository = Repository::parse(&entry.metadata.repository_url)?;

        let metadata = self.fetcher.fetch_one(&repository, provider_id).await?;
        if metadata.version_code <= entry.installed_version_code {
            tracing::info!("Provider {} is up to date", provider_id);
            return Ok(entry);
        }

        let bundle_path = self
            .installer
            .install_for_user(
                &metadata,
                &repository,
                &self.storage.providers_root,
                &self.storage.user_id,
            )
            .await?;

        let version = metadata.version_code;
        let previous =
            self.registry
                .update_installed_version(provider_id, metadata, bundle_path.clone())?;
        self.discard_stale_bundle(previous, &bundle_path).await;
        tracing::info!("Provider {} updated to version {}", provider_id, version);

        self.registry
            .get(provider_id)
            .ok_or_else(|| not_registered(provider_id))
    }

    /// Deletes a replaced bundle published under a different file name.
    async fn discard_stale_bundle(&self, previous: Option<PathBuf>, current: &Path) {
        let Some(previous) = previous.filter(|path| path != current) else {
            return;
        };

        if let Err(e) = self.installer.remove_bundle(&previous).await {
            tracing::warn!("Failed to remove replaced bundle {}: {}", previous.display(), e);
        }
    }
}

fn not_registered(provider_id: &str) -> crate::MarqueeError {
    RegistryError::ProviderNotFound {
        provider_id: provider_id.to_string(),
    }
    .into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MarqueeError;
    use crate::test_fixtures::{
        ScriptedTransport, create_temp_providers_root, manifest_json, sample_metadata,
    };

    const MANIFEST_URL: &str =
        "https://raw.githubusercontent.com/marquee/providers/builds/updater.json";

    fn bundle_url(id: &str) -> String {
        format!("https://raw.githubusercontent.com/marquee/providers/builds/{id}.flx")
    }

    fn setup(transport: &Arc<ScriptedTransport>) -> (ProviderManager, tempfile::TempDir) {
        let root = create_temp_providers_root();
        let mut config = MarqueeConfig::for_testing();
        config.storage.providers_root = root.path().to_path_buf();

        let manager = ProviderManager::new(
            transport.clone(),
            Arc::new(ProviderRegistry::in_memory()),
            &config,
        );
        (manager, root)
    }

    fn repository() -> Repository {
        Repository::parse("https://github.com/marquee/providers").unwrap()
    }

    #[tokio::test]
    async fn test_install_registers_provider() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.respond(MANIFEST_URL, manifest_json(&[sample_metadata("alpha", 10001)]));
        transport.respond(&bundle_url("alpha"), "alpha-bundle");
        let (manager, root) = setup(&transport);

        let entry = manager.install(&repository(), "alpha").await.unwrap();

        let expected = root
            .path()
            .join("default")
            .join("marquee-providers")
            .join("alpha.flx");
        assert_eq!(entry.bundle_path.as_deref(), Some(expected.as_path()));
        assert!(expected.exists());
        assert_eq!(entry.installed_version_code, 10001);
        assert_eq!(manager.registry().len(), 1);
    }

    #[tokio::test]
    async fn test_outdated_detected_without_action() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.respond(MANIFEST_URL, manifest_json(&[sample_metadata("alpha", 10001)]));
        transport.respond(&bundle_url("alpha"), "v1");
        let (manager, _root) = setup(&transport);
        manager.install(&repository(), "alpha").await.unwrap();

        transport.respond(
            MANIFEST_URL,
            manifest_json(&[sample_metadata("alpha", 10002), sample_metadata("beta", 1)]),
        );
        let requests_before = transport.requests().len();

        let updates = manager.check_updates(&repository()).await.unwrap();

        assert_eq!(updates[0].status, ProviderInstallationStatus::Outdated);
        assert_eq!(updates[0].installed_version, Some(10001));
        assert_eq!(updates[1].status, ProviderInstallationStatus::NotInstalled);
        // Only the manifest was fetched
        assert_eq!(transport.requests().len(), requests_before + 1);
        assert_eq!(
            manager.registry().get("alpha").unwrap().installed_version_code,
            10001
        );
    }

    #[tokio::test]
    async fn test_update_keeps_position_and_preference() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.respond(
            MANIFEST_URL,
            manifest_json(&[sample_metadata("alpha", 1), sample_metadata("beta", 1)]),
        );
        transport.respond(&bundle_url("alpha"), "a1");
        transport.respond(&bundle_url("beta"), "b1");
        let (manager, _root) = setup(&transport);
        manager.install(&repository(), "alpha").await.unwrap();
        manager.install(&repository(), "beta").await.unwrap();
        manager.registry().toggle_usage(0).unwrap();

        transport.respond(
            MANIFEST_URL,
            manifest_json(&[sample_metadata("alpha", 2), sample_metadata("beta", 1)]),
        );
        transport.respond(&bundle_url("alpha"), "a2");

        let entry = manager.update("alpha").await.unwrap();

        assert_eq!(entry.installed_version_code, 2);
        assert!(!entry.is_enabled);
        assert_eq!(manager.registry().position("alpha"), Some(0));
        assert_eq!(
            std::fs::read(entry.bundle_path.unwrap()).unwrap(),
            b"a2"
        );
    }

    #[tokio::test]
    async fn test_update_under_new_filename_moves_bundle() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.respond(MANIFEST_URL, manifest_json(&[sample_metadata("alpha", 1)]));
        transport.respond(&bundle_url("alpha"), "a1");
        let (manager, _root) = setup(&transport);
        let installed = manager.install(&repository(), "alpha").await.unwrap();
        let old_path = installed.bundle_path.unwrap();

        let mut v2 = sample_metadata("alpha", 2);
        v2.build_url = bundle_url("alpha-v2");
        transport.respond(MANIFEST_URL, manifest_json(&[v2]));
        transport.respond(&bundle_url("alpha-v2"), "a2");

        let updated = manager.update("alpha").await.unwrap();
        let new_path = updated.bundle_path.clone().unwrap();

        assert_eq!(new_path.file_name().unwrap(), "alpha-v2.flx");
        assert_eq!(std::fs::read(&new_path).unwrap(), b"a2");
        assert!(!old_path.exists());
        assert!(new_path.with_file_name("updater.json").exists());

        manager.uninstall("alpha").await.unwrap();
        assert!(!new_path.exists());
        assert!(!new_path.parent().unwrap().exists());
    }

    #[tokio::test]
    async fn test_uninstall_keeps_manifest_for_sibling_provider() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.respond(
            MANIFEST_URL,
            manifest_json(&[sample_metadata("alpha", 1), sample_metadata("beta", 1)]),
        );
        transport.respond(&bundle_url("alpha"), "a1");
        transport.respond(&bundle_url("beta"), "b1");
        let (manager, _root) = setup(&transport);
        manager.install(&repository(), "alpha").await.unwrap();
        let beta = manager.install(&repository(), "beta").await.unwrap();

        manager.uninstall("alpha").await.unwrap();

        let beta_path = beta.bundle_path.unwrap();
        assert!(beta_path.exists());
        assert!(beta_path.with_file_name("updater.json").exists());
    }

    #[tokio::test]
    async fn test_uninstall_removes_files_and_entry() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.respond(MANIFEST_URL, manifest_json(&[sample_metadata("alpha", 1)]));
        transport.respond(&bundle_url("alpha"), "a1");
        let (manager, _root) = setup(&transport);
        let entry = manager.install(&repository(), "alpha").await.unwrap();

        manager.uninstall("alpha").await.unwrap();

        assert!(manager.registry().is_empty());
        assert!(!entry.bundle_path.unwrap().exists());
        assert!(matches!(
            manager.uninstall("alpha").await,
            Err(MarqueeError::Registry(RegistryError::ProviderNotFound { .. }))
        ));
    }

    #[tokio::test]
    async fn test_failed_install_does_not_register() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.respond(MANIFEST_URL, manifest_json(&[sample_metadata("alpha", 1)]));
        transport.fail_status(&bundle_url("alpha"), 404);
        let (manager, _root) = setup(&transport);

        let result = manager.install(&repository(), "alpha").await;

        assert!(matches!(result, Err(MarqueeError::Install(_))));
        assert!(manager.registry().is_empty());
    }
}
