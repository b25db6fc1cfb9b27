//! Remote updater manifest retrieval.
//!
//! Each repository publishes one JSON array on its build branch listing
//! every provider it ships. Fetching is a single idempotent GET; retrying is
//! left to the caller.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::config::NetworkConfig;
use crate::provider::metadata::ProviderMetadata;
use crate::repository::Repository;
use crate::transport::Transport;

/// Errors raised while fetching or querying a manifest.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ManifestError {
    #[error("Failed to fetch manifest {url}: {reason}")]
    Network { url: String, reason: String },

    #[error("Manifest {url} is malformed: {reason}")]
    Parse { url: String, reason: String },

    #[error("Provider {provider_id} not found in {repository}")]
    NotFound {
        repository: String,
        provider_id: String,
    },
}

/// Providers published by a single repository.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Manifest {
    providers: Vec<ProviderMetadata>,
}

impl Manifest {
    pub fn new(providers: Vec<ProviderMetadata>) -> Self {
        Self { providers }
    }

    pub fn providers(&self) -> &[ProviderMetadata] {
        &self.providers
    }

    /// Looks up a provider by id.
    pub fn find(&self, provider_id: &str) -> Option<&ProviderMetadata> {
        self.providers.iter().find(|p| p.id == provider_id)
    }

    pub fn into_providers(self) -> Vec<ProviderMetadata> {
        self.providers
    }

    pub fn len(&self) -> usize {
        self.providers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }
}

/// Fetches updater manifests over a [`Transport`].
#[derive(Clone)]
pub struct ManifestFetcher {
    transport: Arc<dyn Transport>,
    branch: String,
    filename: String,
}

impl ManifestFetcher {
    /// Creates a fetcher reading `<branch>/<filename>` from repositories.
    pub fn new(transport: Arc<dyn Transport>, config: &NetworkConfig) -> Self {
        Self {
            transport,
            branch: config.manifest_branch.clone(),
            filename: config.manifest_filename.clone(),
        }
    }

    /// Raw URL of the repository's updater manifest.
    pub fn manifest_url(&self, repository: &Repository) -> String {
        repository.raw_link(&self.branch, &self.filename)
    }

    /// Downloads and parses the repository's manifest.
    ///
    /// # Errors
    /// - `ManifestError::Network` - GET failed or returned a non-2xx status
    /// - `ManifestError::Parse` - Body is not a JSON array of provider metadata
    pub async fn fetch_manifest(&self, repository: &Repository) -> Result<Manifest, ManifestError> {
        let url = self.manifest_url(repository);
        tracing::debug!("Fetching manifest for {} from {}", repository, url);

        let body = self
            .transport
            .get_bytes(&url)
            .await
            .map_err(|e| ManifestError::Network {
                url: url.clone(),
                reason: e.to_string(),
            })?;

        let manifest: Manifest =
            serde_json::from_slice(&body).map_err(|e| ManifestError::Parse {
                url: url.clone(),
                reason: e.to_string(),
            })?;

        tracing::info!(
            "Manifest for {} lists {} providers",
            repository,
            manifest.len()
        );
        Ok(manifest)
    }

    /// Fetches the manifest and returns the entry for `provider_id`.
    ///
    /// # Errors
    /// - `ManifestError::NotFound` - Manifest does not list the provider
    /// - Any error of [`ManifestFetcher::fetch_manifest`]
    pub async fn fetch_one(
        &self,
        repository: &Repository,
        provider_id: &str,
    ) -> Result<ProviderMetadata, ManifestError> {
        let manifest = self.fetch_manifest(repository).await?;

        manifest
            .into_providers()
            .into_iter()
            .find(|p| p.id == provider_id)
            .ok_or_else(|| ManifestError::NotFound {
                repository: repository.url().to_string(),
                provider_id: provider_id.to_string(),
            })
    }
}
