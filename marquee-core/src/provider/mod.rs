//! Provider plugin system: metadata, manifests, installation and registry
//!
//! A provider maps a film or episode to its own item id and then produces
//! links for that id. Bundles are opaque; the runtime implementation of a
//! provider is attached to its registry entry through [`ProviderApi`].

pub mod installer;
pub mod manager;
pub mod manifest;
pub mod metadata;
pub mod registry;
pub mod store;

use async_trait::async_trait;
use futures::stream::BoxStream;
pub use installer::{InstallError, InstallingGuard, ProviderInstaller};
pub use manager::{ProviderManager, ProviderUpdate};
pub use manifest::{Manifest, ManifestError, ManifestFetcher};
pub use metadata::{
    Author, Language, ProviderInstallationStatus, ProviderMetadata, ProviderStatus, ProviderType,
};
pub use registry::{ProviderRegistry, ProviderRegistryEntry, RegistryError};
pub use store::{JsonFileStore, MemoryStore, RegistryStore};

use crate::media::{Episode, Film, MediaLink};

/// Links produced incrementally by a provider.
pub type LinkStream = BoxStream<'static, Result<MediaLink, ProviderError>>;

/// Errors a provider reports while resolving.
///
/// `NotFound` is the expected "nothing here" answer; every other variant is
/// an unexpected failure that the resolver surfaces if no provider succeeds.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ProviderError {
    #[error("Title not found: {reason}")]
    NotFound { reason: String },

    #[error("Network failure: {reason}")]
    Network { reason: String },

    #[error("Extraction failed: {reason}")]
    Extraction { reason: String },

    #[error("{reason}")]
    Other { reason: String },
}

impl ProviderError {
    /// Whether this error is a real failure rather than an empty answer.
    pub fn is_unexpected(&self) -> bool {
        !matches!(self, ProviderError::NotFound { .. })
    }
}

/// Capability interface every loaded provider implements.
#[async_trait]
pub trait ProviderApi: Send + Sync {
    /// Maps a catalog film to the provider's own item id.
    ///
    /// # Errors
    /// - `ProviderError::NotFound` - Provider does not carry this title
    /// - `ProviderError::Network` - Provider backend unreachable
    async fn resolve_id(&self, film: &Film) -> Result<String, ProviderError>;

    /// Streams links for a provider item.
    ///
    /// Dropping the stream must release any resources the provider holds
    /// for the request.
    fn links(&self, id: &str, film: &Film, episode: Option<&Episode>) -> LinkStream;
}
