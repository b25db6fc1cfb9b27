//! Marquee Core - Provider plugins and media link resolution
//!
//! This crate provides the engine behind a media-catalog client: parsing
//! provider repositories, fetching their updater manifests, installing
//! provider bundles atomically, keeping the ordered provider registry, and
//! resolving playable links across providers with progress reporting and
//! per-key caching.

pub mod config;
pub mod media;
pub mod provider;
pub mod repository;
pub mod resolver;
pub mod tracing_setup;
pub mod transport;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_fixtures;

// Re-export main types for convenient access
pub use config::MarqueeConfig;
pub use media::{Episode, Film, FilmKind, Flag, LinkKind, MediaLink, SubtitleSource};
pub use provider::{
    InstallError, ManifestError, ManifestFetcher, ProviderApi, ProviderError,
    ProviderInstallationStatus, ProviderInstaller, ProviderManager, ProviderMetadata,
    ProviderRegistry, ProviderRegistryEntry, RegistryError,
};
pub use repository::{Repository, RepositoryError};
pub use resolver::{
    CacheEntry, CacheKey, LinkCache, MediaLinkResolver, ResolutionState, ResolutionStream,
    ResolveRequest,
};
pub use transport::{HttpTransport, Transport, TransportError};

/// Errors that can bubble up from any Marquee subsystem.
///
/// Per-provider failures during resolution never surface here; they are
/// recorded on the resolution outcome instead.
#[derive(Debug, thiserror::Error)]
pub enum MarqueeError {
    #[error("Repository error: {0}")]
    Repository(#[from] RepositoryError),

    #[error("Manifest error: {0}")]
    Manifest(#[from] ManifestError),

    #[error("Install error: {0}")]
    Install(#[from] InstallError),

    #[error("Registry error: {0}")]
    Registry(#[from] RegistryError),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    #[error("Configuration error: {reason}")]
    Configuration { reason: String },
}

impl MarqueeError {
    /// Returns a user-friendly error message suitable for display.
    pub fn user_message(&self) -> String {
        match self {
            MarqueeError::Repository(RepositoryError::Invalid { url, .. }) => {
                format!("'{url}' is not a valid provider repository link")
            }
            MarqueeError::Manifest(e) => match e {
                ManifestError::NotFound { provider_id, .. } => {
                    format!("Provider {provider_id} is not published by this repository")
                }
                ManifestError::Network { .. } => {
                    "Could not reach the provider repository".to_string()
                }
                ManifestError::Parse { .. } => {
                    "The provider repository published an unreadable manifest".to_string()
                }
            },
            MarqueeError::Install(InstallError::DownloadFailed { url, .. }) => {
                format!("Download failed: {url}")
            }
            MarqueeError::Install(_) => "Provider installation failed".to_string(),
            MarqueeError::Registry(RegistryError::ProviderNotFound { provider_id }) => {
                format!("Provider {provider_id} is not installed")
            }
            MarqueeError::Registry(_) => "Provider list could not be updated".to_string(),
            MarqueeError::Transport(_) => "Network error occurred".to_string(),
            MarqueeError::Provider(_) => "Provider error occurred".to_string(),
            MarqueeError::Configuration { reason } => format!("Invalid configuration: {reason}"),
        }
    }

    /// Checks if this error is due to user input validation.
    pub fn is_user_error(&self) -> bool {
        matches!(
            self,
            MarqueeError::Configuration { .. }
                | MarqueeError::Repository(_)
                | MarqueeError::Registry(RegistryError::IndexOutOfBounds { .. })
        )
    }
}

pub type Result<T> = std::result::Result<T, MarqueeError>;
