//! Centralized configuration for Marquee.
//!
//! All tunable parameters and settings are defined here to avoid
//! hard-coded values scattered throughout the codebase.

use std::path::PathBuf;
use std::time::Duration;

/// Central configuration for all Marquee components.
///
/// Groups related configuration settings into logical sections.
/// Supports environment variable overrides for runtime customization.
#[derive(Debug, Clone, Default)]
pub struct MarqueeConfig {
    pub network: NetworkConfig,
    pub storage: StorageConfig,
    pub resolution: ResolutionConfig,
}

/// HTTP and repository layout configuration.
///
/// Controls request timeouts and where updater manifests live inside a
/// provider repository.
#[derive(Debug, Clone)]
pub struct NetworkConfig {
    /// Timeout for a single GET (manifest or bundle)
    pub request_timeout: Duration,
    /// User agent for HTTP requests
    pub user_agent: String,
    /// Branch holding built provider bundles and the manifest
    pub manifest_branch: String,
    /// Manifest filename, also used for the installed sibling manifest
    pub manifest_filename: String,
    /// Maximum redirects followed per request
    pub max_redirects: usize,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(30),
            user_agent: "marquee/0.1.0".to_string(),
            manifest_branch: "builds".to_string(),
            manifest_filename: "updater.json".to_string(),
            max_redirects: 5,
        }
    }
}

/// On-disk layout for installed providers.
#[derive(Debug, Clone)]
pub struct StorageConfig {
    /// Root directory holding one folder per user
    pub providers_root: PathBuf,
    /// Identifier of the user whose providers are managed
    pub user_id: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            providers_root: PathBuf::from("providers"),
            user_id: "default".to_string(),
        }
    }
}

impl StorageConfig {
    /// Directory holding the current user's installed providers.
    pub fn user_dir(&self) -> PathBuf {
        self.providers_root.join(&self.user_id)
    }

    /// Preference file persisting registry order and enablement.
    pub fn registry_file(&self) -> PathBuf {
        self.user_dir().join("registry.json")
    }
}

/// Media link resolution behavior.
#[derive(Debug, Clone)]
pub struct ResolutionConfig {
    /// Buffered progress states per in-flight resolution
    pub progress_capacity: usize,
    /// Message used when every provider came back empty
    pub unavailable_message: String,
}

impl Default for ResolutionConfig {
    fn default() -> Self {
        Self {
            progress_capacity: 32,
            unavailable_message: "No available links found for this title".to_string(),
        }
    }
}

impl MarqueeConfig {
    /// Creates configuration with environment variable overrides.
    ///
    /// Allows runtime configuration via environment variables while
    /// maintaining sensible defaults. Unset or empty variables keep the
    /// default.
    ///
    /// # Errors
    /// - `MarqueeError::Configuration` - `MARQUEE_REQUEST_TIMEOUT` is not a
    ///   positive number of seconds
    pub fn from_env() -> crate::Result<Self> {
        let mut config = Self::default();

        if let Ok(dir) = std::env::var("MARQUEE_PROVIDERS_DIR") {
            if !dir.is_empty() {
                config.storage.providers_root = PathBuf::from(dir);
            }
        }

        if let Ok(user_id) = std::env::var("MARQUEE_USER_ID") {
            if !user_id.is_empty() {
                config.storage.user_id = user_id;
            }
        }

        if let Ok(timeout) = std::env::var("MARQUEE_REQUEST_TIMEOUT") {
            if !timeout.is_empty() {
                config.network.request_timeout = parse_timeout(&timeout)?;
            }
        }

        if let Ok(user_agent) = std::env::var("MARQUEE_USER_AGENT") {
            if !user_agent.is_empty() {
                config.network.user_agent = user_agent;
            }
        }

        Ok(config)
    }

    /// Creates a configuration optimized for testing.
    pub fn for_testing() -> Self {
        Self {
            network: NetworkConfig {
                request_timeout: Duration::from_secs(5),
                ..Default::default()
            },
            resolution: ResolutionConfig {
                progress_capacity: 8,
                ..Default::default()
            },
            ..Default::default()
        }
    }
}

fn parse_timeout(value: &str) -> crate::Result<Duration> {
    match value.trim().parse::<u64>() {
        Ok(seconds) if seconds > 0 => Ok(Duration::from_secs(seconds)),
        _ => Err(crate::MarqueeError::Configuration {
            reason: format!("MARQUEE_REQUEST_TIMEOUT must be a positive number of seconds, got '{value}'"),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_values() {
        let config = MarqueeConfig::default();

        assert_eq!(config.network.request_timeout, Duration::from_secs(30));
        assert_eq!(config.network.manifest_branch, "builds");
        assert_eq!(config.network.manifest_filename, "updater.json");
        assert_eq!(config.storage.user_id, "default");
        assert_eq!(config.resolution.progress_capacity, 32);
    }

    #[test]
    fn test_storage_layout() {
        let storage = StorageConfig {
            providers_root: PathBuf::from("/data/providers"),
            user_id: "alice".to_string(),
        };

        assert_eq!(storage.user_dir(), PathBuf::from("/data/providers/alice"));
        assert_eq!(
            storage.registry_file(),
            PathBuf::from("/data/providers/alice/registry.json")
        );
    }

    #[test]
    fn test_env_override() {
        unsafe {
            std::env::set_var("MARQUEE_PROVIDERS_DIR", "/tmp/marquee-providers");
            std::env::set_var("MARQUEE_USER_ID", "tester");
            std::env::set_var("MARQUEE_REQUEST_TIMEOUT", "7");
        }

        let config = MarqueeConfig::from_env().unwrap();

        assert_eq!(
            config.storage.providers_root,
            PathBuf::from("/tmp/marquee-providers")
        );
        assert_eq!(config.storage.user_id, "tester");
        assert_eq!(config.network.request_timeout, Duration::from_secs(7));

        // Cleanup
        unsafe {
            std::env::remove_var("MARQUEE_PROVIDERS_DIR");
            std::env::remove_var("MARQUEE_USER_ID");
            std::env::remove_var("MARQUEE_REQUEST_TIMEOUT");
        }
    }

    #[test]
    fn test_malformed_timeout_is_rejected() {
        assert_eq!(parse_timeout(" 12 ").unwrap(), Duration::from_secs(12));

        for value in ["abc", "0", "-5", "1.5"] {
            let error = parse_timeout(value).unwrap_err();
            assert!(
                matches!(error, crate::MarqueeError::Configuration { .. }),
                "{value}"
            );
            assert!(error.is_user_error());
            assert!(error.user_message().contains(value));
        }
    }
}
