//! Provider metadata as published in repository manifests.
//!
//! Field names follow the manifest JSON (camelCase). `version_code` is the
//! only field consulted when deciding whether an installed provider is
//! outdated; `version_name` is for display.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::media::FilmKind;

/// Provider author credit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Author {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub social_link: Option<String>,
}

/// Language of the content a provider serves.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Language {
    Multiple,
    Specific(String),
}

impl From<String> for Language {
    fn from(value: String) -> Self {
        if value.eq_ignore_ascii_case("multiple") {
            Language::Multiple
        } else {
            Language::Specific(value)
        }
    }
}

impl From<Language> for String {
    fn from(language: Language) -> Self {
        match language {
            Language::Multiple => "Multiple".to_string(),
            Language::Specific(code) => code,
        }
    }
}

/// Kind of titles a provider can serve.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ProviderType {
    All,
    Movie,
    TvShow,
    Custom(String),
}

impl ProviderType {
    /// Whether this provider can serve titles of `kind`.
    ///
    /// Custom types are assumed to serve everything.
    pub fn supports(&self, kind: FilmKind) -> bool {
        match self {
            ProviderType::All | ProviderType::Custom(_) => true,
            ProviderType::Movie => kind == FilmKind::Movie,
            ProviderType::TvShow => kind == FilmKind::TvShow,
        }
    }
}

impl From<String> for ProviderType {
    fn from(value: String) -> Self {
        let normalized: String = value
            .chars()
            .filter(|c| c.is_ascii_alphanumeric())
            .collect::<String>()
            .to_ascii_lowercase();

        match normalized.as_str() {
            "all" => ProviderType::All,
            "movie" | "movies" => ProviderType::Movie,
            "tv" | "tvshow" | "tvshows" => ProviderType::TvShow,
            _ => ProviderType::Custom(value),
        }
    }
}

impl From<ProviderType> for String {
    fn from(provider_type: ProviderType) -> Self {
        match provider_type {
            ProviderType::All => "All".to_string(),
            ProviderType::Movie => "Movie".to_string(),
            ProviderType::TvShow => "TvShow".to_string(),
            ProviderType::Custom(name) => name,
        }
    }
}

/// Operational status announced by the provider's author.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProviderStatus {
    #[serde(alias = "working", alias = "WORKING")]
    Working,
    #[serde(alias = "maintenance", alias = "MAINTENANCE")]
    Maintenance,
    #[serde(alias = "down", alias = "DOWN")]
    Down,
    #[serde(alias = "beta", alias = "BETA")]
    Beta,
}

impl ProviderStatus {
    /// Whether resolution should skip the provider until its author
    /// reports it working again.
    pub fn is_unavailable(self) -> bool {
        matches!(self, ProviderStatus::Maintenance | ProviderStatus::Down)
    }
}

/// Metadata describing one published provider version.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderMetadata {
    /// Stable opaque key
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub authors: Vec<Author>,
    pub repository_url: String,
    /// Download URL of the provider bundle
    pub build_url: String,
    #[serde(default)]
    pub changelog: String,
    pub version_name: String,
    pub version_code: i64,
    #[serde(default)]
    pub adult: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon_url: Option<String>,
    pub language: Language,
    pub provider_type: ProviderType,
    pub status: ProviderStatus,
}

impl ProviderMetadata {
    /// Minimal metadata for a provider known only by its runtime name.
    pub fn placeholder(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            id: name.clone(),
            name,
            authors: Vec::new(),
            repository_url: String::new(),
            build_url: String::new(),
            changelog: String::new(),
            version_name: "0.0.0".to_string(),
            version_code: 0,
            adult: false,
            description: None,
            icon_url: None,
            language: Language::Multiple,
            provider_type: ProviderType::All,
            status: ProviderStatus::Working,
        }
    }

    /// File name of the bundle, taken from the last segment of `build_url`.
    pub fn bundle_filename(&self) -> Option<String> {
        let url = url::Url::parse(&self.build_url).ok()?;
        url.path_segments()?
            .next_back()
            .filter(|segment| !segment.is_empty())
            .map(str::to_string)
    }
}

/// Installation state of a provider relative to its repository.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ProviderInstallationStatus {
    NotInstalled,
    Installing,
    Installed,
    Outdated,
}

impl ProviderInstallationStatus {
    /// Derives the status from installed and remote version codes.
    ///
    /// An install in progress wins over every comparison. A missing remote
    /// version keeps an installed provider `Installed`.
    pub fn evaluate(installed: Option<i64>, remote: Option<i64>, installing: bool) -> Self {
        if installing {
            return ProviderInstallationStatus::Installing;
        }

        match (installed, remote) {
            (None, _) => ProviderInstallationStatus::NotInstalled,
            (Some(installed), Some(remote)) if remote > installed => {
                ProviderInstallationStatus::Outdated
            }
            (Some(_), _) => ProviderInstallationStatus::Installed,
        }
    }

    pub fn is_installed(self) -> bool {
        matches!(
            self,
            ProviderInstallationStatus::Installed | ProviderInstallationStatus::Outdated
        )
    }
}

impl fmt::Display for ProviderInstallationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProviderInstallationStatus::NotInstalled => write!(f, "not installed"),
            ProviderInstallationStatus::Installing => write!(f, "installing"),
            ProviderInstallationStatus::Installed => write!(f, "installed"),
            ProviderInstallationStatus::Outdated => write!(f, "outdated"),
        }
    }
}
