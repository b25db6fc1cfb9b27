//! Media links returned by providers.
//!
//! A link is either a playable stream or a subtitle track. Flags annotate
//! access constraints and provenance; a link carries each flag at most once.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Where a subtitle track comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SubtitleSource {
    Online,
    Local,
    Embedded,
}

/// Link annotation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Flag {
    /// Link only works from the IP address that requested it
    IpLocked,
    /// Link stops working at the given instant
    Expires { at: DateTime<Utc> },
    /// Requests must carry these headers
    RequiresAuth { headers: BTreeMap<String, String> },
    /// Link originates from a reputable, named streaming service
    #[serde(rename_all = "camelCase")]
    Trusted {
        provider_name: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        rating: Option<f32>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        logo_url: Option<String>,
    },
}

impl Flag {
    /// Creates a trusted flag without rating or logo.
    pub fn trusted(provider_name: impl Into<String>) -> Self {
        Flag::Trusted {
            provider_name: provider_name.into(),
            rating: None,
            logo_url: None,
        }
    }

    fn same_kind(&self, other: &Flag) -> bool {
        std::mem::discriminant(self) == std::mem::discriminant(other)
    }
}

/// Stream or subtitle payload of a link.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum LinkKind {
    Stream,
    Subtitle {
        language: String,
        source: SubtitleSource,
    },
}

/// Machine-usable link for a film or episode.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MediaLink {
    pub name: String,
    pub url: String,
    #[serde(default)]
    pub flags: Vec<Flag>,
    #[serde(flatten)]
    pub kind: LinkKind,
}

impl MediaLink {
    /// Creates a playable stream link.
    pub fn stream(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
            flags: Vec::new(),
            kind: LinkKind::Stream,
        }
    }

    /// Creates a subtitle link.
    pub fn subtitle(
        name: impl Into<String>,
        url: impl Into<String>,
        language: impl Into<String>,
        source: SubtitleSource,
    ) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
            flags: Vec::new(),
            kind: LinkKind::Subtitle {
                language: language.into(),
                source,
            },
        }
    }

    /// Adds a flag, replacing any existing flag of the same kind.
    pub fn with_flag(mut self, flag: Flag) -> Self {
        self.flags.retain(|existing| !existing.same_kind(&flag));
        self.flags.push(flag);
        self
    }

    pub fn is_stream(&self) -> bool {
        matches!(self.kind, LinkKind::Stream)
    }

    pub fn is_trusted(&self) -> bool {
        self.trusted_provider().is_some()
    }

    /// Name of the streaming service vouching for this link.
    pub fn trusted_provider(&self) -> Option<&str> {
        self.flags.iter().find_map(|flag| match flag {
            Flag::Trusted { provider_name, .. } => Some(provider_name.as_str()),
            _ => None,
        })
    }

    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.flags.iter().find_map(|flag| match flag {
            Flag::Expires { at } => Some(*at),
            _ => None,
        })
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    #[test]
    fn test_with_flag_replaces_same_kind() {
        let link = MediaLink::stream("1080p", "https://cdn.example/a.m3u8")
            .with_flag(Flag::trusted("Netflix"))
            .with_flag(Flag::IpLocked)
            .with_flag(Flag::trusted("Prime Video"));

        assert_eq!(link.flags.len(), 2);
        assert_eq!(link.trusted_provider(), Some("Prime Video"));
    }

    #[test]
    fn test_link_classification() {
        let expiry = Utc.with_ymd_and_hms(2030, 1, 1, 0, 0, 0).unwrap();
        let stream = MediaLink::stream("720p", "https://cdn.example/b.mp4")
            .with_flag(Flag::Expires { at: expiry });
        let subtitle = MediaLink::subtitle(
            "English",
            "https://subs.example/en.vtt",
            "en",
            SubtitleSource::Online,
        );

        assert!(stream.is_stream());
        assert!(!stream.is_trusted());
        assert_eq!(stream.expires_at(), Some(expiry));
        assert!(!subtitle.is_stream());
    }

    #[test]
    fn test_link_json_shape() {
        let subtitle = MediaLink::subtitle("Deutsch", "file:///subs/de.srt", "de", SubtitleSource::Local)
            .with_flag(Flag::IpLocked);

        let json = serde_json::to_value(&subtitle).unwrap();
        assert_eq!(json["kind"], "subtitle");
        assert_eq!(json["language"], "de");
        assert_eq!(json["source"], "local");
        assert_eq!(json["flags"][0]["type"], "ipLocked");

        let back: MediaLink = serde_json::from_value(json).unwrap();
        assert_eq!(back, subtitle);
    }
}
