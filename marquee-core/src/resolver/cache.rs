//! Memory-resident cache of successful resolutions.
//!
//! Entries never expire by time. They are dropped only through explicit
//! invalidation (user refresh or a change of film/episode identity).

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;

use crate::media::MediaLink;

/// Cache key: which provider resolved which title.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub provider_id: String,
    pub film_id: String,
    pub episode_id: Option<String>,
}

impl CacheKey {
    pub fn new(
        provider_id: impl Into<String>,
        film_id: impl Into<String>,
        episode_id: Option<&str>,
    ) -> Self {
        Self {
            provider_id: provider_id.into(),
            film_id: film_id.into(),
            episode_id: episode_id.map(str::to_string),
        }
    }
}

/// Links stored after a successful resolution.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry {
    pub key: CacheKey,
    pub links: Vec<MediaLink>,
    pub resolved_at: DateTime<Utc>,
}

impl CacheEntry {
    pub fn has_stream(&self) -> bool {
        self.links.iter().any(MediaLink::is_stream)
    }

    pub fn has_trusted_stream(&self) -> bool {
        self.links.iter().any(|l| l.is_stream() && l.is_trusted())
    }
}

/// Concurrent map of resolved links.
#[derive(Debug, Default)]
pub struct LinkCache {
    entries: RwLock<HashMap<CacheKey, CacheEntry>>,
}

impl LinkCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &CacheKey) -> Option<CacheEntry> {
        self.entries.read().get(key).cloned()
    }

    /// Stores links for `key`, replacing any previous entry.
    pub fn put(&self, key: CacheKey, links: Vec<MediaLink>) -> CacheEntry {
        let entry = CacheEntry {
            key: key.clone(),
            links,
            resolved_at: Utc::now(),
        };

        tracing::debug!(
            "Caching {} links for {}/{}",
            entry.links.len(),
            key.provider_id,
            key.film_id
        );
        self.entries.write().insert(key, entry.clone());
        entry
    }

    /// Removes one entry, returning whether it existed.
    pub fn invalidate(&self, key: &CacheKey) -> bool {
        let removed = self.entries.write().remove(key).is_some();
        if removed {
            tracing::debug!("Invalidated cache for {}/{}", key.provider_id, key.film_id);
        }
        removed
    }

    /// Removes every provider's entry for a film, or for one of its
    /// episodes when `episode_id` is given. Returns the number removed.
    pub fn invalidate_film(&self, film_id: &str, episode_id: Option<&str>) -> usize {
        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|key, _| {
            let same_film = key.film_id == film_id;
            let same_episode = episode_id.is_none_or(|e| key.episode_id.as_deref() == Some(e));
            !(same_film && same_episode)
        });

        let removed = before - entries.len();
        tracing::debug!("Invalidated {} cache entries for film {}", removed, film_id);
        removed
    }

    pub fn clear(&self) {
        self.entries.write().clear();
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}
