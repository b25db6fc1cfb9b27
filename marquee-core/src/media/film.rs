//! Film and episode identities.
//!
//! Identity comes from an external catalog; ids are treated as opaque,
//! stable strings and double as link cache keys.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Whether a title is a single movie or an episodic show.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum FilmKind {
    Movie,
    TvShow,
}

impl fmt::Display for FilmKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FilmKind::Movie => write!(f, "movie"),
            FilmKind::TvShow => write!(f, "tv show"),
        }
    }
}

/// Title being resolved.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Film {
    /// Stable catalog identifier
    pub id: String,
    pub title: String,
    pub kind: FilmKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub year: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tmdb_id: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub imdb_id: Option<String>,
}

impl Film {
    /// Creates a movie identity without external ids.
    pub fn movie(id: impl Into<String>, title: impl Into<String>) -> Self {
        Self::new(id, title, FilmKind::Movie)
    }

    /// Creates a TV show identity without external ids.
    pub fn tv_show(id: impl Into<String>, title: impl Into<String>) -> Self {
        Self::new(id, title, FilmKind::TvShow)
    }

    fn new(id: impl Into<String>, title: impl Into<String>, kind: FilmKind) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            kind,
            year: None,
            tmdb_id: None,
            imdb_id: None,
        }
    }

    pub fn with_year(mut self, year: u16) -> Self {
        self.year = Some(year);
        self
    }
}

/// Single episode of a TV show.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Episode {
    /// Stable catalog identifier
    pub id: String,
    pub season: u32,
    pub number: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
}

impl Episode {
    pub fn new(id: impl Into<String>, season: u32, number: u32) -> Self {
        Self {
            id: id.into(),
            season,
            number,
            title: None,
        }
    }
}

impl fmt::Display for Episode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "S{:02}E{:02}", self.season, self.number)
    }
}
