//! Film identities and the media links providers produce for them

pub mod film;
pub mod link;

pub use film::{Episode, Film, FilmKind};
pub use link::{Flag, LinkKind, MediaLink, SubtitleSource};
