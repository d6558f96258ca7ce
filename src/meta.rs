//! Immutable metadata snapshots shared between backends, queries and the tree.
//!
//! Entities are handed around behind `Arc` so that a tree node, a pending
//! query's match chain and a transfer payload can all hold the same value
//! without copying or coordinating lifetimes.

use std::fmt;
use std::sync::Arc;

/// Identifies one backend collection.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Deserialize, serde::Serialize)]
pub struct CollectionId(String);

impl CollectionId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CollectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One track as stored by a backend. Timestamps are unix seconds, 0 = never.
#[derive(Debug, Clone, Default, PartialEq, serde::Deserialize, serde::Serialize)]
#[serde(default)]
pub struct Track {
    pub uid: String,
    pub url: String,
    pub title: String,
    pub artist: String,
    pub album: String,
    pub album_artist: String,
    pub is_compilation: bool,
    pub genre: String,
    pub composer: String,
    pub year: i32,
    pub labels: Vec<String>,
    pub comment: String,
    pub rating: i32,
    pub score: f64,
    pub play_count: u32,
    pub length_ms: i64,
    pub disc_number: u32,
    pub track_number: u32,
    pub bitrate: u32,
    pub sample_rate: u32,
    pub filesize: i64,
    pub created_at: i64,
    pub first_played: i64,
    pub last_played: i64,
}

impl Track {
    /// Stable identity of the track; falls back to the url when no uid is set.
    pub fn identity(&self) -> &str {
        if self.uid.is_empty() {
            &self.url
        } else {
            &self.uid
        }
    }

    pub fn album_entity(&self) -> Album {
        Album {
            name: self.album.clone(),
            album_artist: if self.is_compilation {
                String::new()
            } else {
                self.album_artist.clone()
            },
            is_compilation: self.is_compilation,
            year: self.year,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct Album {
    pub name: String,
    /// Empty for compilations.
    pub album_artist: String,
    pub is_compilation: bool,
    pub year: i32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EntityKind {
    Track,
    Artist,
    AlbumArtist,
    Album,
    Genre,
    Composer,
    Year,
    Label,
}

/// A domain object a tree node or query match refers to.
#[derive(Debug, Clone, PartialEq)]
pub enum Entity {
    Track(Arc<Track>),
    Artist(Arc<str>),
    AlbumArtist(Arc<str>),
    Album(Arc<Album>),
    Genre(Arc<str>),
    Composer(Arc<str>),
    Year(i32),
    Label(Arc<str>),
}

impl Entity {
    pub fn kind(&self) -> EntityKind {
        match self {
            Entity::Track(_) => EntityKind::Track,
            Entity::Artist(_) => EntityKind::Artist,
            Entity::AlbumArtist(_) => EntityKind::AlbumArtist,
            Entity::Album(_) => EntityKind::Album,
            Entity::Genre(_) => EntityKind::Genre,
            Entity::Composer(_) => EntityKind::Composer,
            Entity::Year(_) => EntityKind::Year,
            Entity::Label(_) => EntityKind::Label,
        }
    }

    /// Raw name as stored; empty when the backend had no value.
    pub fn name(&self) -> String {
        match self {
            Entity::Track(track) => track.title.clone(),
            Entity::Artist(name)
            | Entity::AlbumArtist(name)
            | Entity::Genre(name)
            | Entity::Composer(name)
            | Entity::Label(name) => name.to_string(),
            Entity::Album(album) => album.name.clone(),
            Entity::Year(0) => String::new(),
            Entity::Year(year) => year.to_string(),
        }
    }

    pub fn as_track(&self) -> Option<&Arc<Track>> {
        match self {
            Entity::Track(track) => Some(track),
            _ => None,
        }
    }

    /// Identity used for diffing children and remembering expansion.
    pub fn key(&self, collection: Option<&CollectionId>) -> EntityKey {
        let (name, qualifier) = match self {
            Entity::Track(track) => (track.identity().to_string(), String::new()),
            Entity::Album(album) => (album.name.clone(), album.album_artist.clone()),
            other => (other.name(), String::new()),
        };
        EntityKey {
            collection: collection.cloned(),
            kind: self.kind(),
            name,
            qualifier,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EntityKey {
    pub collection: Option<CollectionId>,
    pub kind: EntityKind,
    pub name: String,
    pub qualifier: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_album_key_distinguishes_album_artist() {
        let first = Entity::Album(Arc::new(Album {
            name: "Greatest Hits".to_string(),
            album_artist: "Queen".to_string(),
            ..Album::default()
        }));
        let second = Entity::Album(Arc::new(Album {
            name: "Greatest Hits".to_string(),
            album_artist: "ABBA".to_string(),
            ..Album::default()
        }));
        assert_ne!(first.key(None), second.key(None));
    }

    #[test]
    fn test_track_identity_falls_back_to_url() {
        let track = Track {
            url: "file:///music/a.flac".to_string(),
            ..Track::default()
        };
        assert_eq!(track.identity(), "file:///music/a.flac");
        let key = Entity::Track(Arc::new(track)).key(Some(&CollectionId::new("local")));
        assert_eq!(key.name, "file:///music/a.flac");
        assert_eq!(key.collection, Some(CollectionId::new("local")));
    }

    #[test]
    fn test_compilation_album_drops_album_artist() {
        let track = Track {
            album: "Now 42".to_string(),
            album_artist: "Various".to_string(),
            is_compilation: true,
            ..Track::default()
        };
        let album = track.album_entity();
        assert!(album.is_compilation);
        assert!(album.album_artist.is_empty());
    }
}
