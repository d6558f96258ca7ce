//! Grouping categories the tree can be organised by.

use crate::meta::EntityKind;
use crate::query::{FilterField, QueryType};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Deserialize, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    Artist,
    AlbumArtist,
    Album,
    Genre,
    Composer,
    Year,
    Label,
}

impl Category {
    pub fn from_name(name: &str) -> Option<Self> {
        let category = match name.trim().to_lowercase().replace(['-', ' '], "_").as_str() {
            "artist" => Category::Artist,
            "album_artist" | "albumartist" => Category::AlbumArtist,
            "album" => Category::Album,
            "genre" => Category::Genre,
            "composer" => Category::Composer,
            "year" => Category::Year,
            "label" => Category::Label,
            _ => return None,
        };
        Some(category)
    }

    /// Name used in config files and on the command line.
    pub fn config_name(self) -> &'static str {
        match self {
            Category::Artist => "artist",
            Category::AlbumArtist => "album_artist",
            Category::Album => "album",
            Category::Genre => "genre",
            Category::Composer => "composer",
            Category::Year => "year",
            Category::Label => "label",
        }
    }

    pub fn query_type(self) -> QueryType {
        match self {
            Category::Artist => QueryType::Artist,
            Category::AlbumArtist => QueryType::AlbumArtist,
            Category::Album => QueryType::Album,
            Category::Genre => QueryType::Genre,
            Category::Composer => QueryType::Composer,
            Category::Year => QueryType::Year,
            Category::Label => QueryType::Label,
        }
    }

    /// Field searched by bare filter words while this level is active.
    pub fn filter_field(self) -> FilterField {
        match self {
            Category::Artist => FilterField::Artist,
            Category::AlbumArtist => FilterField::AlbumArtist,
            Category::Album => FilterField::Album,
            Category::Genre => FilterField::Genre,
            Category::Composer => FilterField::Composer,
            Category::Year => FilterField::Year,
            Category::Label => FilterField::Label,
        }
    }

    pub fn entity_kind(self) -> EntityKind {
        match self {
            Category::Artist => EntityKind::Artist,
            Category::AlbumArtist => EntityKind::AlbumArtist,
            Category::Album => EntityKind::Album,
            Category::Genre => EntityKind::Genre,
            Category::Composer => EntityKind::Composer,
            Category::Year => EntityKind::Year,
            Category::Label => EntityKind::Label,
        }
    }

    pub fn display_name(self, show_years: bool) -> &'static str {
        match self {
            Category::Album if show_years => "Year - Album",
            Category::Album => "Album",
            Category::Artist => "Track Artist",
            Category::AlbumArtist => "Album Artist",
            Category::Composer => "Composer",
            Category::Genre => "Genre",
            Category::Year => "Year",
            Category::Label => "Label",
        }
    }

    pub fn icon_name(self) -> &'static str {
        match self {
            Category::Album => "media-optical",
            Category::Artist | Category::AlbumArtist => "view-media-artist",
            Category::Composer => "filename-composer",
            Category::Genre => "favorite-genres",
            Category::Year => "clock",
            Category::Label => "label",
        }
    }

    /// Whether a list of this category can hold a Various Artists node.
    pub fn groups_artists(self) -> bool {
        matches!(self, Category::Artist | Category::AlbumArtist)
    }
}

pub fn header_text(levels: &[Category], show_years: bool) -> String {
    levels
        .iter()
        .map(|level| level.display_name(show_years))
        .collect::<Vec<_>>()
        .join(" / ")
}

/// Parses a comma separated level list such as `artist,album`.
pub fn parse_levels(text: &str) -> Option<Vec<Category>> {
    text.split(',')
        .filter(|part| !part.trim().is_empty())
        .map(Category::from_name)
        .collect()
}
