//! Query capability implemented by every backend.
//!
//! A query maker is configured with matches, filters and modes, then `run()`
//! once. Results are delivered to a [`ResultSink`] as zero or more typed
//! batches followed by exactly one completion, each tagged with the
//! [`QueryHandle`] of the query that produced it.

pub mod aggregate;
pub mod spec;
#[cfg(test)]
pub mod testing;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use bitflags::bitflags;
use tokio::sync::mpsc::UnboundedSender;

use crate::meta::{Album, Entity, Track};
use crate::protocol::QueryEvent;

static NEXT_QUERY_HANDLE: AtomicU64 = AtomicU64::new(1);

/// Process-unique identity of one query execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct QueryHandle(u64);

impl QueryHandle {
    pub fn next() -> Self {
        Self(NEXT_QUERY_HANDLE.fetch_add(1, Ordering::Relaxed))
    }

    pub fn raw(self) -> u64 {
        self.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum QueryType {
    #[default]
    Track,
    Artist,
    Album,
    AlbumArtist,
    Genre,
    Composer,
    Year,
    Label,
    Custom,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum AlbumQueryMode {
    #[default]
    All,
    OnlyCompilations,
    OnlyNormalAlbums,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum LabelQueryMode {
    #[default]
    All,
    OnlyWithLabels,
    OnlyWithoutLabels,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NumberComparison {
    Equals,
    GreaterThan,
    LessThan,
}

/// Aggregates available to `Custom` queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReturnFunction {
    Count,
    Sum,
    Min,
    Max,
}

/// Track attribute a filter, ordering or return value refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FilterField {
    Title,
    Artist,
    Album,
    AlbumArtist,
    Genre,
    Composer,
    Year,
    Url,
    Comment,
    Label,
    Rating,
    Score,
    PlayCount,
    Length,
    DiscNumber,
    TrackNumber,
    Bitrate,
    SampleRate,
    Filesize,
    CreateDate,
    FirstPlayed,
    LastPlayed,
}

bitflags! {
    /// Filter fields a backend is able to evaluate.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct FilterMask: u32 {
        const TITLE = 1 << 0;
        const ARTIST = 1 << 1;
        const ALBUM = 1 << 2;
        const ALBUM_ARTIST = 1 << 3;
        const GENRE = 1 << 4;
        const COMPOSER = 1 << 5;
        const YEAR = 1 << 6;
        const URL = 1 << 7;
        const COMMENT = 1 << 8;
        const LABEL = 1 << 9;
        const RATING = 1 << 10;
        const SCORE = 1 << 11;
        const PLAY_COUNT = 1 << 12;
        const LENGTH = 1 << 13;
        const DISC_NUMBER = 1 << 14;
        const TRACK_NUMBER = 1 << 15;
        const BITRATE = 1 << 16;
        const SAMPLE_RATE = 1 << 17;
        const FILESIZE = 1 << 18;
        const CREATE_DATE = 1 << 19;
        const FIRST_PLAYED = 1 << 20;
        const LAST_PLAYED = 1 << 21;
    }
}

impl FilterField {
    pub fn mask(self) -> FilterMask {
        match self {
            FilterField::Title => FilterMask::TITLE,
            FilterField::Artist => FilterMask::ARTIST,
            FilterField::Album => FilterMask::ALBUM,
            FilterField::AlbumArtist => FilterMask::ALBUM_ARTIST,
            FilterField::Genre => FilterMask::GENRE,
            FilterField::Composer => FilterMask::COMPOSER,
            FilterField::Year => FilterMask::YEAR,
            FilterField::Url => FilterMask::URL,
            FilterField::Comment => FilterMask::COMMENT,
            FilterField::Label => FilterMask::LABEL,
            FilterField::Rating => FilterMask::RATING,
            FilterField::Score => FilterMask::SCORE,
            FilterField::PlayCount => FilterMask::PLAY_COUNT,
            FilterField::Length => FilterMask::LENGTH,
            FilterField::DiscNumber => FilterMask::DISC_NUMBER,
            FilterField::TrackNumber => FilterMask::TRACK_NUMBER,
            FilterField::Bitrate => FilterMask::BITRATE,
            FilterField::SampleRate => FilterMask::SAMPLE_RATE,
            FilterField::Filesize => FilterMask::FILESIZE,
            FilterField::CreateDate => FilterMask::CREATE_DATE,
            FilterField::FirstPlayed => FilterMask::FIRST_PLAYED,
            FilterField::LastPlayed => FilterMask::LAST_PLAYED,
        }
    }

    /// Resolves a user-facing field name, as typed in `field:value` filters.
    pub fn from_name(name: &str) -> Option<Self> {
        let field = match name.to_lowercase().as_str() {
            "title" => FilterField::Title,
            "artist" => FilterField::Artist,
            "album" => FilterField::Album,
            "albumartist" => FilterField::AlbumArtist,
            "genre" => FilterField::Genre,
            "composer" => FilterField::Composer,
            "year" => FilterField::Year,
            "url" | "filename" => FilterField::Url,
            "comment" => FilterField::Comment,
            "label" => FilterField::Label,
            "rating" => FilterField::Rating,
            "score" => FilterField::Score,
            "playcount" => FilterField::PlayCount,
            "length" => FilterField::Length,
            "discnumber" | "disc" => FilterField::DiscNumber,
            "tracknumber" | "tracknr" | "track" => FilterField::TrackNumber,
            "bitrate" => FilterField::Bitrate,
            "samplerate" => FilterField::SampleRate,
            "filesize" => FilterField::Filesize,
            "added" => FilterField::CreateDate,
            "firstplay" => FilterField::FirstPlayed,
            "lastplay" => FilterField::LastPlayed,
            _ => return None,
        };
        Some(field)
    }

    /// Compared with `add_number_filter` instead of text matching.
    pub fn is_numeric(self) -> bool {
        matches!(
            self,
            FilterField::Year
                | FilterField::Rating
                | FilterField::Score
                | FilterField::PlayCount
                | FilterField::Length
                | FilterField::DiscNumber
                | FilterField::TrackNumber
                | FilterField::Bitrate
                | FilterField::SampleRate
                | FilterField::Filesize
        ) || self.is_date()
    }

    pub fn is_date(self) -> bool {
        matches!(
            self,
            FilterField::CreateDate | FilterField::FirstPlayed | FilterField::LastPlayed
        )
    }
}

/// One delivery of results, typed by the query type that produced it.
#[derive(Debug, Clone, PartialEq)]
pub enum ResultBatch {
    Tracks(Vec<Arc<Track>>),
    Artists(Vec<Arc<str>>),
    AlbumArtists(Vec<Arc<str>>),
    Albums(Vec<Arc<Album>>),
    Genres(Vec<Arc<str>>),
    Composers(Vec<Arc<str>>),
    Years(Vec<i32>),
    Labels(Vec<Arc<str>>),
    /// Results requested through `set_return_as_data`.
    Data(Vec<Entity>),
    /// Rows of a `Custom` query.
    Custom(Vec<String>),
}

impl ResultBatch {
    pub fn len(&self) -> usize {
        match self {
            ResultBatch::Tracks(items) => items.len(),
            ResultBatch::Artists(items)
            | ResultBatch::AlbumArtists(items)
            | ResultBatch::Genres(items)
            | ResultBatch::Composers(items)
            | ResultBatch::Labels(items) => items.len(),
            ResultBatch::Albums(items) => items.len(),
            ResultBatch::Years(items) => items.len(),
            ResultBatch::Data(items) => items.len(),
            ResultBatch::Custom(items) => items.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Converts the batch into generic entities. Custom rows carry no entity
    /// and convert to nothing.
    pub fn into_entities(self) -> Vec<Entity> {
        match self {
            ResultBatch::Tracks(items) => items.into_iter().map(Entity::Track).collect(),
            ResultBatch::Artists(items) => items.into_iter().map(Entity::Artist).collect(),
            ResultBatch::AlbumArtists(items) => {
                items.into_iter().map(Entity::AlbumArtist).collect()
            }
            ResultBatch::Albums(items) => items.into_iter().map(Entity::Album).collect(),
            ResultBatch::Genres(items) => items.into_iter().map(Entity::Genre).collect(),
            ResultBatch::Composers(items) => items.into_iter().map(Entity::Composer).collect(),
            ResultBatch::Years(items) => items.into_iter().map(Entity::Year).collect(),
            ResultBatch::Labels(items) => items.into_iter().map(Entity::Label).collect(),
            ResultBatch::Data(items) => items,
            ResultBatch::Custom(_) => Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryState {
    Configuring,
    Running,
    Done,
    Aborted,
}

/// Receiver of query results. Called from whatever thread the backend runs on.
pub trait ResultSink: Send + Sync {
    fn new_results(&self, handle: QueryHandle, batch: ResultBatch);
    fn query_done(&self, handle: QueryHandle);
}

/// Posts every callback onto a channel so the owner handles it on its own
/// thread instead of the backend's.
pub struct ChannelSink<T> {
    sender: UnboundedSender<T>,
}

impl<T> ChannelSink<T> {
    pub fn new(sender: UnboundedSender<T>) -> Self {
        Self { sender }
    }
}

impl<T: From<QueryEvent> + Send> ResultSink for ChannelSink<T> {
    fn new_results(&self, handle: QueryHandle, batch: ResultBatch) {
        let _ = self
            .sender
            .send(T::from(QueryEvent::NewResults { handle, batch }));
    }

    fn query_done(&self, handle: QueryHandle) {
        let _ = self.sender.send(T::from(QueryEvent::Done { handle }));
    }
}

/// Builder and executor of one backend query.
///
/// Configuration calls made after `run()` are ignored. Group calls must
/// balance; an unmatched `end_group` or running with open groups panics.
pub trait QueryMaker: Send {
    fn handle(&self) -> QueryHandle;
    fn state(&self) -> QueryState;

    fn set_query_type(&mut self, query_type: QueryType);
    fn add_match(&mut self, entity: &Entity);

    fn add_filter(&mut self, field: FilterField, text: &str, match_begin: bool, match_end: bool);
    fn exclude_filter(
        &mut self,
        field: FilterField,
        text: &str,
        match_begin: bool,
        match_end: bool,
    );
    fn add_number_filter(&mut self, field: FilterField, value: i64, cmp: NumberComparison);
    fn exclude_number_filter(&mut self, field: FilterField, value: i64, cmp: NumberComparison);

    fn begin_and(&mut self);
    fn begin_or(&mut self);
    fn end_group(&mut self);

    fn set_album_query_mode(&mut self, mode: AlbumQueryMode);
    fn set_label_query_mode(&mut self, mode: LabelQueryMode);
    fn order_by(&mut self, field: FilterField, descending: bool);
    fn limit_max_result_size(&mut self, size: usize);
    fn set_return_as_data(&mut self, as_data: bool);
    fn add_return_value(&mut self, field: FilterField);
    fn add_return_function(&mut self, function: ReturnFunction, field: FilterField);

    fn run(&mut self, sink: Arc<dyn ResultSink>);
    /// Best-effort; a completion may still be delivered afterwards.
    fn abort_query(&mut self);

    fn valid_filter_mask(&self) -> FilterMask;
}
