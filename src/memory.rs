//! In-process collection over an immutable track list.
//!
//! Each query runs on its own worker thread and reports back through the
//! sink it was started with, like any out-of-process backend would.

use std::collections::HashSet;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

use log::{debug, info, warn};
use parking_lot::Mutex;

use crate::collection::Collection;
use crate::error::Result;
use crate::meta::{CollectionId, Entity, Track};
use crate::query::spec::{FilterNode, QuerySpec};
use crate::query::{
    AlbumQueryMode, FilterField, FilterMask, LabelQueryMode, NumberComparison, QueryHandle,
    QueryMaker, QueryState, QueryType, ResultBatch, ResultSink, ReturnFunction,
};

pub struct MemoryCollection {
    id: CollectionId,
    name: String,
    tracks: Arc<Vec<Arc<Track>>>,
    filter_mask: FilterMask,
}

impl MemoryCollection {
    pub fn new(id: CollectionId, name: impl Into<String>, tracks: Vec<Track>) -> Self {
        Self {
            id,
            name: name.into(),
            tracks: Arc::new(tracks.into_iter().map(Arc::new).collect()),
            filter_mask: FilterMask::all(),
        }
    }

    /// Restricts the filters this collection claims to support.
    pub fn with_filter_mask(mut self, filter_mask: FilterMask) -> Self {
        self.filter_mask = filter_mask;
        self
    }

    /// Loads a JSON array of tracks.
    pub fn from_json_file(id: CollectionId, path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        let tracks: Vec<Track> = serde_json::from_str(&text)?;
        info!(
            "Loaded {} track(s) into collection {} from {}",
            tracks.len(),
            id,
            path.display()
        );
        let name = path
            .file_stem()
            .and_then(|stem| stem.to_str())
            .unwrap_or(id.as_str())
            .to_string();
        Ok(Self::new(id, name, tracks))
    }

    pub fn tracks(&self) -> &[Arc<Track>] {
        &self.tracks
    }
}

impl Collection for MemoryCollection {
    fn collection_id(&self) -> &CollectionId {
        &self.id
    }

    fn pretty_name(&self) -> &str {
        &self.name
    }

    fn query_maker(&self) -> Box<dyn QueryMaker> {
        Box::new(MemoryQueryMaker::new(
            Arc::clone(&self.tracks),
            self.filter_mask,
        ))
    }
}

pub struct MemoryQueryMaker {
    handle: QueryHandle,
    spec: QuerySpec,
    tracks: Arc<Vec<Arc<Track>>>,
    filter_mask: FilterMask,
    state: Arc<Mutex<QueryState>>,
    abort: Arc<AtomicBool>,
}

impl MemoryQueryMaker {
    fn new(tracks: Arc<Vec<Arc<Track>>>, filter_mask: FilterMask) -> Self {
        Self {
            handle: QueryHandle::next(),
            spec: QuerySpec::default(),
            tracks,
            filter_mask,
            state: Arc::new(Mutex::new(QueryState::Configuring)),
            abort: Arc::new(AtomicBool::new(false)),
        }
    }

    fn configurable(&self, operation: &str) -> bool {
        let state = *self.state.lock();
        if state != QueryState::Configuring {
            warn!(
                "Ignoring {} on query {:?} in state {:?}",
                operation, self.handle, state
            );
            return false;
        }
        true
    }
}

impl QueryMaker for MemoryQueryMaker {
    fn handle(&self) -> QueryHandle {
        self.handle
    }

    fn state(&self) -> QueryState {
        *self.state.lock()
    }

    fn set_query_type(&mut self, query_type: QueryType) {
        if self.configurable("set_query_type") {
            self.spec.query_type = query_type;
        }
    }

    fn add_match(&mut self, entity: &Entity) {
        if self.configurable("add_match") {
            self.spec.matches.push(entity.clone());
        }
    }

    fn add_filter(&mut self, field: FilterField, text: &str, match_begin: bool, match_end: bool) {
        if self.configurable("add_filter") {
            self.spec
                .add_text_clause(field, text, match_begin, match_end, false);
        }
    }

    fn exclude_filter(
        &mut self,
        field: FilterField,
        text: &str,
        match_begin: bool,
        match_end: bool,
    ) {
        if self.configurable("exclude_filter") {
            self.spec
                .add_text_clause(field, text, match_begin, match_end, true);
        }
    }

    fn add_number_filter(&mut self, field: FilterField, value: i64, cmp: NumberComparison) {
        if self.configurable("add_number_filter") {
            self.spec.add_number_clause(field, value, cmp, false);
        }
    }

    fn exclude_number_filter(&mut self, field: FilterField, value: i64, cmp: NumberComparison) {
        if self.configurable("exclude_number_filter") {
            self.spec.add_number_clause(field, value, cmp, true);
        }
    }

    fn begin_and(&mut self) {
        if self.configurable("begin_and") {
            self.spec.begin_and();
        }
    }

    fn begin_or(&mut self) {
        if self.configurable("begin_or") {
            self.spec.begin_or();
        }
    }

    fn end_group(&mut self) {
        if self.configurable("end_group") {
            self.spec.end_group();
        }
    }

    fn set_album_query_mode(&mut self, mode: AlbumQueryMode) {
        if self.configurable("set_album_query_mode") {
            self.spec.album_query_mode = mode;
        }
    }

    fn set_label_query_mode(&mut self, mode: LabelQueryMode) {
        if self.configurable("set_label_query_mode") {
            self.spec.label_query_mode = mode;
        }
    }

    fn order_by(&mut self, field: FilterField, descending: bool) {
        if self.configurable("order_by") {
            self.spec.order_by.push((field, descending));
        }
    }

    fn limit_max_result_size(&mut self, size: usize) {
        if self.configurable("limit_max_result_size") {
            self.spec.limit = Some(size);
        }
    }

    fn set_return_as_data(&mut self, as_data: bool) {
        if self.configurable("set_return_as_data") {
            self.spec.return_as_data = as_data;
        }
    }

    fn add_return_value(&mut self, field: FilterField) {
        if self.configurable("add_return_value") {
            self.spec.return_values.push(field);
        }
    }

    fn add_return_function(&mut self, function: ReturnFunction, field: FilterField) {
        if self.configurable("add_return_function") {
            self.spec.return_functions.push((function, field));
        }
    }

    fn run(&mut self, sink: Arc<dyn ResultSink>) {
        if !self.configurable("run") {
            return;
        }
        // Fail on the caller's thread rather than in the worker.
        let _ = self.spec.filter();
        *self.state.lock() = QueryState::Running;

        let handle = self.handle;
        let spec = self.spec.clone();
        let tracks = Arc::clone(&self.tracks);
        let state = Arc::clone(&self.state);
        let abort = Arc::clone(&self.abort);
        thread::spawn(move || {
            let batch = execute_query(&spec, &tracks);
            if abort.load(Ordering::Acquire) {
                debug!("Memory query {:?} aborted before delivery", handle);
                return;
            }
            if !batch.is_empty() {
                sink.new_results(handle, batch);
            }
            {
                let mut state = state.lock();
                if *state == QueryState::Running {
                    *state = QueryState::Done;
                }
            }
            sink.query_done(handle);
        });
    }

    fn abort_query(&mut self) {
        self.abort.store(true, Ordering::Release);
        let mut state = self.state.lock();
        if *state == QueryState::Running {
            *state = QueryState::Aborted;
        }
    }

    fn valid_filter_mask(&self) -> FilterMask {
        self.filter_mask
    }
}

// ---------------------------------------------------------------------------
// Query evaluation
// ---------------------------------------------------------------------------

enum FieldValue {
    Text(Vec<String>),
    Number(f64),
}

fn field_value(track: &Track, field: FilterField) -> FieldValue {
    let text = |value: &str| FieldValue::Text(vec![value.to_string()]);
    match field {
        FilterField::Title => text(&track.title),
        FilterField::Artist => text(&track.artist),
        FilterField::Album => text(&track.album),
        FilterField::AlbumArtist => text(&track.album_artist),
        FilterField::Genre => text(&track.genre),
        FilterField::Composer => text(&track.composer),
        FilterField::Url => text(&track.url),
        FilterField::Comment => text(&track.comment),
        FilterField::Label => FieldValue::Text(track.labels.clone()),
        FilterField::Year => FieldValue::Number(f64::from(track.year)),
        FilterField::Rating => FieldValue::Number(f64::from(track.rating)),
        FilterField::Score => FieldValue::Number(track.score),
        FilterField::PlayCount => FieldValue::Number(f64::from(track.play_count)),
        FilterField::Length => FieldValue::Number(track.length_ms as f64),
        FilterField::DiscNumber => FieldValue::Number(f64::from(track.disc_number)),
        FilterField::TrackNumber => FieldValue::Number(f64::from(track.track_number)),
        FilterField::Bitrate => FieldValue::Number(f64::from(track.bitrate)),
        FilterField::SampleRate => FieldValue::Number(f64::from(track.sample_rate)),
        FilterField::Filesize => FieldValue::Number(track.filesize as f64),
        FilterField::CreateDate => FieldValue::Number(track.created_at as f64),
        FilterField::FirstPlayed => FieldValue::Number(track.first_played as f64),
        FilterField::LastPlayed => FieldValue::Number(track.last_played as f64),
    }
}

fn text_matches(value: &str, pattern: &str, match_begin: bool, match_end: bool) -> bool {
    let value = value.to_lowercase();
    let pattern = pattern.to_lowercase();
    match (match_begin, match_end) {
        (true, true) => value == pattern,
        (true, false) => value.starts_with(&pattern),
        (false, true) => value.ends_with(&pattern),
        (false, false) => value.contains(&pattern),
    }
}

fn filter_matches(node: &FilterNode, track: &Track) -> bool {
    match node {
        FilterNode::And(children) => children.iter().all(|child| filter_matches(child, track)),
        FilterNode::Or(children) => {
            children.is_empty() || children.iter().any(|child| filter_matches(child, track))
        }
        FilterNode::Text {
            field,
            text,
            match_begin,
            match_end,
            exclude,
        } => {
            let matched = match field_value(track, *field) {
                FieldValue::Text(values) => values
                    .iter()
                    .any(|value| text_matches(value, text, *match_begin, *match_end)),
                FieldValue::Number(number) => {
                    text_matches(&number.to_string(), text, *match_begin, *match_end)
                }
            };
            matched != *exclude
        }
        FilterNode::Number {
            field,
            value,
            cmp,
            exclude,
        } => {
            let matched = match field_value(track, *field) {
                FieldValue::Number(number) => {
                    let value = *value as f64;
                    match cmp {
                        NumberComparison::Equals => number == value,
                        NumberComparison::GreaterThan => number > value,
                        NumberComparison::LessThan => number < value,
                    }
                }
                FieldValue::Text(_) => false,
            };
            matched != *exclude
        }
    }
}

fn entity_matches(entity: &Entity, track: &Track) -> bool {
    match entity {
        Entity::Track(other) => other.identity() == track.identity(),
        Entity::Artist(name) => track.artist == **name,
        Entity::AlbumArtist(name) => !track.is_compilation && track.album_artist == **name,
        Entity::Album(album) => {
            track.album == album.name
                && track.is_compilation == album.is_compilation
                && (album.is_compilation || track.album_artist == album.album_artist)
        }
        Entity::Genre(name) => track.genre == **name,
        Entity::Composer(name) => track.composer == **name,
        Entity::Year(year) => track.year == *year,
        Entity::Label(name) => track.labels.iter().any(|label| label == &**name),
    }
}

fn track_selected(spec: &QuerySpec, track: &Track) -> bool {
    let album_ok = match spec.album_query_mode {
        AlbumQueryMode::All => true,
        AlbumQueryMode::OnlyCompilations => track.is_compilation,
        AlbumQueryMode::OnlyNormalAlbums => !track.is_compilation,
    };
    let label_ok = match spec.label_query_mode {
        LabelQueryMode::All => true,
        LabelQueryMode::OnlyWithLabels => !track.labels.is_empty(),
        LabelQueryMode::OnlyWithoutLabels => track.labels.is_empty(),
    };
    album_ok
        && label_ok
        && spec.matches.iter().all(|entity| entity_matches(entity, track))
        && filter_matches(spec.filter(), track)
}

fn compare_tracks(spec: &QuerySpec, left: &Track, right: &Track) -> std::cmp::Ordering {
    for (field, descending) in &spec.order_by {
        let ordering = match (field_value(left, *field), field_value(right, *field)) {
            (FieldValue::Number(a), FieldValue::Number(b)) => a.total_cmp(&b),
            (FieldValue::Text(a), FieldValue::Text(b)) => a
                .join(",")
                .to_lowercase()
                .cmp(&b.join(",").to_lowercase()),
            _ => std::cmp::Ordering::Equal,
        };
        let ordering = if *descending {
            ordering.reverse()
        } else {
            ordering
        };
        if ordering != std::cmp::Ordering::Equal {
            return ordering;
        }
    }
    std::cmp::Ordering::Equal
}

fn grouped_entities(query_type: QueryType, track: &Arc<Track>) -> Vec<Entity> {
    match query_type {
        QueryType::Track | QueryType::Custom => vec![Entity::Track(Arc::clone(track))],
        QueryType::Artist => vec![Entity::Artist(Arc::from(track.artist.as_str()))],
        QueryType::AlbumArtist if track.is_compilation => Vec::new(),
        QueryType::AlbumArtist => vec![Entity::AlbumArtist(Arc::from(
            track.album_artist.as_str(),
        ))],
        QueryType::Album => vec![Entity::Album(Arc::new(track.album_entity()))],
        QueryType::Genre => vec![Entity::Genre(Arc::from(track.genre.as_str()))],
        QueryType::Composer => vec![Entity::Composer(Arc::from(track.composer.as_str()))],
        QueryType::Year => vec![Entity::Year(track.year)],
        QueryType::Label => track
            .labels
            .iter()
            .map(|label| Entity::Label(Arc::from(label.as_str())))
            .collect(),
    }
}

fn custom_rows(spec: &QuerySpec, tracks: &[Arc<Track>]) -> Vec<String> {
    let render = |value: FieldValue| match value {
        FieldValue::Text(values) => values.join(", "),
        FieldValue::Number(number) => number.to_string(),
    };
    let mut rows = Vec::new();
    for track in tracks {
        for field in &spec.return_values {
            rows.push(render(field_value(track, *field)));
        }
    }
    for (function, field) in &spec.return_functions {
        let numbers = tracks.iter().filter_map(|track| match field_value(track, *field) {
            FieldValue::Number(number) => Some(number),
            FieldValue::Text(_) => None,
        });
        let result = match function {
            ReturnFunction::Count => tracks.len() as f64,
            ReturnFunction::Sum => numbers.sum(),
            ReturnFunction::Min => numbers.fold(f64::INFINITY, f64::min),
            ReturnFunction::Max => numbers.fold(f64::NEG_INFINITY, f64::max),
        };
        let result = if result.is_finite() { result } else { 0.0 };
        rows.push(result.to_string());
    }
    rows
}

fn typed_batch(query_type: QueryType, entities: Vec<Entity>) -> ResultBatch {
    macro_rules! collect_variant {
        ($variant:ident, $batch:ident) => {
            ResultBatch::$batch(
                entities
                    .into_iter()
                    .filter_map(|entity| match entity {
                        Entity::$variant(value) => Some(value),
                        _ => None,
                    })
                    .collect(),
            )
        };
    }
    match query_type {
        QueryType::Track | QueryType::Custom => collect_variant!(Track, Tracks),
        QueryType::Artist => collect_variant!(Artist, Artists),
        QueryType::AlbumArtist => collect_variant!(AlbumArtist, AlbumArtists),
        QueryType::Album => collect_variant!(Album, Albums),
        QueryType::Genre => collect_variant!(Genre, Genres),
        QueryType::Composer => collect_variant!(Composer, Composers),
        QueryType::Year => collect_variant!(Year, Years),
        QueryType::Label => collect_variant!(Label, Labels),
    }
}

/// Evaluates a query against a track list.
pub fn execute_query(spec: &QuerySpec, tracks: &[Arc<Track>]) -> ResultBatch {
    let mut selected: Vec<Arc<Track>> = tracks
        .iter()
        .filter(|track| track_selected(spec, track))
        .cloned()
        .collect();

    if spec.query_type == QueryType::Custom {
        return ResultBatch::Custom(custom_rows(spec, &selected));
    }

    if spec.query_type == QueryType::Track {
        selected.sort_by(|left, right| compare_tracks(spec, left, right));
    }

    let mut seen = HashSet::new();
    let mut entities: Vec<Entity> = selected
        .iter()
        .flat_map(|track| grouped_entities(spec.query_type, track))
        .filter(|entity| seen.insert(entity.key(None)))
        .collect();

    if spec.query_type != QueryType::Track && !spec.order_by.is_empty() {
        let descending = spec.order_by[0].1;
        entities.sort_by(|left, right| {
            let ordering = match (left, right) {
                (Entity::Year(a), Entity::Year(b)) => a.cmp(b),
                _ => left.name().to_lowercase().cmp(&right.name().to_lowercase()),
            };
            if descending {
                ordering.reverse()
            } else {
                ordering
            }
        });
    }

    if let Some(limit) = spec.limit {
        entities.truncate(limit);
    }

    if spec.return_as_data {
        ResultBatch::Data(entities)
    } else {
        typed_batch(spec.query_type, entities)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::meta::Album;
    use crate::protocol::QueryEvent;
    use crate::query::ChannelSink;
    use tokio::sync::mpsc::unbounded_channel;

    fn track(title: &str, artist: &str, album: &str, year: i32) -> Track {
        Track {
            uid: format!("{}-{}", artist, title),
            title: title.to_string(),
            artist: artist.to_string(),
            album_artist: artist.to_string(),
            album: album.to_string(),
            year,
            ..Track::default()
        }
    }

    fn sample_tracks() -> Vec<Arc<Track>> {
        let mut compilation = track("Hey Ya", "OutKast", "Now 2004", 2004);
        compilation.is_compilation = true;
        compilation.album_artist = String::new();
        let mut labelled = track("Time", "Pink Floyd", "The Dark Side of the Moon", 1973);
        labelled.labels = vec!["classic".to_string()];
        labelled.rating = 9;
        vec![
            Arc::new(track("Money", "Pink Floyd", "The Dark Side of the Moon", 1973)),
            Arc::new(labelled),
            Arc::new(track("Moonage Daydream", "David Bowie", "Ziggy Stardust", 1972)),
            Arc::new(compilation),
        ]
    }

    fn names(batch: ResultBatch) -> Vec<String> {
        batch
            .into_entities()
            .iter()
            .map(|entity| entity.name())
            .collect()
    }

    #[test]
    fn test_artist_query_deduplicates() {
        let spec = QuerySpec {
            query_type: QueryType::Artist,
            ..QuerySpec::default()
        };
        let batch = execute_query(&spec, &sample_tracks());
        assert!(matches!(batch, ResultBatch::Artists(_)));
        assert_eq!(names(batch), vec!["Pink Floyd", "David Bowie", "OutKast"]);
    }

    #[test]
    fn test_album_modes_split_compilations() {
        let mut spec = QuerySpec {
            query_type: QueryType::Album,
            album_query_mode: AlbumQueryMode::OnlyCompilations,
            ..QuerySpec::default()
        };
        assert_eq!(names(execute_query(&spec, &sample_tracks())), vec!["Now 2004"]);

        spec.album_query_mode = AlbumQueryMode::OnlyNormalAlbums;
        assert_eq!(
            names(execute_query(&spec, &sample_tracks())),
            vec!["The Dark Side of the Moon", "Ziggy Stardust"]
        );
    }

    #[test]
    fn test_matches_and_or_filter() {
        let mut spec = QuerySpec {
            query_type: QueryType::Track,
            ..QuerySpec::default()
        };
        spec.matches.push(Entity::Album(Arc::new(Album {
            name: "The Dark Side of the Moon".to_string(),
            album_artist: "Pink Floyd".to_string(),
            is_compilation: false,
            year: 1973,
        })));
        spec.begin_or();
        spec.add_number_clause(FilterField::Rating, 7, NumberComparison::GreaterThan, false);
        spec.add_text_clause(FilterField::Title, "mon", true, false, false);
        spec.end_group();
        spec.order_by.push((FilterField::Title, false));

        assert_eq!(names(execute_query(&spec, &sample_tracks())), vec!["Money", "Time"]);
    }

    #[test]
    fn test_exclude_filter_negates() {
        let mut spec = QuerySpec::default();
        spec.add_text_clause(FilterField::Title, "moon", false, false, true);
        let titles = names(execute_query(&spec, &sample_tracks()));
        assert!(!titles.contains(&"Moonage Daydream".to_string()));
        assert_eq!(titles.len(), 3);
    }

    #[test]
    fn test_label_modes() {
        let spec = QuerySpec {
            query_type: QueryType::Track,
            label_query_mode: LabelQueryMode::OnlyWithoutLabels,
            ..QuerySpec::default()
        };
        let titles = names(execute_query(&spec, &sample_tracks()));
        assert!(!titles.contains(&"Time".to_string()));

        let spec = QuerySpec {
            query_type: QueryType::Label,
            ..QuerySpec::default()
        };
        assert_eq!(names(execute_query(&spec, &sample_tracks())), vec!["classic"]);
    }

    #[test]
    fn test_year_order_and_limit() {
        let spec = QuerySpec {
            query_type: QueryType::Year,
            order_by: vec![(FilterField::Year, true)],
            limit: Some(2),
            ..QuerySpec::default()
        };
        let batch = execute_query(&spec, &sample_tracks());
        assert_eq!(batch, ResultBatch::Years(vec![2004, 1973]));
    }

    #[test]
    fn test_custom_query_returns_rows() {
        let spec = QuerySpec {
            query_type: QueryType::Custom,
            return_functions: vec![
                (ReturnFunction::Count, FilterField::Title),
                (ReturnFunction::Max, FilterField::Year),
            ],
            ..QuerySpec::default()
        };
        let batch = execute_query(&spec, &sample_tracks());
        assert_eq!(
            batch,
            ResultBatch::Custom(vec!["4".to_string(), "2004".to_string()])
        );
    }

    #[test]
    fn test_query_runs_on_worker_and_posts_completion() {
        let collection = MemoryCollection::new(
            CollectionId::new("local"),
            "Local",
            sample_tracks().iter().map(|track| (**track).clone()).collect(),
        );
        let mut maker = collection.query_maker();
        maker.set_query_type(QueryType::Artist);
        let (tx, mut rx) = unbounded_channel::<QueryEvent>();
        maker.run(Arc::new(ChannelSink::new(tx)));

        let mut received = Vec::new();
        loop {
            match rx.blocking_recv() {
                Some(QueryEvent::NewResults { batch, .. }) => received.extend(names(batch)),
                Some(QueryEvent::Done { handle }) => {
                    assert_eq!(handle, maker.handle());
                    break;
                }
                None => panic!("sink dropped before completion"),
            }
        }
        assert_eq!(received.len(), 3);
        assert_eq!(maker.state(), QueryState::Done);
    }
}
