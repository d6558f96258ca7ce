//! Scriptable query maker and collection used by unit tests.
//!
//! Tests decide when and with what a query completes, which makes ordering
//! properties of the aggregate and the tree deterministic.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::collection::Collection;
use crate::meta::{CollectionId, Entity, EntityKind};

use super::spec::QuerySpec;
use super::{
    AlbumQueryMode, FilterField, FilterMask, LabelQueryMode, NumberComparison, QueryHandle,
    QueryMaker, QueryState, QueryType, ResultBatch, ResultSink, ReturnFunction,
};

#[derive(Debug, Clone, PartialEq)]
pub enum RecordedCall {
    QueryType(QueryType),
    Match(EntityKind, String),
    Filter {
        field: FilterField,
        text: String,
        exclude: bool,
    },
    ExactFilter {
        field: FilterField,
        text: String,
        exclude: bool,
    },
    NumberFilter {
        field: FilterField,
        value: i64,
        cmp: NumberComparison,
        exclude: bool,
    },
    BeginAnd,
    BeginOr,
    EndGroup,
    AlbumMode(AlbumQueryMode),
    LabelMode(LabelQueryMode),
    OrderBy(FilterField, bool),
    Limit(usize),
    ReturnAsData(bool),
    ReturnValue(FilterField),
    ReturnFunction(ReturnFunction, FilterField),
}

struct Recorder {
    calls: Vec<RecordedCall>,
    spec: QuerySpec,
    sink: Option<Arc<dyn ResultSink>>,
    state: QueryState,
    aborted: bool,
}

/// Records every call; clones share the same recording.
#[derive(Clone)]
pub struct RecordingQueryMaker {
    handle: QueryHandle,
    mask: FilterMask,
    recorder: Arc<Mutex<Recorder>>,
}

impl RecordingQueryMaker {
    pub fn new() -> Self {
        Self::with_mask(FilterMask::all())
    }

    pub fn with_mask(mask: FilterMask) -> Self {
        Self {
            handle: QueryHandle::next(),
            mask,
            recorder: Arc::new(Mutex::new(Recorder {
                calls: Vec::new(),
                spec: QuerySpec::default(),
                sink: None,
                state: QueryState::Configuring,
                aborted: false,
            })),
        }
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.recorder.lock().calls.clone()
    }

    pub fn spec(&self) -> QuerySpec {
        self.recorder.lock().spec.clone()
    }

    pub fn is_running(&self) -> bool {
        self.recorder.lock().state == QueryState::Running
    }

    pub fn was_aborted(&self) -> bool {
        self.recorder.lock().aborted
    }

    /// Delivers a batch as the backend would, even after an abort.
    pub fn deliver(&self, batch: ResultBatch) {
        let sink = self.recorder.lock().sink.clone();
        if let Some(sink) = sink {
            sink.new_results(self.handle, batch);
        }
    }

    pub fn complete(&self) {
        let sink = {
            let mut recorder = self.recorder.lock();
            if recorder.state == QueryState::Running {
                recorder.state = QueryState::Done;
            }
            recorder.sink.clone()
        };
        if let Some(sink) = sink {
            sink.query_done(self.handle);
        }
    }

    pub fn finish_with(&self, entities: Vec<Entity>) {
        if !entities.is_empty() {
            self.deliver(ResultBatch::Data(entities));
        }
        self.complete();
    }

    fn record(&self, call: RecordedCall, apply: impl FnOnce(&mut QuerySpec)) {
        let mut recorder = self.recorder.lock();
        recorder.calls.push(call);
        apply(&mut recorder.spec);
    }
}

impl QueryMaker for RecordingQueryMaker {
    fn handle(&self) -> QueryHandle {
        self.handle
    }

    fn state(&self) -> QueryState {
        self.recorder.lock().state
    }

    fn set_query_type(&mut self, query_type: QueryType) {
        self.record(RecordedCall::QueryType(query_type), |spec| {
            spec.query_type = query_type
        });
    }

    fn add_match(&mut self, entity: &Entity) {
        let entity = entity.clone();
        self.record(
            RecordedCall::Match(entity.kind(), entity.name()),
            move |spec| spec.matches.push(entity),
        );
    }

    fn add_filter(&mut self, field: FilterField, text: &str, match_begin: bool, match_end: bool) {
        let call = if match_begin && match_end {
            RecordedCall::ExactFilter {
                field,
                text: text.to_string(),
                exclude: false,
            }
        } else {
            RecordedCall::Filter {
                field,
                text: text.to_string(),
                exclude: false,
            }
        };
        self.record(call, |spec| {
            spec.add_text_clause(field, text, match_begin, match_end, false)
        });
    }

    fn exclude_filter(
        &mut self,
        field: FilterField,
        text: &str,
        match_begin: bool,
        match_end: bool,
    ) {
        let call = if match_begin && match_end {
            RecordedCall::ExactFilter {
                field,
                text: text.to_string(),
                exclude: true,
            }
        } else {
            RecordedCall::Filter {
                field,
                text: text.to_string(),
                exclude: true,
            }
        };
        self.record(call, |spec| {
            spec.add_text_clause(field, text, match_begin, match_end, true)
        });
    }

    fn add_number_filter(&mut self, field: FilterField, value: i64, cmp: NumberComparison) {
        self.record(
            RecordedCall::NumberFilter {
                field,
                value,
                cmp,
                exclude: false,
            },
            |spec| spec.add_number_clause(field, value, cmp, false),
        );
    }

    fn exclude_number_filter(&mut self, field: FilterField, value: i64, cmp: NumberComparison) {
        self.record(
            RecordedCall::NumberFilter {
                field,
                value,
                cmp,
                exclude: true,
            },
            |spec| spec.add_number_clause(field, value, cmp, true),
        );
    }

    fn begin_and(&mut self) {
        self.record(RecordedCall::BeginAnd, QuerySpec::begin_and);
    }

    fn begin_or(&mut self) {
        self.record(RecordedCall::BeginOr, QuerySpec::begin_or);
    }

    fn end_group(&mut self) {
        self.record(RecordedCall::EndGroup, QuerySpec::end_group);
    }

    fn set_album_query_mode(&mut self, mode: AlbumQueryMode) {
        self.record(RecordedCall::AlbumMode(mode), |spec| {
            spec.album_query_mode = mode
        });
    }

    fn set_label_query_mode(&mut self, mode: LabelQueryMode) {
        self.record(RecordedCall::LabelMode(mode), |spec| {
            spec.label_query_mode = mode
        });
    }

    fn order_by(&mut self, field: FilterField, descending: bool) {
        self.record(RecordedCall::OrderBy(field, descending), |spec| {
            spec.order_by.push((field, descending))
        });
    }

    fn limit_max_result_size(&mut self, size: usize) {
        self.record(RecordedCall::Limit(size), |spec| spec.limit = Some(size));
    }

    fn set_return_as_data(&mut self, as_data: bool) {
        self.record(RecordedCall::ReturnAsData(as_data), |spec| {
            spec.return_as_data = as_data
        });
    }

    fn add_return_value(&mut self, field: FilterField) {
        self.record(RecordedCall::ReturnValue(field), |spec| {
            spec.return_values.push(field)
        });
    }

    fn add_return_function(&mut self, function: ReturnFunction, field: FilterField) {
        self.record(RecordedCall::ReturnFunction(function, field), |spec| {
            spec.return_functions.push((function, field))
        });
    }

    fn run(&mut self, sink: Arc<dyn ResultSink>) {
        let mut recorder = self.recorder.lock();
        let _ = recorder.spec.filter();
        recorder.sink = Some(sink);
        recorder.state = QueryState::Running;
    }

    fn abort_query(&mut self) {
        let mut recorder = self.recorder.lock();
        recorder.aborted = true;
        if recorder.state == QueryState::Running {
            recorder.state = QueryState::Aborted;
        }
    }

    fn valid_filter_mask(&self) -> FilterMask {
        self.mask
    }
}

/// Collection whose query makers are kept for the test to complete by hand.
#[derive(Clone)]
pub struct RecordingCollection {
    id: CollectionId,
    mask: FilterMask,
    issued: Arc<Mutex<Vec<RecordingQueryMaker>>>,
}

impl RecordingCollection {
    pub fn new(id: &str) -> Self {
        Self::with_mask(id, FilterMask::all())
    }

    pub fn with_mask(id: &str, mask: FilterMask) -> Self {
        Self {
            id: CollectionId::new(id),
            mask,
            issued: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn issued(&self) -> Vec<RecordingQueryMaker> {
        self.issued.lock().clone()
    }

    /// Query makers that were run and have not completed or been aborted.
    pub fn running(&self) -> Vec<RecordingQueryMaker> {
        self.issued
            .lock()
            .iter()
            .filter(|maker| maker.is_running())
            .cloned()
            .collect()
    }

    pub fn last_running(&self) -> RecordingQueryMaker {
        self.running()
            .pop()
            .expect("a query should be running")
    }
}

impl Collection for RecordingCollection {
    fn collection_id(&self) -> &CollectionId {
        &self.id
    }

    fn pretty_name(&self) -> &str {
        self.id.as_str()
    }

    fn query_maker(&self) -> Box<dyn QueryMaker> {
        let maker = RecordingQueryMaker::with_mask(self.mask);
        self.issued.lock().push(maker.clone());
        Box::new(maker)
    }
}
