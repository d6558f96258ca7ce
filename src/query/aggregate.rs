//! Fan-out/join query maker over several child query makers.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use log::{debug, warn};
use parking_lot::Mutex;

use crate::meta::Entity;

use super::{
    AlbumQueryMode, FilterField, FilterMask, LabelQueryMode, NumberComparison, QueryHandle,
    QueryMaker, QueryState, QueryType, ResultBatch, ResultSink, ReturnFunction,
};

/// Broadcasts configuration to every child and completes once all of them
/// have completed. Batches are relayed unmerged, so the same entity may be
/// reported by more than one child.
///
/// Filter clauses only reach children whose filter mask supports the field.
/// `limit_max_result_size` is applied per child.
pub struct AggregateQueryMaker {
    handle: QueryHandle,
    children: Vec<Box<dyn QueryMaker>>,
    join: Option<Arc<JoinShared>>,
}

struct JoinCounter {
    expected: usize,
    finished: HashSet<QueryHandle>,
}

struct JoinShared {
    handle: QueryHandle,
    counter: Mutex<JoinCounter>,
    complete: AtomicBool,
    aborted: AtomicBool,
    sink: Arc<dyn ResultSink>,
}

impl JoinShared {
    fn finish(&self) {
        self.complete.store(true, Ordering::Release);
        if self.aborted.load(Ordering::Acquire) {
            debug!("Aggregate query {:?} joined after abort", self.handle);
            return;
        }
        self.sink.query_done(self.handle);
    }
}

/// Sink handed to each child; relays batches under the aggregate handle.
struct JoinSink {
    shared: Arc<JoinShared>,
}

impl ResultSink for JoinSink {
    fn new_results(&self, _child: QueryHandle, batch: ResultBatch) {
        if self.shared.aborted.load(Ordering::Acquire) {
            return;
        }
        self.shared.sink.new_results(self.shared.handle, batch);
    }

    fn query_done(&self, child: QueryHandle) {
        let all_done = {
            let mut counter = self.shared.counter.lock();
            if !counter.finished.insert(child) {
                debug!(
                    "Ignoring repeated completion from {:?} in aggregate {:?}",
                    child, self.shared.handle
                );
                return;
            }
            counter.finished.len() == counter.expected
        };
        if all_done {
            self.shared.finish();
        }
    }
}

impl AggregateQueryMaker {
    pub fn new(children: Vec<Box<dyn QueryMaker>>) -> Self {
        Self {
            handle: QueryHandle::next(),
            children,
            join: None,
        }
    }

    pub fn child_count(&self) -> usize {
        self.children.len()
    }

    fn configurable(&self, operation: &str) -> bool {
        if self.join.is_some() {
            warn!(
                "Ignoring {} on aggregate query {:?} after run",
                operation, self.handle
            );
            return false;
        }
        true
    }

    fn for_each_child(&mut self, mut apply: impl FnMut(&mut dyn QueryMaker)) {
        for child in &mut self.children {
            apply(child.as_mut());
        }
    }

    fn for_each_capable_child(
        &mut self,
        field: FilterField,
        mut apply: impl FnMut(&mut dyn QueryMaker),
    ) {
        for child in &mut self.children {
            if child.valid_filter_mask().contains(field.mask()) {
                apply(child.as_mut());
            }
        }
    }
}

impl QueryMaker for AggregateQueryMaker {
    fn handle(&self) -> QueryHandle {
        self.handle
    }

    fn state(&self) -> QueryState {
        match &self.join {
            None => QueryState::Configuring,
            Some(join) if join.aborted.load(Ordering::Acquire) => QueryState::Aborted,
            Some(join) if join.complete.load(Ordering::Acquire) => QueryState::Done,
            Some(_) => QueryState::Running,
        }
    }

    fn set_query_type(&mut self, query_type: QueryType) {
        if self.configurable("set_query_type") {
            self.for_each_child(|child| child.set_query_type(query_type));
        }
    }

    fn add_match(&mut self, entity: &Entity) {
        if self.configurable("add_match") {
            self.for_each_child(|child| child.add_match(entity));
        }
    }

    fn add_filter(&mut self, field: FilterField, text: &str, match_begin: bool, match_end: bool) {
        if self.configurable("add_filter") {
            self.for_each_capable_child(field, |child| {
                child.add_filter(field, text, match_begin, match_end)
            });
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
            self.for_each_capable_child(field, |child| {
                child.exclude_filter(field, text, match_begin, match_end)
            });
        }
    }

    fn add_number_filter(&mut self, field: FilterField, value: i64, cmp: NumberComparison) {
        if self.configurable("add_number_filter") {
            self.for_each_capable_child(field, |child| child.add_number_filter(field, value, cmp));
        }
    }

    fn exclude_number_filter(&mut self, field: FilterField, value: i64, cmp: NumberComparison) {
        if self.configurable("exclude_number_filter") {
            self.for_each_capable_child(field, |child| {
                child.exclude_number_filter(field, value, cmp)
            });
        }
    }

    fn begin_and(&mut self) {
        if self.configurable("begin_and") {
            self.for_each_child(|child| child.begin_and());
        }
    }

    fn begin_or(&mut self) {
        if self.configurable("begin_or") {
            self.for_each_child(|child| child.begin_or());
        }
    }

    fn end_group(&mut self) {
        if self.configurable("end_group") {
            self.for_each_child(|child| child.end_group());
        }
    }

    fn set_album_query_mode(&mut self, mode: AlbumQueryMode) {
        if self.configurable("set_album_query_mode") {
            self.for_each_child(|child| child.set_album_query_mode(mode));
        }
    }

    fn set_label_query_mode(&mut self, mode: LabelQueryMode) {
        if self.configurable("set_label_query_mode") {
            self.for_each_child(|child| child.set_label_query_mode(mode));
        }
    }

    fn order_by(&mut self, field: FilterField, descending: bool) {
        if self.configurable("order_by") {
            self.for_each_child(|child| child.order_by(field, descending));
        }
    }

    fn limit_max_result_size(&mut self, size: usize) {
        if self.configurable("limit_max_result_size") {
            self.for_each_child(|child| child.limit_max_result_size(size));
        }
    }

    fn set_return_as_data(&mut self, as_data: bool) {
        if self.configurable("set_return_as_data") {
            self.for_each_child(|child| child.set_return_as_data(as_data));
        }
    }

    fn add_return_value(&mut self, field: FilterField) {
        if self.configurable("add_return_value") {
            self.for_each_child(|child| child.add_return_value(field));
        }
    }

    fn add_return_function(&mut self, function: ReturnFunction, field: FilterField) {
        if self.configurable("add_return_function") {
            self.for_each_child(|child| child.add_return_function(function, field));
        }
    }

    fn run(&mut self, sink: Arc<dyn ResultSink>) {
        if !self.configurable("run") {
            return;
        }
        let shared = Arc::new(JoinShared {
            handle: self.handle,
            counter: Mutex::new(JoinCounter {
                expected: self.children.len(),
                finished: HashSet::new(),
            }),
            complete: AtomicBool::new(false),
            aborted: AtomicBool::new(false),
            sink,
        });
        self.join = Some(Arc::clone(&shared));
        debug!(
            "Running aggregate query {:?} over {} child(ren)",
            self.handle,
            self.children.len()
        );

        if self.children.is_empty() {
            shared.finish();
            return;
        }
        let relay: Arc<dyn ResultSink> = Arc::new(JoinSink {
            shared: Arc::clone(&shared),
        });
        for child in &mut self.children {
            child.run(Arc::clone(&relay));
        }
    }

    fn abort_query(&mut self) {
        if let Some(join) = &self.join {
            join.aborted.store(true, Ordering::Release);
        }
        self.for_each_child(|child| child.abort_query());
    }

    fn valid_filter_mask(&self) -> FilterMask {
        self.children
            .iter()
            .fold(FilterMask::empty(), |mask, child| {
                mask | child.valid_filter_mask()
            })
    }
}
