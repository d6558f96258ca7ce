//! Resolving a selection of tree nodes into the tracks below them.

use std::collections::HashSet;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use log::debug;
use parking_lot::Mutex;
use tokio::sync::oneshot;

use crate::error::{BrowserError, Result};
use crate::meta::{Entity, Track};
use crate::query::aggregate::AggregateQueryMaker;
use crate::query::{QueryHandle, QueryMaker, ResultBatch, ResultSink};

/// Tracks known up front plus queries for subtrees that are not loaded.
#[derive(Default)]
pub struct TransferPayload {
    pub resolved: Vec<Arc<Track>>,
    pub queries: Vec<Box<dyn QueryMaker>>,
}

impl TransferPayload {
    pub fn is_empty(&self) -> bool {
        self.resolved.is_empty() && self.queries.is_empty()
    }

    /// Runs the outstanding queries together. The returned future yields the
    /// resolved tracks followed by everything the queries found, sorted by
    /// album, disc, track number and title.
    pub fn resolve(self) -> PendingTracks {
        let (sender, receiver) = oneshot::channel();
        let collector = Arc::new(TrackCollector {
            state: Mutex::new(CollectorState {
                tracks: Vec::new(),
                seen: HashSet::new(),
                sender: Some(sender),
            }),
        });
        collector.push(self.resolved);

        let mut query = AggregateQueryMaker::new(self.queries);
        debug!("Resolving transfer through query {:?}", query.handle());
        query.run(collector);
        PendingTracks {
            receiver,
            query,
            finished: false,
        }
    }
}

struct CollectorState {
    tracks: Vec<Arc<Track>>,
    seen: HashSet<String>,
    sender: Option<oneshot::Sender<Vec<Arc<Track>>>>,
}

struct TrackCollector {
    state: Mutex<CollectorState>,
}

impl TrackCollector {
    fn push(&self, tracks: impl IntoIterator<Item = Arc<Track>>) {
        let mut state = self.state.lock();
        for track in tracks {
            if state.seen.insert(track.identity().to_string()) {
                state.tracks.push(track);
            }
        }
    }
}

impl ResultSink for TrackCollector {
    fn new_results(&self, _handle: QueryHandle, batch: ResultBatch) {
        self.push(
            batch
                .into_entities()
                .into_iter()
                .filter_map(|entity| match entity {
                    Entity::Track(track) => Some(track),
                    _ => None,
                }),
        );
    }

    fn query_done(&self, _handle: QueryHandle) {
        let (mut tracks, sender) = {
            let mut state = self.state.lock();
            (std::mem::take(&mut state.tracks), state.sender.take())
        };
        let Some(sender) = sender else {
            return;
        };
        sort_for_transfer(&mut tracks);
        let _ = sender.send(tracks);
    }
}

pub fn sort_for_transfer(tracks: &mut [Arc<Track>]) {
    tracks.sort_by(|left, right| {
        left.album
            .to_lowercase()
            .cmp(&right.album.to_lowercase())
            .then(left.disc_number.cmp(&right.disc_number))
            .then(left.track_number.cmp(&right.track_number))
            .then_with(|| left.title.to_lowercase().cmp(&right.title.to_lowercase()))
    });
}

/// Tracks of a transfer that may still be loading.
///
/// Await it, or call [`PendingTracks::blocking_wait`] outside of an async
/// runtime. Dropping it before completion aborts the queries.
pub struct PendingTracks {
    receiver: oneshot::Receiver<Vec<Arc<Track>>>,
    query: AggregateQueryMaker,
    finished: bool,
}

impl PendingTracks {
    pub fn cancel(&mut self) {
        if self.finished {
            return;
        }
        debug!("Cancelling transfer query {:?}", self.query.handle());
        self.query.abort_query();
        self.receiver.close();
        self.finished = true;
    }

    pub fn blocking_wait(mut self) -> Result<Vec<Arc<Track>>> {
        let (_, placeholder) = oneshot::channel();
        let receiver = std::mem::replace(&mut self.receiver, placeholder);
        let result = receiver
            .blocking_recv()
            .map_err(|_| BrowserError::TransferCancelled);
        self.finished = true;
        result
    }
}

impl Future for PendingTracks {
    type Output = Result<Vec<Arc<Track>>>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let poll = Pin::new(&mut self.receiver).poll(cx);
        if poll.is_ready() {
            self.finished = true;
        }
        poll.map(|result| result.map_err(|_| BrowserError::TransferCancelled))
    }
}

impl Drop for PendingTracks {
    fn drop(&mut self) {
        if !self.finished {
            self.query.abort_query();
        }
    }
}
