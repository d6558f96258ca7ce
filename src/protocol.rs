//! Messages exchanged between backends, the tree model and its GUI.
//!
//! Backends post [`QueryEvent`]s into the model's input channel; the GUI
//! sends [`BrowserInput`] commands through the same channel and observes
//! [`BrowserEvent`]s on a broadcast channel.

use crate::query::{QueryHandle, ResultBatch};
use crate::tree::levels::Category;
use crate::tree::NodeId;

/// Result delivery from a running query.
#[derive(Debug, Clone)]
pub enum QueryEvent {
    NewResults {
        handle: QueryHandle,
        batch: ResultBatch,
    },
    Done {
        handle: QueryHandle,
    },
}

/// Everything the tree model reacts to, in arrival order.
#[derive(Debug, Clone)]
pub enum BrowserInput {
    Query(QueryEvent),
    EnsureChildrenLoaded(NodeId),
    NodeExpanded(NodeId),
    NodeCollapsed(NodeId),
    SetFilter { text: String, auto_expand: bool },
    SetLevels(Vec<Category>),
    /// Backend contents changed; refresh everything that is loaded.
    Refresh,
    /// Deferred start of the loading animation.
    AnimationDelayElapsed { generation: u64 },
    AnimationTick { generation: u64 },
    /// Ends [`crate::tree::CollectionTreeModel::run`].
    Shutdown,
}

impl From<QueryEvent> for BrowserInput {
    fn from(event: QueryEvent) -> Self {
        BrowserInput::Query(event)
    }
}

/// Change notifications for the GUI.
#[derive(Debug, Clone, PartialEq)]
pub enum BrowserEvent {
    /// Rows `first..=last` were inserted under `parent`.
    RowsInserted {
        parent: NodeId,
        first: usize,
        last: usize,
    },
    /// Rows `first..=last` were removed from under `parent`.
    RowsRemoved {
        parent: NodeId,
        first: usize,
        last: usize,
    },
    DataChanged(NodeId),
    /// The view should expand this node.
    ExpandNode(NodeId),
    QueryActivityChanged { active: bool },
    AnimationFrame(u8),
    AllQueriesFinished { auto_expand: bool },
    FilterIgnoredBusy,
    LevelsChanged { header: String },
}
