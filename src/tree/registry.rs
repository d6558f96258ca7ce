//! Bookkeeping for queries the tree is waiting on.

use std::collections::{HashMap, HashSet};

use log::debug;

use crate::meta::Entity;
use crate::query::{QueryHandle, QueryMaker};

use super::node::NodeId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueryPurpose {
    /// Lists the node's children.
    Children,
    /// Decides the Various Artists node under the node.
    Compilations,
    /// Decides the No Labels node under the node.
    NoLabels,
}

pub struct PendingQuery {
    pub node: NodeId,
    pub maker: Box<dyn QueryMaker>,
    /// Batches received so far, applied together on completion.
    pub results: Vec<Entity>,
}

/// A node is registered under at most one query at a time.
#[derive(Default)]
pub struct PendingQueryRegistry {
    normal_queries: HashMap<QueryHandle, PendingQuery>,
    compilation_queries: HashMap<QueryHandle, PendingQuery>,
    no_label_queries: HashMap<QueryHandle, PendingQuery>,
    running_nodes: HashSet<NodeId>,
}

impl PendingQueryRegistry {
    fn map_mut(&mut self, purpose: QueryPurpose) -> &mut HashMap<QueryHandle, PendingQuery> {
        match purpose {
            QueryPurpose::Children => &mut self.normal_queries,
            QueryPurpose::Compilations => &mut self.compilation_queries,
            QueryPurpose::NoLabels => &mut self.no_label_queries,
        }
    }

    fn maps(&self) -> [&HashMap<QueryHandle, PendingQuery>; 3] {
        [
            &self.normal_queries,
            &self.compilation_queries,
            &self.no_label_queries,
        ]
    }

    pub fn register(&mut self, purpose: QueryPurpose, node: NodeId, maker: Box<dyn QueryMaker>) {
        assert!(
            !self.contains_node(node),
            "node {:?} already has a pending query",
            node
        );
        let handle = maker.handle();
        self.map_mut(purpose).insert(
            handle,
            PendingQuery {
                node,
                maker,
                results: Vec::new(),
            },
        );
        self.running_nodes.insert(node);
    }

    pub fn contains_node(&self, node: NodeId) -> bool {
        self.running_nodes.contains(&node)
    }

    /// Returns false when the handle is not (or no longer) registered.
    pub fn append_results(&mut self, handle: QueryHandle, entities: Vec<Entity>) -> bool {
        for map in [
            &mut self.normal_queries,
            &mut self.compilation_queries,
            &mut self.no_label_queries,
        ] {
            if let Some(pending) = map.get_mut(&handle) {
                pending.results.extend(entities);
                return true;
            }
        }
        false
    }

    pub fn take(&mut self, handle: QueryHandle) -> Option<(QueryPurpose, PendingQuery)> {
        for purpose in [
            QueryPurpose::Children,
            QueryPurpose::Compilations,
            QueryPurpose::NoLabels,
        ] {
            if let Some(pending) = self.map_mut(purpose).remove(&handle) {
                self.running_nodes.remove(&pending.node);
                return Some((purpose, pending));
            }
        }
        None
    }

    /// Drops and aborts whatever query the node is waiting on.
    pub fn scrub_node(&mut self, node: NodeId) {
        if !self.running_nodes.remove(&node) {
            return;
        }
        for map in [
            &mut self.normal_queries,
            &mut self.compilation_queries,
            &mut self.no_label_queries,
        ] {
            let handles: Vec<QueryHandle> = map
                .iter()
                .filter(|(_, pending)| pending.node == node)
                .map(|(handle, _)| *handle)
                .collect();
            for handle in handles {
                if let Some(mut pending) = map.remove(&handle) {
                    debug!("Aborting query {:?} for removed node {:?}", handle, node);
                    pending.maker.abort_query();
                }
            }
        }
    }

    pub fn abort_all(&mut self) {
        for map in [
            &mut self.normal_queries,
            &mut self.compilation_queries,
            &mut self.no_label_queries,
        ] {
            for (_, mut pending) in map.drain() {
                pending.maker.abort_query();
            }
        }
        self.running_nodes.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.maps().iter().all(|map| map.is_empty())
    }

    pub fn running_nodes(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.running_nodes.iter().copied()
    }

    pub fn has_running_nodes(&self) -> bool {
        !self.running_nodes.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::testing::RecordingQueryMaker;
    use crate::tree::node::{NodeArena, NodeKind, TreeNode};

    fn node_ids(count: usize) -> Vec<NodeId> {
        let mut arena = NodeArena::new();
        (0..count)
            .map(|_| arena.insert(TreeNode::new(NodeKind::Root, None, None, None)))
            .collect()
    }

    #[test]
    fn test_take_returns_purpose_and_results() {
        let nodes = node_ids(1);
        let maker = RecordingQueryMaker::new();
        let handle = maker.handle();
        let mut registry = PendingQueryRegistry::default();
        registry.register(QueryPurpose::Compilations, nodes[0], Box::new(maker));

        assert!(registry.append_results(handle, vec![Entity::Year(1999)]));
        let (purpose, pending) = registry.take(handle).expect("query is registered");
        assert_eq!(purpose, QueryPurpose::Compilations);
        assert_eq!(pending.results, vec![Entity::Year(1999)]);
        assert!(registry.is_empty());
        assert!(!registry.contains_node(nodes[0]));
        assert!(!registry.append_results(handle, Vec::new()));
    }

    #[test]
    #[should_panic(expected = "already has a pending query")]
    fn test_second_query_for_node_panics() {
        let nodes = node_ids(1);
        let mut registry = PendingQueryRegistry::default();
        registry.register(
            QueryPurpose::Children,
            nodes[0],
            Box::new(RecordingQueryMaker::new()),
        );
        registry.register(
            QueryPurpose::NoLabels,
            nodes[0],
            Box::new(RecordingQueryMaker::new()),
        );
    }

    #[test]
    fn test_scrub_aborts_and_forgets() {
        let nodes = node_ids(2);
        let scrubbed = RecordingQueryMaker::new();
        let kept = RecordingQueryMaker::new();
        let mut registry = PendingQueryRegistry::default();
        registry.register(QueryPurpose::Children, nodes[0], Box::new(scrubbed.clone()));
        registry.register(QueryPurpose::Children, nodes[1], Box::new(kept.clone()));

        registry.scrub_node(nodes[0]);
        assert!(scrubbed.was_aborted());
        assert!(!kept.was_aborted());
        assert!(registry.take(scrubbed.handle()).is_none());
        assert_eq!(registry.running_nodes().collect::<Vec<_>>(), vec![nodes[1]]);
    }
}
