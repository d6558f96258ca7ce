//! Arena storage for tree nodes.
//!
//! Parents own their children through ordered id lists; every back
//! reference (parent, collection) is a plain id. Ids carry a generation so a
//! stale id never resolves to a node that later reused its slot.

use crate::meta::{CollectionId, Entity};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId {
    index: u32,
    generation: u32,
}

/// Synthetic grouping nodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SpecialKind {
    /// Compilation albums under an artist listing.
    VariousArtists,
    /// Tracks without any label under a label listing.
    NoLabel,
}

#[derive(Debug, Clone, PartialEq)]
pub enum NodeKind {
    Root,
    Collection(CollectionId),
    Data(Entity),
    Special(SpecialKind),
}

#[derive(Debug, Clone)]
pub struct TreeNode {
    pub kind: NodeKind,
    pub parent: Option<NodeId>,
    pub children: Vec<NodeId>,
    /// Grouping level of this node; `None` above the first level.
    pub level: Option<usize>,
    pub requires_update: bool,
    /// Collection the node's queries go to; `None` queries all of them.
    pub collection: Option<CollectionId>,
}

impl TreeNode {
    pub fn new(
        kind: NodeKind,
        parent: Option<NodeId>,
        level: Option<usize>,
        collection: Option<CollectionId>,
    ) -> Self {
        let requires_update = !matches!(kind, NodeKind::Data(Entity::Track(_)));
        Self {
            kind,
            parent,
            children: Vec::new(),
            level,
            requires_update,
            collection,
        }
    }

    pub fn entity(&self) -> Option<&Entity> {
        match &self.kind {
            NodeKind::Data(entity) => Some(entity),
            _ => None,
        }
    }

    pub fn is_track(&self) -> bool {
        matches!(self.kind, NodeKind::Data(Entity::Track(_)))
    }

    pub fn special_kind(&self) -> Option<SpecialKind> {
        match self.kind {
            NodeKind::Special(kind) => Some(kind),
            _ => None,
        }
    }
}

struct Slot {
    generation: u32,
    node: Option<TreeNode>,
}

#[derive(Default)]
pub struct NodeArena {
    slots: Vec<Slot>,
    free: Vec<u32>,
}

impl NodeArena {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, node: TreeNode) -> NodeId {
        if let Some(index) = self.free.pop() {
            let slot = &mut self.slots[index as usize];
            slot.node = Some(node);
            return NodeId {
                index,
                generation: slot.generation,
            };
        }
        let index = u32::try_from(self.slots.len()).expect("node arena exceeded u32 slots");
        self.slots.push(Slot {
            generation: 0,
            node: Some(node),
        });
        NodeId {
            index,
            generation: 0,
        }
    }

    pub fn get(&self, id: NodeId) -> Option<&TreeNode> {
        self.slots
            .get(id.index as usize)
            .filter(|slot| slot.generation == id.generation)
            .and_then(|slot| slot.node.as_ref())
    }

    pub fn get_mut(&mut self, id: NodeId) -> Option<&mut TreeNode> {
        self.slots
            .get_mut(id.index as usize)
            .filter(|slot| slot.generation == id.generation)
            .and_then(|slot| slot.node.as_mut())
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.get(id).is_some()
    }

    /// Frees the slot; the id and every copy of it become stale.
    pub fn remove(&mut self, id: NodeId) -> Option<TreeNode> {
        let slot = self.slots.get_mut(id.index as usize)?;
        if slot.generation != id.generation {
            return None;
        }
        let node = slot.node.take()?;
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(id.index);
        Some(node)
    }

    pub fn len(&self) -> usize {
        self.slots.iter().filter(|slot| slot.node.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// `id` and all of its descendants, children before their parents.
    pub fn subtree(&self, id: NodeId) -> Vec<NodeId> {
        let mut ordered = Vec::new();
        let mut stack = vec![(id, false)];
        while let Some((current, visited)) = stack.pop() {
            let Some(node) = self.get(current) else {
                continue;
            };
            if visited {
                ordered.push(current);
                continue;
            }
            stack.push((current, true));
            for child in node.children.iter().rev() {
                stack.push((*child, false));
            }
        }
        ordered
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn artist(name: &str) -> TreeNode {
        TreeNode::new(NodeKind::Data(Entity::Artist(Arc::from(name))), None, Some(0), None)
    }

    #[test]
    fn test_removed_ids_do_not_alias_new_nodes() {
        let mut arena = NodeArena::new();
        let first = arena.insert(artist("A"));
        assert!(arena.remove(first).is_some());
        let second = arena.insert(artist("B"));
        assert!(!arena.contains(first));
        assert!(arena.contains(second));
        assert!(arena.remove(first).is_none());
        assert_eq!(arena.len(), 1);
    }

    #[test]
    fn test_subtree_lists_children_before_parent() {
        let mut arena = NodeArena::new();
        let root = arena.insert(TreeNode::new(NodeKind::Root, None, None, None));
        let child = arena.insert(artist("A"));
        let grandchild = arena.insert(artist("B"));
        arena
            .get_mut(root)
            .expect("root exists")
            .children
            .push(child);
        arena
            .get_mut(child)
            .expect("child exists")
            .children
            .push(grandchild);

        assert_eq!(arena.subtree(root), vec![grandchild, child, root]);
    }

    #[test]
    fn test_tracks_start_fresh() {
        let track = TreeNode::new(
            NodeKind::Data(Entity::Track(Arc::default())),
            None,
            Some(2),
            None,
        );
        assert!(!track.requires_update);
        assert!(artist("A").requires_update);
    }
}
