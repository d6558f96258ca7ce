//! Which nodes the user had expanded, keyed so it survives node rebuilds.

use std::collections::HashSet;

use crate::meta::{CollectionId, EntityKey};

use super::node::SpecialKind;

#[derive(Debug, Default)]
pub struct ExpansionState {
    entities: HashSet<EntityKey>,
    collections: HashSet<CollectionId>,
    special_nodes: HashSet<(Option<CollectionId>, SpecialKind)>,
}

impl ExpansionState {
    /// Returns false when the key was already recorded.
    pub fn insert_entity(&mut self, key: EntityKey) -> bool {
        self.entities.insert(key)
    }

    pub fn remove_entity(&mut self, key: &EntityKey) {
        self.entities.remove(key);
    }

    pub fn contains_entity(&self, key: &EntityKey) -> bool {
        self.entities.contains(key)
    }

    pub fn insert_collection(&mut self, id: CollectionId) {
        self.collections.insert(id);
    }

    pub fn remove_collection(&mut self, id: &CollectionId) {
        self.collections.remove(id);
    }

    pub fn contains_collection(&self, id: &CollectionId) -> bool {
        self.collections.contains(id)
    }

    pub fn insert_special(&mut self, collection: Option<CollectionId>, kind: SpecialKind) {
        self.special_nodes.insert((collection, kind));
    }

    pub fn remove_special(&mut self, collection: Option<CollectionId>, kind: SpecialKind) {
        self.special_nodes.remove(&(collection, kind));
    }

    pub fn contains_special(&self, collection: Option<&CollectionId>, kind: SpecialKind) -> bool {
        self.special_nodes.contains(&(collection.cloned(), kind))
    }

    pub fn clear(&mut self) {
        self.entities.clear();
        self.collections.clear();
        self.special_nodes.clear();
    }
}
