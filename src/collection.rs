//! Backend collections and the dependency bundle handed to the tree model.

use std::sync::Arc;

use crate::meta::CollectionId;
use crate::query::aggregate::AggregateQueryMaker;
use crate::query::QueryMaker;

/// A queryable backend.
pub trait Collection: Send + Sync {
    fn collection_id(&self) -> &CollectionId;
    fn pretty_name(&self) -> &str;
    /// A fresh, not yet run query maker.
    fn query_maker(&self) -> Box<dyn QueryMaker>;
}

/// Collections the tree browses, in display order.
#[derive(Clone, Default)]
pub struct BrowserContext {
    collections: Vec<Arc<dyn Collection>>,
}

impl BrowserContext {
    pub fn new(collections: Vec<Arc<dyn Collection>>) -> Self {
        Self { collections }
    }

    pub fn collections(&self) -> &[Arc<dyn Collection>] {
        &self.collections
    }

    pub fn collection(&self, id: &CollectionId) -> Option<&Arc<dyn Collection>> {
        self.collections
            .iter()
            .find(|collection| collection.collection_id() == id)
    }

    /// Query maker scoped to one collection, or spanning all of them when
    /// `collection` is `None`. A single collection is queried directly.
    pub fn query_maker_for(&self, collection: Option<&CollectionId>) -> Box<dyn QueryMaker> {
        if let Some(id) = collection {
            if let Some(collection) = self.collection(id) {
                return collection.query_maker();
            }
            log::warn!("Collection {} is gone, querying nothing", id);
            return Box::new(AggregateQueryMaker::new(Vec::new()));
        }
        if self.collections.len() == 1 {
            return self.collections[0].query_maker();
        }
        Box::new(AggregateQueryMaker::new(
            self.collections
                .iter()
                .map(|collection| collection.query_maker())
                .collect(),
        ))
    }
}
