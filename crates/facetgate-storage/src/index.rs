//! In-memory search index backed by a [`MemoryContentStore`].
//!
//! Every query is a full scan in document order; ordering by a property is a
//! stable sort on its first value, nodes lacking the property sort last.

use std::cmp::Ordering;
use std::sync::Arc;

use tracing::trace;

use crate::error::StorageResult;
use crate::filter::{Filter, IndexedDocument};
use crate::memory::MemoryContentStore;
use crate::traits::{NodeId, SearchIndex, SearchQuery};

/// Scan-based implementation of [`SearchIndex`].
#[derive(Debug, Clone)]
pub struct MemorySearchIndex {
    store: Arc<MemoryContentStore>,
}

impl MemorySearchIndex {
    pub fn new(store: Arc<MemoryContentStore>) -> Self {
        Self { store }
    }
}

fn sort_key<'a>(doc: &'a IndexedDocument, property: &str) -> Option<&'a str> {
    doc.properties
        .get(property)
        .and_then(|values| values.first())
        .map(String::as_str)
}

impl SearchIndex for MemorySearchIndex {
    fn search(&self, query: &SearchQuery, authorization: &Filter) -> StorageResult<Vec<NodeId>> {
        let mut hits: Vec<(NodeId, IndexedDocument)> = self
            .store
            .documents()
            .into_iter()
            .filter(|(_, doc)| query.filter.matches(doc) && authorization.matches(doc))
            .collect();

        if let Some(property) = &query.order_by {
            hits.sort_by(|(_, a), (_, b)| {
                match (sort_key(a, property), sort_key(b, property)) {
                    (Some(x), Some(y)) if query.descending => y.cmp(x),
                    (Some(x), Some(y)) => x.cmp(y),
                    (Some(_), None) => Ordering::Less,
                    (None, Some(_)) => Ordering::Greater,
                    (None, None) => Ordering::Equal,
                }
            });
        }

        trace!(query = %query.filter, authorization = %authorization, hits = hits.len(), "index scan");
        Ok(hits.into_iter().map(|(id, _)| id).collect())
    }
}
