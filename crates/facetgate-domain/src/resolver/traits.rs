//! Traits for content lookups needed by the rule compiler.

use facetgate_storage::{ContentStore, NodeId};

/// Resolves reference rule values to node identities.
pub trait ReferenceLookup: Send + Sync {
    /// Resolves an absolute path or a node identifier. `None` when no such
    /// node exists.
    fn lookup(&self, reference: &str) -> Option<ResolvedReference>;
}

/// An existing reference target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedReference {
    pub id: NodeId,
    pub path: String,
}

impl ReferenceLookup for dyn ContentStore + '_ {
    fn lookup(&self, reference: &str) -> Option<ResolvedReference> {
        let node = if reference.starts_with('/') {
            self.get_node_by_path(reference).ok()?
        } else {
            self.get_node(&NodeId::new(reference)).ok()?
        };
        Some(ResolvedReference {
            id: node.id,
            path: node.path,
        })
    }
}
