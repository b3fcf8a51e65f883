//! Types for the permission resolver.

use facetgate_storage::{Field, IndexedDocument, Node, NodeId, PropertyValue};

/// The facet values of one physical node, as seen by both the resolver and
/// the index.
///
/// Reference properties are already dereferenced to target identifiers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FacetValueSet {
    document: IndexedDocument,
    references: Vec<NodeId>,
}

impl FacetValueSet {
    pub fn from_node(node: &Node) -> Self {
        let references = node
            .properties
            .values()
            .flatten()
            .filter_map(|value| match value {
                PropertyValue::Reference(target) => Some(target.clone()),
                _ => None,
            })
            .collect();
        Self {
            document: IndexedDocument::from_node(node),
            references,
        }
    }

    pub fn from_document(document: IndexedDocument) -> Self {
        Self {
            document,
            references: Vec::new(),
        }
    }

    pub fn id(&self) -> &str {
        &self.document.id
    }

    pub fn values(&self, field: &Field) -> Vec<&str> {
        self.document.values(field)
    }

    pub fn has(&self, field: &Field) -> bool {
        self.document.has(field)
    }

    pub fn contains(&self, field: &Field, value: &str) -> bool {
        self.document.contains(field, value)
    }

    /// Nodes this node points at through reference properties.
    pub fn references(&self) -> &[NodeId] {
        &self.references
    }

    pub fn document(&self) -> &IndexedDocument {
        &self.document
    }
}

/// A reference rule value resolved against the content tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReferenceTarget {
    Resolved(NodeId),
    /// The referenced node does not exist (yet).
    Missing,
}
