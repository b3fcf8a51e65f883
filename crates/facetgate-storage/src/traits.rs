//! Store and index interfaces consumed by the authorization engine.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::StorageResult;
use crate::events::ChangeReceiver;
use crate::filter::Filter;
use crate::path::Segment;

/// Node type marking a document.
pub const DOCUMENT_TYPE: &str = "hippo:document";
/// Node type marking a handle: a container of same-name document variants.
pub const HANDLE_TYPE: &str = "hippo:handle";

/// Physical node identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId(String);

impl NodeId {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Generates a fresh random identifier.
    pub fn random() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Monotonic content generation, advanced on every committed save that
/// carried at least one change.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct Generation(u64);

impl Generation {
    pub const ZERO: Generation = Generation(0);

    pub fn new(value: u64) -> Self {
        Self(value)
    }

    pub fn next(self) -> Self {
        Self(self.0 + 1)
    }

    pub fn value(self) -> u64 {
        self.0
    }
}

impl fmt::Display for Generation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "g{}", self.0)
    }
}

/// A single property value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PropertyValue {
    String(String),
    Name(String),
    Boolean(bool),
    Long(i64),
    Reference(NodeId),
}

impl PropertyValue {
    pub fn string(value: impl Into<String>) -> Self {
        PropertyValue::String(value.into())
    }

    /// The string form used for facet matching and indexing. References
    /// render as the target identifier.
    pub fn to_facet_string(&self) -> String {
        match self {
            PropertyValue::String(s) | PropertyValue::Name(s) => s.clone(),
            PropertyValue::Boolean(b) => b.to_string(),
            PropertyValue::Long(n) => n.to_string(),
            PropertyValue::Reference(id) => id.to_string(),
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            PropertyValue::String(s) | PropertyValue::Name(s) => Some(s),
            PropertyValue::Reference(id) => Some(id.as_str()),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            PropertyValue::Boolean(b) => Some(*b),
            PropertyValue::String(s) => s.parse().ok(),
            _ => None,
        }
    }
}

/// A snapshot of a physical node as returned by the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub id: NodeId,
    pub name: String,
    /// 1-based same-name-sibling index.
    pub index: u32,
    pub path: String,
    pub parent: Option<NodeId>,
    pub primary_type: String,
    pub mixin_types: Vec<String>,
    pub properties: BTreeMap<String, Vec<PropertyValue>>,
    /// Identifiers of all ancestors, root first.
    pub ancestors: Vec<NodeId>,
}

impl Node {
    pub fn segment(&self) -> Segment {
        Segment::new(self.name.clone(), self.index)
    }

    pub fn property(&self, name: &str) -> Option<&[PropertyValue]> {
        self.properties.get(name).map(Vec::as_slice)
    }

    /// First value of a property rendered as a string.
    pub fn string_property(&self, name: &str) -> Option<String> {
        self.property(name)
            .and_then(|values| values.first())
            .map(PropertyValue::to_facet_string)
    }

    /// All values of a property rendered as strings; empty when absent.
    pub fn string_values(&self, name: &str) -> Vec<String> {
        self.property(name)
            .map(|values| values.iter().map(PropertyValue::to_facet_string).collect())
            .unwrap_or_default()
    }

    pub fn bool_property(&self, name: &str) -> Option<bool> {
        self.property(name)
            .and_then(|values| values.first())
            .and_then(PropertyValue::as_bool)
    }

    /// True when the primary type or one of the mixins equals `node_type`.
    pub fn is_node_type(&self, node_type: &str) -> bool {
        self.primary_type == node_type || self.mixin_types.iter().any(|m| m == node_type)
    }

    pub fn is_document(&self) -> bool {
        self.is_node_type(DOCUMENT_TYPE)
    }

    pub fn is_handle(&self) -> bool {
        self.is_node_type(HANDLE_TYPE)
    }
}

/// Abstract interface to the hierarchical content store.
///
/// Implementations must be thread-safe. All calls are synchronous; a host
/// wrapping a remote store applies its own concurrency strategy.
pub trait ContentStore: Send + Sync {
    /// Gets a node by identifier.
    fn get_node(&self, id: &NodeId) -> StorageResult<Node>;

    /// Gets a node by absolute path.
    fn get_node_by_path(&self, path: &str) -> StorageResult<Node>;

    /// Lists the children of a node in storage order.
    fn children(&self, id: &NodeId) -> StorageResult<Vec<Node>>;

    /// Reads a property of a node. `Ok(None)` when the node has no such property.
    fn property(&self, id: &NodeId, name: &str) -> StorageResult<Option<Vec<PropertyValue>>> {
        Ok(self.get_node(id)?.properties.get(name).cloned())
    }

    /// Returns true when a node exists at `path`.
    fn node_exists(&self, path: &str) -> bool {
        self.get_node_by_path(path).is_ok()
    }

    /// The generation of the last committed save.
    fn generation(&self) -> Generation;

    /// Registers a new change queue. Every subsequent save delivers one
    /// batch to each registered queue.
    fn observe(&self) -> ChangeReceiver;

    /// Commits pending changes and notifies observers.
    fn save(&self) -> StorageResult<Generation>;
}

/// A query against the search index.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchQuery {
    /// Caller supplied constraint.
    pub filter: Filter,
    /// Property to order by. Without it the hit order is unspecified.
    pub order_by: Option<String>,
    pub descending: bool,
}

impl SearchQuery {
    pub fn new(filter: Filter) -> Self {
        Self {
            filter,
            order_by: None,
            descending: false,
        }
    }

    pub fn with_order_by(mut self, property: impl Into<String>) -> Self {
        self.order_by = Some(property.into());
        self
    }

    pub fn descending(mut self) -> Self {
        self.descending = true;
        self
    }

    /// True when hits are returned in a deterministic order.
    pub fn is_ordered(&self) -> bool {
        self.order_by.is_some()
    }
}

/// Abstract interface to the search index.
pub trait SearchIndex: Send + Sync {
    /// Executes the query with `authorization` AND'ed to it and returns every
    /// hit in query order. Paging is applied by the caller.
    fn search(&self, query: &SearchQuery, authorization: &Filter) -> StorageResult<Vec<NodeId>>;
}
