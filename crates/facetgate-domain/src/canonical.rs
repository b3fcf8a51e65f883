//! Canonical identity mapping.
//!
//! Every node a session sees, physical or virtual, maps to exactly one
//! physical node: its [`PhysicalIdentity`]. Virtual occurrences are tracked
//! in an arena keyed by virtual path which is invalidated wholesale when the
//! content generation changes.

use std::collections::HashMap;
use std::fmt;

use facetgate_storage::{Generation, Node, NodeId};
use serde::{Deserialize, Serialize};

use crate::error::DomainResult;

/// Identity of a physical node.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PhysicalIdentity(NodeId);

impl PhysicalIdentity {
    pub fn new(id: NodeId) -> Self {
        Self(id)
    }

    pub fn node_id(&self) -> &NodeId {
        &self.0
    }

    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }
}

impl From<NodeId> for PhysicalIdentity {
    fn from(id: NodeId) -> Self {
        Self(id)
    }
}

impl fmt::Display for PhysicalIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// A reference to a node as a session sees it.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum NodeHandle {
    Physical(NodeId),
    /// A node below a mirror or faceted navigation root, by virtual path.
    Virtual(String),
}

/// Which variant of a handle was exposed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VariantChoice {
    pub handle: NodeId,
    pub variant: NodeId,
    /// Position of the variant among the handle's variants, 0-based.
    pub position: usize,
}

#[derive(Debug, Clone)]
struct ArenaEntry {
    identity: PhysicalIdentity,
    variant: Option<VariantChoice>,
}

/// Arena of virtual path to physical identity.
#[derive(Debug, Default)]
pub struct CanonicalMapper {
    generation: Generation,
    arena: HashMap<String, ArenaEntry>,
}

impl CanonicalMapper {
    pub fn new(generation: Generation) -> Self {
        Self {
            generation,
            arena: HashMap::new(),
        }
    }

    /// The physical identity behind `handle`. Physical handles map to
    /// themselves; unknown virtual paths map to nothing.
    pub fn canonical_of(&self, handle: &NodeHandle) -> Option<PhysicalIdentity> {
        match handle {
            NodeHandle::Physical(id) => Some(PhysicalIdentity::new(id.clone())),
            NodeHandle::Virtual(path) => self.arena.get(path).map(|e| e.identity.clone()),
        }
    }

    /// The variant chosen for a collapsed handle at `virtual_path`.
    pub fn variant_of(&self, virtual_path: &str) -> Option<&VariantChoice> {
        self.arena.get(virtual_path).and_then(|e| e.variant.as_ref())
    }

    pub fn register(
        &mut self,
        virtual_path: impl Into<String>,
        identity: PhysicalIdentity,
        variant: Option<VariantChoice>,
    ) {
        self.arena
            .insert(virtual_path.into(), ArenaEntry { identity, variant });
    }

    /// Every registered virtual occurrence of `identity`, sorted.
    pub fn occurrences(&self, identity: &PhysicalIdentity) -> Vec<&str> {
        let mut paths: Vec<&str> = self
            .arena
            .iter()
            .filter(|(_, entry)| &entry.identity == identity)
            .map(|(path, _)| path.as_str())
            .collect();
        paths.sort_unstable();
        paths
    }

    /// Drops every mapping when `generation` differs from the arena's.
    /// Returns true when the arena was reset.
    pub fn sync(&mut self, generation: Generation) -> bool {
        if self.generation == generation {
            return false;
        }
        self.generation = generation;
        self.arena.clear();
        true
    }

    pub fn clear(&mut self) {
        self.arena.clear();
    }

    pub fn generation(&self) -> Generation {
        self.generation
    }

    pub fn len(&self) -> usize {
        self.arena.len()
    }

    pub fn is_empty(&self) -> bool {
        self.arena.is_empty()
    }
}

/// Variants of a handle in storage order: its document children.
pub fn variants(children: &[Node]) -> impl Iterator<Item = &Node> {
    children.iter().filter(|child| child.is_document())
}

/// Selects the first variant of `handle` the principal can read, in storage
/// order, and reports which one was chosen.
pub fn representative<'a, F>(
    handle: &Node,
    children: &'a [Node],
    mut readable: F,
) -> DomainResult<Option<(&'a Node, VariantChoice)>>
where
    F: FnMut(&Node) -> DomainResult<bool>,
{
    for (position, variant) in variants(children).enumerate() {
        if readable(variant)? {
            return Ok(Some((
                variant,
                VariantChoice {
                    handle: handle.id.clone(),
                    variant: variant.id.clone(),
                    position,
                },
            )));
        }
    }
    Ok(None)
}
