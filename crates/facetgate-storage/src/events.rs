//! Change notifications delivered to observers on save.

use std::sync::mpsc::Receiver;

use crate::path::is_same_or_descendant;
use crate::traits::{Generation, NodeId};

/// A committed change to the content tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChangeEvent {
    NodeAdded { id: NodeId, path: String },
    /// The node and its whole subtree were removed.
    NodeRemoved { id: NodeId, path: String },
    PropertyChanged { id: NodeId, path: String, name: String },
    /// The node and its whole subtree moved.
    NodeMoved { id: NodeId, from: String, to: String },
}

impl ChangeEvent {
    pub fn id(&self) -> &NodeId {
        match self {
            ChangeEvent::NodeAdded { id, .. }
            | ChangeEvent::NodeRemoved { id, .. }
            | ChangeEvent::PropertyChanged { id, .. }
            | ChangeEvent::NodeMoved { id, .. } => id,
        }
    }

    /// Every path touched by the event.
    pub fn paths(&self) -> Vec<&str> {
        match self {
            ChangeEvent::NodeAdded { path, .. }
            | ChangeEvent::NodeRemoved { path, .. }
            | ChangeEvent::PropertyChanged { path, .. } => vec![path.as_str()],
            ChangeEvent::NodeMoved { from, to, .. } => vec![from.as_str(), to.as_str()],
        }
    }

    /// Removals and moves change the ancestry of a whole subtree.
    pub fn is_structural(&self) -> bool {
        matches!(
            self,
            ChangeEvent::NodeRemoved { .. } | ChangeEvent::NodeMoved { .. }
        )
    }

    /// True when the event touches `path` or anything below it, or when a
    /// removal/move of an ancestor of `path` drags it along.
    pub fn affects(&self, path: &str) -> bool {
        self.paths().into_iter().any(|p| {
            is_same_or_descendant(p, path) || (self.is_structural() && is_same_or_descendant(path, p))
        })
    }
}

/// All events of one save, stamped with the generation it produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeBatch {
    pub generation: Generation,
    pub events: Vec<ChangeEvent>,
}

/// Receiving end of an observer queue.
pub type ChangeReceiver = Receiver<ChangeBatch>;
