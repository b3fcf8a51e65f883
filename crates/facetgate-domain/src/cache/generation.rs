//! Session view of the content generation.

use std::collections::HashMap;

use facetgate_storage::path::parent_path;
use facetgate_storage::{ChangeBatch, Generation, NodeId};

/// Tracks the last observed generation and, per node, the generation of
/// its last change.
///
/// Removals and moves are recorded by path: they change the ancestry, and
/// therefore the facets, of a whole subtree.
///
/// Per-node entries are dropped by [`compact`](Self::compact); afterwards
/// every node reports the compaction generation as its last change.
#[derive(Debug, Clone, Default)]
pub struct GenerationTracker {
    current: Generation,
    floor: Generation,
    by_id: HashMap<NodeId, Generation>,
    structural: HashMap<String, Generation>,
}

impl GenerationTracker {
    pub fn new(current: Generation) -> Self {
        Self {
            current,
            ..Self::default()
        }
    }

    /// The generation of the last observed batch.
    pub fn current(&self) -> Generation {
        self.current
    }

    /// Records a committed batch.
    pub fn observe(&mut self, batch: &ChangeBatch) {
        let generation = batch.generation;
        if generation > self.current {
            self.current = generation;
        }
        for event in &batch.events {
            self.by_id.insert(event.id().clone(), generation);
            if event.is_structural() {
                for path in event.paths() {
                    self.structural.insert(path.to_string(), generation);
                }
            }
        }
    }

    /// Generation of the last change touching the node with `id` at `path`,
    /// directly or through a removal or move of one of its ancestors.
    pub fn changed_at(&self, id: &NodeId, path: &str) -> Generation {
        let mut latest = self.by_id.get(id).copied().unwrap_or(self.floor);
        let mut current = Some(path);
        while let Some(p) = current {
            if let Some(generation) = self.structural.get(p) {
                latest = latest.max(*generation);
            }
            current = parent_path(p);
        }
        latest.max(self.floor)
    }

    /// Forgets per-node history up to the current generation.
    ///
    /// Only sound once every decision computed before now is dropped.
    pub fn compact(&mut self) {
        self.floor = self.current;
        self.by_id.clear();
        self.structural.clear();
    }

    /// Number of per-node and per-path entries held.
    pub fn tracked(&self) -> usize {
        self.by_id.len() + self.structural.len()
    }

    /// True when the node changed after `generation`.
    pub fn changed_since(&self, id: &NodeId, path: &str, generation: Generation) -> bool {
        self.changed_at(id, path) > generation
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use facetgate_storage::ChangeEvent;

    fn batch(generation: u64, events: Vec<ChangeEvent>) -> ChangeBatch {
        ChangeBatch {
            generation: Generation::new(generation),
            events,
        }
    }

    #[test]
    fn test_property_change_is_tracked_per_node() {
        let mut tracker = GenerationTracker::new(Generation::new(1));
        tracker.observe(&batch(
            2,
            vec![ChangeEvent::PropertyChanged {
                id: NodeId::new("a"),
                path: "/a".into(),
                name: "x".into(),
            }],
        ));
        assert_eq!(tracker.current(), Generation::new(2));
        assert!(tracker.changed_since(&NodeId::new("a"), "/a", Generation::new(1)));
        assert!(!tracker.changed_since(&NodeId::new("b"), "/a/b", Generation::new(1)));
    }

    #[test]
    fn test_move_marks_subtree_changed() {
        let mut tracker = GenerationTracker::new(Generation::new(1));
        tracker.observe(&batch(
            2,
            vec![ChangeEvent::NodeMoved {
                id: NodeId::new("f"),
                from: "/old".into(),
                to: "/new".into(),
            }],
        ));
        assert_eq!(
            tracker.changed_at(&NodeId::new("c"), "/new/child"),
            Generation::new(2)
        );
        assert_eq!(
            tracker.changed_at(&NodeId::new("c"), "/old/child"),
            Generation::new(2)
        );
        assert_eq!(tracker.changed_at(&NodeId::new("x"), "/other"), Generation::ZERO);
    }

    #[test]
    fn test_compact_forgets_history_but_keeps_floor() {
        let mut tracker = GenerationTracker::new(Generation::new(1));
        tracker.observe(&batch(
            2,
            vec![
                ChangeEvent::PropertyChanged {
                    id: NodeId::new("a"),
                    path: "/a".into(),
                    name: "x".into(),
                },
                ChangeEvent::NodeRemoved {
                    id: NodeId::new("r"),
                    path: "/r".into(),
                },
            ],
        ));
        assert!(tracker.tracked() > 0);

        tracker.compact();
        assert_eq!(tracker.tracked(), 0);
        assert_eq!(tracker.changed_at(&NodeId::new("a"), "/a"), Generation::new(2));
        assert_eq!(tracker.changed_at(&NodeId::new("b"), "/b"), Generation::new(2));
        assert!(!tracker.changed_since(&NodeId::new("a"), "/a", Generation::new(2)));

        tracker.observe(&batch(
            3,
            vec![ChangeEvent::PropertyChanged {
                id: NodeId::new("a"),
                path: "/a".into(),
                name: "x".into(),
            }],
        ));
        assert_eq!(tracker.changed_at(&NodeId::new("a"), "/a"), Generation::new(3));
        assert_eq!(tracker.tracked(), 1);
    }
}
