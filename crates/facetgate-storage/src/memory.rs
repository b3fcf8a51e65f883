//! In-memory content store for tests and embedded use.
//!
//! The whole tree lives behind one `RwLock`; mutations are visible to
//! readers immediately, while change events are buffered until [`save`]
//! commits them as one [`ChangeBatch`] and advances the generation.
//!
//! [`save`]: ContentStore::save

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{channel, Sender};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tracing::{debug, instrument};

use crate::error::{StorageError, StorageResult};
use crate::events::{ChangeBatch, ChangeEvent, ChangeReceiver};
use crate::filter::IndexedDocument;
use crate::path::{parse_path, Segment};
use crate::traits::{ContentStore, Generation, Node, NodeId, PropertyValue};

/// Primary type of the root node.
pub const ROOT_TYPE: &str = "rep:root";
/// Pseudo property name reported when mixins change.
pub const MIXIN_PROPERTY: &str = "jcr:mixinTypes";

#[derive(Debug, Clone)]
struct NodeRecord {
    id: NodeId,
    name: String,
    parent: Option<NodeId>,
    primary_type: String,
    mixin_types: Vec<String>,
    properties: std::collections::BTreeMap<String, Vec<PropertyValue>>,
    children: Vec<NodeId>,
}

#[derive(Debug)]
struct Tree {
    nodes: HashMap<NodeId, NodeRecord>,
    root: NodeId,
}

impl Tree {
    fn new() -> Self {
        let root = NodeId::random();
        let mut nodes = HashMap::new();
        nodes.insert(
            root.clone(),
            NodeRecord {
                id: root.clone(),
                name: String::new(),
                parent: None,
                primary_type: ROOT_TYPE.to_string(),
                mixin_types: Vec::new(),
                properties: Default::default(),
                children: Vec::new(),
            },
        );
        Self { nodes, root }
    }

    fn record(&self, id: &NodeId) -> StorageResult<&NodeRecord> {
        self.nodes
            .get(id)
            .ok_or_else(|| StorageError::NodeNotFound { id: id.to_string() })
    }

    fn record_mut(&mut self, id: &NodeId) -> StorageResult<&mut NodeRecord> {
        self.nodes
            .get_mut(id)
            .ok_or_else(|| StorageError::NodeNotFound { id: id.to_string() })
    }

    fn resolve(&self, path: &str) -> StorageResult<NodeId> {
        let mut current = self.root.clone();
        for segment in parse_path(path)? {
            let record = self.record(&current)?;
            let mut seen = 0;
            let mut found = None;
            for child_id in &record.children {
                let child = self.record(child_id)?;
                if child.name == segment.name {
                    seen += 1;
                    if seen == segment.index {
                        found = Some(child_id.clone());
                        break;
                    }
                }
            }
            current = found.ok_or_else(|| StorageError::PathNotFound {
                path: path.to_string(),
            })?;
        }
        Ok(current)
    }

    fn sibling_index(&self, record: &NodeRecord) -> u32 {
        let Some(parent) = record.parent.as_ref().and_then(|p| self.nodes.get(p)) else {
            return 1;
        };
        let mut index = 0;
        for child_id in &parent.children {
            if let Some(child) = self.nodes.get(child_id) {
                if child.name == record.name {
                    index += 1;
                }
            }
            if child_id == &record.id {
                break;
            }
        }
        index.max(1)
    }

    fn ancestors(&self, record: &NodeRecord) -> Vec<NodeId> {
        let mut ancestors = Vec::new();
        let mut current = record.parent.clone();
        while let Some(id) = current {
            current = self.nodes.get(&id).and_then(|r| r.parent.clone());
            ancestors.push(id);
        }
        ancestors.reverse();
        ancestors
    }

    fn path_of(&self, record: &NodeRecord) -> String {
        let mut segments = Vec::new();
        let mut current = Some(record);
        while let Some(r) = current {
            if r.parent.is_none() {
                break;
            }
            segments.push(Segment::new(r.name.clone(), self.sibling_index(r)).to_string());
            current = r.parent.as_ref().and_then(|p| self.nodes.get(p));
        }
        if segments.is_empty() {
            return "/".to_string();
        }
        segments.reverse();
        format!("/{}", segments.join("/"))
    }

    fn snapshot(&self, id: &NodeId) -> StorageResult<Node> {
        let record = self.record(id)?;
        Ok(Node {
            id: record.id.clone(),
            name: record.name.clone(),
            index: self.sibling_index(record),
            path: self.path_of(record),
            parent: record.parent.clone(),
            primary_type: record.primary_type.clone(),
            mixin_types: record.mixin_types.clone(),
            properties: record.properties.clone(),
            ancestors: self.ancestors(record),
        })
    }

    /// Pre-order (document order) listing of a subtree.
    fn subtree(&self, id: &NodeId, out: &mut Vec<NodeId>) {
        out.push(id.clone());
        if let Some(record) = self.nodes.get(id) {
            for child in &record.children {
                self.subtree(child, out);
            }
        }
    }

    fn detach(&mut self, id: &NodeId) -> StorageResult<()> {
        let parent = self.record(id)?.parent.clone();
        if let Some(parent) = parent {
            self.record_mut(&parent)?.children.retain(|c| c != id);
        }
        Ok(())
    }
}

fn validate_name(name: &str) -> StorageResult<()> {
    if name.is_empty() || name.contains(['/', '[', ']']) {
        return Err(StorageError::InvalidPath {
            path: name.to_string(),
            message: "node names must be non-empty and must not contain '/', '[' or ']'"
                .to_string(),
        });
    }
    Ok(())
}

/// In-memory implementation of [`ContentStore`].
#[derive(Debug)]
pub struct MemoryContentStore {
    tree: RwLock<Tree>,
    generation: AtomicU64,
    pending: Mutex<Vec<ChangeEvent>>,
    observers: Mutex<Vec<Sender<ChangeBatch>>>,
}

impl Default for MemoryContentStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryContentStore {
    pub fn new() -> Self {
        Self {
            tree: RwLock::new(Tree::new()),
            generation: AtomicU64::new(0),
            pending: Mutex::new(Vec::new()),
            observers: Mutex::new(Vec::new()),
        }
    }

    /// Creates a new in-memory store wrapped in Arc.
    pub fn new_shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    fn record_event(&self, event: ChangeEvent) {
        self.pending.lock().push(event);
    }

    /// Adds a child node with a freshly generated identifier.
    pub fn add_node(
        &self,
        parent_path: &str,
        name: &str,
        primary_type: &str,
    ) -> StorageResult<NodeId> {
        self.add_node_with_id(parent_path, name, primary_type, NodeId::random())
    }

    /// Adds a child node carrying a caller supplied identifier, e.g. when
    /// re-creating a node that was removed earlier.
    pub fn add_node_with_id(
        &self,
        parent_path: &str,
        name: &str,
        primary_type: &str,
        id: NodeId,
    ) -> StorageResult<NodeId> {
        validate_name(name)?;
        let path = {
            let mut tree = self.tree.write();
            let parent = tree.resolve(parent_path)?;
            if tree.nodes.contains_key(&id) {
                return Err(StorageError::ItemExists {
                    path: format!("{parent_path}/{name}"),
                });
            }
            tree.nodes.insert(
                id.clone(),
                NodeRecord {
                    id: id.clone(),
                    name: name.to_string(),
                    parent: Some(parent.clone()),
                    primary_type: primary_type.to_string(),
                    mixin_types: Vec::new(),
                    properties: Default::default(),
                    children: Vec::new(),
                },
            );
            tree.record_mut(&parent)?.children.push(id.clone());
            let record = tree.record(&id)?;
            tree.path_of(record)
        };
        self.record_event(ChangeEvent::NodeAdded {
            id: id.clone(),
            path,
        });
        Ok(id)
    }

    pub fn add_mixin(&self, path: &str, mixin: &str) -> StorageResult<()> {
        let id = {
            let mut tree = self.tree.write();
            let id = tree.resolve(path)?;
            let record = tree.record_mut(&id)?;
            if !record.mixin_types.iter().any(|m| m == mixin) {
                record.mixin_types.push(mixin.to_string());
            }
            id
        };
        self.record_event(ChangeEvent::PropertyChanged {
            id,
            path: path.to_string(),
            name: MIXIN_PROPERTY.to_string(),
        });
        Ok(())
    }

    pub fn set_property(
        &self,
        path: &str,
        name: &str,
        values: Vec<PropertyValue>,
    ) -> StorageResult<()> {
        let id = {
            let mut tree = self.tree.write();
            let id = tree.resolve(path)?;
            tree.record_mut(&id)?
                .properties
                .insert(name.to_string(), values);
            id
        };
        self.record_event(ChangeEvent::PropertyChanged {
            id,
            path: path.to_string(),
            name: name.to_string(),
        });
        Ok(())
    }

    pub fn set_string(&self, path: &str, name: &str, value: &str) -> StorageResult<()> {
        self.set_property(path, name, vec![PropertyValue::string(value)])
    }

    pub fn set_strings(&self, path: &str, name: &str, values: &[&str]) -> StorageResult<()> {
        self.set_property(
            path,
            name,
            values.iter().map(|v| PropertyValue::string(*v)).collect(),
        )
    }

    pub fn set_bool(&self, path: &str, name: &str, value: bool) -> StorageResult<()> {
        self.set_property(path, name, vec![PropertyValue::Boolean(value)])
    }

    /// Stores a reference to the node currently living at `target_path`.
    pub fn set_reference(&self, path: &str, name: &str, target_path: &str) -> StorageResult<()> {
        let target = self.tree.read().resolve(target_path)?;
        self.set_property(path, name, vec![PropertyValue::Reference(target)])
    }

    pub fn remove_property(&self, path: &str, name: &str) -> StorageResult<()> {
        let id = {
            let mut tree = self.tree.write();
            let id = tree.resolve(path)?;
            tree.record_mut(&id)?.properties.remove(name);
            id
        };
        self.record_event(ChangeEvent::PropertyChanged {
            id,
            path: path.to_string(),
            name: name.to_string(),
        });
        Ok(())
    }

    /// Removes a node and its whole subtree.
    pub fn remove_node(&self, path: &str) -> StorageResult<()> {
        let id = {
            let mut tree = self.tree.write();
            let id = tree.resolve(path)?;
            if id == tree.root {
                return Err(StorageError::InvalidOperation {
                    message: "cannot remove the root node".to_string(),
                });
            }
            let mut doomed = Vec::new();
            tree.subtree(&id, &mut doomed);
            tree.detach(&id)?;
            for node in doomed {
                tree.nodes.remove(&node);
            }
            id
        };
        self.record_event(ChangeEvent::NodeRemoved {
            id,
            path: path.to_string(),
        });
        Ok(())
    }

    /// Moves a node below a new parent under a new name. Returns the new path.
    pub fn move_node(
        &self,
        source_path: &str,
        dest_parent_path: &str,
        new_name: &str,
    ) -> StorageResult<String> {
        validate_name(new_name)?;
        let (id, to) = {
            let mut tree = self.tree.write();
            let id = tree.resolve(source_path)?;
            let dest_parent = tree.resolve(dest_parent_path)?;
            if id == tree.root {
                return Err(StorageError::InvalidOperation {
                    message: "cannot move the root node".to_string(),
                });
            }
            let dest_record = tree.record(&dest_parent)?;
            if dest_parent == id || tree.ancestors(dest_record).contains(&id) {
                return Err(StorageError::InvalidOperation {
                    message: format!("cannot move {source_path} below itself"),
                });
            }
            tree.detach(&id)?;
            {
                let record = tree.record_mut(&id)?;
                record.parent = Some(dest_parent.clone());
                record.name = new_name.to_string();
            }
            tree.record_mut(&dest_parent)?.children.push(id.clone());
            let to = tree.path_of(tree.record(&id)?);
            (id, to)
        };
        self.record_event(ChangeEvent::NodeMoved {
            id,
            from: source_path.to_string(),
            to: to.clone(),
        });
        Ok(to)
    }

    /// Deep-copies a subtree below a new parent. Copies get fresh identifiers;
    /// references inside the copy keep pointing at their original targets.
    pub fn copy_node(
        &self,
        source_path: &str,
        dest_parent_path: &str,
        new_name: &str,
    ) -> StorageResult<NodeId> {
        validate_name(new_name)?;
        let (copy_root, added) = {
            let mut tree = self.tree.write();
            let source = tree.resolve(source_path)?;
            let dest_parent = tree.resolve(dest_parent_path)?;
            let mut originals = Vec::new();
            tree.subtree(&source, &mut originals);

            let mut mapping: HashMap<NodeId, NodeId> = HashMap::new();
            for original in &originals {
                mapping.insert(original.clone(), NodeId::random());
            }
            for original in &originals {
                let mut record = tree.record(original)?.clone();
                record.id = mapping[original].clone();
                record.children = record
                    .children
                    .iter()
                    .filter_map(|c| mapping.get(c).cloned())
                    .collect();
                if original == &source {
                    record.name = new_name.to_string();
                    record.parent = Some(dest_parent.clone());
                } else {
                    record.parent = record.parent.as_ref().and_then(|p| mapping.get(p).cloned());
                }
                tree.nodes.insert(record.id.clone(), record);
            }
            let copy_root = mapping[&source].clone();
            tree.record_mut(&dest_parent)?.children.push(copy_root.clone());

            let mut copied = Vec::new();
            tree.subtree(&copy_root, &mut copied);
            let mut added = Vec::with_capacity(copied.len());
            for id in copied {
                let path = tree.path_of(tree.record(&id)?);
                added.push(ChangeEvent::NodeAdded { id, path });
            }
            (copy_root, added)
        };
        self.pending.lock().extend(added);
        Ok(copy_root)
    }

    /// Every node in document order, flattened for indexing.
    pub fn documents(&self) -> Vec<(NodeId, IndexedDocument)> {
        let tree = self.tree.read();
        let mut order = Vec::new();
        tree.subtree(&tree.root, &mut order);
        order
            .into_iter()
            .filter_map(|id| {
                tree.snapshot(&id)
                    .ok()
                    .map(|node| (id, IndexedDocument::from_node(&node)))
            })
            .collect()
    }

    /// Number of changes waiting for the next save.
    pub fn pending_changes(&self) -> usize {
        self.pending.lock().len()
    }
}

impl ContentStore for MemoryContentStore {
    fn get_node(&self, id: &NodeId) -> StorageResult<Node> {
        self.tree.read().snapshot(id)
    }

    fn get_node_by_path(&self, path: &str) -> StorageResult<Node> {
        let tree = self.tree.read();
        let id = tree.resolve(path)?;
        tree.snapshot(&id)
    }

    fn children(&self, id: &NodeId) -> StorageResult<Vec<Node>> {
        let tree = self.tree.read();
        tree.record(id)?
            .children
            .iter()
            .map(|child| tree.snapshot(child))
            .collect()
    }

    fn generation(&self) -> Generation {
        Generation::new(self.generation.load(Ordering::Acquire))
    }

    fn observe(&self) -> ChangeReceiver {
        let (sender, receiver) = channel();
        self.observers.lock().push(sender);
        receiver
    }

    #[instrument(skip(self))]
    fn save(&self) -> StorageResult<Generation> {
        let events = std::mem::take(&mut *self.pending.lock());
        if events.is_empty() {
            return Ok(self.generation());
        }
        let generation = Generation::new(self.generation.fetch_add(1, Ordering::AcqRel) + 1);
        debug!(%generation, changes = events.len(), "committed changes");

        let batch = ChangeBatch { generation, events };
        // Observers whose receiver was dropped are pruned.
        self.observers
            .lock()
            .retain(|observer| observer.send(batch.clone()).is_ok());
        Ok(generation)
    }
}
