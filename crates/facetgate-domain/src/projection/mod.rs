//! Virtual node projection.
//!
//! Mirrors (`hippo:facetselect`) and faceted navigation roots
//! (`hippo:facetsearch`) are physical nodes whose children are computed.
//! The [`Projector`] materializes those children lazily, one parent at a
//! time, and memoizes them in a per-session overlay.
//!
//! # Architecture Decisions
//!
//! - **Overlay per subtree root**: each root moves through
//!   [`ProjectionState`]; a generation change marks every materialized root
//!   stale and drops the overlay wholesale.
//!
//! - **Authorize before projecting**: every physical candidate passes the
//!   session's authorizer before it is exposed. Counts are computed from the
//!   exact candidate list that is materialized.
//!
//! - **Explicit resolution chain**: every virtual node carries the mirror
//!   and facetsearch nodes it was reached through. A nested mirror already on
//!   the chain, a chain longer than [`ProjectionConfig::max_depth`], a
//!   missing docbase and a docbase that is itself virtual all project as
//!   empty.

mod facetsearch;
mod mirror;
mod naming;

pub use facetsearch::{collect_candidates, groups, matching, Candidate, FacetSearchDefinition};
pub use mirror::{apply_constraints, inherit, Constraint, MirrorDefinition, SelectMode};
pub use naming::{encode_name, group_name, virtual_id, SiblingNamer};

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use facetgate_storage::path::Segment;
use facetgate_storage::{
    ContentStore, Generation, IndexedDocument, Node, NodeId, PropertyValue, SearchIndex,
    StorageError,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument, trace};

use crate::authorizer::Authorizer;
use crate::canonical::{variants, CanonicalMapper, PhysicalIdentity, VariantChoice};
use crate::error::{DomainError, DomainResult};
use crate::model::schema::{
    NT_FACETGROUP, NT_FACETRESULT, NT_FACETSEARCH, NT_FACETSELECT, P_COUNT, P_VIRTUAL_ID,
    RESULTSET,
};

/// Collaborators a projection reads through.
#[derive(Clone, Copy)]
pub struct ProjectionContext<'a> {
    pub store: &'a dyn ContentStore,
    pub index: &'a dyn SearchIndex,
    pub authorizer: &'a Authorizer,
}

/// Configuration for virtual projection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectionConfig {
    /// Maximum number of mirror and facetsearch nodes on one resolution
    /// chain.
    pub max_depth: usize,
}

impl Default for ProjectionConfig {
    fn default() -> Self {
        Self { max_depth: 8 }
    }
}

impl ProjectionConfig {
    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }
}

/// Lifecycle of a virtual subtree root.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProjectionState {
    Unmaterialized,
    Materializing,
    Materialized,
    Stale,
}

/// What a virtual node stands for.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum VirtualKind {
    /// A facetselect node seen with its computed children.
    MirrorRoot,
    /// A physical node exposed below a mirror.
    Mirrored,
    /// A facetsearch node seen with its computed children.
    FacetSearchRoot,
    /// The group of candidates carrying `value` for `facet`.
    FacetGroup { facet: String, value: String },
    /// The candidates of a facetsearch level.
    ResultSet,
    /// A candidate document below a result set.
    Result,
}

#[derive(Debug, Clone)]
struct SearchScope {
    /// Virtual path of the facetsearch root; keys the candidate memo.
    root: String,
    definition: FacetSearchDefinition,
    selection: Vec<String>,
}

#[derive(Debug, Clone, Default)]
struct Lineage {
    /// Mirror and facetsearch nodes passed through, outermost first.
    chain: Vec<NodeId>,
    constraints: Vec<Constraint>,
    search: Option<SearchScope>,
}

/// A computed node.
#[derive(Debug, Clone)]
pub struct VirtualNode {
    pub path: String,
    pub name: String,
    /// 1-based same-name-sibling index within the virtual parent.
    pub index: u32,
    pub kind: VirtualKind,
    /// The physical node this node represents.
    pub identity: PhysicalIdentity,
    /// Path of the physical node when it was materialized.
    pub canonical_path: String,
    pub primary_type: String,
    pub properties: BTreeMap<String, Vec<PropertyValue>>,
    pub materialized_at: Generation,
    root: String,
    lineage: Lineage,
}

impl VirtualNode {
    pub fn segment(&self) -> Segment {
        Segment::new(self.name.clone(), self.index)
    }

    pub fn property(&self, name: &str) -> Option<&[PropertyValue]> {
        self.properties.get(name).map(Vec::as_slice)
    }

    pub fn string_property(&self, name: &str) -> Option<String> {
        self.property(name)
            .and_then(|values| values.first())
            .map(PropertyValue::to_facet_string)
    }

    /// The reserved `hippo:count`, when present.
    pub fn count(&self) -> Option<i64> {
        match self.property(P_COUNT)?.first()? {
            PropertyValue::Long(count) => Some(*count),
            _ => None,
        }
    }

    /// The reserved stable identifier.
    pub fn virtual_id(&self) -> Option<String> {
        self.string_property(P_VIRTUAL_ID)
    }

    /// Virtual path of the subtree root this node belongs to.
    pub fn root_path(&self) -> &str {
        &self.root
    }

    /// Effective mirror constraints on this node's children.
    pub fn constraints(&self) -> &[Constraint] {
        &self.lineage.constraints
    }
}

/// Per-session overlay of virtual subtrees.
#[derive(Debug)]
pub struct Projector {
    config: ProjectionConfig,
    generation: Generation,
    states: HashMap<String, ProjectionState>,
    children: HashMap<String, Arc<Vec<VirtualNode>>>,
    candidates: HashMap<String, Arc<Vec<Candidate>>>,
    mapper: CanonicalMapper,
}

impl Projector {
    pub fn new(config: ProjectionConfig, generation: Generation) -> Self {
        Self {
            config,
            generation,
            states: HashMap::new(),
            children: HashMap::new(),
            candidates: HashMap::new(),
            mapper: CanonicalMapper::new(generation),
        }
    }

    pub fn config(&self) -> &ProjectionConfig {
        &self.config
    }

    pub fn generation(&self) -> Generation {
        self.generation
    }

    pub fn mapper(&self) -> &CanonicalMapper {
        &self.mapper
    }

    /// State of the subtree rooted at `root_path`.
    pub fn state(&self, root_path: &str) -> ProjectionState {
        self.states
            .get(root_path)
            .copied()
            .unwrap_or(ProjectionState::Unmaterialized)
    }

    /// Follows the session to `generation`. Returns true when the overlay
    /// went stale.
    pub fn sync(&mut self, generation: Generation) -> bool {
        if generation == self.generation {
            return false;
        }
        self.generation = generation;
        self.invalidate();
        true
    }

    /// Marks every materialized subtree stale and drops the overlay.
    pub fn invalidate(&mut self) {
        for state in self.states.values_mut() {
            if *state == ProjectionState::Materialized {
                *state = ProjectionState::Stale;
            }
        }
        self.children.clear();
        self.candidates.clear();
        self.mapper.sync(self.generation);
        self.mapper.clear();
    }

    /// Forgets every subtree.
    pub fn clear(&mut self) {
        self.states.clear();
        self.children.clear();
        self.candidates.clear();
        self.mapper.clear();
    }

    /// The virtual view of a physical facetselect or facetsearch node.
    pub fn root(&mut self, ctx: &ProjectionContext<'_>, node: &Node) -> DomainResult<VirtualNode> {
        let (kind, lineage) = if node.is_node_type(NT_FACETSELECT) {
            let definition = MirrorDefinition::from_node(node);
            (
                VirtualKind::MirrorRoot,
                Lineage {
                    chain: vec![node.id.clone()],
                    constraints: inherit(&[], &definition.constraints),
                    search: None,
                },
            )
        } else if node.is_node_type(NT_FACETSEARCH) {
            (
                VirtualKind::FacetSearchRoot,
                Lineage {
                    chain: vec![node.id.clone()],
                    constraints: Vec::new(),
                    search: Some(SearchScope {
                        root: node.path.clone(),
                        definition: FacetSearchDefinition::from_node(node),
                        selection: Vec::new(),
                    }),
                },
            )
        } else {
            return Err(DomainError::Storage(StorageError::InvalidOperation {
                message: format!("{} is neither a mirror nor a faceted navigation", node.path),
            }));
        };

        let mut root = VirtualNode {
            path: node.path.clone(),
            name: node.name.clone(),
            index: node.index,
            kind,
            identity: PhysicalIdentity::new(node.id.clone()),
            canonical_path: node.path.clone(),
            primary_type: node.primary_type.clone(),
            properties: node.properties.clone(),
            materialized_at: self.generation,
            root: node.path.clone(),
            lineage,
        };
        let count = match &root.lineage.search {
            Some(scope) => {
                let candidates = self.candidates_for(ctx, scope, &root.identity)?;
                matching(&scope.definition, &candidates, &[]).count()
            }
            None => self.children(ctx, &root)?.len(),
        };
        stamp(&mut root, Some(count));
        self.mapper
            .register(root.path.clone(), root.identity.clone(), None);
        Ok(root)
    }

    /// Walks `relative` segments down from the virtual view of `node`.
    pub fn resolve(
        &mut self,
        ctx: &ProjectionContext<'_>,
        node: &Node,
        relative: &[Segment],
    ) -> DomainResult<Option<VirtualNode>> {
        let mut current = self.root(ctx, node)?;
        for segment in relative {
            let children = self.children(ctx, &current)?;
            match children
                .iter()
                .find(|child| child.name == segment.name && child.index == segment.index)
            {
                Some(child) => current = child.clone(),
                None => return Ok(None),
            }
        }
        Ok(Some(current))
    }

    /// Computed children of a virtual node, memoized until the next
    /// generation change.
    #[instrument(skip(self, ctx, parent), fields(path = %parent.path))]
    pub fn children(
        &mut self,
        ctx: &ProjectionContext<'_>,
        parent: &VirtualNode,
    ) -> DomainResult<Arc<Vec<VirtualNode>>> {
        if let Some(children) = self.children.get(&parent.path) {
            return Ok(children.clone());
        }

        let is_root = parent.path == parent.root;
        if is_root {
            if self.state(&parent.root) == ProjectionState::Materializing {
                debug!(root = %parent.root, "re-entrant materialization, projecting empty");
                return Ok(Arc::new(Vec::new()));
            }
            self.states
                .insert(parent.root.clone(), ProjectionState::Materializing);
        }

        let computed = match &parent.lineage.search {
            Some(scope) => self.search_children(ctx, parent, scope),
            None => self.mirror_children(ctx, parent),
        };
        let children = match computed {
            Ok(children) => Arc::new(children),
            Err(e) => {
                if is_root {
                    self.states
                        .insert(parent.root.clone(), ProjectionState::Unmaterialized);
                }
                return Err(e);
            }
        };

        for child in children.iter() {
            let variant = self.mapper.variant_of(&child.path).cloned();
            self.mapper
                .register(child.path.clone(), child.identity.clone(), variant);
        }
        if is_root {
            self.states
                .insert(parent.root.clone(), ProjectionState::Materialized);
        }
        trace!(children = children.len(), "materialized");
        self.children.insert(parent.path.clone(), children.clone());
        Ok(children)
    }

    fn mirror_children(
        &mut self,
        ctx: &ProjectionContext<'_>,
        parent: &VirtualNode,
    ) -> DomainResult<Vec<VirtualNode>> {
        let mut lineage = Lineage {
            chain: parent.lineage.chain.clone(),
            constraints: parent.lineage.constraints.clone(),
            search: None,
        };

        let source = match parent.kind {
            VirtualKind::MirrorRoot => {
                let canonical = match fetch(ctx.store, parent.identity.node_id())? {
                    Some(canonical) => canonical,
                    None => return Ok(Vec::new()),
                };
                resolve_docbase(ctx.store, MirrorDefinition::from_node(&canonical).docbase)?
            }
            _ => {
                let canonical = match fetch(ctx.store, parent.identity.node_id())? {
                    Some(canonical) => canonical,
                    None => return Ok(Vec::new()),
                };
                if canonical.is_node_type(NT_FACETSELECT) || canonical.is_node_type(NT_FACETSEARCH) {
                    if !self.may_enter(&lineage.chain, &canonical) {
                        return Ok(Vec::new());
                    }
                    lineage.chain.push(canonical.id.clone());
                    if canonical.is_node_type(NT_FACETSEARCH) {
                        let scope = SearchScope {
                            root: parent.path.clone(),
                            definition: FacetSearchDefinition::from_node(&canonical),
                            selection: Vec::new(),
                        };
                        let mut nested = parent.clone();
                        nested.lineage = Lineage {
                            search: Some(scope.clone()),
                            ..lineage
                        };
                        return self.search_children(ctx, &nested, &scope);
                    }
                    let definition = MirrorDefinition::from_node(&canonical);
                    lineage.constraints = inherit(&lineage.constraints, &definition.constraints);
                    resolve_docbase(ctx.store, definition.docbase)?
                } else {
                    Some(canonical)
                }
            }
        };

        let Some(source) = source else {
            return Ok(Vec::new());
        };
        if parent.kind == VirtualKind::MirrorRoot
            && (source.is_node_type(NT_FACETSELECT) || source.is_node_type(NT_FACETSEARCH))
        {
            debug!(mirror = %parent.path, docbase = %source.path, "docbase is virtual, projecting empty");
            return Ok(Vec::new());
        }

        let physical = match ctx.store.children(&source.id) {
            Ok(children) => children,
            Err(e) if e.is_not_found() => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        let positions: HashMap<NodeId, usize> = if source.is_handle() {
            variants(&physical)
                .enumerate()
                .map(|(position, variant)| (variant.id.clone(), position))
                .collect()
        } else {
            HashMap::new()
        };

        let readable: Vec<Node> = physical
            .into_iter()
            .filter(|child| ctx.authorizer.can_read(child))
            .collect();
        let selected = apply_constraints(readable, &lineage.constraints, IndexedDocument::from_node);

        let mut namer = SiblingNamer::new();
        let mut children = Vec::with_capacity(selected.len());
        for child in selected {
            let (segment, path) = namer.next_path(&parent.path, &child.name);
            if let Some(position) = positions.get(&child.id) {
                self.mapper.register(
                    path.clone(),
                    PhysicalIdentity::new(child.id.clone()),
                    Some(VariantChoice {
                        handle: source.id.clone(),
                        variant: child.id.clone(),
                        position: *position,
                    }),
                );
            }
            let mut node = VirtualNode {
                name: segment.name,
                index: segment.index,
                kind: VirtualKind::Mirrored,
                identity: PhysicalIdentity::new(child.id.clone()),
                canonical_path: child.path.clone(),
                primary_type: child.primary_type.clone(),
                properties: child.properties,
                materialized_at: self.generation,
                root: parent.root.clone(),
                lineage: lineage.clone(),
                path,
            };
            stamp(&mut node, None);
            children.push(node);
        }
        debug!(mirror = %parent.path, source = %source.path, children = children.len(), "mirrored");
        Ok(children)
    }

    fn search_children(
        &mut self,
        ctx: &ProjectionContext<'_>,
        parent: &VirtualNode,
        scope: &SearchScope,
    ) -> DomainResult<Vec<VirtualNode>> {
        let search_identity = parent.identity.clone();
        let generation = self.generation;
        let candidates = self.candidates_for(ctx, scope, &search_identity)?;
        let definition = &scope.definition;
        let mut namer = SiblingNamer::new();
        let mut children = Vec::new();

        if parent.kind == VirtualKind::ResultSet {
            for candidate in matching(definition, &candidates, &scope.selection) {
                let (segment, path) = namer.next_path(&parent.path, &candidate.node.name);
                if let Some(choice) = &candidate.variant {
                    self.mapper.register(
                        path.clone(),
                        PhysicalIdentity::new(candidate.node.id.clone()),
                        Some(choice.clone()),
                    );
                }
                let mut node = VirtualNode {
                    name: segment.name,
                    index: segment.index,
                    kind: VirtualKind::Result,
                    identity: PhysicalIdentity::new(candidate.node.id.clone()),
                    canonical_path: candidate.node.path.clone(),
                    primary_type: candidate.node.primary_type.clone(),
                    properties: candidate.node.properties.clone(),
                    materialized_at: generation,
                    root: parent.root.clone(),
                    lineage: Lineage {
                        chain: parent.lineage.chain.clone(),
                        constraints: Vec::new(),
                        search: None,
                    },
                    path,
                };
                stamp(&mut node, None);
                children.push(node);
            }
            return Ok(children);
        }

        let synthetic = |namer: &mut SiblingNamer,
                         name: &str,
                         kind: VirtualKind,
                         primary_type: &str,
                         selection: Vec<String>,
                         count: usize| {
            let (segment, path) = namer.next_path(&parent.path, name);
            let mut node = VirtualNode {
                name: segment.name,
                index: segment.index,
                kind,
                identity: search_identity.clone(),
                canonical_path: parent.canonical_path.clone(),
                primary_type: primary_type.to_string(),
                properties: BTreeMap::new(),
                materialized_at: generation,
                root: parent.root.clone(),
                lineage: Lineage {
                    chain: parent.lineage.chain.clone(),
                    constraints: Vec::new(),
                    search: Some(SearchScope {
                        root: scope.root.clone(),
                        definition: definition.clone(),
                        selection,
                    }),
                },
                path,
            };
            stamp(&mut node, Some(count));
            node
        };

        let results = matching(definition, &candidates, &scope.selection).count();
        children.push(synthetic(
            &mut namer,
            RESULTSET,
            VirtualKind::ResultSet,
            NT_FACETRESULT,
            scope.selection.clone(),
            results,
        ));

        let level = scope.selection.len();
        if let Some(facet) = definition.facets.get(level) {
            for (value, count) in groups(definition, &candidates, &scope.selection) {
                let mut selection = scope.selection.clone();
                selection.push(value.clone());
                children.push(synthetic(
                    &mut namer,
                    &group_name(facet, &value, definition.namespaced),
                    VirtualKind::FacetGroup {
                        facet: facet.clone(),
                        value,
                    },
                    NT_FACETGROUP,
                    selection,
                    count,
                ));
            }
        }
        Ok(children)
    }

    fn candidates_for(
        &mut self,
        ctx: &ProjectionContext<'_>,
        scope: &SearchScope,
        search: &PhysicalIdentity,
    ) -> DomainResult<Arc<Vec<Candidate>>> {
        if let Some(candidates) = self.candidates.get(&scope.root) {
            return Ok(candidates.clone());
        }
        let docbase = match resolve_docbase(ctx.store, scope.definition.docbase.clone())? {
            Some(docbase)
                if !docbase.is_node_type(NT_FACETSELECT) && !docbase.is_node_type(NT_FACETSEARCH) =>
            {
                Some(docbase)
            }
            Some(docbase) => {
                debug!(search = %search, docbase = %docbase.path, "docbase is virtual, projecting empty");
                None
            }
            None => None,
        };
        let candidates = Arc::new(match docbase {
            Some(docbase) => collect_candidates(ctx, &docbase)?,
            None => Vec::new(),
        });
        debug!(search = %search, candidates = candidates.len(), "collected candidates");
        self.candidates.insert(scope.root.clone(), candidates.clone());
        Ok(candidates)
    }

    fn may_enter(&self, chain: &[NodeId], node: &Node) -> bool {
        if chain.contains(&node.id) {
            debug!(node = %node.path, "projection cycle, projecting empty");
            return false;
        }
        if chain.len() >= self.config.max_depth {
            debug!(node = %node.path, depth = chain.len(), "projection chain too deep, projecting empty");
            return false;
        }
        true
    }
}

/// Adds the reserved properties.
fn stamp(node: &mut VirtualNode, count: Option<usize>) {
    node.properties.insert(
        P_VIRTUAL_ID.to_string(),
        vec![PropertyValue::string(virtual_id(&node.path))],
    );
    if let Some(count) = count {
        node.properties.insert(
            P_COUNT.to_string(),
            vec![PropertyValue::Long(count as i64)],
        );
    }
}

fn fetch(store: &dyn ContentStore, id: &NodeId) -> DomainResult<Option<Node>> {
    match store.get_node(id) {
        Ok(node) => Ok(Some(node)),
        Err(e) if e.is_not_found() => {
            debug!(%id, "projected node vanished");
            Ok(None)
        }
        Err(e) => Err(e.into()),
    }
}

/// Resolves a docbase given as an absolute path or an identifier.
fn resolve_docbase(store: &dyn ContentStore, docbase: Option<String>) -> DomainResult<Option<Node>> {
    let Some(docbase) = docbase else {
        return Ok(None);
    };
    let found = if docbase.starts_with('/') {
        store.get_node_by_path(&docbase)
    } else {
        store.get_node(&NodeId::new(docbase.as_str()))
    };
    match found {
        Ok(node) => Ok(Some(node)),
        Err(e) if e.is_not_found() => {
            debug!(%docbase, "docbase does not exist, projecting empty");
            Ok(None)
        }
        Err(e) => Err(e.into()),
    }
}
