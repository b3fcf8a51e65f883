//! Per-principal view of the repository.
//!
//! A [`Session`] owns the decision cache and the virtual overlay of one
//! principal. Before serving any read it drains the committed change
//! batches it has not seen yet, so every answer reflects the store as of the
//! last commit observed.
//!
//! # Existence
//!
//! Read paths never distinguish "denied" from "absent": both read as
//! `Ok(None)` or an empty list. Only [`Session::check_permission`] and
//! [`Session::privileges`] report [`DomainError::AccessDenied`] and
//! [`DomainError::NotFound`] separately.

use std::sync::Arc;

use facetgate_domain::canonical::NodeHandle;
use facetgate_domain::model::schema::{NT_FACETSEARCH, NT_FACETSELECT};
use facetgate_domain::model::{PrincipalContext, Privilege, RoleSet};
use facetgate_domain::query::{self, Page, SearchResult};
use facetgate_domain::{
    Authorizer, DomainError, DomainResult, PhysicalIdentity, ProjectionContext, Projector,
    VariantChoice, VirtualNode,
};
use facetgate_storage::path::{child_path, parse_path};
use facetgate_storage::{
    ChangeReceiver, ContentStore, Generation, Node, NodeId, PropertyValue, SearchIndex,
    SearchQuery, StorageError,
};
use parking_lot::Mutex;
use tracing::{debug, instrument, trace};

use crate::config::EngineConfig;
use crate::repository::RuleRegistry;

/// A node as a session exposes it.
#[derive(Debug, Clone)]
pub enum SessionNode {
    Physical(Node),
    Virtual(VirtualNode),
}

impl SessionNode {
    pub fn path(&self) -> &str {
        match self {
            SessionNode::Physical(node) => &node.path,
            SessionNode::Virtual(node) => &node.path,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            SessionNode::Physical(node) => &node.name,
            SessionNode::Virtual(node) => &node.name,
        }
    }

    /// 1-based same-name-sibling index.
    pub fn index(&self) -> u32 {
        match self {
            SessionNode::Physical(node) => node.index,
            SessionNode::Virtual(node) => node.index,
        }
    }

    pub fn primary_type(&self) -> &str {
        match self {
            SessionNode::Physical(node) => &node.primary_type,
            SessionNode::Virtual(node) => &node.primary_type,
        }
    }

    /// The physical node this node stands for.
    pub fn identity(&self) -> PhysicalIdentity {
        match self {
            SessionNode::Physical(node) => PhysicalIdentity::new(node.id.clone()),
            SessionNode::Virtual(node) => node.identity.clone(),
        }
    }

    pub fn is_virtual(&self) -> bool {
        matches!(self, SessionNode::Virtual(_))
    }

    /// Property value as of when the handle was obtained.
    pub fn property(&self, name: &str) -> Option<&[PropertyValue]> {
        match self {
            SessionNode::Physical(node) => node.property(name),
            SessionNode::Virtual(node) => node.property(name),
        }
    }

    pub fn string_property(&self, name: &str) -> Option<String> {
        match self {
            SessionNode::Physical(node) => node.string_property(name),
            SessionNode::Virtual(node) => node.string_property(name),
        }
    }

    /// The reserved materialization count of a virtual node.
    pub fn count(&self) -> Option<i64> {
        match self {
            SessionNode::Physical(_) => None,
            SessionNode::Virtual(node) => node.count(),
        }
    }
}

enum Located {
    Physical(Node),
    Virtual(VirtualNode),
    Missing,
}

struct SessionState {
    receiver: ChangeReceiver,
    authorizer: Authorizer,
    projector: Projector,
    /// Generation as of the last `refresh(true)`.
    acknowledged: Generation,
}

/// A principal's session.
pub struct Session {
    user_id: String,
    store: Arc<dyn ContentStore>,
    index: Arc<dyn SearchIndex>,
    rules: Arc<RuleRegistry>,
    state: Mutex<SessionState>,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("user_id", &self.user_id)
            .finish()
    }
}

fn is_projection(node: &Node) -> bool {
    node.is_node_type(NT_FACETSELECT) || node.is_node_type(NT_FACETSEARCH)
}

impl Session {
    pub(crate) fn open(
        store: Arc<dyn ContentStore>,
        index: Arc<dyn SearchIndex>,
        rules: Arc<RuleRegistry>,
        principal: PrincipalContext,
        config: &EngineConfig,
    ) -> DomainResult<Self> {
        let receiver = store.observe();
        let compiled = rules.current()?;
        let user_id = principal.user_id.clone();
        let authorizer = Authorizer::new(
            store.clone(),
            principal,
            compiled,
            config.resolver_config(),
        );
        let generation = authorizer.tracker().current();
        let projector = Projector::new(config.projection_config(), generation);
        debug!(user = %user_id, %generation, "session opened");
        Ok(Self {
            user_id,
            store,
            index,
            rules,
            state: Mutex::new(SessionState {
                receiver,
                authorizer,
                projector,
                acknowledged: generation,
            }),
        })
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    /// The generation this session has caught up to.
    pub fn generation(&self) -> Generation {
        self.state.lock().projector.generation()
    }

    /// Version of the rules the session currently evaluates.
    pub fn rules_version(&self) -> u64 {
        self.state.lock().authorizer.rules().version()
    }

    /// Reads the node at `path`. Denied and absent nodes both read as
    /// `None`.
    #[instrument(skip(self), fields(user = %self.user_id))]
    pub fn get_node(&self, path: &str) -> DomainResult<Option<SessionNode>> {
        let mut state = self.state.lock();
        self.catch_up(&mut state)?;
        self.readable(&mut state, path)
    }

    #[instrument(skip(self), fields(user = %self.user_id))]
    pub fn node_exists(&self, path: &str) -> DomainResult<bool> {
        let mut state = self.state.lock();
        self.catch_up(&mut state)?;
        Ok(self.readable(&mut state, path)?.is_some())
    }

    /// Readable children of `node` in order.
    ///
    /// A virtual handle materialized before the last observed change is
    /// refused with [`DomainError::NeedsRefresh`] unless
    /// [`refresh(true)`](Self::refresh) was called since.
    #[instrument(skip(self, node), fields(user = %self.user_id, path = %node.path()))]
    pub fn children(&self, node: &SessionNode) -> DomainResult<Vec<SessionNode>> {
        let mut state = self.state.lock();
        self.catch_up(&mut state)?;
        match node {
            SessionNode::Physical(node) => {
                let Some(current) = self
                    .current_physical(&state, &node.id)?
                    .filter(|current| state.authorizer.can_read(current))
                else {
                    return Ok(Vec::new());
                };
                if is_projection(&current) {
                    let root = self.project_root(&mut state, &current)?;
                    return self.virtual_children(&mut state, &root);
                }
                self.physical_children(&mut state, &current)
            }
            SessionNode::Virtual(node) => match self.revalidate(&mut state, node)? {
                Some(current) => self.virtual_children(&mut state, &current),
                None => Ok(Vec::new()),
            },
        }
    }

    /// Reads a property through a handle. Physical handles are re-read;
    /// stale virtual handles follow the same rule as [`children`](Self::children).
    #[instrument(skip(self, node), fields(user = %self.user_id, path = %node.path()))]
    pub fn property(
        &self,
        node: &SessionNode,
        name: &str,
    ) -> DomainResult<Option<Vec<PropertyValue>>> {
        let mut state = self.state.lock();
        self.catch_up(&mut state)?;
        match node {
            SessionNode::Physical(node) => Ok(self
                .current_physical(&state, &node.id)?
                .filter(|current| state.authorizer.can_read(current))
                .and_then(|current| current.properties.get(name).cloned())),
            SessionNode::Virtual(node) => Ok(self
                .revalidate(&mut state, node)?
                .and_then(|current| current.properties.get(name).cloned())),
        }
    }

    /// Reads a property by path.
    #[instrument(skip(self), fields(user = %self.user_id))]
    pub fn get_property(&self, path: &str, name: &str) -> DomainResult<Option<Vec<PropertyValue>>> {
        let mut state = self.state.lock();
        self.catch_up(&mut state)?;
        Ok(self
            .readable(&mut state, path)?
            .and_then(|node| node.property(name).map(<[PropertyValue]>::to_vec)))
    }

    /// Succeeds when the principal holds `privilege` on the node at `path`.
    ///
    /// Returns [`DomainError::NotFound`] when nothing lives at `path` and
    /// [`DomainError::AccessDenied`] when it exists but the privilege is
    /// missing.
    #[instrument(skip(self), fields(user = %self.user_id))]
    pub fn check_permission(&self, path: &str, privilege: Privilege) -> DomainResult<()> {
        let roles = self.privileges(path)?;
        if roles.has_privilege(privilege) {
            Ok(())
        } else {
            debug!(%path, privilege = privilege.as_str(), "access denied");
            Err(DomainError::AccessDenied {
                path: path.to_string(),
            })
        }
    }

    /// Effective roles on the node at `path`, write inheritance applied.
    #[instrument(skip(self), fields(user = %self.user_id))]
    pub fn privileges(&self, path: &str) -> DomainResult<RoleSet> {
        let mut state = self.state.lock();
        self.catch_up(&mut state)?;
        let canonical = match self.locate(&mut state, path)? {
            Located::Physical(node) => node,
            Located::Virtual(node) => self
                .current_physical(&state, node.identity.node_id())?
                .ok_or_else(|| DomainError::NotFound {
                    path: path.to_string(),
                })?,
            Located::Missing => {
                return Err(DomainError::NotFound {
                    path: path.to_string(),
                })
            }
        };
        state.authorizer.effective(&canonical)
    }

    /// The physical node behind a handle, `None` when it is not readable.
    #[instrument(skip(self), fields(user = %self.user_id))]
    pub fn canonical_of(&self, handle: &NodeHandle) -> DomainResult<Option<PhysicalIdentity>> {
        let mut state = self.state.lock();
        self.catch_up(&mut state)?;
        match handle {
            NodeHandle::Physical(id) => Ok(self
                .current_physical(&state, id)?
                .filter(|node| state.authorizer.can_read(node))
                .map(|node| PhysicalIdentity::new(node.id))),
            NodeHandle::Virtual(path) => match self.readable(&mut state, path)? {
                Some(node) => Ok(state
                    .projector
                    .mapper()
                    .canonical_of(handle)
                    .or_else(|| Some(node.identity()))),
                None => Ok(None),
            },
        }
    }

    /// Which handle variant a virtual node exposes, when it exposes one.
    pub fn variant_of(&self, node: &SessionNode) -> Option<VariantChoice> {
        match node {
            SessionNode::Physical(_) => None,
            SessionNode::Virtual(node) => {
                self.state.lock().projector.mapper().variant_of(&node.path).cloned()
            }
        }
    }

    /// Runs `query` restricted to what the principal may read.
    #[instrument(skip(self, query), fields(user = %self.user_id, query = %query.filter))]
    pub fn search(&self, query: &SearchQuery, page: Page) -> DomainResult<SearchResult> {
        let mut state = self.state.lock();
        self.catch_up(&mut state)?;
        let filter = state.authorizer.filter(false);
        let result = query::execute(self.index.as_ref(), query, &filter, page)?;
        trace!(
            size = result.size,
            total_size = result.total_size,
            "search completed"
        );
        Ok(result)
    }

    /// Catches up with committed changes.
    ///
    /// With `keep_changes` the session acknowledges every change seen so
    /// far: handles obtained earlier are transparently re-resolved instead of
    /// failing with [`DomainError::NeedsRefresh`]. Without it every cached
    /// decision and the whole virtual overlay are dropped.
    #[instrument(skip(self), fields(user = %self.user_id))]
    pub fn refresh(&self, keep_changes: bool) -> DomainResult<()> {
        let mut state = self.state.lock();
        if !keep_changes {
            state.authorizer.clear();
            state.projector.clear();
        }
        self.catch_up(&mut state)?;
        if keep_changes {
            state.acknowledged = state.projector.generation();
        }
        Ok(())
    }

    fn catch_up(&self, state: &mut SessionState) -> DomainResult<()> {
        while let Ok(batch) = state.receiver.try_recv() {
            trace!(
                generation = %batch.generation,
                events = batch.events.len(),
                "applying change batch"
            );
            state.authorizer.apply(&batch);
        }

        let rules = self.rules.current()?;
        let switched = state.authorizer.set_rules(rules);
        let generation = state.authorizer.tracker().current();
        let stale = state.projector.sync(generation);
        if switched && !stale {
            state.projector.invalidate();
        }
        Ok(())
    }

    fn readable(&self, state: &mut SessionState, path: &str) -> DomainResult<Option<SessionNode>> {
        match self.locate(state, path)? {
            Located::Physical(node) if state.authorizer.can_read(&node) => {
                Ok(Some(SessionNode::Physical(node)))
            }
            Located::Virtual(node) => {
                let readable = self
                    .current_physical(state, node.identity.node_id())?
                    .is_some_and(|canonical| state.authorizer.can_read(&canonical));
                Ok(readable.then_some(SessionNode::Virtual(node)))
            }
            Located::Physical(_) | Located::Missing => Ok(None),
        }
    }

    /// Resolves `path` ignoring permissions. Paths below a mirror or
    /// faceted navigation root resolve through the projector.
    fn locate(&self, state: &mut SessionState, path: &str) -> DomainResult<Located> {
        match self.store.get_node_by_path(path) {
            Ok(node) if is_projection(&node) => {
                return Ok(Located::Virtual(self.project_root(state, &node)?))
            }
            Ok(node) => return Ok(Located::Physical(node)),
            Err(e) if e.is_not_found() => {}
            Err(e) => return Err(e.into()),
        }

        let segments = parse_path(path)?;
        let mut current = self.store.get_node_by_path("/")?;
        for (position, segment) in segments.iter().enumerate() {
            if is_projection(&current) {
                let SessionState {
                    authorizer,
                    projector,
                    ..
                } = &mut *state;
                let ctx = ProjectionContext {
                    store: self.store.as_ref(),
                    index: self.index.as_ref(),
                    authorizer,
                };
                return Ok(
                    match projector.resolve(&ctx, &current, &segments[position..])? {
                        Some(node) => Located::Virtual(node),
                        None => Located::Missing,
                    },
                );
            }
            match self.store.get_node_by_path(&child_path(&current.path, segment)) {
                Ok(next) => current = next,
                Err(e) if e.is_not_found() => return Ok(Located::Missing),
                Err(e) => return Err(e.into()),
            }
        }
        Ok(Located::Missing)
    }

    fn project_root(&self, state: &mut SessionState, node: &Node) -> DomainResult<VirtualNode> {
        let SessionState {
            authorizer,
            projector,
            ..
        } = &mut *state;
        let ctx = ProjectionContext {
            store: self.store.as_ref(),
            index: self.index.as_ref(),
            authorizer,
        };
        projector.root(&ctx, node)
    }

    fn virtual_children(
        &self,
        state: &mut SessionState,
        parent: &VirtualNode,
    ) -> DomainResult<Vec<SessionNode>> {
        let SessionState {
            authorizer,
            projector,
            ..
        } = &mut *state;
        let ctx = ProjectionContext {
            store: self.store.as_ref(),
            index: self.index.as_ref(),
            authorizer,
        };
        Ok(projector
            .children(&ctx, parent)?
            .iter()
            .cloned()
            .map(SessionNode::Virtual)
            .collect())
    }

    fn physical_children(
        &self,
        state: &mut SessionState,
        parent: &Node,
    ) -> DomainResult<Vec<SessionNode>> {
        let children = match self.store.children(&parent.id) {
            Ok(children) => children,
            Err(e) if e.is_not_found() => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        let mut readable = Vec::with_capacity(children.len());
        for child in children {
            if !state.authorizer.can_read(&child) {
                continue;
            }
            if is_projection(&child) {
                readable.push(SessionNode::Virtual(self.project_root(state, &child)?));
            } else {
                readable.push(SessionNode::Physical(child));
            }
        }
        Ok(readable)
    }

    /// The current state of a physical node, `None` once it is gone.
    fn current_physical(&self, state: &SessionState, id: &NodeId) -> DomainResult<Option<Node>> {
        match self.store.get_node(id) {
            Ok(node) => Ok(Some(node)),
            Err(StorageError::NodeNotFound { .. }) => {
                debug!(%id, generation = %state.projector.generation(), "node vanished");
                Ok(None)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Re-resolves a virtual handle, refusing stale handles the session has
    /// not acknowledged.
    fn revalidate(
        &self,
        state: &mut SessionState,
        node: &VirtualNode,
    ) -> DomainResult<Option<VirtualNode>> {
        let generation = state.projector.generation();
        if node.materialized_at == generation {
            return Ok(Some(node.clone()));
        }
        if state.acknowledged < generation {
            debug!(path = %node.path, materialized_at = %node.materialized_at, %generation, "stale virtual node");
            return Err(DomainError::NeedsRefresh {
                path: node.path.clone(),
            });
        }
        match self.readable(state, &node.path)? {
            Some(SessionNode::Virtual(current)) => Ok(Some(current)),
            _ => Ok(None),
        }
    }
}
