//! Per-session authorization: cached decisions, write inheritance and
//! compiled filters for one principal.

use std::sync::Arc;

use facetgate_storage::{ChangeBatch, ContentStore, Node, StorageError};
use tracing::{debug, trace};

use crate::cache::{DecisionCache, FilterCache, GenerationTracker, PermissionDecision};
use crate::canonical::PhysicalIdentity;
use crate::error::DomainResult;
use crate::model::{Privilege, PrincipalContext, RoleSet};
use crate::query::AuthorizationFilter;
use crate::resolver::{CompiledRules, FacetValueSet, PermissionResolver, ResolverConfig};

/// Authorization state of one session.
///
/// Decisions are cached per physical node. Write inheritance is computed on
/// top of the cached decisions on every call so a change to an ancestor is
/// picked up without invalidating its subtree.
pub struct Authorizer {
    store: Arc<dyn ContentStore>,
    principal: PrincipalContext,
    resolver: PermissionResolver,
    decisions: DecisionCache,
    filters: FilterCache,
    tracker: GenerationTracker,
    config: ResolverConfig,
}

impl std::fmt::Debug for Authorizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Authorizer")
            .field("principal", &self.principal)
            .field("rules_version", &self.resolver.rules().version())
            .field("generation", &self.tracker.current())
            .field("decisions", &self.decisions)
            .finish()
    }
}

impl Authorizer {
    pub fn new(
        store: Arc<dyn ContentStore>,
        principal: PrincipalContext,
        rules: Arc<CompiledRules>,
        config: ResolverConfig,
    ) -> Self {
        let generation = store.generation();
        Self {
            store,
            principal,
            resolver: PermissionResolver::new(rules),
            decisions: DecisionCache::new(config.cache.clone()),
            filters: FilterCache::new(),
            tracker: GenerationTracker::new(generation),
            config,
        }
    }

    pub fn principal(&self) -> &PrincipalContext {
        &self.principal
    }

    pub fn rules(&self) -> &Arc<CompiledRules> {
        self.resolver.rules()
    }

    pub fn tracker(&self) -> &GenerationTracker {
        &self.tracker
    }

    pub fn decisions(&self) -> &DecisionCache {
        &self.decisions
    }

    /// Roles the node grants by its own facet values.
    pub fn decide(&self, node: &Node) -> RoleSet {
        let identity = PhysicalIdentity::new(node.id.clone());
        let rules_version = self.resolver.rules().version();
        let changed_at = self.tracker.changed_at(&node.id, &node.path);
        if let Some(roles) = self.decisions.get(&identity, rules_version, changed_at) {
            return roles;
        }

        let facets = FacetValueSet::from_node(node);
        let roles = self.resolver.resolve(&facets, &self.principal);
        trace!(node = %node.path, can_read = roles.can_read(), "resolved decision");
        self.decisions.insert(
            identity,
            PermissionDecision {
                generation: self.tracker.current(),
                rules_version,
                roles: roles.clone(),
            },
            facets.references(),
        );
        roles
    }

    /// Roles with refinement rules applied. Not cached: faceted search
    /// evaluates each candidate once per materialization.
    pub fn decide_refined(&self, node: &Node) -> RoleSet {
        self.resolver
            .resolve_refined(&FacetValueSet::from_node(node), &self.principal)
    }

    pub fn can_read(&self, node: &Node) -> bool {
        self.decide(node).can_read()
    }

    /// Own roles plus, for a readable node, the write privilege of the
    /// nearest readable ancestor document.
    pub fn effective(&self, node: &Node) -> DomainResult<RoleSet> {
        let mut roles = self.decide(node);
        if !roles.can_read() || roles.can_write() {
            return Ok(roles);
        }

        let ancestors = node
            .ancestors
            .iter()
            .rev()
            .take(self.config.max_inheritance_depth);
        for ancestor_id in ancestors {
            let ancestor = match self.store.get_node(ancestor_id) {
                Ok(ancestor) => ancestor,
                Err(StorageError::NodeNotFound { .. }) => {
                    debug!(node = %node.path, ancestor = %ancestor_id, "ancestor vanished");
                    break;
                }
                Err(e) => return Err(e.into()),
            };
            if !ancestor.is_document() {
                continue;
            }
            let inherited = self.decide(&ancestor);
            if inherited.can_read() {
                if inherited.can_write() {
                    trace!(node = %node.path, from = %ancestor.path, "inheriting write");
                    roles.add_privilege(Privilege::Write);
                }
                break;
            }
        }
        Ok(roles)
    }

    /// Records a committed batch and drops the decisions it affects.
    pub fn apply(&mut self, batch: &ChangeBatch) {
        self.tracker.observe(batch);
        if batch.events.iter().any(|event| event.is_structural()) {
            self.decisions.invalidate_all();
            self.tracker.compact();
            return;
        }
        for event in &batch.events {
            self.decisions.invalidate(event.id());
        }
    }

    /// Switches to a new rule version. Returns false when the version is
    /// unchanged.
    pub fn set_rules(&mut self, rules: Arc<CompiledRules>) -> bool {
        if rules.version() == self.resolver.rules().version() {
            return false;
        }
        debug!(
            from = self.resolver.rules().version(),
            to = rules.version(),
            "switching rule version"
        );
        self.resolver = PermissionResolver::new(rules);
        self.decisions.invalidate_all();
        self.filters.invalidate_all();
        self.tracker.compact();
        true
    }

    /// Compiled filter for the current rule version.
    pub fn filter(&self, refined: bool) -> Arc<AuthorizationFilter> {
        self.filters
            .get_or_compile(self.resolver.rules(), &self.principal, refined)
    }

    /// Drops every cached decision and filter.
    pub fn clear(&mut self) {
        self.decisions.invalidate_all();
        self.filters.invalidate_all();
        self.tracker.compact();
    }
}
