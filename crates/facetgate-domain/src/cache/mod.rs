//! Per-session permission decision caching.
//!
//! This module memoizes per-node decisions and compiled authorization
//! filters, keyed by the content generation and rule version they were
//! computed against.
//!
//! # Architecture
//!
//! The decision cache uses Moka's sync Cache which provides:
//! - Lock-free concurrent reads
//! - Automatic TTL-based eviction
//! - Memory-bounded storage
//!
//! # Invalidation
//!
//! A [`PermissionDecision`] is valid only while its generation is not older
//! than the last observed change of its node and its rule version is
//! current. Stale entries are discarded, never mutated.
//!
//! A secondary index maps every referenced node to the nodes whose
//! decision was computed from a reference to it, so a change to a target
//! invalidates its referrers without scanning all entries. Entries evicted
//! by size or TTL are pruned from the index by an eviction listener.
//!
//! # Example
//!
//! ```rust,ignore
//! use facetgate_domain::cache::{DecisionCache, DecisionCacheConfig, PermissionDecision};
//!
//! let cache = DecisionCache::new(DecisionCacheConfig::default());
//! cache.insert(identity.clone(), decision, &[]);
//! assert!(cache.get(&identity, rules_version, changed_at).is_some());
//! ```

mod filter;
mod generation;

pub use filter::FilterCache;
pub use generation::GenerationTracker;

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use facetgate_storage::{Generation, NodeId};
use moka::notification::RemovalCause;
use moka::sync::Cache;
use tracing::trace;

use crate::canonical::PhysicalIdentity;
use crate::model::RoleSet;

/// Configuration for the decision cache.
#[derive(Debug, Clone)]
pub struct DecisionCacheConfig {
    /// Whether decisions are memoized at all.
    pub enabled: bool,
    /// Maximum number of entries in the cache.
    pub max_capacity: u64,
    /// Upper bound on the lifetime of an entry.
    pub ttl: Duration,
}

impl Default for DecisionCacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_capacity: 10_000,
            ttl: Duration::from_secs(300),
        }
    }
}

impl DecisionCacheConfig {
    /// Enables or disables caching.
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Sets the maximum capacity.
    pub fn with_max_capacity(mut self, max_capacity: u64) -> Self {
        self.max_capacity = max_capacity;
        self
    }

    /// Sets the TTL.
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }
}

/// A memoized set of roles on one physical node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PermissionDecision {
    /// Session generation the decision was computed at.
    pub generation: Generation,
    pub rules_version: u64,
    pub roles: RoleSet,
}

type ReferrerIndex = DashMap<NodeId, HashSet<PhysicalIdentity>>;
type TargetIndex = DashMap<PhysicalIdentity, Vec<NodeId>>;

/// Decision cache scoped to one session, and therefore one principal.
pub struct DecisionCache {
    cache: Cache<PhysicalIdentity, Arc<PermissionDecision>>,
    config: DecisionCacheConfig,
    /// Secondary index: referenced node -> nodes whose decision used it.
    referrers: Arc<ReferrerIndex>,
    /// Reverse of `referrers`, so an evicted entry can be unlinked.
    targets: Arc<TargetIndex>,
}

impl std::fmt::Debug for DecisionCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DecisionCache")
            .field("config", &self.config)
            .field("entry_count", &self.cache.entry_count())
            .field("referrer_index_size", &self.referrers.len())
            .field("target_index_size", &self.targets.len())
            .finish()
    }
}

impl DecisionCache {
    /// Creates a new decision cache with the given configuration.
    pub fn new(config: DecisionCacheConfig) -> Self {
        let referrers = Arc::new(ReferrerIndex::new());
        let targets = Arc::new(TargetIndex::new());
        let listener = {
            let referrers = Arc::clone(&referrers);
            let targets = Arc::clone(&targets);
            move |identity: Arc<PhysicalIdentity>,
                  _: Arc<PermissionDecision>,
                  cause: RemovalCause| {
                if cause.was_evicted() {
                    trace!(node = %identity, ?cause, "pruning evicted decision");
                    unlink(&referrers, &targets, &identity);
                }
            }
        };
        let cache = Cache::builder()
            .max_capacity(config.max_capacity)
            .time_to_live(config.ttl)
            .eviction_listener(listener)
            .build();

        Self {
            cache,
            config,
            referrers,
            targets,
        }
    }

    pub fn config(&self) -> &DecisionCacheConfig {
        &self.config
    }

    pub fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    /// Returns the cached roles when the entry is still valid for
    /// `rules_version` and no change newer than `changed_at` hit the node.
    ///
    /// # Metrics
    ///
    /// - `facetgate_decision_cache_hits_total`
    /// - `facetgate_decision_cache_misses_total`
    pub fn get(
        &self,
        identity: &PhysicalIdentity,
        rules_version: u64,
        changed_at: Generation,
    ) -> Option<RoleSet> {
        if !self.config.enabled {
            return None;
        }
        let fresh = match self.cache.get(identity) {
            Some(decision)
                if decision.rules_version == rules_version
                    && decision.generation >= changed_at =>
            {
                Some(decision.roles.clone())
            }
            Some(_) => {
                trace!(node = %identity, "discarding stale decision");
                self.cache.invalidate(identity);
                unlink(&self.referrers, &self.targets, identity);
                None
            }
            None => None,
        };
        if fresh.is_some() {
            metrics::counter!("facetgate_decision_cache_hits_total").increment(1);
        } else {
            metrics::counter!("facetgate_decision_cache_misses_total").increment(1);
        }
        fresh
    }

    /// Stores a decision together with the nodes it was computed from.
    pub fn insert(
        &self,
        identity: PhysicalIdentity,
        decision: PermissionDecision,
        references: &[NodeId],
    ) {
        if !self.config.enabled {
            return;
        }
        unlink(&self.referrers, &self.targets, &identity);
        for target in references {
            self.referrers
                .entry(target.clone())
                .or_default()
                .insert(identity.clone());
        }
        if !references.is_empty() {
            self.targets.insert(identity.clone(), references.to_vec());
        }
        self.cache.insert(identity, Arc::new(decision));
    }

    /// Invalidates the decision of `id` and, transitively, of every node
    /// whose decision referenced it. Returns the number of identities
    /// visited.
    pub fn invalidate(&self, id: &NodeId) -> usize {
        let mut pending = vec![PhysicalIdentity::new(id.clone())];
        let mut seen = HashSet::new();
        while let Some(identity) = pending.pop() {
            if !seen.insert(identity.clone()) {
                continue;
            }
            self.cache.invalidate(&identity);
            // Atomic remove so a concurrent insert is not lost between read and clear.
            if let Some((_, referrers)) = self.referrers.remove(identity.node_id()) {
                pending.extend(referrers);
            }
            unlink(&self.referrers, &self.targets, &identity);
        }
        seen.len()
    }

    /// Drops every decision.
    pub fn invalidate_all(&self) {
        self.cache.invalidate_all();
        self.referrers.clear();
        self.targets.clear();
    }

    /// Number of referenced nodes in the secondary index.
    pub fn referrer_index_size(&self) -> usize {
        self.referrers.len()
    }

    /// Returns the approximate number of entries in the cache.
    pub fn entry_count(&self) -> u64 {
        self.cache.entry_count()
    }

    /// Runs pending maintenance tasks.
    pub fn run_pending_tasks(&self) {
        self.cache.run_pending_tasks();
    }
}

/// Removes `identity` from the referrer sets of every node it referenced.
fn unlink(referrers: &ReferrerIndex, targets: &TargetIndex, identity: &PhysicalIdentity) {
    let Some((_, referenced)) = targets.remove(identity) else {
        return;
    };
    for target in referenced {
        if let Some(mut set) = referrers.get_mut(&target) {
            set.remove(identity);
        }
        referrers.remove_if(&target, |_, set| set.is_empty());
    }
}

/// Registers decision cache metrics descriptions.
///
/// Call once during application startup; optional.
pub fn register_decision_cache_metrics() {
    metrics::describe_counter!(
        "facetgate_decision_cache_hits_total",
        "Total number of permission decision cache hits"
    );
    metrics::describe_counter!(
        "facetgate_decision_cache_misses_total",
        "Total number of permission decision cache misses"
    );
    metrics::describe_counter!(
        "facetgate_rules_compiled_total",
        "Total number of rule compilations"
    );
}
