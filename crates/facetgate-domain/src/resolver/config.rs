//! Configuration for permission evaluation.

use crate::cache::DecisionCacheConfig;

/// Configuration for the per-session authorizer.
#[derive(Debug, Clone)]
pub struct ResolverConfig {
    /// Maximum number of ancestors inspected when looking for the nearest
    /// readable document a readable node inherits write from.
    pub max_inheritance_depth: usize,
    /// Per-session decision cache.
    pub cache: DecisionCacheConfig,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            max_inheritance_depth: 64,
            cache: DecisionCacheConfig::default(),
        }
    }
}

impl ResolverConfig {
    /// Creates a new configuration with the given decision cache settings.
    pub fn with_cache(mut self, cache: DecisionCacheConfig) -> Self {
        self.cache = cache;
        self
    }

    /// Creates a new configuration with the specified inheritance depth.
    pub fn with_max_inheritance_depth(mut self, depth: usize) -> Self {
        self.max_inheritance_depth = depth;
        self
    }
}
