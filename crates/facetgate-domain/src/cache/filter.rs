//! Compiled authorization filters, one per rule version.

use std::sync::Arc;

use moka::sync::Cache;

use crate::model::PrincipalContext;
use crate::query::{AuthorizationFilter, AuthorizationQueryBuilder};
use crate::resolver::CompiledRules;

/// Caches the plain and refined filter of one principal.
///
/// Keys carry the rule version, so a recompilation of the rules makes the
/// old filters unreachable.
#[derive(Clone)]
pub struct FilterCache {
    cache: Cache<(u64, bool), Arc<AuthorizationFilter>>,
}

impl Default for FilterCache {
    fn default() -> Self {
        Self::new()
    }
}

impl FilterCache {
    pub fn new() -> Self {
        Self {
            cache: Cache::builder().max_capacity(4).build(),
        }
    }

    /// Returns the cached filter or compiles it.
    pub fn get_or_compile(
        &self,
        rules: &CompiledRules,
        principal: &PrincipalContext,
        refined: bool,
    ) -> Arc<AuthorizationFilter> {
        self.cache.get_with((rules.version(), refined), || {
            let builder = AuthorizationQueryBuilder::new(rules);
            Arc::new(if refined {
                builder.compile_refined(principal)
            } else {
                builder.compile(principal)
            })
        })
    }

    pub fn invalidate_all(&self) {
        self.cache.invalidate_all();
    }
}

impl std::fmt::Debug for FilterCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FilterCache")
            .field("entry_count", &self.cache.entry_count())
            .finish()
    }
}
