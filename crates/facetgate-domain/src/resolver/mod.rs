//! Permission resolver for facet-based rules.
//!
//! The resolver decides which roles a principal holds on a node by
//! evaluating every domain against the node's facet values.
//!
//! # Architecture Decisions
//!
//! - **Compile once per rule version**: reference rule values are resolved
//!   to node identities when a [`RuleSnapshot`](crate::model::RuleSnapshot)
//!   is compiled, not on every evaluation. The compiled rules record the
//!   referenced paths so creating a missing target triggers recompilation.
//!
//! - **Missing references**: a reference rule whose target does not exist
//!   never matches; with `equals=false` the clause is therefore true.
//!
//! - **Superuser fast path**: the built-in superuser receives every role
//!   without evaluating any domain.
//!
//! - **Refinements**: `filter=true` rules are ignored by [`PermissionResolver::resolve`]
//!   and honoured by [`PermissionResolver::resolve_refined`], which faceted
//!   search uses for its candidates.

mod compiled;
mod config;
mod permission;
mod traits;
mod types;

#[cfg(test)]
pub(crate) mod tests;

pub use compiled::{
    CompiledDomain, CompiledDomainRule, CompiledFacetRule, CompiledRules, RuleValue,
};
pub use config::ResolverConfig;
pub(crate) use permission::applicable_roles;
pub use permission::{facet_rule_matches, PermissionResolver};
pub use traits::{ReferenceLookup, ResolvedReference};
pub use types::{FacetValueSet, ReferenceTarget};
