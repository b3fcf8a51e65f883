//! facetgate-domain: Facet-based authorization and virtual projection
//!
//! This crate contains the core of the engine including:
//! - Rule model, configuration loader and validation
//! - Permission resolution over facet values
//! - Authorization filters for search queries
//! - Per-session decision caching and invalidation
//! - Mirror and faceted navigation projection
//! - Canonical identity mapping of virtual nodes
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────┐
//! │              facetgate-domain                │
//! ├─────────────────────────────────────────────┤
//! │  model/      - Rule model & loader          │
//! │  resolver/   - Permission resolution        │
//! │  query/      - Authorization filters        │
//! │  cache/      - Decision & filter caching    │
//! │  authorizer  - Per-session authorization    │
//! │  projection/ - Virtual node projection      │
//! │  canonical   - Canonical identity mapping   │
//! │  validation/ - Rule validation              │
//! └─────────────────────────────────────────────┘
//! ```

pub mod authorizer;
pub mod cache;
pub mod canonical;
pub mod error;
pub mod model;
pub mod projection;
pub mod query;
pub mod resolver;
pub mod validation;

// Re-export commonly used types at the crate root
pub use authorizer::Authorizer;
pub use cache::{DecisionCache, DecisionCacheConfig, GenerationTracker, PermissionDecision};
pub use canonical::{CanonicalMapper, NodeHandle, PhysicalIdentity, VariantChoice};
pub use error::{DomainError, DomainResult};
pub use projection::{
    ProjectionConfig, ProjectionContext, ProjectionState, Projector, VirtualKind, VirtualNode,
};
pub use query::{AuthorizationFilter, AuthorizationQueryBuilder, Page, SearchResult};
pub use resolver::{CompiledRules, PermissionResolver, ResolverConfig};
