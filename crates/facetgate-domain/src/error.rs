//! Domain error types for authorization and projection operations.

use facetgate_storage::StorageError;
use thiserror::Error;

/// Domain-specific errors.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum DomainError {
    /// The rule configuration cannot be loaded safely.
    #[error("configuration error in {location}: {message}")]
    Configuration { location: String, message: String },

    /// A single facet rule or auth role is malformed.
    #[error("invalid rule at {location}: {message}")]
    InvalidRule { location: String, message: String },

    /// The path exists but the principal holds no granting role for it.
    #[error("access denied: {path}")]
    AccessDenied { path: String },

    /// The path does not exist.
    #[error("not found: {path}")]
    NotFound { path: String },

    /// A virtual node was accessed after the content it mirrors changed.
    #[error("virtual node {path} is stale and must be re-fetched")]
    NeedsRefresh { path: String },

    /// Error from the underlying store or index.
    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Result type for domain operations.
pub type DomainResult<T> = Result<T, DomainError>;
