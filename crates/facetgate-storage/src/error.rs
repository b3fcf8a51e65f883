//! Storage error types.

use thiserror::Error;

/// Storage-specific errors.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StorageError {
    /// No node carries the given identifier.
    #[error("node not found: {id}")]
    NodeNotFound { id: String },

    /// No node lives at the given path.
    #[error("path not found: {path}")]
    PathNotFound { path: String },

    /// The path is not absolute or has a malformed segment.
    #[error("invalid path '{path}': {message}")]
    InvalidPath { path: String, message: String },

    /// A node with the same identifier already exists.
    #[error("item exists: {path}")]
    ItemExists { path: String },

    /// The operation is not allowed on this node (e.g. removing the root).
    #[error("invalid operation: {message}")]
    InvalidOperation { message: String },

    /// Query could not be executed.
    #[error("query error: {message}")]
    QueryError { message: String },
}

impl StorageError {
    /// Returns true when the error means "there is nothing there".
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            StorageError::NodeNotFound { .. } | StorageError::PathNotFound { .. }
        )
    }
}

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;
