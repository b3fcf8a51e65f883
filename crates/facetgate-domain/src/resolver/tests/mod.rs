//! Tests for the permission resolver module.
//!
//! Organized by functionality:
//! - Literal, wildcard and expander matching
//! - Reference rules and missing targets
//! - Domain union and role closure
//! - Refinement rules and the superuser fast path
