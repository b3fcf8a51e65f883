//! Rule model types, expanders and the configuration loader.
//!
//! This module contains:
//! - Core type definitions (Domain, DomainRule, FacetRule, AuthRole, roles)
//! - Per-principal expanders (`__user__`, `__group__`, `__role__`)
//! - Persisted schema constants
//! - Loader reading the rule configuration from the content tree

mod expander;
mod loader;
pub mod schema;
mod types;

pub use expander::{expand, Expander};
pub use loader::{LoadDiagnostic, LoadedRules, RuleLoader};
pub use types::*;
