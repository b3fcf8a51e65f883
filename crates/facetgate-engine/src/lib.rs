//! facetgate-engine: repository and sessions
//!
//! This crate composes the storage interfaces and the domain core into the
//! surface an embedding application uses:
//! - Repository: shared store, index and compiled rules
//! - Session: per-principal reads, permission checks and search
//! - Configuration management
//! - Logging initialisation
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────┐
//! │              facetgate-engine                │
//! ├─────────────────────────────────────────────┤
//! │  config.rs     - Configuration management   │
//! │  logging.rs    - Structured logging setup   │
//! │  repository.rs - Repository & rule registry │
//! │  session.rs    - Per-principal sessions     │
//! └─────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```ignore
//! let config = EngineConfig::load("facetgate.yaml")?;
//! init_logging(config.logging_config());
//!
//! let repository = Repository::open(store, index, config)?;
//! let session = repository.login(PrincipalContext::new("alice").with_group("editors"))?;
//! if let Some(node) = session.get_node("/content/news")? {
//!     for child in session.children(&node)? {
//!         println!("{}", child.path());
//!     }
//! }
//! ```

pub mod config;
pub mod logging;
pub mod repository;
pub mod session;

// Re-exports for convenience
pub use config::{ConfigLoadError, EngineConfig};
pub use logging::{init_logging, LoggingConfig};
pub use repository::{Repository, RuleRegistry};
pub use session::{Session, SessionNode};
