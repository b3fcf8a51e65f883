//! facetgate-storage: interfaces to the physical content store and search index
//!
//! The authorization engine never persists anything itself. It consumes:
//! - [`ContentStore`]: node/property reads, change observation, save
//! - [`SearchIndex`]: filtered, ordered scans over indexed nodes
//!
//! In-memory implementations of both are provided for tests and embedding.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────┐
//! │             facetgate-storage                │
//! ├─────────────────────────────────────────────┤
//! │  traits.rs - ContentStore / SearchIndex     │
//! │  filter.rs - index filter primitives        │
//! │  events.rs - change batches                 │
//! │  path.rs   - paths with sibling indices     │
//! │  memory.rs - in-memory content store        │
//! │  index.rs  - in-memory search index         │
//! └─────────────────────────────────────────────┘
//! ```

pub mod error;
pub mod events;
pub mod filter;
pub mod index;
pub mod memory;
pub mod path;
pub mod traits;

// Re-export commonly used types
pub use error::{StorageError, StorageResult};
pub use events::{ChangeBatch, ChangeEvent, ChangeReceiver};
pub use filter::{Field, Filter, IndexedDocument};
pub use index::MemorySearchIndex;
pub use memory::MemoryContentStore;
pub use traits::{
    ContentStore, Generation, Node, NodeId, PropertyValue, SearchIndex, SearchQuery,
    DOCUMENT_TYPE, HANDLE_TYPE,
};
