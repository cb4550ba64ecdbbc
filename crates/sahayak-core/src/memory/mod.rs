//! Session-scoped memory module.
//!
//! An append-only fact store with relevance-ranked retrieval. Retrieval is a
//! mutating operation: returned items have their usage count incremented,
//! which reinforces their ranking and extends their retention lifetime.

pub mod model;
pub mod store;

pub use model::{MemoryItem, MemoryKind, MemoryMetadata, MemoryStats};
pub use store::MemoryStore;
