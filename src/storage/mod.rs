//! Storage for cortex.
//!
//! Vector indexes hold bullets per pool (in memory or as JSON files); JSONL
//! files hold the small record stores.

pub mod file;
pub mod jsonl;
pub mod memory;
pub mod traits;

pub use file::FileIndex;
pub use jsonl::JsonlFile;
pub use memory::MemoryIndex;
pub use traits::{IndexEntry, IndexFilter, IndexHit, IndexMetadata, VectorIndex};
