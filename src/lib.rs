//! Cortex - procedural knowledge consolidation engine
//!
//! Cortex keeps two pools of short procedural rules ("bullets"): a left pool
//! of precise, verified practice and a right pool of exploratory patterns,
//! plus a shared pool for knowledge both have confirmed. Execution traces
//! are reflected on at a depth set by how surprising they were, curated into
//! bullets, scored by outcome, and periodically deduplicated and pruned.

pub mod backends;
pub mod cli;
pub mod config;
pub mod core;
pub mod error;
pub mod learning;
pub mod maintenance;
pub mod memory;
pub mod meta;
pub mod stats;
pub mod storage;
pub mod teaching;
pub mod util;

pub use backends::{Embedder, HashEmbedder, LlmClient};
pub use config::Config;
pub use core::{Bullet, BulletKind, BulletStatus, ExecutionTrace, Outcome, Pool};
pub use error::{CortexError, Result};
pub use learning::{Curator, HemisphereClassifier, LearningPipeline, Reflector};
pub use maintenance::{Deduplicator, MaintenanceScheduler, Merger, Pruner};
pub use memory::{EpisodeStore, KnowledgeStore, NewBullet, ProcedureStore, Query};
pub use meta::{MetaController, NoveltyDetector};
pub use stats::EventLog;
pub use storage::{FileIndex, MemoryIndex, VectorIndex};
pub use teaching::{SuggestionDelivery, SuggestionStore, TeachingApi};

// CLI commands
pub use cli::{
    AddCommand, ClassifyCommand, ConfigCommand, DedupCommand, DeliverCommand, ListCommand,
    MaintainCommand, OutcomeCommand, PruneCommand, QueryCommand, RestoreCommand, StatsCommand,
    SuggestionsCommand, TeachCommand, Workspace,
};
