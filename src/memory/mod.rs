//! Knowledge storage for cortex.
//!
//! - [`store`]: scored bullets with activation and shared-pool promotion
//! - [`format`]: playbook rendering for prompts
//! - [`episodes`] and [`procedures`]: JSONL-backed narrative and workflow records

pub mod episodes;
pub mod format;
pub mod procedures;
pub mod store;

pub use episodes::{Episode, EpisodeOutcome, EpisodeStore};
pub use format::format_for_prompt;
pub use procedures::{Procedure, ProcedureStatus, ProcedureStep, ProcedureStore};
pub use store::{
    KnowledgeStore, LockedStore, NewBullet, OutcomeReport, PoolStats, Query, QueryResult,
    StoreStats,
};
