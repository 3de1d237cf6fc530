//! Knowledge base hygiene.
//!
//! - [`dedup`] finds clusters of near-identical bullets and [`merger`] folds
//!   them into one, archiving the rest
//! - [`quality`] scores bullets and [`pruner`] removes the weak ones behind
//!   a restorable backup
//! - [`scheduler`] runs both on a timer

pub mod dedup;
pub mod merger;
pub mod pruner;
pub mod quality;
pub mod scheduler;

pub use dedup::{dedup_stats, select_primary, DedupStats, Deduplicator, DuplicateCluster};
pub use merger::{merge_bullets, ArchivedBullet, MergeOutcome, MergeSummary, Merger};
pub use pruner::{BackupInfo, PruneBackup, PruneCandidate, PruneResult, Pruner};
pub use quality::{
    analyze, find_low_quality, quality_distribution, quality_score, PrunePolicy, PruneReason,
    QualityMetrics,
};
pub use scheduler::{
    MaintenanceResult, MaintenanceScheduler, MaintenanceStatus, MaintenanceTask, Schedule,
};
