//! Core types for cortex.
//!
//! Bullets, execution traces and reflection insights. Everything else in the
//! crate is built on these.

pub mod bullet;
pub mod insight;
pub mod trace;

pub use bullet::{
    generate_bullet_id, normalize_text, Bullet, BulletKind, BulletStatus, Metadata, Pool,
    HARMFUL_WEIGHT, HELPFUL_WEIGHT, SHARED_CONFIDENCE_FLOOR,
};
pub use insight::{InsightKind, Priority, ReflectionDepth, ReflectionInsight};
pub use trace::{create_trace, ExecutionTrace, Outcome, TraceBuilder, TraceStep};
