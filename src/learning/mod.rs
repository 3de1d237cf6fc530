//! Learning from execution traces.
//!
//! - [`reflector`]: tick-gated reflection producing insights
//! - [`curator`]: the only writer, turning insights into quarantined bullets
//! - [`classifier`] and [`meta_rules`]: which pool new knowledge belongs to
//! - [`pipeline`]: the full cycle from trace to outcome and suggestions

pub mod classifier;
pub mod curator;
pub mod meta_rules;
pub mod pipeline;
pub mod reflector;

pub use classifier::{decide, parse_classification, score_pool, Classification, HemisphereClassifier};
pub use curator::{Curator, OUTCOME_REASON};
pub use meta_rules::{rules_for, MetaRule, META_RULES};
pub use pipeline::{LearningPipeline, LearningResult, LearningStats, SUCCESS_REASON};
pub use reflector::{parse_insights, reflection_prompt, Reflector};
