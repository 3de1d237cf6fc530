//! Knowledge transfer between the left and right pools.
//!
//! Suggestions are filed by the learning pipeline or by explicit teaching,
//! and delivered into the target pool only when the controller reports low
//! pressure. Conflict and diversity checks keep the pools from absorbing
//! contradictions or collapsing into one another.

pub mod conflict;
pub mod delivery;
pub mod diversity;
pub mod suggestions;
pub mod teach;

pub use conflict::{content_similarity, polarity, ConflictDetector, Polarity};
pub use delivery::{can_deliver, SuggestionDelivery, TAUGHT_TAG};
pub use diversity::{tag_distribution, tag_divergence, DiversityMetrics, DiversityReport};
pub use suggestions::{generate_suggestion_id, Suggestion, SuggestionStatus, SuggestionStore};
pub use teach::{translate, TeachingApi};
