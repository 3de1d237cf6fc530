//! External collaborators for cortex.
//!
//! Available implementations:
//! - **HashEmbedder**: deterministic trigram-hash embedder (default)
//! - **NoLlm**: LLM placeholder that is always unavailable (default)
//! - **StaticLlm**: fixed-answer LLM for scripted runs

pub mod fallback;
pub mod hash_embed;
pub mod traits;

pub use fallback::{NoLlm, StaticLlm};
pub use hash_embed::HashEmbedder;
pub use traits::{call_with_timeout, embed_one, embed_with_timeout, Embedder, LlmClient};
