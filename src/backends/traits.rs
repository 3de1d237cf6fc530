//! Collaborator traits for cortex.
//!
//! The engine talks to its two external collaborators, the embedding
//! function and the LLM, only through these traits. Every call goes through
//! [`call_with_timeout`] so a stalled collaborator fails the operation
//! cleanly instead of hanging it.

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::{CortexError, Result};

/// Turns texts into vectors.
///
/// Implementations must be deterministic for a given text and return one
/// vector per input, in input order.
#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    /// Vector dimension.
    fn dimension(&self) -> usize;

    /// Name used in logs and timeout errors.
    fn name(&self) -> &'static str {
        "embedder"
    }
}

/// Text-in, text-out LLM inference.
#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn invoke(&self, prompt: &str) -> Result<String>;

    fn name(&self) -> &'static str {
        "llm"
    }
}

/// Run a collaborator future under a deadline.
///
/// Elapsed deadlines become [`CortexError::CollaboratorTimeout`]; errors
/// from the future itself pass through unchanged.
pub async fn call_with_timeout<T, F>(
    collaborator: &'static str,
    timeout: Duration,
    fut: F,
) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match tokio::time::timeout(timeout, fut).await {
        Ok(result) => result,
        Err(_) => {
            tracing::warn!(
                collaborator,
                timeout_ms = timeout.as_millis() as u64,
                "collaborator call timed out"
            );
            Err(CortexError::timeout(collaborator, timeout.as_millis() as u64))
        }
    }
}

/// Embed a batch under a deadline and check the result shape.
pub async fn embed_with_timeout(
    embedder: &dyn Embedder,
    texts: &[String],
    timeout: Duration,
) -> Result<Vec<Vec<f32>>> {
    if texts.is_empty() {
        return Ok(Vec::new());
    }
    let vectors = call_with_timeout(embedder.name(), timeout, embedder.embed(texts)).await?;
    if vectors.len() != texts.len() {
        return Err(CortexError::unavailable(
            embedder.name(),
            format!("returned {} vectors for {} texts", vectors.len(), texts.len()),
        ));
    }
    Ok(vectors)
}

/// Embed a single text under a deadline.
pub async fn embed_one(embedder: &dyn Embedder, text: &str, timeout: Duration) -> Result<Vec<f32>> {
    let mut vectors = embed_with_timeout(embedder, &[text.to_string()], timeout).await?;
    vectors
        .pop()
        .ok_or_else(|| CortexError::unavailable(embedder.name(), "returned no vector"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::testing::{FailingEmbedder, SlowEmbedder};
    use crate::backends::HashEmbedder;

    #[tokio::test]
    async fn test_call_with_timeout_passes_result() {
        let value = call_with_timeout("llm", Duration::from_millis(100), async { Ok(7) })
            .await
            .unwrap();
        assert_eq!(value, 7);
    }

    #[tokio::test]
    async fn test_call_with_timeout_elapsed() {
        let err = embed_one(
            &SlowEmbedder::new(Duration::from_millis(200)),
            "text",
            Duration::from_millis(10),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, CortexError::CollaboratorTimeout { .. }));
    }

    #[tokio::test]
    async fn test_errors_pass_through() {
        let err = embed_one(&FailingEmbedder, "text", Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(err, CortexError::CollaboratorUnavailable { .. }));
    }

    #[tokio::test]
    async fn test_empty_batch_skips_call() {
        let vectors = embed_with_timeout(&FailingEmbedder, &[], Duration::from_secs(1))
            .await
            .unwrap();
        assert!(vectors.is_empty());
    }

    #[tokio::test]
    async fn test_embed_one() {
        let v = embed_one(&HashEmbedder::default(), "hello world", Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(v.len(), 256);
    }
}
