//! LLM fallbacks.
//!
//! Deep reflection and the classifier tie-break both degrade to a
//! deterministic path when the LLM is unavailable. [`NoLlm`] is the client
//! used when none is configured: it always reports itself unavailable so
//! callers take that path explicitly.

use async_trait::async_trait;

use crate::backends::traits::LlmClient;
use crate::error::{CortexError, Result};

/// LLM client used when no model is configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoLlm;

#[async_trait]
impl LlmClient for NoLlm {
    async fn invoke(&self, _prompt: &str) -> Result<String> {
        Err(CortexError::unavailable("llm", "no LLM client configured"))
    }

    fn name(&self) -> &'static str {
        "llm"
    }
}

/// LLM client that replies with a fixed answer.
///
/// Lets the CLI and tests drive the deep-reflection parser without a model.
#[derive(Debug, Clone)]
pub struct StaticLlm {
    response: String,
}

impl StaticLlm {
    pub fn new(response: impl Into<String>) -> Self {
        Self {
            response: response.into(),
        }
    }
}

#[async_trait]
impl LlmClient for StaticLlm {
    async fn invoke(&self, _prompt: &str) -> Result<String> {
        Ok(self.response.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_no_llm_is_unavailable() {
        let err = NoLlm.invoke("anything").await.unwrap_err();
        assert!(err.is_collaborator_failure());
    }

    #[tokio::test]
    async fn test_static_llm_echoes_response() {
        let llm = StaticLlm::new("HEMISPHERE: left");
        assert_eq!(llm.invoke("q").await.unwrap(), "HEMISPHERE: left");
    }
}
