//! The learning cycle.
//!
//! After a task runs, its trace flows through here:
//!
//! 1. the tick rate decides whether and how deeply to reflect
//! 2. the reflector extracts insights
//! 3. the curator turns them into quarantined bullets
//! 4. the bullets the task consumed are marked helpful or harmful
//! 5. on success, proven bullets are suggested to the other pool and taught
//!    bullets confirm their origin

use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value;

use super::curator::Curator;
use super::reflector::Reflector;
use crate::backends::LlmClient;
use crate::config::Config;
use crate::core::{ExecutionTrace, Metadata, Pool, ReflectionDepth};
use crate::error::{CortexError, Result};
use crate::memory::{KnowledgeStore, OutcomeReport};
use crate::meta::{MetaController, TickProfile};
use crate::teaching::{Suggestion, SuggestionDelivery, SuggestionStore};

/// Reason recorded on suggestions filed after a successful task.
pub const SUCCESS_REASON: &str = "successful_outcome";

/// What one learning cycle did.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LearningResult {
    pub trace_id: String,
    pub pool: Pool,
    pub reflected: bool,
    pub depth: ReflectionDepth,
    pub insights: usize,
    pub bullets_created: usize,
    pub skipped: usize,
    pub marked_helpful: usize,
    pub marked_harmful: usize,
    pub suggestions_created: usize,
    pub tick_rate: f64,
    pub timestamp: DateTime<Utc>,
    /// Set when curation failed; outcomes are still recorded.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub curation_error: Option<String>,
}

impl LearningResult {
    fn new(trace: &ExecutionTrace, tick_rate: f64) -> Self {
        Self {
            trace_id: trace.trace_id().to_string(),
            pool: trace.pool(),
            reflected: false,
            depth: ReflectionDepth::None,
            insights: 0,
            bullets_created: 0,
            skipped: 0,
            marked_helpful: 0,
            marked_harmful: 0,
            suggestions_created: 0,
            tick_rate,
            timestamp: Utc::now(),
            curation_error: None,
        }
    }
}

/// Aggregates over the recorded cycles.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct LearningStats {
    pub total_cycles: usize,
    pub reflected_cycles: usize,
    pub total_insights: usize,
    pub total_bullets: usize,
    pub avg_insights_per_cycle: f64,
    pub avg_bullets_per_cycle: f64,
    pub avg_tick_rate: f64,
}

pub struct LearningPipeline {
    store: Arc<KnowledgeStore>,
    reflector: Reflector,
    curator: Curator,
    delivery: Option<SuggestionDelivery>,
    history: Mutex<Vec<LearningResult>>,
}

impl LearningPipeline {
    pub fn new(store: Arc<KnowledgeStore>, config: &Config) -> Self {
        Self {
            reflector: Reflector::new(config),
            curator: Curator::new(Arc::clone(&store), config),
            store,
            delivery: None,
            history: Mutex::new(Vec::new()),
        }
    }

    /// Enable deep reflection.
    pub fn with_llm(mut self, llm: Arc<dyn LlmClient>) -> Self {
        self.reflector = self.reflector.with_llm(llm);
        self
    }

    /// Enable suggestion filing and delivery.
    pub fn with_suggestions(mut self, suggestions: Arc<SuggestionStore>, config: &Config) -> Self {
        self.curator = self.curator.with_suggestions(Arc::clone(&suggestions));
        self.delivery = Some(SuggestionDelivery::new(
            Arc::clone(&self.store),
            suggestions,
            config,
        ));
        self
    }

    /// Swap the curator, e.g. to attach a classifier with an LLM.
    pub fn with_curator(mut self, curator: Curator) -> Self {
        self.curator = curator;
        self
    }

    pub fn reflector(&self) -> &Reflector {
        &self.reflector
    }

    pub fn curator(&self) -> &Curator {
        &self.curator
    }

    /// Run one learning cycle for `trace` observed at `tick_rate`.
    pub async fn learn_from_trace(
        &self,
        trace: &ExecutionTrace,
        tick_rate: f64,
    ) -> Result<LearningResult> {
        tracing::info!(
            trace_id = trace.trace_id(),
            pool = %trace.pool(),
            tick_rate,
            "learning from trace"
        );
        let mut result = LearningResult::new(trace, tick_rate);
        let mut curation_failure = None;

        let depth = self.reflector.should_reflect(tick_rate, trace.outcome());
        if depth != ReflectionDepth::None {
            result.reflected = true;
            result.depth = depth;

            let insights = self.reflector.reflect(trace, depth).await;
            result.insights = insights.len();
            if !insights.is_empty() {
                match self.curator.curate(&insights, trace.pool()).await {
                    Ok(created) => {
                        result.bullets_created = created.len();
                        result.skipped = insights.len() - created.len();
                    }
                    Err(e) => {
                        tracing::warn!(
                            trace_id = trace.trace_id(),
                            error = %e,
                            "curation failed, recording outcomes anyway"
                        );
                        result.curation_error = Some(e.to_string());
                        curation_failure = Some(e);
                    }
                }
            }
        } else {
            tracing::debug!("tick rate too low, skipping reflection");
        }

        self.record_trace_outcome(trace, &mut result).await?;

        if let Some(e) = curation_failure {
            self.history.lock().push(result);
            return Err(e);
        }

        tracing::info!(
            insights = result.insights,
            bullets = result.bullets_created,
            depth = %result.depth,
            helpful = result.marked_helpful,
            harmful = result.marked_harmful,
            "learning complete"
        );
        self.history.lock().push(result.clone());
        Ok(result)
    }

    /// Learning cycle with the tick rate derived from the trace's novelty.
    pub async fn learn_from_trace_auto(
        &self,
        trace: &ExecutionTrace,
        controller: &MetaController,
        expected_success: Option<bool>,
    ) -> Result<LearningResult> {
        let tick_rate = controller.tick_rate_from_trace(trace, expected_success);
        tracing::debug!(tick_rate, "tick rate from trace novelty");
        self.learn_from_trace(trace, tick_rate).await
    }

    async fn record_trace_outcome(
        &self,
        trace: &ExecutionTrace,
        result: &mut LearningResult,
    ) -> Result<()> {
        let ids = trace.bullets_used();
        if ids.is_empty() {
            return Ok(());
        }
        let helpful = trace.success();
        let report = self.store.record_outcome(ids, helpful)?;
        if !helpful {
            result.marked_harmful = report.updated.len();
            return Ok(());
        }
        result.marked_helpful = report.updated.len();

        let consumed = self.store.get_many(ids)?;
        let filed = self
            .curator
            .generate_suggestions(&consumed, trace.pool(), SUCCESS_REASON)
            .await?;
        result.suggestions_created = filed.len();
        self.mark_cross_confirmation(&consumed)?;
        Ok(())
    }

    /// Flag the origin of every taught bullet that just helped.
    fn mark_cross_confirmation(&self, consumed: &[crate::core::Bullet]) -> Result<()> {
        for bullet in consumed {
            let Some(origin) = bullet
                .metadata
                .get("origin_bullet_id")
                .and_then(Value::as_str)
                .filter(|id| !id.is_empty())
            else {
                continue;
            };
            let mut patch = Metadata::new();
            patch.insert("cross_confirmed".into(), Value::Bool(true));
            match self.store.update_metadata(origin, patch) {
                Ok(_) => tracing::info!(origin_bullet_id = origin, "origin cross-confirmed"),
                Err(CortexError::NotFound { .. }) => {
                    tracing::debug!(origin_bullet_id = origin, "origin gone, not confirmed")
                }
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    /// Record an explicit outcome signal, e.g. from user feedback.
    pub fn record_outcome(&self, ids: &[String], helpful: bool) -> Result<OutcomeReport> {
        self.store.record_outcome(ids, helpful)
    }

    /// Deliver pending suggestions. Without a profile the system is
    /// assumed idle.
    pub async fn deliver_suggestions(
        &self,
        profile: Option<&TickProfile>,
        to_pool: Option<Pool>,
    ) -> Result<Vec<Suggestion>> {
        let Some(delivery) = &self.delivery else {
            return Ok(Vec::new());
        };
        let idle = TickProfile {
            is_idle: true,
            ..Default::default()
        };
        delivery
            .deliver_pending(profile.unwrap_or(&idle), to_pool, None)
            .await
    }

    pub fn history(&self) -> Vec<LearningResult> {
        self.history.lock().clone()
    }

    pub fn stats(&self) -> LearningStats {
        let history = self.history.lock();
        let total_cycles = history.len();
        if total_cycles == 0 {
            return LearningStats::default();
        }
        let n = total_cycles as f64;
        let total_insights: usize = history.iter().map(|r| r.insights).sum();
        let total_bullets: usize = history.iter().map(|r| r.bullets_created).sum();
        LearningStats {
            total_cycles,
            reflected_cycles: history.iter().filter(|r| r.reflected).count(),
            total_insights,
            total_bullets,
            avg_insights_per_cycle: total_insights as f64 / n,
            avg_bullets_per_cycle: total_bullets as f64 / n,
            avg_tick_rate: history.iter().map(|r| r.tick_rate).sum::<f64>() / n,
        }
    }

    pub fn clear_history(&self) {
        self.history.lock().clear();
        tracing::info!("learning history cleared");
    }
}
