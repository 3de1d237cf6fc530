//! Reflection on execution traces.
//!
//! The reflector turns a trace into candidate insights. It never writes to
//! the knowledge store; the curator decides what becomes a bullet.
//!
//! Depth is gated by the tick rate observed during execution. Routine work
//! gets a shallow note, mild novelty a pattern pass over tools and steps,
//! and failures or high novelty a deep LLM-backed analysis.

use std::sync::Arc;
use std::time::Duration;

use crate::backends::{call_with_timeout, LlmClient};
use crate::config::{Config, ReflectionConfig};
use crate::core::{
    ExecutionTrace, InsightKind, Outcome, Pool, Priority, ReflectionDepth, ReflectionInsight,
};

// =============================================================================
// Constants
// =============================================================================

/// Characters of the task quoted in evidence.
const TASK_EVIDENCE_CHARS: usize = 100;
/// Steps included in the reflection prompt.
const PROMPT_STEPS: usize = 10;
/// Failed steps turned into pitfalls by a medium reflection.
const MAX_STEP_PITFALLS: usize = 2;
/// Confidence of a parsed insight that does not state one.
const DEFAULT_PARSED_CONFIDENCE: f64 = 0.7;

// =============================================================================
// Reflector
// =============================================================================

pub struct Reflector {
    thresholds: ReflectionConfig,
    llm: Option<Arc<dyn LlmClient>>,
    timeout: Duration,
}

impl Reflector {
    pub fn new(config: &Config) -> Self {
        Self {
            thresholds: config.reflection.clone(),
            llm: None,
            timeout: Duration::from_millis(config.memory.collaborator_timeout_ms),
        }
    }

    /// Enable deep reflection.
    pub fn with_llm(mut self, llm: Arc<dyn LlmClient>) -> Self {
        self.llm = Some(llm);
        self
    }

    pub fn has_llm(&self) -> bool {
        self.llm.is_some()
    }

    /// Depth for a trace. Failures always get a deep reflection.
    pub fn should_reflect(&self, tick_rate: f64, outcome: Outcome) -> ReflectionDepth {
        if outcome == Outcome::Failure || tick_rate > self.thresholds.deep_threshold {
            ReflectionDepth::Deep
        } else if tick_rate > self.thresholds.medium_threshold {
            ReflectionDepth::Medium
        } else if tick_rate > self.thresholds.shallow_threshold {
            ReflectionDepth::Shallow
        } else {
            ReflectionDepth::None
        }
    }

    /// Extract insights at the given depth. Never fails: deep reflection
    /// falls back to a medium pass when the LLM is missing or errors.
    pub async fn reflect(
        &self,
        trace: &ExecutionTrace,
        depth: ReflectionDepth,
    ) -> Vec<ReflectionInsight> {
        tracing::debug!(
            trace_id = trace.trace_id(),
            %depth,
            outcome = %trace.outcome(),
            "reflecting"
        );
        let insights = match depth {
            ReflectionDepth::None => Vec::new(),
            ReflectionDepth::Shallow => shallow(trace),
            ReflectionDepth::Medium => medium(trace),
            ReflectionDepth::Deep => self.deep(trace).await,
        };
        tracing::info!(
            trace_id = trace.trace_id(),
            count = insights.len(),
            outcome = %trace.outcome(),
            "insights extracted"
        );
        insights
    }

    async fn deep(&self, trace: &ExecutionTrace) -> Vec<ReflectionInsight> {
        let mut insights = match &self.llm {
            None => {
                tracing::warn!("deep reflection without an LLM, using medium");
                medium(trace)
            }
            Some(llm) => {
                let prompt = reflection_prompt(trace);
                match call_with_timeout(llm.name(), self.timeout, llm.invoke(&prompt)).await {
                    Ok(answer) => parse_insights(&answer, trace.trace_id(), trace.pool()),
                    Err(e) => {
                        tracing::error!("deep reflection failed: {}", e);
                        medium(trace)
                    }
                }
            }
        };

        if !trace.success() && !insights.iter().any(|i| i.kind == InsightKind::Pitfall) {
            insights.push(failure_note(trace));
        }
        insights
    }
}

// =============================================================================
// Templates
// =============================================================================

fn task_evidence(trace: &ExecutionTrace) -> String {
    let task: String = trace.task().chars().take(TASK_EVIDENCE_CHARS).collect();
    format!("Task: {}", task)
}

fn error_text(trace: &ExecutionTrace) -> &str {
    trace.error_message().unwrap_or("unknown error")
}

fn failure_note(trace: &ExecutionTrace) -> ReflectionInsight {
    ReflectionInsight::new(
        InsightKind::Pitfall,
        format!("Task failed: {}", error_text(trace)),
        0.5,
    )
    .with_evidence(task_evidence(trace))
    .with_evidence(format!("Error: {}", error_text(trace)))
    .with_tags(["failure", "needs-investigation"])
    .with_priority(Priority::Medium)
    .with_trace(trace.trace_id())
}

/// Record success or failure without analysis.
pub fn shallow(trace: &ExecutionTrace) -> Vec<ReflectionInsight> {
    if !trace.success() {
        return vec![failure_note(trace)];
    }
    if trace.bullets_used().is_empty() {
        return Vec::new();
    }
    vec![ReflectionInsight::new(
        InsightKind::Strategy,
        "Successfully completed task using existing strategies",
        0.6,
    )
    .with_evidence(task_evidence(trace))
    .with_evidence(format!("Bullets used: {}", trace.bullets_used().len()))
    .with_tags(["success", "routine"])
    .with_priority(Priority::Low)
    .with_trace(trace.trace_id())]
}

/// One insight per unique tool, plus pitfalls for the first failed steps.
pub fn medium(trace: &ExecutionTrace) -> Vec<ReflectionInsight> {
    let mut insights = Vec::new();

    for tool in trace.unique_tools() {
        let insight = if trace.success() {
            ReflectionInsight::new(
                InsightKind::ToolRule,
                format!("Tool '{}' was successfully used for this task type", tool),
                0.7,
            )
            .with_evidence("Outcome: success")
            .with_tags([tool, "tool-usage", "success"])
            .with_priority(Priority::Medium)
        } else {
            ReflectionInsight::new(
                InsightKind::Pitfall,
                format!("Tool '{}' failed - may need different approach or validation", tool),
                0.6,
            )
            .with_evidence(format!("Error: {}", error_text(trace)))
            .with_tags([tool, "tool-usage", "failure"])
            .with_priority(Priority::High)
        };
        let mut insight = insight.with_trace(trace.trace_id());
        insight.evidence.insert(0, format!("Tool: {}", tool));
        insight.evidence.insert(0, task_evidence(trace));
        insights.push(insight);
    }

    for step in trace
        .steps()
        .iter()
        .filter(|s| !s.success)
        .take(MAX_STEP_PITFALLS)
    {
        insights.push(
            ReflectionInsight::new(
                InsightKind::Pitfall,
                format!("Step failed: {}", step.description),
                0.65,
            )
            .with_evidence(format!("Step: {}", step.description))
            .with_evidence(format!("Error: {}", step.error.as_deref().unwrap_or("N/A")))
            .with_tags(["step-failure", trace.pool().as_str()])
            .with_priority(Priority::Medium)
            .with_trace(trace.trace_id()),
        );
    }

    insights
}

// =============================================================================
// Deep reflection prompt and parsing
// =============================================================================

/// Prompt asking the LLM for 2-5 insights in `---` separated blocks.
pub fn reflection_prompt(trace: &ExecutionTrace) -> String {
    let steps = trace
        .steps()
        .iter()
        .take(PROMPT_STEPS)
        .enumerate()
        .map(|(i, s)| {
            let status = if s.success { "OK success" } else { "X failed" };
            format!("{}. {} - {}", i + 1, s.description, status)
        })
        .collect::<Vec<_>>()
        .join("\n");
    let tools = if trace.tools_called().is_empty() {
        "None".to_string()
    } else {
        trace.tools_called().join(", ")
    };
    let error = trace
        .error_message()
        .map(|e| format!("ERROR: {}", e))
        .unwrap_or_default();

    format!(
        "Analyze this execution trace and extract actionable insights.

TASK: {task}

OUTCOME: {outcome} (success={success})
{error}

EXECUTION STEPS:
{steps}

TOOLS USED: {tools}

BULLETS USED: {bullets} procedural bullets were retrieved

CONTEXT:
- Pool: {pool}
- Tick rate: {tick_rate:.2} (higher = more novelty/conflict)
- Confidence: {confidence:.2}

Extract 2-5 actionable insights from this execution.
Focus on:
1. What strategies WORKED and should be remembered
2. What PITFALLS to avoid in the future
3. New PATTERNS or HEURISTICS discovered
4. TOOL-SPECIFIC rules or best practices
5. EDGE CASES or boundary conditions

For each insight, provide:
- TYPE: [strategy/pitfall/pattern/tool_rule/heuristic/edge_case]
- TEXT: [concise, actionable description]
- CONFIDENCE: [0.0-1.0]
- EVIDENCE: [why you believe this]
- TAGS: [relevant tags]
- PRIORITY: [low/medium/high]

Format as:
---
TYPE: strategy
TEXT: When X happens, do Y because Z
CONFIDENCE: 0.8
EVIDENCE: Step 3 succeeded using this approach; similar pattern in step 5
TAGS: tool-name, pattern-type
PRIORITY: high
---

Provide 2-5 insights:",
        task = trace.task(),
        outcome = trace.outcome().as_str().to_uppercase(),
        success = trace.success(),
        bullets = trace.bullets_used().len(),
        pool = trace.pool(),
        tick_rate = trace.tick_rate(),
        confidence = trace.confidence(),
    )
}

/// Parse `---` separated `KEY: value` blocks.
///
/// Blocks without both a type and a text are skipped. Unknown types become
/// heuristics; a missing or unreadable confidence becomes 0.7; missing tags
/// default to the pool name.
pub fn parse_insights(answer: &str, trace_id: &str, pool: Pool) -> Vec<ReflectionInsight> {
    answer
        .split("---")
        .filter_map(|block| parse_block(block, trace_id, pool))
        .collect()
}

fn parse_block(block: &str, trace_id: &str, pool: Pool) -> Option<ReflectionInsight> {
    let mut kind = None;
    let mut text = None;
    let mut confidence = DEFAULT_PARSED_CONFIDENCE;
    let mut evidence = None;
    let mut tags = None;
    let mut priority = Priority::Medium;

    for line in block.lines() {
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        let value = value.trim();
        match key.trim().to_ascii_lowercase().as_str() {
            "type" => kind = Some(value.parse().unwrap_or(InsightKind::Heuristic)),
            "text" => text = Some(value.to_string()),
            "confidence" => {
                confidence = value.parse().unwrap_or(DEFAULT_PARSED_CONFIDENCE);
            }
            "evidence" => evidence = Some(value.to_string()),
            "tags" => tags = Some(split_tags(value)),
            "priority" => priority = Priority::parse_lenient(value),
            _ => {}
        }
    }

    let text = text.filter(|t| !t.is_empty())?;
    Some(
        ReflectionInsight::new(kind?, text, confidence)
            .with_evidence(evidence.unwrap_or_else(|| "No evidence provided".to_string()))
            .with_tags(tags.unwrap_or_else(|| vec![pool.as_str().to_string()]))
            .with_priority(priority)
            .with_trace(trace_id),
    )
}

fn split_tags(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .collect()
}
