//! Execution traces.
//!
//! A trace is produced by the tool-execution layer once per task and handed
//! to the learning pipeline. Fields are private so a built trace cannot be
//! mutated; use [`TraceBuilder`] or [`create_trace`].

use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::bullet::{clamp_unit, Metadata, Pool};

/// Outcome of an execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    Success,
    Failure,
    Partial,
    Uncertain,
}

impl Outcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Outcome::Success => "success",
            Outcome::Failure => "failure",
            Outcome::Partial => "partial",
            Outcome::Uncertain => "uncertain",
        }
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One step of an execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraceStep {
    pub description: String,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Tool the step invoked, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool: Option<String>,
}

impl TraceStep {
    pub fn ok(description: impl Into<String>) -> Self {
        Self {
            description: description.into(),
            success: true,
            error: None,
            tool: None,
        }
    }

    pub fn failed(description: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            description: description.into(),
            success: false,
            error: Some(error.into()),
            tool: None,
        }
    }

    pub fn with_tool(mut self, tool: impl Into<String>) -> Self {
        self.tool = Some(tool.into());
        self
    }
}

/// Immutable record of one task execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionTrace {
    trace_id: String,
    task: String,
    pool: Pool,
    steps: Vec<TraceStep>,
    bullets_used: Vec<String>,
    tools_called: Vec<String>,
    outcome: Outcome,
    success: bool,
    confidence: f64,
    tick_rate: f64,
    error_message: Option<String>,
    timestamp: DateTime<Utc>,
    metadata: Metadata,
}

impl ExecutionTrace {
    pub fn builder(task: impl Into<String>, pool: Pool) -> TraceBuilder {
        TraceBuilder::new(task, pool)
    }

    pub fn trace_id(&self) -> &str {
        &self.trace_id
    }

    pub fn task(&self) -> &str {
        &self.task
    }

    pub fn pool(&self) -> Pool {
        self.pool
    }

    pub fn steps(&self) -> &[TraceStep] {
        &self.steps
    }

    pub fn bullets_used(&self) -> &[String] {
        &self.bullets_used
    }

    pub fn tools_called(&self) -> &[String] {
        &self.tools_called
    }

    pub fn outcome(&self) -> Outcome {
        self.outcome
    }

    pub fn success(&self) -> bool {
        self.success
    }

    pub fn confidence(&self) -> f64 {
        self.confidence
    }

    pub fn tick_rate(&self) -> f64 {
        self.tick_rate
    }

    pub fn error_message(&self) -> Option<&str> {
        self.error_message.as_deref()
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    /// Per-tool success map: a tool counts as failed if any step using it failed.
    pub fn tool_results(&self) -> HashMap<String, bool> {
        let mut results: HashMap<String, bool> = HashMap::new();
        for step in &self.steps {
            if let Some(tool) = &step.tool {
                let entry = results.entry(tool.clone()).or_insert(true);
                *entry = *entry && step.success;
            }
        }
        results
    }

    /// Unique tools in first-call order.
    pub fn unique_tools(&self) -> Vec<&str> {
        let mut seen = Vec::new();
        for tool in &self.tools_called {
            if !seen.contains(&tool.as_str()) {
                seen.push(tool.as_str());
            }
        }
        seen
    }
}

/// Builder for [`ExecutionTrace`].
#[derive(Debug, Clone)]
pub struct TraceBuilder {
    trace: ExecutionTrace,
    outcome_set: bool,
}

impl TraceBuilder {
    pub fn new(task: impl Into<String>, pool: Pool) -> Self {
        let now = Utc::now();
        Self {
            trace: ExecutionTrace {
                trace_id: format!("trace_{}_{}", pool, now.timestamp_millis()),
                task: task.into(),
                pool,
                steps: Vec::new(),
                bullets_used: Vec::new(),
                tools_called: Vec::new(),
                outcome: Outcome::Uncertain,
                success: false,
                confidence: 0.5,
                tick_rate: 0.0,
                error_message: None,
                timestamp: now,
                metadata: Metadata::new(),
            },
            outcome_set: false,
        }
    }

    pub fn trace_id(mut self, id: impl Into<String>) -> Self {
        self.trace.trace_id = id.into();
        self
    }

    pub fn step(mut self, step: TraceStep) -> Self {
        if let Some(tool) = &step.tool {
            self.trace.tools_called.push(tool.clone());
        }
        self.trace.steps.push(step);
        self
    }

    pub fn bullets_used(mut self, ids: Vec<String>) -> Self {
        self.trace.bullets_used = ids;
        self
    }

    /// Add tools called outside of any recorded step.
    pub fn tools(mut self, tools: Vec<String>) -> Self {
        self.trace.tools_called.extend(tools);
        self
    }

    pub fn success(mut self, success: bool) -> Self {
        self.trace.success = success;
        self
    }

    /// Force an explicit outcome instead of deriving it.
    pub fn outcome(mut self, outcome: Outcome) -> Self {
        self.trace.outcome = outcome;
        self.outcome_set = true;
        self
    }

    pub fn confidence(mut self, confidence: f64) -> Self {
        self.trace.confidence = clamp_unit(confidence);
        self
    }

    pub fn tick_rate(mut self, tick_rate: f64) -> Self {
        self.trace.tick_rate = tick_rate.max(0.0);
        self
    }

    pub fn error(mut self, message: impl Into<String>) -> Self {
        self.trace.error_message = Some(message.into());
        self
    }

    pub fn metadata(mut self, metadata: Metadata) -> Self {
        self.trace.metadata = metadata;
        self
    }

    /// Finish the trace. Unless set explicitly, the outcome is success when
    /// the task succeeded, failure when an error message is present, and
    /// uncertain otherwise.
    pub fn build(mut self) -> ExecutionTrace {
        if !self.outcome_set {
            self.trace.outcome = if self.trace.success {
                Outcome::Success
            } else if self.trace.error_message.is_some() {
                Outcome::Failure
            } else {
                Outcome::Uncertain
            };
        }
        self.trace
    }
}

/// Convenience constructor mirroring the common call shape.
pub fn create_trace(
    task: impl Into<String>,
    pool: Pool,
    steps: Vec<TraceStep>,
    bullets_used: Vec<String>,
    success: bool,
    error_message: Option<String>,
) -> ExecutionTrace {
    let mut builder = TraceBuilder::new(task, pool)
        .bullets_used(bullets_used)
        .success(success);
    for step in steps {
        builder = builder.step(step);
    }
    if let Some(message) = error_message {
        builder = builder.error(message);
    }
    builder.build()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outcome_derivation() {
        let ok = ExecutionTrace::builder("t", Pool::Left).success(true).build();
        assert_eq!(ok.outcome(), Outcome::Success);

        let failed = ExecutionTrace::builder("t", Pool::Left).error("boom").build();
        assert_eq!(failed.outcome(), Outcome::Failure);

        let unclear = ExecutionTrace::builder("t", Pool::Left).build();
        assert_eq!(unclear.outcome(), Outcome::Uncertain);

        let partial = ExecutionTrace::builder("t", Pool::Left)
            .success(true)
            .outcome(Outcome::Partial)
            .build();
        assert_eq!(partial.outcome(), Outcome::Partial);
    }

    #[test]
    fn test_trace_id_format() {
        let trace = ExecutionTrace::builder("t", Pool::Right).build();
        assert!(trace.trace_id().starts_with("trace_right_"));
    }

    #[test]
    fn test_steps_record_tools() {
        let trace = ExecutionTrace::builder("deploy", Pool::Left)
            .step(TraceStep::ok("read config").with_tool("fs"))
            .step(TraceStep::failed("push", "denied").with_tool("git"))
            .step(TraceStep::ok("retry read").with_tool("fs"))
            .build();

        assert_eq!(trace.tools_called(), &["fs", "git", "fs"]);
        assert_eq!(trace.unique_tools(), vec!["fs", "git"]);

        let results = trace.tool_results();
        assert_eq!(results.get("fs"), Some(&true));
        assert_eq!(results.get("git"), Some(&false));
    }

    #[test]
    fn test_create_trace() {
        let trace = create_trace(
            "task",
            Pool::Left,
            vec![TraceStep::failed("step", "bad")],
            vec!["pb_1".to_string()],
            false,
            Some("bad".to_string()),
        );
        assert_eq!(trace.outcome(), Outcome::Failure);
        assert_eq!(trace.bullets_used(), &["pb_1".to_string()]);
        assert_eq!(trace.error_message(), Some("bad"));
    }

    #[test]
    fn test_confidence_clamped() {
        let trace = ExecutionTrace::builder("t", Pool::Left).confidence(1.7).build();
        assert_eq!(trace.confidence(), 1.0);
    }
}
