//! Novelty detection.
//!
//! Turns the observable surprise of one execution into a tick rate in
//! [0, 1]. High rates buy deeper reflection; routine work gets 0.1.
//! Measuring never fails.

use std::collections::{BTreeMap, HashMap, VecDeque};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;

use crate::core::ExecutionTrace;

/// Confidence below which an agent counts as uncertain.
pub const BASELINE_CONFIDENCE: f64 = 0.7;
/// Rate returned when nothing was surprising.
pub const ROUTINE_TICK_RATE: f64 = 0.1;

const MAX_HISTORY: usize = 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NoveltySignal {
    PredictionError,
    ExecutionError,
    LowConfidence,
    ToolFailure,
    UnexpectedSuccess,
}

impl NoveltySignal {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PredictionError => "prediction_error",
            Self::ExecutionError => "execution_error",
            Self::LowConfidence => "low_confidence",
            Self::ToolFailure => "tool_failure",
            Self::UnexpectedSuccess => "unexpected_success",
        }
    }
}

/// What happened in one execution.
#[derive(Debug, Clone, Default)]
pub struct NoveltyInput {
    /// Predicted outcome, if the caller had one.
    pub expected: Option<bool>,
    pub actual: bool,
    pub confidence: f64,
    /// Tool name to success.
    pub tool_results: HashMap<String, bool>,
    pub error_message: Option<String>,
}

impl NoveltyInput {
    pub fn new(actual: bool, confidence: f64) -> Self {
        Self {
            actual,
            confidence,
            ..Default::default()
        }
    }

    pub fn with_expected(mut self, expected: bool) -> Self {
        self.expected = Some(expected);
        self
    }

    pub fn with_tool_result(mut self, tool: impl Into<String>, success: bool) -> Self {
        self.tool_results.insert(tool.into(), success);
        self
    }

    pub fn with_error(mut self, message: impl Into<String>) -> Self {
        self.error_message = Some(message.into());
        self
    }

    /// Build from a trace: actual outcome, confidence, error and per-tool
    /// results from its steps.
    pub fn from_trace(trace: &ExecutionTrace, expected: Option<bool>) -> Self {
        Self {
            expected,
            actual: trace.success(),
            confidence: trace.confidence(),
            tool_results: trace.tool_results(),
            error_message: trace.error_message().map(str::to_string),
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Measurement {
    signal: NoveltySignal,
    at: DateTime<Utc>,
}

/// Signals raised by `input`, with magnitudes.
pub fn signals(input: &NoveltyInput) -> Vec<(NoveltySignal, f64)> {
    let mut out = Vec::new();
    if let Some(expected) = input.expected {
        if expected != input.actual {
            let magnitude = if input.actual { 0.6 } else { 0.8 };
            out.push((NoveltySignal::PredictionError, magnitude));
        }
    }
    if !input.actual {
        out.push((NoveltySignal::ExecutionError, 0.9));
    }
    if input.confidence < BASELINE_CONFIDENCE {
        out.push((NoveltySignal::LowConfidence, 1.0 - input.confidence));
    }
    // sorted so measurement order does not depend on hash order
    let mut failed: Vec<&String> = input
        .tool_results
        .iter()
        .filter(|(_, ok)| !**ok)
        .map(|(name, _)| name)
        .collect();
    failed.sort();
    out.extend(failed.into_iter().map(|_| (NoveltySignal::ToolFailure, 0.7)));
    if input.actual && input.confidence < 0.4 {
        out.push((NoveltySignal::UnexpectedSuccess, 0.5));
    }
    out
}

/// Mean magnitude plus 0.1 per signal (at most 0.3), capped at 1.
pub fn tick_rate_for(signals: &[(NoveltySignal, f64)]) -> f64 {
    if signals.is_empty() {
        return ROUTINE_TICK_RATE;
    }
    let n = signals.len() as f64;
    let mean = signals.iter().map(|(_, m)| m).sum::<f64>() / n;
    (mean + (0.1 * n).min(0.3)).min(1.0)
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NoveltyStats {
    pub current_novelty: f64,
    pub total_measurements: usize,
    pub recent_measurements: usize,
    pub signal_counts: BTreeMap<&'static str, usize>,
    pub baseline_confidence: f64,
}

#[derive(Debug, Default)]
struct NoveltyState {
    current: f64,
    total: usize,
    history: VecDeque<Measurement>,
}

/// Tracks novelty as an exponential moving average of tick rates.
#[derive(Debug)]
pub struct NoveltyDetector {
    decay: f64,
    window_secs: f64,
    state: Mutex<NoveltyState>,
}

impl NoveltyDetector {
    pub fn new(decay: f64, window_secs: f64) -> Self {
        Self {
            decay: decay.clamp(0.0, 1.0),
            window_secs: window_secs.max(0.0),
            state: Mutex::new(NoveltyState::default()),
        }
    }

    /// Measure one execution and fold it into the moving average.
    pub fn measure(&self, input: &NoveltyInput) -> f64 {
        self.measure_at(input, Utc::now())
    }

    pub fn measure_at(&self, input: &NoveltyInput, now: DateTime<Utc>) -> f64 {
        let raised = signals(input);
        let rate = tick_rate_for(&raised);

        let mut state = self.state.lock();
        state.total += raised.len();
        state
            .history
            .extend(raised.iter().map(|(signal, _)| Measurement { signal: *signal, at: now }));
        while state.history.len() > MAX_HISTORY {
            state.history.pop_front();
        }
        state.current = self.decay * state.current + (1.0 - self.decay) * rate;

        if rate > 0.5 {
            tracing::debug!(tick_rate = rate, signals = raised.len(), "high novelty");
        }
        rate
    }

    pub fn measure_from_trace(&self, trace: &ExecutionTrace, expected: Option<bool>) -> f64 {
        self.measure(&NoveltyInput::from_trace(trace, expected))
    }

    /// The moving average.
    pub fn current_tick_rate(&self) -> f64 {
        self.state.lock().current
    }

    pub fn stats(&self) -> NoveltyStats {
        self.stats_at(Utc::now())
    }

    /// Signal counts within the trailing window ending at `now`.
    pub fn stats_at(&self, now: DateTime<Utc>) -> NoveltyStats {
        let state = self.state.lock();
        let window = chrono::Duration::milliseconds((self.window_secs * 1000.0) as i64);
        let mut signal_counts = BTreeMap::new();
        let mut recent = 0;
        for m in state.history.iter().filter(|m| now - m.at <= window) {
            recent += 1;
            *signal_counts.entry(m.signal.as_str()).or_insert(0) += 1;
        }
        NoveltyStats {
            current_novelty: state.current,
            total_measurements: state.total,
            recent_measurements: recent,
            signal_counts,
            baseline_confidence: BASELINE_CONFIDENCE,
        }
    }

    pub fn reset(&self) {
        *self.state.lock() = NoveltyState::default();
    }
}

impl Default for NoveltyDetector {
    fn default() -> Self {
        Self::new(0.8, 60.0)
    }
}
