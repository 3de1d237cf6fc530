//! Forced exploration.
//!
//! A left-leaning system can settle into exploiting forever. This policy
//! watches which pool led recent ticks and forces the right pool to lead
//! when it has been starved, the pools have converged, or a fixed interval
//! comes around.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::config::{DiversityConfig, ExplorationConfig};
use crate::error::CortexError;

/// Which pool led a tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Lead {
    RightLead,
    LeftLead,
    Both,
    Idle,
}

impl Lead {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RightLead => "right_lead",
            Self::LeftLead => "left_lead",
            Self::Both => "both",
            Self::Idle => "idle",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExplorationMode {
    #[default]
    Quota,
    Stuck,
    Drift,
    Hybrid,
    Interval,
}

impl ExplorationMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Quota => "quota",
            Self::Stuck => "stuck",
            Self::Drift => "drift",
            Self::Hybrid => "hybrid",
            Self::Interval => "interval",
        }
    }

    fn checks_stuck(self) -> bool {
        matches!(self, Self::Hybrid | Self::Stuck)
    }

    fn checks_drift(self) -> bool {
        matches!(self, Self::Hybrid | Self::Drift)
    }

    fn checks_quota(self) -> bool {
        matches!(self, Self::Hybrid | Self::Quota)
    }
}

impl FromStr for ExplorationMode {
    type Err = CortexError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "quota" => Ok(Self::Quota),
            "stuck" => Ok(Self::Stuck),
            "drift" => Ok(Self::Drift),
            "hybrid" => Ok(Self::Hybrid),
            "interval" => Ok(Self::Interval),
            other => Err(CortexError::invalid_policy("exploration mode", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExplorationTrigger {
    Stuck,
    Drift,
    Quota,
    Interval,
}

impl ExplorationTrigger {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Stuck => "stuck_trigger",
            Self::Drift => "drift_trigger",
            Self::Quota => "quota_trigger",
            Self::Interval => "interval_trigger",
        }
    }
}

impl fmt::Display for ExplorationTrigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ExplorationDecision {
    pub force_right_lead: bool,
    /// Right pool joins as a critic instead of leading (high-risk tasks).
    pub force_right_critic: bool,
    pub trigger: Option<ExplorationTrigger>,
}

impl ExplorationDecision {
    pub fn is_forced(&self) -> bool {
        self.force_right_lead || self.force_right_critic
    }
}

#[derive(Debug, Clone)]
pub struct ExplorationPolicy {
    enabled: bool,
    mode: ExplorationMode,
    window_size: usize,
    min_right_fraction: f64,
    interval_ticks: u64,
    stuck_window: usize,
    allow_right_critic_on_high_risk: bool,
    safe_override: bool,
    convergence_warning: f64,
}

impl ExplorationPolicy {
    pub fn new(config: &ExplorationConfig, diversity: &DiversityConfig) -> Self {
        let mode = config.mode.parse().unwrap_or_else(|e| {
            tracing::warn!("{}; using quota", e);
            ExplorationMode::Quota
        });
        Self {
            enabled: config.enabled,
            mode,
            window_size: config.window_size,
            min_right_fraction: config.min_right_fraction,
            interval_ticks: config.interval_ticks,
            stuck_window: config.stuck_window,
            allow_right_critic_on_high_risk: config.allow_right_critic_on_high_risk,
            safe_override: config.safe_override,
            convergence_warning: diversity.convergence_warning,
        }
    }

    pub fn enabled(&self) -> bool {
        self.enabled
    }

    pub fn mode(&self) -> ExplorationMode {
        self.mode
    }

    /// Longest lead history any check looks at.
    pub fn history_needed(&self) -> usize {
        self.window_size.max(self.stuck_window)
    }

    /// Decide whether to force the right pool forward.
    ///
    /// `history` is oldest first. `divergence` is the current pool
    /// divergence if known; `high_risk` marks tasks where a right lead is
    /// unsafe.
    pub fn evaluate(
        &self,
        history: &[Lead],
        divergence: Option<f64>,
        tick_count: u64,
        high_risk: bool,
    ) -> ExplorationDecision {
        if !self.enabled {
            return ExplorationDecision::default();
        }

        let Some(trigger) = self.trigger(history, divergence, tick_count) else {
            return ExplorationDecision::default();
        };

        if high_risk && !self.safe_override {
            if self.allow_right_critic_on_high_risk {
                return ExplorationDecision {
                    force_right_critic: true,
                    trigger: Some(trigger),
                    ..Default::default()
                };
            }
            return ExplorationDecision::default();
        }

        ExplorationDecision {
            force_right_lead: true,
            trigger: Some(trigger),
            ..Default::default()
        }
    }

    fn trigger(
        &self,
        history: &[Lead],
        divergence: Option<f64>,
        tick_count: u64,
    ) -> Option<ExplorationTrigger> {
        if self.mode.checks_stuck() && self.is_stuck(history) {
            return Some(ExplorationTrigger::Stuck);
        }
        if self.mode.checks_drift() && divergence.is_some_and(|d| d < self.convergence_warning) {
            return Some(ExplorationTrigger::Drift);
        }
        if self.mode.checks_quota() && self.quota_violated(history) {
            return Some(ExplorationTrigger::Quota);
        }
        if self.mode == ExplorationMode::Interval
            && tick_count > 0
            && self.interval_ticks > 0
            && tick_count % self.interval_ticks == 0
        {
            return Some(ExplorationTrigger::Interval);
        }
        None
    }

    fn quota_violated(&self, history: &[Lead]) -> bool {
        let window = &history[history.len().saturating_sub(self.window_size)..];
        if window.is_empty() {
            return false;
        }
        let right = window.iter().filter(|l| **l == Lead::RightLead).count();
        (right as f64 / window.len() as f64) < self.min_right_fraction
    }

    /// The last `stuck_window` leads are identical and not right.
    fn is_stuck(&self, history: &[Lead]) -> bool {
        if self.stuck_window == 0 || history.len() < self.stuck_window {
            return false;
        }
        let window = &history[history.len() - self.stuck_window..];
        window[0] != Lead::RightLead && window.iter().all(|l| *l == window[0])
    }
}
