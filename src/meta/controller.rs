//! Tick-driven meta-controller.
//!
//! Each tick reads the left and right pools' entropy and confidence,
//! decides an operating mode, charges the energy budget, adapts the tick
//! interval and records the outcome. Explore puts the right pool in the
//! lead, exploit the left, integrate both.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;

use super::energy::EnergyBudget;
use super::exploration::{ExplorationPolicy, Lead};
use super::novelty::NoveltyDetector;
use super::state::ConsciousnessState;
use crate::config::{Config, MetaConfig};
use crate::core::{ExecutionTrace, Pool};

/// Minimum number of ticks kept regardless of age.
pub const MIN_TICK_HISTORY: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CognitiveMode {
    Explore,
    Exploit,
    Integrate,
    Idle,
}

impl CognitiveMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Explore => "explore",
            Self::Exploit => "exploit",
            Self::Integrate => "integrate",
            Self::Idle => "idle",
        }
    }

    pub fn lead(&self) -> Lead {
        match self {
            Self::Explore => Lead::RightLead,
            Self::Exploit => Lead::LeftLead,
            Self::Integrate => Lead::Both,
            Self::Idle => Lead::Idle,
        }
    }

    pub fn active_pool(&self) -> Option<ActivePool> {
        match self {
            Self::Explore => Some(ActivePool::Right),
            Self::Exploit => Some(ActivePool::Left),
            Self::Integrate => Some(ActivePool::Both),
            Self::Idle => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActivePool {
    Left,
    Right,
    Both,
}

/// One pool's current state as reported by its agent.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PoolReading {
    pub entropy: f64,
    pub confidence: f64,
}

impl Default for PoolReading {
    fn default() -> Self {
        Self {
            entropy: 0.5,
            confidence: 0.5,
        }
    }
}

/// Source of per-pool readings for each tick.
pub trait PoolMonitor: Send + Sync {
    fn reading(&self, pool: Pool) -> PoolReading;
}

/// A monitor agents write into and the controller reads from.
#[derive(Debug, Default)]
pub struct ReadingBoard {
    left: RwLock<PoolReading>,
    right: RwLock<PoolReading>,
}

impl ReadingBoard {
    pub fn new(left: PoolReading, right: PoolReading) -> Self {
        Self {
            left: RwLock::new(left),
            right: RwLock::new(right),
        }
    }

    /// Update a pool's reading. Shared readings are ignored.
    pub fn set(&self, pool: Pool, reading: PoolReading) {
        match pool {
            Pool::Left => *self.left.write() = reading,
            Pool::Right => *self.right.write() = reading,
            Pool::Shared => {}
        }
    }
}

impl PoolMonitor for ReadingBoard {
    fn reading(&self, pool: Pool) -> PoolReading {
        match pool {
            Pool::Left => *self.left.read(),
            Pool::Right => *self.right.read(),
            Pool::Shared => PoolReading::default(),
        }
    }
}

/// What a suggestion handler learns about each tick.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct TickProfile {
    pub is_idle: bool,
    pub pressure: f64,
    pub novelty: f64,
    pub conflict: f64,
    pub entropy: f64,
}

/// Called after every tick.
pub trait TickHandler: Send + Sync {
    fn on_tick(&self, profile: &TickProfile);
}

impl<F> TickHandler for F
where
    F: Fn(&TickProfile) + Send + Sync,
{
    fn on_tick(&self, profile: &TickProfile) {
        self(profile)
    }
}

/// Record of one tick.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TickMetrics {
    pub timestamp: DateTime<Utc>,
    pub left_entropy: f64,
    pub right_entropy: f64,
    pub conflict: f64,
    pub novelty: f64,
    pub entropy: f64,
    pub decision: String,
    pub mode: CognitiveMode,
    pub energy: f64,
    pub interval: f64,
    pub forced_exploration: bool,
    pub forced_reason: Option<String>,
    pub energy_override: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct ControllerSnapshot {
    pub mode: CognitiveMode,
    pub tick_count: u64,
    pub tick_rate: f64,
    pub active_pool: Option<ActivePool>,
    pub energy_level: f64,
    pub current_tick_interval: f64,
    pub consciousness_state: ConsciousnessState,
    pub forced_exploration_count: u64,
    pub seconds_since_mode_switch: f64,
}

struct ControllerState {
    mode: CognitiveMode,
    tick_count: u64,
    ticks: VecDeque<TickMetrics>,
    leads: VecDeque<Lead>,
    forced_count: u64,
    energy: EnergyBudget,
    consciousness: ConsciousnessState,
    interval: f64,
    last_tick: Option<DateTime<Utc>>,
    last_mode_switch: DateTime<Utc>,
    divergence: Option<f64>,
    high_risk: bool,
}

#[derive(Debug, Clone, Copy)]
struct Metrics {
    conflict: f64,
    novelty: f64,
    entropy: f64,
}

pub struct MetaController {
    config: MetaConfig,
    monitor: Arc<dyn PoolMonitor>,
    policy: ExplorationPolicy,
    novelty: NoveltyDetector,
    handler: Option<Arc<dyn TickHandler>>,
    state: Mutex<ControllerState>,
}

impl MetaController {
    pub fn new(config: &Config, monitor: Arc<dyn PoolMonitor>) -> Self {
        let meta = config.meta.clone();
        let interval = meta
            .tick_interval
            .clamp(meta.min_tick_interval, meta.max_tick_interval.max(meta.min_tick_interval));
        Self {
            policy: ExplorationPolicy::new(&config.exploration, &config.diversity),
            novelty: NoveltyDetector::new(meta.novelty_decay, meta.history_window_secs),
            handler: None,
            state: Mutex::new(ControllerState {
                mode: CognitiveMode::Idle,
                tick_count: 0,
                ticks: VecDeque::new(),
                leads: VecDeque::new(),
                forced_count: 0,
                energy: EnergyBudget::new(&meta.energy),
                consciousness: ConsciousnessState::default(),
                interval,
                last_tick: None,
                last_mode_switch: Utc::now(),
                divergence: None,
                high_risk: false,
            }),
            monitor,
            config: meta,
        }
    }

    /// Notify `handler` after every tick.
    pub fn with_handler(mut self, handler: Arc<dyn TickHandler>) -> Self {
        self.handler = Some(handler);
        self
    }

    pub fn novelty(&self) -> &NoveltyDetector {
        &self.novelty
    }

    /// Current pool divergence, consulted by drift-triggered exploration.
    pub fn set_divergence(&self, divergence: Option<f64>) {
        self.state.lock().divergence = divergence;
    }

    /// Mark the current task as high risk for forced exploration.
    pub fn set_task_risk(&self, high_risk: bool) {
        self.state.lock().high_risk = high_risk;
    }

    pub fn tick(&self) -> TickMetrics {
        self.tick_at(Utc::now())
    }

    /// Run one tick as of `now`.
    pub fn tick_at(&self, now: DateTime<Utc>) -> TickMetrics {
        let left = self.monitor.reading(Pool::Left);
        let right = self.monitor.reading(Pool::Right);
        let metrics = Metrics {
            conflict: (left.confidence - right.confidence).abs(),
            novelty: right.entropy,
            entropy: (left.entropy + right.entropy) / 2.0,
        };

        let tick = {
            let mut state = self.state.lock();
            state.tick_count += 1;
            let elapsed = state
                .last_tick
                .map(|t| (now - t).num_milliseconds().max(0) as f64 / 1000.0)
                .unwrap_or(0.0);

            let (mut mode, mut decision) = self.base_decision(&metrics);

            let mut forced_reason = None;
            if self.policy.enabled() {
                let history: Vec<Lead> = state.leads.iter().copied().collect();
                let forced =
                    self.policy
                        .evaluate(&history, state.divergence, state.tick_count, state.high_risk);
                if let Some(trigger) = forced.trigger {
                    if forced.force_right_lead {
                        mode = CognitiveMode::Explore;
                        decision = format!("FORCED_EXPLORATION ({})", trigger);
                        state.forced_count += 1;
                    } else if forced.force_right_critic {
                        mode = CognitiveMode::Integrate;
                        decision = format!("FORCED_RIGHT_CRITIC ({})", trigger);
                    }
                    forced_reason = Some(trigger.as_str().to_string());
                }
            }

            state.energy.regenerate(elapsed);
            let mut energy_override = false;
            if !state.energy.can_afford(mode) {
                tracing::debug!(
                    wanted = mode.as_str(),
                    energy = state.energy.current(),
                    "energy too low, exploiting"
                );
                mode = CognitiveMode::Exploit;
                decision = "LOW_ENERGY_OVERRIDE -> EXPLOIT".to_string();
                energy_override = true;
            }
            state.energy.deduct(mode);

            if mode != state.mode {
                tracing::info!(from = state.mode.as_str(), to = mode.as_str(), "mode switch");
                state.last_mode_switch = now;
            }
            state.mode = mode;

            state
                .consciousness
                .update(metrics.entropy, metrics.conflict, metrics.novelty, elapsed);
            if self.config.adaptive_tick {
                state.interval = self.adapted_interval(state.interval, &metrics);
            }

            let tick = TickMetrics {
                timestamp: now,
                left_entropy: left.entropy,
                right_entropy: right.entropy,
                conflict: metrics.conflict,
                novelty: metrics.novelty,
                entropy: metrics.entropy,
                decision,
                mode,
                energy: state.energy.current(),
                interval: state.interval,
                forced_exploration: forced_reason.is_some(),
                forced_reason,
                energy_override,
            };

            state.ticks.push_back(tick.clone());
            let window = chrono::Duration::milliseconds(
                (self.config.history_window_secs * 1000.0) as i64,
            );
            while state.ticks.len() > MIN_TICK_HISTORY
                && state.ticks.front().is_some_and(|t| now - t.timestamp > window)
            {
                state.ticks.pop_front();
            }
            state.leads.push_back(mode.lead());
            let keep = self.policy.history_needed().max(MIN_TICK_HISTORY);
            while state.leads.len() > keep {
                state.leads.pop_front();
            }
            state.last_tick = Some(now);

            if self.is_significant(&metrics) {
                tracing::debug!(
                    tick = state.tick_count,
                    decision = %tick.decision,
                    mode = mode.as_str(),
                    "significant tick"
                );
            }
            tick
        };

        if let Some(handler) = &self.handler {
            handler.on_tick(&TickProfile {
                is_idle: tick.mode == CognitiveMode::Idle,
                pressure: metrics.entropy,
                novelty: metrics.novelty,
                conflict: metrics.conflict,
                entropy: metrics.entropy,
            });
        }
        tick
    }

    fn base_decision(&self, m: &Metrics) -> (CognitiveMode, String) {
        let (mode, label) = if m.entropy > self.config.entropy_threshold {
            (CognitiveMode::Explore, "HIGH_ENTROPY -> EXPLORE")
        } else if m.novelty > self.config.novelty_threshold {
            (CognitiveMode::Explore, "HIGH_NOVELTY -> EXPLORE")
        } else if m.conflict > self.config.conflict_threshold {
            (CognitiveMode::Integrate, "CONFLICT -> INTEGRATE")
        } else {
            (CognitiveMode::Exploit, "STABLE -> EXPLOIT")
        };
        (mode, label.to_string())
    }

    /// Move halfway toward the pressure target. Pressure is the largest of
    /// entropy, conflict and novelty.
    fn adapted_interval(&self, current: f64, m: &Metrics) -> f64 {
        let (min, max) = (
            self.config.min_tick_interval,
            self.config.max_tick_interval.max(self.config.min_tick_interval),
        );
        let pressure = m.entropy.max(m.conflict).max(m.novelty).clamp(0.0, 1.0);
        let target = max - pressure * (max - min);
        ((current + target) / 2.0).clamp(min, max)
    }

    fn is_significant(&self, m: &Metrics) -> bool {
        m.conflict > self.config.conflict_threshold || m.novelty > self.config.novelty_threshold
    }

    pub fn mode(&self) -> CognitiveMode {
        self.state.lock().mode
    }

    pub fn active_pool(&self) -> Option<ActivePool> {
        self.mode().active_pool()
    }

    pub fn tick_count(&self) -> u64 {
        self.state.lock().tick_count
    }

    /// Seconds until the next tick.
    pub fn current_interval(&self) -> f64 {
        self.state.lock().interval
    }

    pub fn energy_level(&self) -> f64 {
        self.state.lock().energy.level()
    }

    pub fn consciousness(&self) -> ConsciousnessState {
        self.state.lock().consciousness
    }

    pub fn reset_fatigue(&self) {
        self.state.lock().consciousness.reset_fatigue();
    }

    /// Recorded ticks, oldest first.
    pub fn history(&self) -> Vec<TickMetrics> {
        self.state.lock().ticks.iter().cloned().collect()
    }

    /// Ticks per second over the trailing `window_secs`.
    pub fn tick_rate(&self, window_secs: f64) -> f64 {
        self.tick_rate_at(window_secs, Utc::now())
    }

    pub fn tick_rate_at(&self, window_secs: f64, now: DateTime<Utc>) -> f64 {
        if window_secs <= 0.0 {
            return 0.0;
        }
        let window = chrono::Duration::milliseconds((window_secs * 1000.0) as i64);
        let recent = self
            .state
            .lock()
            .ticks
            .iter()
            .filter(|t| now - t.timestamp <= window)
            .count();
        recent as f64 / window_secs
    }

    /// Novelty-derived tick rate for a finished trace.
    pub fn tick_rate_from_trace(&self, trace: &ExecutionTrace, expected: Option<bool>) -> f64 {
        self.novelty.measure_from_trace(trace, expected)
    }

    pub fn snapshot(&self) -> ControllerSnapshot {
        let now = Utc::now();
        let tick_rate = self.tick_rate_at(10.0, now);
        let state = self.state.lock();
        ControllerSnapshot {
            mode: state.mode,
            tick_count: state.tick_count,
            tick_rate,
            active_pool: state.mode.active_pool(),
            energy_level: state.energy.level(),
            current_tick_interval: state.interval,
            consciousness_state: state.consciousness,
            forced_exploration_count: state.forced_count,
            seconds_since_mode_switch: (now - state.last_mode_switch).num_milliseconds() as f64
                / 1000.0,
        }
    }

    /// Tick until `stop` becomes true or its sender drops.
    pub async fn run(self: Arc<Self>, mut stop: watch::Receiver<bool>) {
        tracing::info!(interval = self.current_interval(), "meta-controller started");
        loop {
            if *stop.borrow() {
                break;
            }
            let interval = Duration::from_secs_f64(self.current_interval().max(0.001));
            tokio::select! {
                _ = tokio::time::sleep(interval) => {
                    self.tick();
                }
                changed = stop.changed() => {
                    if changed.is_err() || *stop.borrow() {
                        break;
                    }
                }
            }
        }
        tracing::info!(ticks = self.tick_count(), "meta-controller stopped");
    }
}
