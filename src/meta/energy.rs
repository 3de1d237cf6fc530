//! Energy budget for operating modes.
//!
//! Every tick costs energy according to the chosen mode, and energy
//! regenerates with elapsed time. The budget stays within [0, max].

use serde::Serialize;

use super::controller::CognitiveMode;
use crate::config::EnergyConfig;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EnergyBudget {
    enabled: bool,
    max: f64,
    regen_rate: f64,
    cost_explore: f64,
    cost_exploit: f64,
    cost_integrate: f64,
    current: f64,
}

impl EnergyBudget {
    /// A full budget.
    pub fn new(config: &EnergyConfig) -> Self {
        let max = config.max.max(0.0);
        Self {
            enabled: config.enabled,
            max,
            regen_rate: config.regen_rate.max(0.0),
            cost_explore: config.cost_explore.max(0.0),
            cost_exploit: config.cost_exploit.max(0.0),
            cost_integrate: config.cost_integrate.max(0.0),
            current: max,
        }
    }

    pub fn enabled(&self) -> bool {
        self.enabled
    }

    pub fn current(&self) -> f64 {
        self.current
    }

    pub fn max(&self) -> f64 {
        self.max
    }

    /// Fraction of the budget left, in [0, 1].
    pub fn level(&self) -> f64 {
        if self.max <= 0.0 {
            return 0.0;
        }
        (self.current / self.max).clamp(0.0, 1.0)
    }

    pub fn set_current(&mut self, value: f64) {
        self.current = value.clamp(0.0, self.max);
    }

    pub fn cost(&self, mode: CognitiveMode) -> f64 {
        match mode {
            CognitiveMode::Explore => self.cost_explore,
            CognitiveMode::Exploit => self.cost_exploit,
            CognitiveMode::Integrate => self.cost_integrate,
            CognitiveMode::Idle => 0.0,
        }
    }

    /// Add `regen_rate * elapsed_secs`, capped at max.
    pub fn regenerate(&mut self, elapsed_secs: f64) {
        if !self.enabled || elapsed_secs <= 0.0 {
            return;
        }
        self.current = (self.current + self.regen_rate * elapsed_secs).min(self.max);
    }

    /// Always true when the budget is disabled.
    pub fn can_afford(&self, mode: CognitiveMode) -> bool {
        !self.enabled || self.current >= self.cost(mode)
    }

    /// Deduct the mode's cost, flooring at zero.
    pub fn deduct(&mut self, mode: CognitiveMode) {
        if !self.enabled {
            return;
        }
        self.current = (self.current - self.cost(mode)).max(0.0);
    }
}
