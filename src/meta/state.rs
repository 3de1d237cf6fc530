//! Observational consciousness state.
//!
//! Nothing reads these values back into decisions. They exist so callers
//! can see how loaded and tired the system is.

use serde::Serialize;

/// Per-second fatigue gain at full load.
const FATIGUE_RATE: f64 = 0.02;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ConsciousnessState {
    pub alertness: f64,
    pub focus: f64,
    pub cognitive_load: f64,
    pub fatigue: f64,
    pub engagement: f64,
}

impl Default for ConsciousnessState {
    fn default() -> Self {
        Self {
            alertness: 1.0,
            focus: 1.0,
            cognitive_load: 0.0,
            fatigue: 0.0,
            engagement: 0.5,
        }
    }
}

impl ConsciousnessState {
    /// Advance by `dt` seconds under the given tick metrics.
    ///
    /// Load is the mean of entropy, conflict and novelty. Fatigue grows
    /// with load over time. Novelty above 0.5 raises alertness, fatigue
    /// wears it down.
    pub fn update(&mut self, entropy: f64, conflict: f64, novelty: f64, dt: f64) {
        let dt = dt.max(0.0);
        self.cognitive_load = unit((entropy + conflict + novelty) / 3.0);
        self.fatigue = unit(self.fatigue + self.cognitive_load * FATIGUE_RATE * dt);
        self.alertness =
            unit(self.alertness + (novelty - 0.5) * 0.1 * dt - self.fatigue * 0.05 * dt);
        self.focus = unit(1.0 - 0.5 * conflict - 0.3 * self.fatigue);
        self.engagement = unit((novelty + self.alertness) / 2.0 * (1.0 - self.fatigue));
    }

    /// Back to fully rested.
    pub fn reset_fatigue(&mut self) {
        self.fatigue = 0.0;
        self.alertness = 1.0;
    }
}

fn unit(v: f64) -> f64 {
    v.clamp(0.0, 1.0)
}
