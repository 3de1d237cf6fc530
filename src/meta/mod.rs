//! Meta-control: how hard to think and which pool leads.
//!
//! [`novelty`] turns execution surprise into a tick rate that gates
//! reflection depth. [`controller`] runs the periodic tick loop, switching
//! between explore, exploit and integrate under an [`energy`] budget, with
//! [`exploration`] occasionally forcing the right pool forward.

pub mod controller;
pub mod energy;
pub mod exploration;
pub mod novelty;
pub mod state;

pub use controller::{
    ActivePool, CognitiveMode, ControllerSnapshot, MetaController, PoolMonitor, PoolReading,
    ReadingBoard, TickHandler, TickMetrics, TickProfile,
};
pub use energy::EnergyBudget;
pub use exploration::{
    ExplorationDecision, ExplorationMode, ExplorationPolicy, ExplorationTrigger, Lead,
};
pub use novelty::{NoveltyDetector, NoveltyInput, NoveltySignal, NoveltyStats};
pub use state::ConsciousnessState;
