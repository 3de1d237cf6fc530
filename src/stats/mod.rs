//! Lifecycle tracking for cortex.
//!
//! The event log (`events.log` in the data dir) is an append-only record of
//! knowledge lifecycle transitions, readable by the CLI `stats` command.

pub mod tracker;

pub use tracker::{EventKind, EventLog, LifecycleEvent, EVENT_SCHEMA_VERSION};
