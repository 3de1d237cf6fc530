//! Lifecycle event types and JSONL log writer for cortex.
//!
//! Knowledge lifecycle transitions (bullets added, activated, promoted,
//! deleted, restored; suggestions created, delivered, resolved; maintenance
//! runs) are appended to `events.log`, one JSON object per line.

use std::collections::BTreeMap;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::core::Pool;
use crate::error::{CortexError, FailOpen, Result};

/// Schema version for lifecycle events.
///
/// Increment when the event schema changes in a breaking way.
pub const EVENT_SCHEMA_VERSION: u8 = 1;

/// A lifecycle event as written to the log.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LifecycleEvent {
    /// Schema version for forward compatibility.
    pub v: u8,
    pub ts: DateTime<Utc>,
    #[serde(flatten)]
    pub data: EventKind,
}

impl LifecycleEvent {
    pub fn new(data: EventKind) -> Self {
        Self::with_timestamp(data, Utc::now())
    }

    pub fn with_timestamp(data: EventKind, ts: DateTime<Utc>) -> Self {
        Self {
            v: EVENT_SCHEMA_VERSION,
            ts,
            data,
        }
    }
}

/// The event type and its data.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum EventKind {
    BulletAdded {
        bullet_id: String,
        pool: Pool,
        kind: String,
    },
    BulletActivated {
        bullet_id: String,
        pool: Pool,
    },
    BulletPromoted {
        bullet_id: String,
        shared_id: String,
        from_pool: Pool,
    },
    BulletsDeleted {
        pool: Pool,
        bullet_ids: Vec<String>,
        reason: String,
    },
    BulletRestored {
        bullet_id: String,
        pool: Pool,
        source: String,
    },
    SuggestionCreated {
        suggestion_id: String,
        origin_bullet_id: String,
        to_pool: Pool,
    },
    SuggestionDelivered {
        suggestion_id: String,
        bullet_id: String,
    },
    SuggestionResolved {
        suggestion_id: String,
        status: String,
    },
    Maintenance {
        task: String,
        success: bool,
        duplicates_removed: usize,
        bullets_pruned: usize,
    },
}

impl EventKind {
    pub fn event_name(&self) -> &'static str {
        match self {
            Self::BulletAdded { .. } => "bullet_added",
            Self::BulletActivated { .. } => "bullet_activated",
            Self::BulletPromoted { .. } => "bullet_promoted",
            Self::BulletsDeleted { .. } => "bullets_deleted",
            Self::BulletRestored { .. } => "bullet_restored",
            Self::SuggestionCreated { .. } => "suggestion_created",
            Self::SuggestionDelivered { .. } => "suggestion_delivered",
            Self::SuggestionResolved { .. } => "suggestion_resolved",
            Self::Maintenance { .. } => "maintenance",
        }
    }
}

/// Append-only JSONL event log.
#[derive(Debug)]
pub struct EventLog {
    path: PathBuf,
    /// Keeps concurrent appends from interleaving within the process.
    write_lock: Mutex<()>,
}

impl EventLog {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append an event to the log.
    pub fn append(&self, event: &LifecycleEvent) -> Result<()> {
        let _guard = self.write_lock.lock();

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(|e| CortexError::storage(parent, e))?;
            }
        }

        let json = serde_json::to_string(event)?;

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| CortexError::storage(&self.path, e))?;

        writeln!(file, "{}", json).map_err(|e| CortexError::storage(&self.path, e))?;

        Ok(())
    }

    /// Record an event, logging instead of failing.
    ///
    /// A lost event never aborts the operation that produced it.
    pub fn record(&self, data: EventKind) {
        let name = data.event_name();
        self.append(&LifecycleEvent::new(data))
            .fail_open_default(&format!("appending {} event", name));
    }

    /// Read all events. Malformed lines are skipped.
    pub fn read_all(&self) -> Result<Vec<LifecycleEvent>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }

        let content = crate::util::read_to_string_limited(&self.path)?;
        let mut events = Vec::new();
        for (line_num, line) in content.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<LifecycleEvent>(line) {
                Ok(event) => events.push(event),
                Err(e) => tracing::warn!(
                    "Skipping malformed event at line {}: {}",
                    line_num + 1,
                    e
                ),
            }
        }
        Ok(events)
    }

    /// Events at or after `since`.
    pub fn read_since(&self, since: DateTime<Utc>) -> Result<Vec<LifecycleEvent>> {
        Ok(self
            .read_all()?
            .into_iter()
            .filter(|e| e.ts >= since)
            .collect())
    }

    /// Count of events per event name.
    pub fn summary(&self) -> Result<BTreeMap<String, usize>> {
        let mut counts = BTreeMap::new();
        for event in self.read_all()? {
            *counts.entry(event.data.event_name().to_string()).or_insert(0) += 1;
        }
        Ok(counts)
    }
}
