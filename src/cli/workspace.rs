//! Stores opened by the CLI.
//!
//! The binary works on a `FileIndex` + `HashEmbedder` knowledge store and
//! the suggestion store, both rooted at the configured data dir and sharing
//! one event log.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::backends::HashEmbedder;
use crate::config::Config;
use crate::error::Result;
use crate::maintenance::MaintenanceScheduler;
use crate::memory::KnowledgeStore;
use crate::stats::EventLog;
use crate::storage::FileIndex;
use crate::teaching::SuggestionStore;

pub struct Workspace {
    config: Config,
    data_dir: PathBuf,
    events: Arc<EventLog>,
    store: Arc<KnowledgeStore>,
    suggestions: Arc<SuggestionStore>,
}

impl Workspace {
    /// Open (creating if needed) the stores under `config.data_dir()`.
    pub fn open(config: Config) -> Result<Self> {
        let data_dir = config.data_dir();
        let events = Arc::new(EventLog::new(data_dir.join("events.log")));
        let index = Arc::new(FileIndex::open(&data_dir)?);
        let store = Arc::new(
            KnowledgeStore::new(index, Arc::new(HashEmbedder::default()), &config)
                .with_events(Arc::clone(&events)),
        );
        let suggestions =
            Arc::new(SuggestionStore::in_dir(&data_dir).with_events(Arc::clone(&events)));
        tracing::debug!(data_dir = %data_dir.display(), "workspace opened");

        Ok(Self {
            config,
            data_dir,
            events,
            store,
            suggestions,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    pub fn events(&self) -> &Arc<EventLog> {
        &self.events
    }

    pub fn store(&self) -> &Arc<KnowledgeStore> {
        &self.store
    }

    pub fn suggestions(&self) -> &Arc<SuggestionStore> {
        &self.suggestions
    }

    /// A scheduler over this workspace's store.
    pub fn scheduler(&self) -> Result<MaintenanceScheduler> {
        MaintenanceScheduler::new(Arc::clone(&self.store), &self.config)
    }
}
