//! Episodic memory: narrative records of whole tasks.
//!
//! Episodes live in `episodes.jsonl`. Search is lexical (word overlap) so it
//! needs no embedder.

use std::fmt;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::core::{Metadata, Pool};
use crate::error::{CortexError, Result};
use crate::storage::JsonlFile;
use crate::util::word_set;

/// How an episode ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EpisodeOutcome {
    Success,
    Failure,
    #[default]
    Unknown,
}

impl fmt::Display for EpisodeOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Success => "success",
            Self::Failure => "failure",
            Self::Unknown => "unknown",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Episode {
    pub id: String,
    pub title: String,
    pub summary: String,
    pub content: String,
    pub pool: Pool,
    #[serde(default)]
    pub tags: Vec<String>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub outcome: EpisodeOutcome,
    #[serde(default)]
    pub trace_ids: Vec<String>,
    #[serde(default)]
    pub metadata: Metadata,
}

impl Episode {
    /// A shared-pool episode with unknown outcome.
    pub fn new(
        id: impl Into<String>,
        title: impl Into<String>,
        summary: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            summary: summary.into(),
            content: content.into(),
            pool: Pool::Shared,
            tags: Vec::new(),
            created_at: Utc::now(),
            outcome: EpisodeOutcome::Unknown,
            trace_ids: Vec::new(),
            metadata: Metadata::new(),
        }
    }

    pub fn with_pool(mut self, pool: Pool) -> Self {
        self.pool = pool;
        self
    }

    pub fn with_tags(mut self, tags: Vec<String>) -> Self {
        self.tags = tags;
        self
    }

    pub fn with_outcome(mut self, outcome: EpisodeOutcome) -> Self {
        self.outcome = outcome;
        self
    }

    pub fn with_trace_ids(mut self, trace_ids: Vec<String>) -> Self {
        self.trace_ids = trace_ids;
        self
    }

    fn document(&self) -> String {
        format!(
            "{} {} {} {}",
            self.title,
            self.summary,
            self.content,
            self.tags.join(" ")
        )
    }
}

/// JSONL-backed episode store.
#[derive(Debug)]
pub struct EpisodeStore {
    file: JsonlFile<Episode>,
}

impl EpisodeStore {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            file: JsonlFile::new(path.as_ref()),
        }
    }

    /// Store under `episodes.jsonl` in the data dir.
    pub fn in_dir(data_dir: &Path) -> Self {
        Self::new(data_dir.join("episodes.jsonl"))
    }

    /// Add or replace an episode by id.
    pub fn add(&self, episode: Episode) -> Result<Episode> {
        if episode.id.trim().is_empty() {
            return Err(CortexError::invalid_state("episode id is empty"));
        }
        self.file.update(|records| {
            records.retain(|e| e.id != episode.id);
            records.push(episode.clone());
            Ok(())
        })?;
        Ok(episode)
    }

    pub fn get(&self, id: &str) -> Result<Episode> {
        self.file
            .read_all()?
            .into_iter()
            .find(|e| e.id == id)
            .ok_or_else(|| CortexError::not_found("episode", id))
    }

    /// Newest first, optionally restricted to one pool.
    pub fn list(&self, pool: Option<Pool>, limit: usize) -> Result<Vec<Episode>> {
        let mut episodes: Vec<Episode> = self
            .file
            .read_all()?
            .into_iter()
            .filter(|e| pool.map_or(true, |p| e.pool == p))
            .collect();
        episodes.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        episodes.truncate(limit);
        Ok(episodes)
    }

    /// Episodes sharing words with `query`, best overlap first.
    pub fn search(&self, query: &str, k: usize, pool: Option<Pool>) -> Result<Vec<Episode>> {
        let wanted = word_set(query);
        if wanted.is_empty() {
            return Ok(Vec::new());
        }

        let mut scored: Vec<(usize, Episode)> = self
            .file
            .read_all()?
            .into_iter()
            .filter(|e| pool.map_or(true, |p| e.pool == p))
            .filter_map(|e| {
                let hits = word_set(&e.document()).intersection(&wanted).count();
                (hits > 0).then_some((hits, e))
            })
            .collect();
        scored.sort_by(|a, b| {
            b.0.cmp(&a.0)
                .then_with(|| b.1.created_at.cmp(&a.1.created_at))
        });
        Ok(scored.into_iter().take(k).map(|(_, e)| e).collect())
    }

    /// Returns false if the id was unknown.
    pub fn delete(&self, id: &str) -> Result<bool> {
        self.file.update(|records| {
            let before = records.len();
            records.retain(|e| e.id != id);
            Ok(records.len() != before)
        })
    }
}
