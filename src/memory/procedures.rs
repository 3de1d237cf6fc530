//! Multi-step procedures (playbooks) stored in `procedures.jsonl`.

use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::core::{Metadata, Pool};
use crate::error::{CortexError, Result};
use crate::storage::JsonlFile;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProcedureStatus {
    #[default]
    Draft,
    Active,
    Deprecated,
}

/// One step of a procedure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ProcedureStep {
    /// Apply a stored bullet.
    Bullet { ref_id: String },
    /// Free-form instruction.
    Text { text: String },
    /// Call a tool with a parameter template.
    Tool {
        tool_name: String,
        #[serde(default)]
        params_template: Metadata,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Procedure {
    pub id: String,
    pub title: String,
    pub description: String,
    pub pool: Pool,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub steps: Vec<ProcedureStep>,
    #[serde(default)]
    pub status: ProcedureStatus,
    #[serde(default)]
    pub success_count: u32,
    #[serde(default)]
    pub failure_count: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub source_trace_id: String,
    #[serde(default)]
    pub metadata: Metadata,
}

impl Procedure {
    /// A draft procedure with a fresh `proc_{millis}_{8 hex}` id.
    pub fn new(title: impl Into<String>, description: impl Into<String>, pool: Pool) -> Self {
        let now = Utc::now();
        let suffix = uuid::Uuid::new_v4().simple().to_string();
        Self {
            id: format!("proc_{}_{}", now.timestamp_millis(), &suffix[..8]),
            title: title.into(),
            description: description.into(),
            pool,
            tags: Vec::new(),
            steps: Vec::new(),
            status: ProcedureStatus::Draft,
            success_count: 0,
            failure_count: 0,
            created_at: now,
            updated_at: now,
            source_trace_id: String::new(),
            metadata: Metadata::new(),
        }
    }

    pub fn with_steps(mut self, steps: Vec<ProcedureStep>) -> Self {
        self.steps = steps;
        self
    }

    pub fn with_tags(mut self, tags: Vec<String>) -> Self {
        self.tags = tags;
        self
    }
}

/// JSONL-backed procedure store.
#[derive(Debug)]
pub struct ProcedureStore {
    file: JsonlFile<Procedure>,
}

impl ProcedureStore {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            file: JsonlFile::new(path.as_ref()),
        }
    }

    pub fn in_dir(data_dir: &Path) -> Self {
        Self::new(data_dir.join("procedures.jsonl"))
    }

    /// Store a new procedure. Fails if the id is taken.
    pub fn create(&self, mut procedure: Procedure) -> Result<Procedure> {
        procedure.updated_at = Utc::now();
        self.file.update(|records| {
            if records.iter().any(|p| p.id == procedure.id) {
                return Err(CortexError::already_exists("procedure", &procedure.id));
            }
            records.push(procedure.clone());
            Ok(())
        })?;
        Ok(procedure)
    }

    pub fn get(&self, id: &str) -> Result<Procedure> {
        self.file
            .read_all()?
            .into_iter()
            .find(|p| p.id == id)
            .ok_or_else(|| CortexError::not_found("procedure", id))
    }

    /// Procedures matching every given filter, in insertion order.
    pub fn list(
        &self,
        pool: Option<Pool>,
        status: Option<ProcedureStatus>,
        tags: &[String],
        limit: usize,
    ) -> Result<Vec<Procedure>> {
        Ok(self
            .file
            .read_all()?
            .into_iter()
            .filter(|p| pool.map_or(true, |pool| p.pool == pool))
            .filter(|p| status.map_or(true, |s| p.status == s))
            .filter(|p| tags.is_empty() || p.tags.iter().any(|t| tags.contains(t)))
            .take(limit)
            .collect())
    }

    pub fn set_status(&self, id: &str, status: ProcedureStatus) -> Result<Procedure> {
        self.modify(id, |p| p.status = status)
    }

    pub fn record_outcome(&self, id: &str, success: bool) -> Result<Procedure> {
        self.modify(id, |p| {
            if success {
                p.success_count = p.success_count.saturating_add(1);
            } else {
                p.failure_count = p.failure_count.saturating_add(1);
            }
        })
    }

    pub fn delete(&self, id: &str) -> Result<bool> {
        self.file.update(|records| {
            let before = records.len();
            records.retain(|p| p.id != id);
            Ok(records.len() != before)
        })
    }

    fn modify(&self, id: &str, f: impl FnOnce(&mut Procedure)) -> Result<Procedure> {
        self.file.update(|records| {
            let procedure = records
                .iter_mut()
                .find(|p| p.id == id)
                .ok_or_else(|| CortexError::not_found("procedure", id))?;
            f(procedure);
            procedure.updated_at = Utc::now();
            Ok(procedure.clone())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn sample() -> Procedure {
        Procedure::new("Release", "Cut a release", Pool::Left)
            .with_tags(vec!["release".to_string()])
            .with_steps(vec![
                ProcedureStep::Text {
                    text: "Bump the version".to_string(),
                },
                ProcedureStep::Bullet {
                    ref_id: "pb_left_1_abcd".to_string(),
                },
                ProcedureStep::Tool {
                    tool_name: "git".to_string(),
                    params_template: Metadata::new(),
                },
            ])
    }

    #[test]
    fn test_create_and_get() {
        let temp = TempDir::new().unwrap();
        let store = ProcedureStore::in_dir(temp.path());
        let p = store.create(sample()).unwrap();
        assert!(p.id.starts_with("proc_"));

        let got = store.get(&p.id).unwrap();
        assert_eq!(got.steps.len(), 3);
        assert_eq!(got.status, ProcedureStatus::Draft);
        assert!(matches!(
            store.create(got),
            Err(CortexError::AlreadyExists { .. })
        ));
    }

    #[test]
    fn test_step_serialization_is_tagged() {
        let json = serde_json::to_value(ProcedureStep::Bullet {
            ref_id: "x".to_string(),
        })
        .unwrap();
        assert_eq!(json["type"], "bullet");
        assert_eq!(json["ref_id"], "x");
    }

    #[test]
    fn test_status_outcome_and_filters() {
        let temp = TempDir::new().unwrap();
        let store = ProcedureStore::in_dir(temp.path());
        let p = store.create(sample()).unwrap();
        store
            .create(Procedure::new("Explore", "Try things", Pool::Right))
            .unwrap();

        store.set_status(&p.id, ProcedureStatus::Active).unwrap();
        store.record_outcome(&p.id, true).unwrap();
        let updated = store.record_outcome(&p.id, false).unwrap();
        assert_eq!(updated.success_count, 1);
        assert_eq!(updated.failure_count, 1);

        let active = store
            .list(None, Some(ProcedureStatus::Active), &[], 10)
            .unwrap();
        assert_eq!(active.len(), 1);
        let right = store.list(Some(Pool::Right), None, &[], 10).unwrap();
        assert_eq!(right[0].title, "Explore");
        let tagged = store
            .list(None, None, &["release".to_string()], 10)
            .unwrap();
        assert_eq!(tagged[0].id, p.id);

        assert!(store.delete(&p.id).unwrap());
        assert!(matches!(
            store.record_outcome(&p.id, true),
            Err(CortexError::NotFound { .. })
        ));
    }
}
