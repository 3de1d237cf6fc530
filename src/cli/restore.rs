//! Recovery commands for cortex: restore, rollback and backups.
//!
//! - `restore` puts bullets archived by a merge back into their pool
//! - `rollback` re-inserts every bullet of a prune backup
//! - `backups` lists prune backups and archived bullets

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::cli::{render, Workspace};
use crate::core::Pool;
use crate::maintenance::{Merger, Pruner};

/// Which recovery operation to run.
#[derive(Debug, Clone, PartialEq)]
pub enum RecoveryAction {
    /// Restore archived bullets by id.
    Restore { ids: Vec<String> },
    /// Undo a prune from its backup.
    Rollback { backup_id: String },
    /// List backups and archived bullets.
    Backups,
}

/// Options for the recovery commands.
#[derive(Debug, Clone, Default)]
pub struct RestoreOptions {
    pub json: bool,
    pub quiet: bool,
    /// Expected pool of the restored bullets or backup.
    pub pool: Option<Pool>,
}

/// A failed per-id restore.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailedRestore {
    pub id: String,
    pub error: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupEntry {
    pub backup_id: String,
    pub pool: String,
    pub bullet_count: usize,
    pub timestamp: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArchivedEntry {
    pub id: String,
    pub pool: String,
    pub text: String,
    pub merged_into: String,
    pub archived_at: String,
}

/// Output format for the recovery commands.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RestoreOutput {
    pub success: bool,
    pub action: String,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub restored: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub failed: Vec<FailedRestore>,
    /// Bullets re-inserted by a rollback.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rolled_back: Option<usize>,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub backups: Vec<BackupEntry>,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub archived: Vec<ArchivedEntry>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl RestoreOutput {
    fn new(action: &str) -> Self {
        Self {
            success: true,
            action: action.to_string(),
            ..Default::default()
        }
    }

    pub fn failure(action: &str, error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
            ..Self::new(action)
        }
    }
}

/// The recovery command implementation.
pub struct RestoreCommand {
    merger: Merger,
    pruner: Pruner,
}

impl RestoreCommand {
    pub fn new(workspace: &Workspace) -> Self {
        let store = workspace.store();
        Self {
            merger: Merger::new(Arc::clone(store), workspace.data_dir()),
            pruner: Pruner::new(Arc::clone(store), &workspace.config().prune, workspace.data_dir()),
        }
    }

    pub async fn run(&self, action: &RecoveryAction, options: &RestoreOptions) -> RestoreOutput {
        match action {
            RecoveryAction::Restore { ids } => self.restore(ids, options.pool).await,
            RecoveryAction::Rollback { backup_id } => self.rollback(backup_id, options.pool).await,
            RecoveryAction::Backups => self.backups(),
        }
    }

    /// Restore each id independently; the run fails only if nothing was restored.
    async fn restore(&self, ids: &[String], pool: Option<Pool>) -> RestoreOutput {
        if ids.is_empty() {
            return RestoreOutput::failure("restore", "no bullet ids given");
        }

        let mut output = RestoreOutput::new("restore");
        for id in ids {
            match self.merger.restore(id, pool).await {
                Ok(bullet) => output.restored.push(bullet.id),
                Err(e) => output.failed.push(FailedRestore {
                    id: id.clone(),
                    error: e.to_string(),
                }),
            }
        }
        if output.restored.is_empty() {
            output.success = false;
            output.error = Some("no bullets restored".to_string());
        }
        output
    }

    async fn rollback(&self, backup_id: &str, pool: Option<Pool>) -> RestoreOutput {
        match self.pruner.rollback(backup_id, pool).await {
            Ok(count) => RestoreOutput {
                rolled_back: Some(count),
                ..RestoreOutput::new("rollback")
            },
            Err(e) => RestoreOutput::failure("rollback", e.to_string()),
        }
    }

    fn backups(&self) -> RestoreOutput {
        let backups = match self.pruner.list_backups() {
            Ok(backups) => backups,
            Err(e) => return RestoreOutput::failure("backups", e.to_string()),
        };
        let archived = match self.merger.list_archived() {
            Ok(archived) => archived,
            Err(e) => return RestoreOutput::failure("backups", e.to_string()),
        };

        RestoreOutput {
            backups: backups
                .into_iter()
                .map(|b| BackupEntry {
                    backup_id: b.backup_id,
                    pool: b.pool.to_string(),
                    bullet_count: b.bullet_count,
                    timestamp: b.timestamp.to_rfc3339(),
                })
                .collect(),
            archived: archived
                .into_iter()
                .map(|a| ArchivedEntry {
                    id: a.bullet.id,
                    pool: a.bullet.pool.to_string(),
                    text: a.bullet.text,
                    merged_into: a.merged_into,
                    archived_at: a.archived_at.to_rfc3339(),
                })
                .collect(),
            ..RestoreOutput::new("backups")
        }
    }

    pub fn format_output(&self, output: &RestoreOutput, options: &RestoreOptions) -> String {
        render(output, options.json, options.quiet, format_human_readable)
    }
}

fn format_human_readable(output: &RestoreOutput) -> String {
    let mut lines = Vec::new();
    if let Some(error) = &output.error {
        lines.push(format!("{} failed: {}", output.action, error));
    }

    match output.action.as_str() {
        "restore" => {
            for id in &output.restored {
                lines.push(format!("Restored {}", id));
            }
            for failed in &output.failed {
                lines.push(format!("Could not restore {}: {}", failed.id, failed.error));
            }
        }
        "rollback" => {
            if let Some(count) = output.rolled_back {
                lines.push(format!("Rolled back {} bullet(s)", count));
            }
        }
        _ if output.success => {
            if output.backups.is_empty() {
                lines.push("No prune backups.".to_string());
            } else {
                lines.push("Prune backups:".to_string());
                for b in &output.backups {
                    lines.push(format!(
                        "  {}  {:<6} {} bullet(s)  {}",
                        b.backup_id, b.pool, b.bullet_count, b.timestamp
                    ));
                }
            }
            if !output.archived.is_empty() {
                lines.push("Archived bullets:".to_string());
                for a in &output.archived {
                    lines.push(format!("  [{}] {} (merged into {})", a.id, a.text, a.merged_into));
                }
            }
        }
        _ => {}
    }
    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::dedup::{DedupCommand, DedupOptions};
    use crate::cli::prune::{PruneCommand, PruneOptions};
    use crate::cli::workspace::tests::test_workspace;
    use crate::core::{Bullet, BulletKind};
    use crate::memory::NewBullet;
    use chrono::{Duration, Utc};
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_prune_then_rollback() {
        let temp = TempDir::new().unwrap();
        let ws = test_workspace(&temp);
        let old = Utc::now() - Duration::days(90);
        ws.store()
            .insert_many(
                vec![Bullet::new("stale rule", Pool::Right, BulletKind::Heuristic).with_created_at(old)],
                "test",
            )
            .await
            .unwrap();

        let pruned = PruneCommand::new(&ws).run(&PruneOptions::new(Pool::Right));
        assert_eq!(pruned.pruned, 1);

        let cmd = RestoreCommand::new(&ws);
        let listing = cmd.run(&RecoveryAction::Backups, &RestoreOptions::default()).await;
        assert_eq!(listing.backups.len(), 1);
        assert_eq!(listing.backups[0].backup_id, pruned.backup_id);

        let wrong_pool = RestoreOptions {
            pool: Some(Pool::Left),
            ..Default::default()
        };
        let action = RecoveryAction::Rollback {
            backup_id: pruned.backup_id.clone(),
        };
        assert!(!cmd.run(&action, &wrong_pool).await.success);

        let output = cmd.run(&action, &RestoreOptions::default()).await;
        assert!(output.success);
        assert_eq!(output.rolled_back, Some(1));
        assert_eq!(ws.store().count(Pool::Right).unwrap(), 1);
    }

    #[tokio::test]
    async fn test_rollback_unknown_backup() {
        let temp = TempDir::new().unwrap();
        let ws = test_workspace(&temp);
        let action = RecoveryAction::Rollback {
            backup_id: "backup_missing".to_string(),
        };
        let output = RestoreCommand::new(&ws)
            .run(&action, &RestoreOptions::default())
            .await;
        assert!(!output.success);
    }

    #[tokio::test]
    async fn test_restore_merged_bullet() {
        let temp = TempDir::new().unwrap();
        let ws = test_workspace(&temp);
        for text in ["Pin dependency versions", "pin dependency versions"] {
            ws.store()
                .add(NewBullet::new(text, Pool::Left, BulletKind::Heuristic))
                .await
                .unwrap();
        }
        let dedup = DedupCommand::new(&ws)
            .run(&DedupOptions {
                merge: true,
                ..Default::default()
            })
            .await;
        assert_eq!(dedup.bullets_removed, 1);
        let archived_id = dedup.clusters[0].secondary_ids()[0].clone();

        let cmd = RestoreCommand::new(&ws);
        let action = RecoveryAction::Restore {
            ids: vec![archived_id.clone(), "pb_left_0_nothere".to_string()],
        };
        let output = cmd.run(&action, &RestoreOptions::default()).await;

        assert!(output.success);
        assert_eq!(output.restored, vec![archived_id]);
        assert_eq!(output.failed.len(), 1);
        assert_eq!(ws.store().count(Pool::Left).unwrap(), 2);
        let text = cmd.format_output(&output, &RestoreOptions::default());
        assert!(text.contains("Could not restore pb_left_0_nothere"));
    }

    #[tokio::test]
    async fn test_empty_backups_listing() {
        let temp = TempDir::new().unwrap();
        let ws = test_workspace(&temp);
        let cmd = RestoreCommand::new(&ws);
        let output = cmd.run(&RecoveryAction::Backups, &RestoreOptions::default()).await;
        assert!(output.success);
        assert_eq!(
            cmd.format_output(&output, &RestoreOptions::default()),
            "No prune backups."
        );
    }
}
