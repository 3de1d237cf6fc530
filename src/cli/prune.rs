//! Prune command for cortex.
//!
//! Removes low-quality bullets from one pool after writing a backup. A real
//! run with more candidates than the confirmation threshold needs `force`.

use std::sync::Arc;

use serde::Serialize;

use crate::cli::{render, Workspace};
use crate::core::Pool;
use crate::error::{CortexError, Result};
use crate::maintenance::{PruneCandidate, PrunePolicy, PruneReason, PruneResult, Pruner};

/// Options for the prune command.
#[derive(Debug, Clone)]
pub struct PruneOptions {
    pub json: bool,
    pub quiet: bool,
    pub pool: Pool,
    /// Policy name; the configured policy when unset.
    pub policy: Option<String>,
    /// Only candidates flagged for this reason.
    pub reason: Option<String>,
    pub dry_run: bool,
    pub force: bool,
}

impl PruneOptions {
    pub fn new(pool: Pool) -> Self {
        Self {
            json: false,
            quiet: false,
            pool,
            policy: None,
            reason: None,
            dry_run: false,
            force: false,
        }
    }
}

/// Output format for the prune command.
#[derive(Debug, Clone, Serialize)]
pub struct PruneOutput {
    pub success: bool,
    pub pool: String,
    pub policy: String,
    pub dry_run: bool,
    pub candidates: Vec<PruneCandidate>,
    pub pruned: usize,
    /// Backup to pass to `rollback`; `dry_run` for dry runs.
    pub backup_id: String,
    pub by_reason: std::collections::BTreeMap<String, usize>,
    /// Set when the run stopped because `force` was missing.
    pub confirmation_required: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl PruneOutput {
    pub fn success(result: PruneResult) -> Self {
        Self {
            success: true,
            pool: result.pool.to_string(),
            policy: result.policy.to_string(),
            dry_run: result.dry_run,
            candidates: result.candidates,
            pruned: result.pruned,
            backup_id: result.backup_id,
            by_reason: result.by_reason,
            confirmation_required: false,
            error: None,
        }
    }

    pub fn failure(pool: Pool, error: &CortexError) -> Self {
        Self {
            success: false,
            pool: pool.to_string(),
            policy: String::new(),
            dry_run: false,
            candidates: Vec::new(),
            pruned: 0,
            backup_id: String::new(),
            by_reason: Default::default(),
            confirmation_required: matches!(error, CortexError::ConfirmationRequired { .. }),
            error: Some(error.to_string()),
        }
    }
}

/// The prune command implementation.
pub struct PruneCommand {
    pruner: Pruner,
}

impl PruneCommand {
    pub fn new(workspace: &Workspace) -> Self {
        Self {
            pruner: Pruner::new(
                Arc::clone(workspace.store()),
                &workspace.config().prune,
                workspace.data_dir(),
            ),
        }
    }

    pub fn run(&self, options: &PruneOptions) -> PruneOutput {
        match self.execute(options) {
            Ok(result) => PruneOutput::success(result),
            Err(e) => PruneOutput::failure(options.pool, &e),
        }
    }

    fn execute(&self, options: &PruneOptions) -> Result<PruneResult> {
        let policy: PrunePolicy = match &options.policy {
            Some(name) => name.parse()?,
            None => self.pruner.default_policy()?,
        };
        match &options.reason {
            Some(reason) => self.pruner.prune_by_reason(
                options.pool,
                reason.parse::<PruneReason>()?,
                policy,
                options.dry_run,
                options.force,
            ),
            None => self
                .pruner
                .prune_collection(options.pool, policy, options.dry_run, options.force),
        }
    }

    pub fn format_output(&self, output: &PruneOutput, options: &PruneOptions) -> String {
        render(output, options.json, options.quiet, format_human_readable)
    }
}

fn format_human_readable(output: &PruneOutput) -> String {
    if !output.success {
        let error = output.error.as_deref().unwrap_or("unknown error");
        return if output.confirmation_required {
            format!("{}\nRe-run with --force or inspect with --dry-run.", error)
        } else {
            format!("Prune failed: {}", error)
        };
    }
    if output.candidates.is_empty() {
        return format!("No prune candidates in the {} pool ({}).", output.pool, output.policy);
    }

    let mut lines = Vec::new();
    if output.dry_run {
        lines.push(format!(
            "Would prune {} bullet(s) from the {} pool ({}):",
            output.candidates.len(),
            output.pool,
            output.policy
        ));
    } else {
        lines.push(format!(
            "Pruned {} bullet(s) from the {} pool ({}), backup {}",
            output.pruned, output.pool, output.policy, output.backup_id
        ));
    }
    for candidate in &output.candidates {
        let reasons: Vec<&str> = candidate.reasons.iter().map(|r| r.as_str()).collect();
        lines.push(format!(
            "  [{}] q={:.2} {} ({})",
            candidate.id,
            candidate.quality_score,
            candidate.text,
            reasons.join(", ")
        ));
    }
    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::workspace::tests::test_workspace;
    use crate::config::Config;
    use crate::core::{Bullet, BulletKind};
    use chrono::{Duration, Utc};
    use tempfile::TempDir;

    async fn seed_stale(ws: &Workspace, n: usize) {
        let old = Utc::now() - Duration::days(90);
        let bullets: Vec<Bullet> = (0..n)
            .map(|i| {
                Bullet::new(format!("stale rule number {}", i), Pool::Left, BulletKind::Heuristic)
                    .with_created_at(old)
            })
            .collect();
        ws.store().insert_many(bullets, "test").await.unwrap();
    }

    #[tokio::test]
    async fn test_prune_dry_run() {
        let temp = TempDir::new().unwrap();
        let ws = test_workspace(&temp);
        seed_stale(&ws, 3).await;

        let cmd = PruneCommand::new(&ws);
        let mut options = PruneOptions::new(Pool::Left);
        options.dry_run = true;
        let output = cmd.run(&options);

        assert!(output.success);
        assert_eq!(output.candidates.len(), 3);
        assert_eq!(output.pruned, 0);
        assert_eq!(output.backup_id, "dry_run");
        assert_eq!(ws.store().count(Pool::Left).unwrap(), 3);
        assert!(cmd.format_output(&output, &options).starts_with("Would prune 3"));
    }

    #[tokio::test]
    async fn test_prune_json_lists_candidates() {
        let temp = TempDir::new().unwrap();
        let ws = test_workspace(&temp);
        seed_stale(&ws, 1).await;

        let cmd = PruneCommand::new(&ws);
        let mut options = PruneOptions::new(Pool::Left);
        options.dry_run = true;
        options.json = true;
        let output = cmd.run(&options);

        let json: serde_json::Value =
            serde_json::from_str(&cmd.format_output(&output, &options)).unwrap();
        assert_eq!(json["dry_run"], true);
        assert_eq!(json["candidates"].as_array().unwrap().len(), 1);
        assert!(json["candidates"][0]["reasons"].is_array());
    }

    #[tokio::test]
    async fn test_prune_writes_backup() {
        let temp = TempDir::new().unwrap();
        let ws = test_workspace(&temp);
        seed_stale(&ws, 2).await;

        let output = PruneCommand::new(&ws).run(&PruneOptions::new(Pool::Left));

        assert!(output.success);
        assert_eq!(output.pruned, 2);
        assert!(output.backup_id.starts_with("backup_"));
        assert_eq!(ws.store().count(Pool::Left).unwrap(), 0);
    }

    #[tokio::test]
    async fn test_prune_requires_force_above_threshold() {
        let temp = TempDir::new().unwrap();
        let mut config = Config::default();
        config.memory.data_dir = Some(temp.path().to_path_buf());
        config.prune.confirmation_threshold = 2;
        let ws = Workspace::open(config).unwrap();
        seed_stale(&ws, 3).await;

        let cmd = PruneCommand::new(&ws);
        let mut options = PruneOptions::new(Pool::Left);
        let refused = cmd.run(&options);
        assert!(!refused.success);
        assert!(refused.confirmation_required);
        assert_eq!(ws.store().count(Pool::Left).unwrap(), 3);

        options.force = true;
        let forced = cmd.run(&options);
        assert!(forced.success);
        assert_eq!(forced.pruned, 3);
    }

    #[tokio::test]
    async fn test_prune_invalid_policy() {
        let temp = TempDir::new().unwrap();
        let ws = test_workspace(&temp);
        let mut options = PruneOptions::new(Pool::Left);
        options.policy = Some("reckless".to_string());
        let output = PruneCommand::new(&ws).run(&options);
        assert!(!output.success);
        assert!(!output.confirmation_required);
    }
}
