//! Outcome command for cortex.
//!
//! Marks bullets helpful or harmful after a task, which drives activation
//! and promotion to the shared pool.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::cli::{render, Workspace};
use crate::memory::KnowledgeStore;

/// Options for the outcome command.
#[derive(Debug, Clone, Default)]
pub struct OutcomeOptions {
    pub json: bool,
    pub quiet: bool,
    pub ids: Vec<String>,
    /// Mark harmful instead of helpful.
    pub harmful: bool,
}

/// Output format for the outcome command.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutcomeOutput {
    pub success: bool,
    pub helpful: bool,
    pub updated: Vec<String>,
    pub activated: Vec<String>,
    pub promoted: Vec<String>,
    pub missing: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl OutcomeOutput {
    pub fn failure(helpful: bool, error: impl Into<String>) -> Self {
        Self {
            success: false,
            helpful,
            updated: Vec::new(),
            activated: Vec::new(),
            promoted: Vec::new(),
            missing: Vec::new(),
            error: Some(error.into()),
        }
    }
}

/// The outcome command implementation.
pub struct OutcomeCommand {
    store: Arc<KnowledgeStore>,
}

impl OutcomeCommand {
    pub fn new(workspace: &Workspace) -> Self {
        Self {
            store: Arc::clone(workspace.store()),
        }
    }

    pub fn run(&self, options: &OutcomeOptions) -> OutcomeOutput {
        let helpful = !options.harmful;
        if options.ids.is_empty() {
            return OutcomeOutput::failure(helpful, "no bullet ids given");
        }

        match self.store.record_outcome(&options.ids, helpful) {
            Ok(report) => OutcomeOutput {
                // Unknown ids are reported, not fatal.
                success: true,
                helpful,
                updated: report.updated,
                activated: report.activated,
                promoted: report.promoted,
                missing: report.missing,
                error: None,
            },
            Err(e) => OutcomeOutput::failure(helpful, e.to_string()),
        }
    }

    pub fn format_output(&self, output: &OutcomeOutput, options: &OutcomeOptions) -> String {
        render(output, options.json, options.quiet, format_human_readable)
    }
}

fn format_human_readable(output: &OutcomeOutput) -> String {
    if !output.success {
        return format!(
            "Failed to record outcome: {}",
            output.error.as_deref().unwrap_or("unknown error")
        );
    }

    let label = if output.helpful { "helpful" } else { "harmful" };
    let mut lines = vec![format!("Marked {} bullet(s) {}", output.updated.len(), label)];
    for id in &output.activated {
        lines.push(format!("  activated: {}", id));
    }
    for id in &output.promoted {
        lines.push(format!("  promoted to shared: {}", id));
    }
    if !output.missing.is_empty() {
        lines.push(format!("  not found: {}", output.missing.join(", ")));
    }
    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::workspace::tests::test_workspace;
    use crate::core::{BulletKind, BulletStatus, Pool};
    use crate::memory::NewBullet;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_helpful_twice_activates() {
        let temp = TempDir::new().unwrap();
        let ws = test_workspace(&temp);
        let id = ws
            .store()
            .add(NewBullet::new("Cache the build directory", Pool::Left, BulletKind::Heuristic))
            .await
            .unwrap()
            .id;

        let cmd = OutcomeCommand::new(&ws);
        let options = OutcomeOptions {
            ids: vec![id.clone(), "pb_left_0_missing".to_string()],
            ..Default::default()
        };
        let first = cmd.run(&options);
        assert!(first.success);
        assert_eq!(first.updated, vec![id.clone()]);
        assert_eq!(first.missing, vec!["pb_left_0_missing".to_string()]);
        assert!(first.activated.is_empty());

        let second = cmd.run(&options);
        assert_eq!(second.activated, vec![id.clone()]);
        assert_eq!(ws.store().get(&id).unwrap().status, BulletStatus::Active);
        assert!(cmd.format_output(&second, &options).contains("activated"));
    }

    #[tokio::test]
    async fn test_harmful_blocks_activation() {
        let temp = TempDir::new().unwrap();
        let ws = test_workspace(&temp);
        let id = ws
            .store()
            .add(NewBullet::new("Skip the lint step", Pool::Left, BulletKind::Heuristic))
            .await
            .unwrap()
            .id;

        let cmd = OutcomeCommand::new(&ws);
        let harmful = OutcomeOptions {
            ids: vec![id.clone()],
            harmful: true,
            ..Default::default()
        };
        assert!(!cmd.run(&harmful).helpful);

        let helpful = OutcomeOptions {
            ids: vec![id.clone()],
            ..Default::default()
        };
        cmd.run(&helpful);
        cmd.run(&helpful);
        let bullet = ws.store().get(&id).unwrap();
        assert_eq!(bullet.harmful_count, 1);
        assert_eq!(bullet.status, BulletStatus::Quarantined);
    }

    #[test]
    fn test_no_ids_fails() {
        let temp = TempDir::new().unwrap();
        let ws = test_workspace(&temp);
        let output = OutcomeCommand::new(&ws).run(&OutcomeOptions::default());
        assert!(!output.success);
    }
}
