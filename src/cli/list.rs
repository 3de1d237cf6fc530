//! List command for cortex.
//!
//! Lists bullets of one pool (or every pool), best score first.

use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::cli::{render, BulletInfo, Workspace};
use crate::core::{Bullet, BulletStatus, Pool};
use crate::error::Result;
use crate::memory::KnowledgeStore;

/// Options for the list command.
#[derive(Debug, Clone, Default)]
pub struct ListOptions {
    pub json: bool,
    pub quiet: bool,
    /// Only this pool; every pool when unset.
    pub pool: Option<Pool>,
    /// Only bullets with this status.
    pub status: Option<String>,
    pub limit: Option<usize>,
}

/// Output format for the list command.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListOutput {
    pub success: bool,
    pub count: usize,
    pub bullets: Vec<BulletInfo>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ListOutput {
    pub fn success(bullets: Vec<BulletInfo>) -> Self {
        Self {
            success: true,
            count: bullets.len(),
            bullets,
            error: None,
        }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            count: 0,
            bullets: Vec::new(),
            error: Some(error.into()),
        }
    }
}

/// The list command implementation.
pub struct ListCommand {
    store: Arc<KnowledgeStore>,
}

impl ListCommand {
    pub fn new(workspace: &Workspace) -> Self {
        Self {
            store: Arc::clone(workspace.store()),
        }
    }

    pub fn run(&self, options: &ListOptions) -> ListOutput {
        match self.collect(options) {
            Ok(bullets) => ListOutput::success(bullets.iter().map(BulletInfo::from_bullet).collect()),
            Err(e) => ListOutput::failure(e.to_string()),
        }
    }

    fn collect(&self, options: &ListOptions) -> Result<Vec<Bullet>> {
        let status = options
            .status
            .as_deref()
            .map(BulletStatus::from_str)
            .transpose()?;
        let pools = match options.pool {
            Some(pool) => vec![pool],
            None => Pool::all().to_vec(),
        };

        let mut bullets = Vec::new();
        for pool in pools {
            bullets.extend(self.store.list(pool, None)?);
        }
        if let Some(status) = status {
            bullets.retain(|b| b.status == status);
        }
        bullets.sort_by(|a, b| {
            b.score()
                .partial_cmp(&a.score())
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| b.created_at.cmp(&a.created_at))
        });
        if let Some(limit) = options.limit {
            bullets.truncate(limit);
        }
        Ok(bullets)
    }

    pub fn format_output(&self, output: &ListOutput, options: &ListOptions) -> String {
        render(output, options.json, options.quiet, format_human_readable)
    }
}

fn format_human_readable(output: &ListOutput) -> String {
    if !output.success {
        return format!(
            "Failed to list bullets: {}",
            output.error.as_deref().unwrap_or("unknown error")
        );
    }
    if output.bullets.is_empty() {
        return "No bullets found.".to_string();
    }

    let mut lines = vec![format!("{} bullet(s):", output.count)];
    for bullet in &output.bullets {
        lines.push(format!("  {:<6} {}", bullet.pool, bullet.line()));
    }
    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::workspace::tests::test_workspace;
    use crate::core::BulletKind;
    use crate::memory::NewBullet;
    use tempfile::TempDir;

    async fn seeded() -> (TempDir, Workspace) {
        let temp = TempDir::new().unwrap();
        let ws = test_workspace(&temp);
        let store = ws.store();
        store
            .add(NewBullet::new("Validate inputs", Pool::Left, BulletKind::Checklist))
            .await
            .unwrap();
        store
            .add(
                NewBullet::new("Write the failing test first", Pool::Left, BulletKind::Heuristic)
                    .with_status(BulletStatus::Active)
                    .with_confidence(0.9),
            )
            .await
            .unwrap();
        store
            .add(NewBullet::new("Sketch alternatives", Pool::Right, BulletKind::Heuristic))
            .await
            .unwrap();
        (temp, ws)
    }

    #[tokio::test]
    async fn test_list_all_pools() {
        let (_temp, ws) = seeded().await;
        let output = ListCommand::new(&ws).run(&ListOptions::default());
        assert!(output.success);
        assert_eq!(output.count, 3);
    }

    #[tokio::test]
    async fn test_list_pool_sorted_by_score() {
        let (_temp, ws) = seeded().await;
        let options = ListOptions {
            pool: Some(Pool::Left),
            ..Default::default()
        };
        let output = ListCommand::new(&ws).run(&options);
        assert_eq!(output.count, 2);
        assert_eq!(output.bullets[0].text, "Write the failing test first");
    }

    #[tokio::test]
    async fn test_list_status_and_limit() {
        let (_temp, ws) = seeded().await;
        let cmd = ListCommand::new(&ws);

        let options = ListOptions {
            status: Some("quarantined".to_string()),
            limit: Some(1),
            ..Default::default()
        };
        let output = cmd.run(&options);
        assert_eq!(output.count, 1);
        assert_eq!(output.bullets[0].status, "quarantined");

        let bad = ListOptions {
            status: Some("archived".to_string()),
            ..Default::default()
        };
        assert!(!cmd.run(&bad).success);
    }

    #[test]
    fn test_format_empty() {
        let temp = TempDir::new().unwrap();
        let ws = test_workspace(&temp);
        let cmd = ListCommand::new(&ws);
        let options = ListOptions::default();
        let output = cmd.run(&options);
        assert_eq!(cmd.format_output(&output, &options), "No bullets found.");
    }
}
