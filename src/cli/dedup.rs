//! Dedup command for cortex.
//!
//! Finds clusters of near-identical bullets and, with `merge`, folds each
//! cluster into its primary (secondaries are archived and can be restored).

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::cli::{render, Workspace};
use crate::core::Pool;
use crate::error::Result;
use crate::maintenance::{dedup_stats, DedupStats, Deduplicator, DuplicateCluster, Merger};
use crate::memory::KnowledgeStore;

/// Options for the dedup command.
#[derive(Debug, Clone, Default)]
pub struct DedupOptions {
    pub json: bool,
    pub quiet: bool,
    /// Only this pool; every pool when unset.
    pub pool: Option<Pool>,
    pub threshold: Option<f64>,
    pub min_cluster_size: Option<usize>,
    /// Merge the clusters found.
    pub merge: bool,
    /// With `merge`, report without mutating.
    pub dry_run: bool,
}

/// Output format for the dedup command.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DedupOutput {
    pub success: bool,
    pub clusters: Vec<DuplicateCluster>,
    pub redundant_bullets: usize,
    pub largest_cluster: usize,
    pub avg_similarity: f64,
    pub merged: bool,
    pub dry_run: bool,
    pub bullets_removed: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl DedupOutput {
    pub fn success(
        clusters: Vec<DuplicateCluster>,
        stats: DedupStats,
        merged: bool,
        dry_run: bool,
        bullets_removed: usize,
    ) -> Self {
        Self {
            success: true,
            clusters,
            redundant_bullets: stats.redundant_bullets,
            largest_cluster: stats.largest_cluster,
            avg_similarity: stats.avg_similarity,
            merged,
            dry_run,
            bullets_removed,
            error: None,
        }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            clusters: Vec::new(),
            redundant_bullets: 0,
            largest_cluster: 0,
            avg_similarity: 0.0,
            merged: false,
            dry_run: false,
            bullets_removed: 0,
            error: Some(error.into()),
        }
    }
}

/// The dedup command implementation.
pub struct DedupCommand {
    dedup: Deduplicator,
    merger: Merger,
}

impl DedupCommand {
    pub fn new(workspace: &Workspace) -> Self {
        let store: &Arc<KnowledgeStore> = workspace.store();
        Self {
            dedup: Deduplicator::new(Arc::clone(store), &workspace.config().dedup),
            merger: Merger::new(Arc::clone(store), workspace.data_dir()),
        }
    }

    pub async fn run(&self, options: &DedupOptions) -> DedupOutput {
        match self.execute(options).await {
            Ok(output) => output,
            Err(e) => DedupOutput::failure(e.to_string()),
        }
    }

    async fn execute(&self, options: &DedupOptions) -> Result<DedupOutput> {
        let pools = match options.pool {
            Some(pool) => vec![pool],
            None => Pool::all().to_vec(),
        };

        let mut clusters = Vec::new();
        for pool in pools {
            clusters.extend(
                self.dedup
                    .find_duplicates(pool, options.threshold, options.min_cluster_size)
                    .await?,
            );
        }
        let stats = dedup_stats(&clusters);

        let removed = if options.merge && !clusters.is_empty() {
            self.merger.merge_all(&clusters, options.dry_run)?.bullets_removed
        } else {
            0
        };

        Ok(DedupOutput::success(
            clusters,
            stats,
            options.merge,
            options.dry_run,
            removed,
        ))
    }

    pub fn format_output(&self, output: &DedupOutput, options: &DedupOptions) -> String {
        render(output, options.json, options.quiet, format_human_readable)
    }
}

fn format_human_readable(output: &DedupOutput) -> String {
    if !output.success {
        return format!(
            "Dedup failed: {}",
            output.error.as_deref().unwrap_or("unknown error")
        );
    }
    if output.clusters.is_empty() {
        return "No duplicates found.".to_string();
    }

    let mut lines = vec![format!(
        "Found {} cluster(s), {} redundant bullet(s), avg similarity {:.3}",
        output.clusters.len(),
        output.redundant_bullets,
        output.avg_similarity
    )];
    for cluster in &output.clusters {
        lines.push(format!(
            "  [{}] keep {} <- {}",
            cluster.pool,
            cluster.primary_id,
            cluster.secondary_ids().join(", ")
        ));
    }
    if output.merged {
        let verb = if output.dry_run { "Would remove" } else { "Removed" };
        lines.push(format!("{} {} bullet(s)", verb, output.bullets_removed));
    } else {
        lines.push("Run with --merge to merge these clusters.".to_string());
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

    async fn seed_duplicates(ws: &Workspace) {
        for text in [
            "Run the full test suite before merging",
            "run the full test suite before merging",
            "Document every public function",
        ] {
            ws.store()
                .add(NewBullet::new(text, Pool::Left, BulletKind::Heuristic))
                .await
                .unwrap();
        }
    }

    #[tokio::test]
    async fn test_dedup_reports_without_merging() {
        let temp = TempDir::new().unwrap();
        let ws = test_workspace(&temp);
        seed_duplicates(&ws).await;

        let cmd = DedupCommand::new(&ws);
        let options = DedupOptions::default();
        let output = cmd.run(&options).await;

        assert!(output.success);
        assert_eq!(output.clusters.len(), 1);
        assert_eq!(output.redundant_bullets, 1);
        assert_eq!(output.bullets_removed, 0);
        assert_eq!(ws.store().count(Pool::Left).unwrap(), 3);
        assert!(cmd.format_output(&output, &options).contains("--merge"));
    }

    #[tokio::test]
    async fn test_dedup_merge_dry_run_keeps_bullets() {
        let temp = TempDir::new().unwrap();
        let ws = test_workspace(&temp);
        seed_duplicates(&ws).await;

        let options = DedupOptions {
            merge: true,
            dry_run: true,
            ..Default::default()
        };
        let output = DedupCommand::new(&ws).run(&options).await;

        assert_eq!(output.bullets_removed, 1);
        assert_eq!(ws.store().count(Pool::Left).unwrap(), 3);
    }

    #[tokio::test]
    async fn test_dedup_merge() {
        let temp = TempDir::new().unwrap();
        let ws = test_workspace(&temp);
        seed_duplicates(&ws).await;

        let options = DedupOptions {
            pool: Some(Pool::Left),
            merge: true,
            ..Default::default()
        };
        let output = DedupCommand::new(&ws).run(&options).await;

        assert!(output.success);
        assert_eq!(output.bullets_removed, 1);
        assert_eq!(ws.store().count(Pool::Left).unwrap(), 2);
        assert!(temp.path().join("archive").exists());
    }
}
