//! Stats command for cortex.
//!
//! Per-pool counts, quality distribution, pool diversity and the event
//! summary from `events.log`.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::cli::{render, Workspace};
use crate::core::Pool;
use crate::error::Result;
use crate::maintenance::quality_distribution;
use crate::memory::{KnowledgeStore, PoolStats};
use crate::stats::EventLog;
use crate::teaching::{DiversityMetrics, DiversityReport, SuggestionStatus, SuggestionStore};

/// Bullets sampled per pool for the diversity measurement.
const DIVERSITY_SAMPLE: usize = 200;

/// Options for the stats command.
#[derive(Debug, Clone, Default)]
pub struct StatsOptions {
    pub json: bool,
    pub quiet: bool,
    /// Include quality buckets and event counts.
    pub detailed: bool,
}

/// Counts for one pool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolStatsInfo {
    pub pool: String,
    #[serde(flatten)]
    pub counts: PoolStats,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub quality: Option<BTreeMap<String, usize>>,
}

/// Output format for the stats command.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatsOutput {
    pub success: bool,
    pub total: usize,
    pub pools: Vec<PoolStatsInfo>,
    pub pending_suggestions: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tag_divergence: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub centroid_distance: Option<f64>,
    pub converged: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub events: Option<BTreeMap<String, usize>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl StatsOutput {
    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            total: 0,
            pools: Vec::new(),
            pending_suggestions: 0,
            tag_divergence: None,
            centroid_distance: None,
            converged: false,
            events: None,
            error: Some(error.into()),
        }
    }
}

/// The stats command implementation.
pub struct StatsCommand {
    store: Arc<KnowledgeStore>,
    suggestions: Arc<SuggestionStore>,
    events: Arc<EventLog>,
    diversity: DiversityMetrics,
}

impl StatsCommand {
    pub fn new(workspace: &Workspace) -> Self {
        Self {
            store: Arc::clone(workspace.store()),
            suggestions: Arc::clone(workspace.suggestions()),
            events: Arc::clone(workspace.events()),
            diversity: DiversityMetrics::new(&workspace.config().diversity),
        }
    }

    pub async fn run(&self, options: &StatsOptions) -> StatsOutput {
        match self.collect(options).await {
            Ok(output) => output,
            Err(e) => StatsOutput::failure(e.to_string()),
        }
    }

    async fn collect(&self, options: &StatsOptions) -> Result<StatsOutput> {
        let stats = self.store.stats()?;

        let mut pools = Vec::with_capacity(3);
        for pool in Pool::all() {
            let quality = if options.detailed {
                let bullets = self.store.list(*pool, None)?;
                Some(
                    quality_distribution(&bullets)
                        .into_iter()
                        .map(|(bucket, n)| (bucket.to_string(), n))
                        .collect(),
                )
            } else {
                None
            };
            pools.push(PoolStatsInfo {
                pool: pool.to_string(),
                counts: stats.pool(*pool).clone(),
                quality,
            });
        }

        let report: Option<DiversityReport> = if self.diversity.enabled() {
            Some(self.diversity.compute(&self.store, DIVERSITY_SAMPLE).await?)
        } else {
            None
        };
        let events = if options.detailed {
            Some(self.events.summary()?)
        } else {
            None
        };

        Ok(StatsOutput {
            success: true,
            total: stats.total(),
            pools,
            pending_suggestions: self.suggestions.count(Some(SuggestionStatus::Pending))?,
            tag_divergence: report.as_ref().map(|r| r.tag_divergence),
            centroid_distance: report.as_ref().and_then(|r| r.centroid_distance),
            converged: report.is_some_and(|r| r.converged),
            events,
            error: None,
        })
    }

    pub fn format_output(&self, output: &StatsOutput, options: &StatsOptions) -> String {
        render(output, options.json, options.quiet, format_human_readable)
    }
}

fn format_human_readable(output: &StatsOutput) -> String {
    if !output.success {
        return format!(
            "Failed to load stats: {}",
            output.error.as_deref().unwrap_or("unknown error")
        );
    }

    let mut lines = vec![format!("Knowledge: {} bullet(s)", output.total), String::new()];
    lines.push(format!(
        "  {:<7} {:>6} {:>7} {:>12} {:>11} {:>9}",
        "pool", "total", "active", "quarantined", "deprecated", "avg conf"
    ));
    for pool in &output.pools {
        lines.push(format!(
            "  {:<7} {:>6} {:>7} {:>12} {:>11} {:>9.2}",
            pool.pool,
            pool.counts.total,
            pool.counts.active,
            pool.counts.quarantined,
            pool.counts.deprecated,
            pool.counts.avg_confidence
        ));
    }

    for pool in &output.pools {
        if let Some(quality) = &pool.quality {
            let buckets: Vec<String> = quality.iter().map(|(k, v)| format!("{}={}", k, v)).collect();
            lines.push(format!("  quality[{}]: {}", pool.pool, buckets.join(" ")));
        }
    }

    lines.push(String::new());
    lines.push(format!("Pending suggestions: {}", output.pending_suggestions));
    if let Some(divergence) = output.tag_divergence {
        let mut line = format!("Tag divergence: {:.3}", divergence);
        if let Some(distance) = output.centroid_distance {
            line.push_str(&format!(", centroid distance: {:.3}", distance));
        }
        if output.converged {
            line.push_str(" (pools converging)");
        }
        lines.push(line);
    }

    if let Some(events) = &output.events {
        if !events.is_empty() {
            lines.push(String::new());
            lines.push("Events:".to_string());
            for (name, count) in events {
                lines.push(format!("  {:<24} {}", name, count));
            }
        }
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

    #[tokio::test]
    async fn test_stats_counts() {
        let temp = TempDir::new().unwrap();
        let ws = test_workspace(&temp);
        ws.store()
            .add(NewBullet::new("Check the lockfile", Pool::Left, BulletKind::Heuristic))
            .await
            .unwrap();
        ws.store()
            .add(NewBullet::new("Try a fresh angle", Pool::Right, BulletKind::Heuristic))
            .await
            .unwrap();

        let cmd = StatsCommand::new(&ws);
        let output = cmd.run(&StatsOptions::default()).await;

        assert!(output.success);
        assert_eq!(output.total, 2);
        assert_eq!(output.pools.len(), 3);
        assert_eq!(output.pools[0].counts.quarantined, 1);
        assert!(output.pools[0].quality.is_none());
        assert!(output.events.is_none());
        assert!(output.tag_divergence.is_some());
    }

    #[tokio::test]
    async fn test_stats_detailed() {
        let temp = TempDir::new().unwrap();
        let ws = test_workspace(&temp);
        ws.store()
            .add(NewBullet::new("Check the lockfile", Pool::Left, BulletKind::Heuristic))
            .await
            .unwrap();

        let cmd = StatsCommand::new(&ws);
        let options = StatsOptions {
            detailed: true,
            ..Default::default()
        };
        let output = cmd.run(&options).await;

        let quality = output.pools[0].quality.as_ref().unwrap();
        assert_eq!(quality.values().sum::<usize>(), 1);
        assert_eq!(output.events.as_ref().unwrap().get("bullet_added"), Some(&1));

        let text = cmd.format_output(&output, &options);
        assert!(text.contains("Knowledge: 1 bullet(s)"));
        assert!(text.contains("quality[left]"));
    }

    #[tokio::test]
    async fn test_stats_json() {
        let temp = TempDir::new().unwrap();
        let ws = test_workspace(&temp);
        let cmd = StatsCommand::new(&ws);
        let options = StatsOptions {
            json: true,
            ..Default::default()
        };
        let output = cmd.run(&options).await;
        let parsed: serde_json::Value =
            serde_json::from_str(&cmd.format_output(&output, &options)).unwrap();
        assert_eq!(parsed["success"], true);
        assert_eq!(parsed["pools"][0]["pool"], "left");
        assert_eq!(parsed["pools"][0]["total"], 0);
    }
}
