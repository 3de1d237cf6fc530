//! Collapse duplicate clusters into their primary bullet.
//!
//! Non-primary members are archived to `archive/{id}.json` before they are
//! deleted, so any merge can be undone one bullet at a time with
//! [`Merger::restore`].

use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::dedup::DuplicateCluster;
use crate::core::{Bullet, Pool};
use crate::error::{CortexError, FailOpen, Result};
use crate::memory::KnowledgeStore;
use crate::util::{read_to_string_limited, timestamp_slug, write_json_atomic};

/// Archive reason recorded for merged bullets.
pub const MERGE_REASON: &str = "deduplication";

/// A bullet removed by a merge, as stored on disk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArchivedBullet {
    pub bullet: Bullet,
    pub archived_at: DateTime<Utc>,
    pub merged_into: String,
    pub reason: String,
}

/// Result of merging one cluster.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MergeOutcome {
    pub pool: Pool,
    pub merged: Bullet,
    pub archived_ids: Vec<String>,
    pub dry_run: bool,
}

/// Result of merging a batch of clusters.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MergeSummary {
    pub merges: Vec<MergeOutcome>,
    pub bullets_removed: usize,
    /// Clusters skipped because their primary vanished.
    pub skipped: usize,
    pub history_file: Option<PathBuf>,
}

#[derive(Debug, Serialize, Deserialize)]
struct MergeHistoryRecord {
    merge_id: String,
    timestamp: DateTime<Utc>,
    merges: Vec<MergeHistoryEntry>,
}

#[derive(Debug, Serialize, Deserialize)]
struct MergeHistoryEntry {
    pool: Pool,
    primary_bullet_id: String,
    merged_bullet_ids: Vec<String>,
    reason: String,
}

/// Fold cluster members into the primary.
///
/// Tags are the sorted union, counters are summed, confidence is the
/// usage-weighted mean (the primary's when nobody was used), created_at is
/// the earliest and last_used_at the latest.
pub fn merge_bullets(primary: &Bullet, members: &[Bullet]) -> Bullet {
    let mut merged = primary.clone();
    let mut tags: BTreeSet<String> = primary.tags.iter().cloned().collect();
    let mut helpful = 0u32;
    let mut harmful = 0u32;
    let mut weighted = 0.0;
    let mut weight = 0u64;

    for b in members {
        helpful = helpful.saturating_add(b.helpful_count);
        harmful = harmful.saturating_add(b.harmful_count);
        tags.extend(b.tags.iter().cloned());

        let uses = b.usage_count() as u64;
        if uses > 0 {
            weighted += b.confidence * uses as f64;
            weight += uses;
        }
        if b.created_at < merged.created_at {
            merged.created_at = b.created_at;
        }
        if b.last_used_at > merged.last_used_at {
            merged.last_used_at = b.last_used_at;
        }
    }

    merged.helpful_count = helpful;
    merged.harmful_count = harmful;
    merged.tags = tags.into_iter().collect();
    merged.confidence = if weight > 0 {
        weighted / weight as f64
    } else {
        primary.confidence
    };
    merged
}

pub struct Merger {
    store: Arc<KnowledgeStore>,
    archive_dir: PathBuf,
    history_dir: PathBuf,
}

impl Merger {
    pub fn new(store: Arc<KnowledgeStore>, data_dir: &Path) -> Self {
        Self {
            store,
            archive_dir: data_dir.join("archive"),
            history_dir: data_dir.join("merge_history"),
        }
    }

    fn archive_path(&self, id: &str) -> PathBuf {
        self.archive_dir.join(format!("{}.json", id))
    }

    /// Merge one cluster.
    ///
    /// Members are re-read under their locks; vanished members are dropped.
    /// Fails with `NotFound` if the primary itself is gone.
    pub fn merge_cluster(&self, cluster: &DuplicateCluster, dry_run: bool) -> Result<MergeOutcome> {
        self.store.locked(&cluster.bullet_ids, |locked| {
            let mut members = Vec::with_capacity(cluster.len());
            for id in &cluster.bullet_ids {
                match locked.find(id)? {
                    Some(b) if b.pool == cluster.pool => members.push(b),
                    _ => tracing::debug!(id = %id, "merge member vanished, skipping"),
                }
            }

            let primary = members
                .iter()
                .find(|b| b.id == cluster.primary_id)
                .cloned()
                .ok_or_else(|| CortexError::not_found("bullet", &cluster.primary_id))?;

            let merged = merge_bullets(&primary, &members);
            let secondary: Vec<&Bullet> = members.iter().filter(|b| b.id != primary.id).collect();
            let archived_ids: Vec<String> = secondary.iter().map(|b| b.id.clone()).collect();

            if dry_run || secondary.is_empty() {
                return Ok(MergeOutcome {
                    pool: cluster.pool,
                    merged,
                    archived_ids: if dry_run { archived_ids } else { Vec::new() },
                    dry_run,
                });
            }

            let now = Utc::now();
            for b in &secondary {
                let record = ArchivedBullet {
                    bullet: (*b).clone(),
                    archived_at: now,
                    merged_into: merged.id.clone(),
                    reason: MERGE_REASON.to_string(),
                };
                write_json_atomic(&self.archive_path(&b.id), &record)?;
            }

            locked.replace(&merged)?;
            locked.delete(cluster.pool, &archived_ids, "merge")?;

            tracing::info!(
                pool = %cluster.pool,
                primary = %merged.id,
                merged = archived_ids.len(),
                "cluster merged"
            );
            Ok(MergeOutcome {
                pool: cluster.pool,
                merged,
                archived_ids,
                dry_run,
            })
        })
    }

    /// Merge every cluster and write a history record for real runs.
    ///
    /// A cluster whose primary vanished is skipped; any other error stops
    /// the batch.
    pub fn merge_all(&self, clusters: &[DuplicateCluster], dry_run: bool) -> Result<MergeSummary> {
        let mut summary = MergeSummary::default();
        for cluster in clusters {
            match self.merge_cluster(cluster, dry_run) {
                Ok(outcome) => {
                    summary.bullets_removed += outcome.archived_ids.len();
                    summary.merges.push(outcome);
                }
                Err(CortexError::NotFound { id, .. }) => {
                    tracing::warn!(primary = %id, "primary vanished before merge, skipping cluster");
                    summary.skipped += 1;
                }
                Err(e) => return Err(e),
            }
        }

        if !dry_run && summary.bullets_removed > 0 {
            let now = Utc::now();
            let slug = timestamp_slug(now);
            let record = MergeHistoryRecord {
                merge_id: format!("merge_{}", slug),
                timestamp: now,
                merges: summary
                    .merges
                    .iter()
                    .filter(|m| !m.archived_ids.is_empty())
                    .map(|m| MergeHistoryEntry {
                        pool: m.pool,
                        primary_bullet_id: m.merged.id.clone(),
                        merged_bullet_ids: m.archived_ids.clone(),
                        reason: MERGE_REASON.to_string(),
                    })
                    .collect(),
            };
            let path = self.history_dir.join(format!("merge_{}.json", slug));
            write_json_atomic(&path, &record)?;
            summary.history_file = Some(path);
        }
        Ok(summary)
    }

    /// Put an archived bullet back into its pool and drop the archive file.
    ///
    /// When `pool` is given it must match the bullet's own pool.
    pub async fn restore(&self, id: &str, pool: Option<Pool>) -> Result<Bullet> {
        let path = self.archive_path(id);
        if id.contains(['/', '\\']) || !path.exists() {
            return Err(CortexError::not_found("archived bullet", id));
        }
        let record: ArchivedBullet = serde_json::from_str(&read_to_string_limited(&path)?)?;
        if let Some(pool) = pool {
            if pool != record.bullet.pool {
                return Err(CortexError::invalid_state(format!(
                    "archived bullet {} belongs to the {} pool, not {}",
                    id, record.bullet.pool, pool
                )));
            }
        }

        self.store
            .insert_existing(record.bullet.clone(), "archive")
            .await?;
        fs::remove_file(&path).map_err(|e| CortexError::storage(&path, e))?;
        tracing::info!(id = %id, "archived bullet restored");
        Ok(record.bullet)
    }

    /// Archived bullets, oldest archive first. Unreadable files are skipped.
    pub fn list_archived(&self) -> Result<Vec<ArchivedBullet>> {
        if !self.archive_dir.exists() {
            return Ok(Vec::new());
        }
        let entries =
            fs::read_dir(&self.archive_dir).map_err(|e| CortexError::storage(&self.archive_dir, e))?;

        let mut archived = Vec::new();
        for entry in entries.flatten() {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let parsed = read_to_string_limited(&path).and_then(|content| {
                serde_json::from_str::<ArchivedBullet>(&content).map_err(CortexError::from)
            });
            if let Some(record) =
                parsed.map(Some).fail_open_with(&format!("reading {}", path.display()), None)
            {
                archived.push(record);
            }
        }
        archived.sort_by(|a, b| a.archived_at.cmp(&b.archived_at));
        Ok(archived)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::BulletKind;
    use crate::memory::store::tests::{add, test_store};
    use chrono::Duration;
    use tempfile::TempDir;

    #[test]
    fn test_merge_bullets_folds_members() {
        let now = Utc::now();
        let mut primary = Bullet::new("keep me", Pool::Left, BulletKind::Heuristic)
            .with_tags(vec!["b".to_string()])
            .with_confidence(0.9)
            .with_created_at(now);
        primary.helpful_count = 3;
        let mut other = Bullet::new("drop me", Pool::Left, BulletKind::Heuristic)
            .with_tags(vec!["a".to_string(), "b".to_string()])
            .with_confidence(0.5)
            .with_created_at(now - Duration::days(2));
        other.helpful_count = 1;
        other.last_used_at = Some(now);

        let merged = merge_bullets(&primary, &[primary.clone(), other.clone()]);
        assert_eq!(merged.id, primary.id);
        assert_eq!(merged.text, "keep me");
        assert_eq!(merged.tags, vec!["a", "b"]);
        assert_eq!(merged.helpful_count, 4);
        assert!((merged.confidence - (0.9 * 3.0 + 0.5) / 4.0).abs() < 1e-9);
        assert_eq!(merged.created_at, other.created_at);
        assert_eq!(merged.last_used_at, Some(now));
    }

    #[test]
    fn test_unused_members_keep_primary_confidence() {
        let primary = Bullet::new("p", Pool::Left, BulletKind::Heuristic).with_confidence(0.7);
        let other = Bullet::new("o", Pool::Left, BulletKind::Heuristic).with_confidence(0.2);
        let merged = merge_bullets(&primary, &[primary.clone(), other]);
        assert_eq!(merged.confidence, 0.7);
    }

    async fn cluster_of_two(store: &KnowledgeStore) -> DuplicateCluster {
        let a = add(store, "Always pin versions", Pool::Left).await;
        let b = add(store, "always pin versions", Pool::Left).await;
        DuplicateCluster {
            pool: Pool::Left,
            bullet_ids: vec![a.id.clone(), b.id.clone()],
            primary_id: a.id,
            similarities: vec![1.0],
        }
    }

    #[tokio::test]
    async fn test_restore_rejects_path_ids() {
        let temp = TempDir::new().unwrap();
        let store = Arc::new(test_store());
        let merger = Merger::new(Arc::clone(&store), temp.path());
        let outside = temp.path().join("outside.json");
        fs::write(&outside, "{}").unwrap();

        for id in ["../outside", "..\\outside"] {
            assert!(matches!(
                merger.restore(id, None).await,
                Err(CortexError::NotFound { .. })
            ));
        }
        assert!(outside.exists());
    }

    #[tokio::test]
    async fn test_merge_archives_and_restores() {
        let temp = TempDir::new().unwrap();
        let store = Arc::new(test_store());
        let cluster = cluster_of_two(&store).await;
        let merger = Merger::new(Arc::clone(&store), temp.path());

        let summary = merger.merge_all(&[cluster.clone()], false).unwrap();
        assert_eq!(summary.bullets_removed, 1);
        assert!(summary.history_file.as_ref().unwrap().exists());
        assert_eq!(store.count(Pool::Left).unwrap(), 1);

        let secondary = &cluster.bullet_ids[1];
        let archive = temp.path().join("archive").join(format!("{}.json", secondary));
        let record: ArchivedBullet =
            serde_json::from_str(&fs::read_to_string(&archive).unwrap()).unwrap();
        assert_eq!(record.merged_into, cluster.primary_id);
        assert_eq!(record.reason, "deduplication");
        assert_eq!(merger.list_archived().unwrap().len(), 1);

        assert!(matches!(
            merger.restore(secondary, Some(Pool::Right)).await,
            Err(CortexError::InvalidState { .. })
        ));
        let restored = merger.restore(secondary, Some(Pool::Left)).await.unwrap();
        assert_eq!(&restored.id, secondary);
        assert_eq!(store.count(Pool::Left).unwrap(), 2);
        assert!(!archive.exists());
        assert!(matches!(
            merger.restore(secondary, None).await,
            Err(CortexError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_dry_run_changes_nothing() {
        let temp = TempDir::new().unwrap();
        let store = Arc::new(test_store());
        let cluster = cluster_of_two(&store).await;
        let merger = Merger::new(Arc::clone(&store), temp.path());

        let outcome = merger.merge_cluster(&cluster, true).unwrap();
        assert!(outcome.dry_run);
        assert_eq!(outcome.archived_ids.len(), 1);
        assert_eq!(store.count(Pool::Left).unwrap(), 2);
        assert!(!temp.path().join("archive").exists());
    }

    #[tokio::test]
    async fn test_vanished_members() {
        let temp = TempDir::new().unwrap();
        let store = Arc::new(test_store());
        let cluster = cluster_of_two(&store).await;
        let merger = Merger::new(Arc::clone(&store), temp.path());

        // Secondary gone: merge becomes a no-op on the primary
        store
            .delete(Pool::Left, &[cluster.bullet_ids[1].clone()], "test")
            .unwrap();
        let outcome = merger.merge_cluster(&cluster, false).unwrap();
        assert!(outcome.archived_ids.is_empty());

        // Primary gone: aborts, and merge_all skips it
        store
            .delete(Pool::Left, &[cluster.primary_id.clone()], "test")
            .unwrap();
        assert!(matches!(
            merger.merge_cluster(&cluster, false),
            Err(CortexError::NotFound { .. })
        ));
        let summary = merger.merge_all(&[cluster], false).unwrap();
        assert_eq!(summary.skipped, 1);
        assert!(summary.history_file.is_none());
    }
}
