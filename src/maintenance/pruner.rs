//! Policy-based pruning with backup and rollback.
//!
//! A real prune always writes a backup of every candidate before the single
//! batch delete, so [`Pruner::rollback`] can put them back.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::quality::{find_low_quality, PrunePolicy, PruneReason, QualityMetrics};
use crate::config::PruneConfig;
use crate::core::{Bullet, Pool};
use crate::error::{CortexError, FailOpen, Result};
use crate::memory::KnowledgeStore;
use crate::util::{read_to_string_limited, timestamp_slug, write_json_atomic};

/// Backup id reported by dry runs.
pub const DRY_RUN_BACKUP_ID: &str = "dry_run";

/// A bullet selected for pruning.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PruneCandidate {
    pub id: String,
    pub text: String,
    pub quality_score: f64,
    pub reasons: Vec<PruneReason>,
}

impl PruneCandidate {
    fn from_metrics(bullet: &Bullet, metrics: &QualityMetrics) -> Self {
        Self {
            id: bullet.id.clone(),
            text: bullet.text.clone(),
            quality_score: metrics.quality_score,
            reasons: metrics.reasons.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PruneResult {
    pub pool: Pool,
    pub policy: PrunePolicy,
    pub candidates: Vec<PruneCandidate>,
    pub pruned: usize,
    /// `"dry_run"` for dry runs, empty when nothing was pruned.
    pub backup_id: String,
    pub by_reason: BTreeMap<String, usize>,
    pub dry_run: bool,
}

/// Snapshot written before a prune.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PruneBackup {
    pub backup_id: String,
    pub timestamp: DateTime<Utc>,
    pub pool: Pool,
    pub policy: PrunePolicy,
    pub bullet_count: usize,
    pub bullets: Vec<Bullet>,
}

/// Backup listing entry.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BackupInfo {
    pub backup_id: String,
    pub timestamp: DateTime<Utc>,
    pub pool: Pool,
    pub bullet_count: usize,
    pub path: PathBuf,
}

#[derive(Debug, Serialize, Deserialize)]
struct PruneHistoryRecord {
    prune_id: String,
    backup_id: String,
    timestamp: DateTime<Utc>,
    pool: Pool,
    policy: PrunePolicy,
    bullets_pruned: usize,
    bullet_ids: Vec<String>,
    prune_reasons: BTreeMap<String, usize>,
}

fn count_reasons<'a>(candidates: impl Iterator<Item = &'a PruneCandidate>) -> BTreeMap<String, usize> {
    let mut counts = BTreeMap::new();
    for candidate in candidates {
        for reason in &candidate.reasons {
            *counts.entry(reason.as_str().to_string()).or_insert(0) += 1;
        }
    }
    counts
}

pub struct Pruner {
    store: Arc<KnowledgeStore>,
    config: PruneConfig,
    backup_dir: PathBuf,
    history_dir: PathBuf,
}

impl Pruner {
    pub fn new(store: Arc<KnowledgeStore>, config: &PruneConfig, data_dir: &Path) -> Self {
        let backup_dir = data_dir.join("backups");
        Self {
            store,
            config: config.clone(),
            history_dir: backup_dir.join("history"),
            backup_dir,
        }
    }

    /// The configured default policy.
    pub fn default_policy(&self) -> Result<PrunePolicy> {
        self.config.policy.parse()
    }

    /// Prune low-quality bullets from `pool`.
    ///
    /// Fails with `ConfirmationRequired`, before touching anything, when a
    /// real run finds more candidates than the confirmation threshold and
    /// `force` is not set.
    pub fn prune_collection(
        &self,
        pool: Pool,
        policy: PrunePolicy,
        dry_run: bool,
        force: bool,
    ) -> Result<PruneResult> {
        self.prune_matching(pool, policy, dry_run, force, |_| true)
    }

    /// Like [`prune_collection`](Self::prune_collection), restricted to
    /// candidates flagged for `reason`.
    pub fn prune_by_reason(
        &self,
        pool: Pool,
        reason: PruneReason,
        policy: PrunePolicy,
        dry_run: bool,
        force: bool,
    ) -> Result<PruneResult> {
        self.prune_matching(pool, policy, dry_run, force, |m| m.reasons.contains(&reason))
    }

    fn prune_matching(
        &self,
        pool: Pool,
        policy: PrunePolicy,
        dry_run: bool,
        force: bool,
        keep: impl Fn(&QualityMetrics) -> bool,
    ) -> Result<PruneResult> {
        let bullets = self.store.list(pool, None)?;
        let low: Vec<(&Bullet, QualityMetrics)> = find_low_quality(&bullets, policy, Utc::now())
            .into_iter()
            .filter(|(_, m)| keep(m))
            .collect();
        let found = low.len();

        let mut result = PruneResult {
            pool,
            policy,
            candidates: Vec::new(),
            pruned: 0,
            backup_id: String::new(),
            by_reason: BTreeMap::new(),
            dry_run,
        };
        if found == 0 {
            return Ok(result);
        }

        if found > self.config.max_prune_per_run {
            tracing::warn!(
                found,
                limit = self.config.max_prune_per_run,
                "prune candidates exceed per-run limit, truncating"
            );
        }
        let selected: Vec<&(&Bullet, QualityMetrics)> =
            low.iter().take(self.config.max_prune_per_run).collect();

        if !dry_run && !force && found > self.config.confirmation_threshold {
            return Err(CortexError::confirmation_required(
                found,
                self.config.confirmation_threshold,
            ));
        }

        result.candidates = selected
            .iter()
            .map(|(b, m)| PruneCandidate::from_metrics(b, m))
            .collect();
        result.by_reason = count_reasons(result.candidates.iter());

        if dry_run {
            result.backup_id = DRY_RUN_BACKUP_ID.to_string();
            tracing::info!(pool = %pool, candidates = result.candidates.len(), "prune dry run");
            return Ok(result);
        }

        let now = Utc::now();
        let slug = timestamp_slug(now);
        let backup = PruneBackup {
            backup_id: format!("backup_{}", slug),
            timestamp: now,
            pool,
            policy,
            bullet_count: selected.len(),
            bullets: selected.iter().map(|(b, _)| (*b).clone()).collect(),
        };
        write_json_atomic(&self.backup_path(&backup.backup_id), &backup)?;

        let ids: Vec<String> = result.candidates.iter().map(|c| c.id.clone()).collect();
        let deleted = self.store.delete(pool, &ids, "prune")?;
        result.pruned = deleted.len();
        result.backup_id = backup.backup_id.clone();

        let history = PruneHistoryRecord {
            prune_id: format!("prune_{}", slug),
            backup_id: backup.backup_id,
            timestamp: now,
            pool,
            policy,
            bullets_pruned: deleted.len(),
            bullet_ids: deleted,
            prune_reasons: result.by_reason.clone(),
        };
        write_json_atomic(
            &self.history_dir.join(format!("prune_{}.json", slug)),
            &history,
        )
        .fail_open_default("writing prune history");

        tracing::info!(
            pool = %pool,
            policy = %policy,
            pruned = result.pruned,
            backup_id = %result.backup_id,
            "prune complete"
        );
        Ok(result)
    }

    fn backup_path(&self, backup_id: &str) -> PathBuf {
        self.backup_dir.join(format!("{}.json", backup_id))
    }

    pub fn load_backup(&self, backup_id: &str) -> Result<PruneBackup> {
        let path = self.backup_path(backup_id);
        if backup_id.contains(['/', '\\']) || !path.exists() {
            return Err(CortexError::not_found("backup", backup_id));
        }
        Ok(serde_json::from_str(&read_to_string_limited(&path)?)?)
    }

    /// Re-insert every bullet of a backup. Returns the number restored.
    ///
    /// When `pool` is given it must match the backup's pool.
    pub async fn rollback(&self, backup_id: &str, pool: Option<Pool>) -> Result<usize> {
        let backup = self.load_backup(backup_id)?;
        if let Some(pool) = pool {
            if pool != backup.pool {
                return Err(CortexError::invalid_state(format!(
                    "backup {} was taken from the {} pool, not {}",
                    backup_id, backup.pool, pool
                )));
            }
        }
        let restored = self.store.insert_many(backup.bullets, "rollback").await?;
        tracing::info!(backup_id, restored, "rollback complete");
        Ok(restored)
    }

    /// Available backups, newest first. Unreadable files are skipped.
    pub fn list_backups(&self) -> Result<Vec<BackupInfo>> {
        if !self.backup_dir.exists() {
            return Ok(Vec::new());
        }
        let entries =
            fs::read_dir(&self.backup_dir).map_err(|e| CortexError::storage(&self.backup_dir, e))?;

        let mut backups = Vec::new();
        for entry in entries.flatten() {
            let path = entry.path();
            if !path.is_file() || path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let parsed = read_to_string_limited(&path).and_then(|content| {
                serde_json::from_str::<PruneBackup>(&content).map_err(CortexError::from)
            });
            if let Some(backup) =
                parsed.map(Some).fail_open_with(&format!("reading {}", path.display()), None)
            {
                backups.push(BackupInfo {
                    backup_id: backup.backup_id,
                    timestamp: backup.timestamp,
                    pool: backup.pool,
                    bullet_count: backup.bullet_count,
                    path,
                });
            }
        }
        backups.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        Ok(backups)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{BulletKind, BulletStatus};
    use crate::memory::store::tests::test_store;
    use chrono::Duration;
    use tempfile::TempDir;

    /// Insert `n` stale, never-used bullets plus one healthy bullet.
    async fn seed(store: &KnowledgeStore, n: usize) -> Vec<Bullet> {
        let old = Utc::now() - Duration::days(40);
        let mut bullets: Vec<Bullet> = (0..n)
            .map(|i| {
                Bullet::new(format!("stale rule {}", i), Pool::Left, BulletKind::Heuristic)
                    .with_created_at(old)
            })
            .collect();
        let mut healthy = Bullet::new("healthy rule", Pool::Left, BulletKind::Heuristic)
            .with_status(BulletStatus::Active)
            .with_created_at(old);
        healthy.helpful_count = 5;
        bullets.push(healthy);
        store.insert_many(bullets.clone(), "test").await.unwrap();
        bullets
    }

    fn pruner(store: &Arc<KnowledgeStore>, temp: &TempDir) -> Pruner {
        Pruner::new(Arc::clone(store), &PruneConfig::default(), temp.path())
    }

    #[tokio::test]
    async fn test_dry_run_mutates_nothing() {
        let temp = TempDir::new().unwrap();
        let store = Arc::new(test_store());
        seed(&store, 3).await;
        let pruner = pruner(&store, &temp);

        let result = pruner
            .prune_collection(Pool::Left, PrunePolicy::Aggressive, true, false)
            .unwrap();
        assert_eq!(result.candidates.len(), 3);
        assert_eq!(result.pruned, 0);
        assert_eq!(result.backup_id, "dry_run");
        assert_eq!(result.by_reason["never_used_and_old"], 3);
        assert_eq!(store.count(Pool::Left).unwrap(), 4);
        assert!(!temp.path().join("backups").exists());
    }

    #[tokio::test]
    async fn test_dry_run_leaves_index_file_untouched() {
        use crate::backends::HashEmbedder;
        use crate::config::Config;
        use crate::storage::FileIndex;

        let temp = TempDir::new().unwrap();
        let index = Arc::new(FileIndex::open(temp.path()).unwrap());
        let store = Arc::new(KnowledgeStore::new(
            index,
            Arc::new(HashEmbedder::default()),
            &Config::default(),
        ));
        let mut harmful = Bullet::new("Retry flaky uploads forever", Pool::Left, BulletKind::Heuristic)
            .with_status(BulletStatus::Active)
            .with_created_at(Utc::now() - Duration::days(10));
        harmful.harmful_count = 3;
        store.insert_many(vec![harmful.clone()], "test").await.unwrap();

        let path = temp.path().join("index").join("left.json");
        let before = fs::read(&path).unwrap();

        let result = pruner(&store, &temp)
            .prune_collection(Pool::Left, PrunePolicy::Aggressive, true, false)
            .unwrap();
        assert_eq!(result.candidates.len(), 1);
        assert_eq!(result.candidates[0].id, harmful.id);
        assert!(result.candidates[0]
            .reasons
            .contains(&PruneReason::HarmfulRatioExceeded));
        assert_eq!(result.pruned, 0);
        assert_eq!(fs::read(&path).unwrap(), before);
        assert!(!temp.path().join("backups").exists());
    }

    #[tokio::test]
    async fn test_prune_backup_and_rollback() {
        let temp = TempDir::new().unwrap();
        let store = Arc::new(test_store());
        let seeded = seed(&store, 3).await;
        let pruner = pruner(&store, &temp);

        let result = pruner
            .prune_collection(Pool::Left, PrunePolicy::Balanced, false, false)
            .unwrap();
        assert_eq!(result.pruned, 3);
        assert!(result.backup_id.starts_with("backup_"));
        assert_eq!(store.count(Pool::Left).unwrap(), 1);

        let backups = pruner.list_backups().unwrap();
        assert_eq!(backups.len(), 1);
        assert_eq!(backups[0].bullet_count, 3);
        let history = fs::read_dir(temp.path().join("backups").join("history"))
            .unwrap()
            .count();
        assert_eq!(history, 1);

        let restored = pruner.rollback(&result.backup_id, Some(Pool::Left)).await.unwrap();
        assert_eq!(restored, 3);
        assert_eq!(store.count(Pool::Left).unwrap(), 4);
        let back = store.get(&seeded[0].id).unwrap();
        assert_eq!(back.created_at, seeded[0].created_at);
    }

    #[tokio::test]
    async fn test_confirmation_required_above_threshold() {
        let temp = TempDir::new().unwrap();
        let store = Arc::new(test_store());
        seed(&store, 3).await;
        let config = PruneConfig {
            confirmation_threshold: 2,
            ..PruneConfig::default()
        };
        let pruner = Pruner::new(Arc::clone(&store), &config, temp.path());

        let err = pruner
            .prune_collection(Pool::Left, PrunePolicy::Balanced, false, false)
            .unwrap_err();
        assert!(matches!(
            err,
            CortexError::ConfirmationRequired {
                count: 3,
                threshold: 2
            }
        ));
        assert_eq!(store.count(Pool::Left).unwrap(), 4);

        // Dry runs never need confirmation; force proceeds
        assert!(pruner
            .prune_collection(Pool::Left, PrunePolicy::Balanced, true, false)
            .is_ok());
        let result = pruner
            .prune_collection(Pool::Left, PrunePolicy::Balanced, false, true)
            .unwrap();
        assert_eq!(result.pruned, 3);
    }

    #[tokio::test]
    async fn test_max_prune_per_run() {
        let temp = TempDir::new().unwrap();
        let store = Arc::new(test_store());
        seed(&store, 5).await;
        let config = PruneConfig {
            max_prune_per_run: 2,
            ..PruneConfig::default()
        };
        let pruner = Pruner::new(Arc::clone(&store), &config, temp.path());
        let result = pruner
            .prune_collection(Pool::Left, PrunePolicy::Balanced, false, false)
            .unwrap();
        assert_eq!(result.pruned, 2);
        assert_eq!(store.count(Pool::Left).unwrap(), 4);
    }

    #[tokio::test]
    async fn test_prune_by_reason_and_empty() {
        let temp = TempDir::new().unwrap();
        let store = Arc::new(test_store());
        seed(&store, 2).await;
        let pruner = pruner(&store, &temp);

        let none = pruner
            .prune_by_reason(
                Pool::Left,
                PruneReason::HarmfulRatioExceeded,
                PrunePolicy::Balanced,
                false,
                false,
            )
            .unwrap();
        assert!(none.candidates.is_empty());
        assert_eq!(none.backup_id, "");

        let some = pruner
            .prune_by_reason(
                Pool::Left,
                PruneReason::QuarantineExpired,
                PrunePolicy::Balanced,
                true,
                false,
            )
            .unwrap();
        assert_eq!(some.candidates.len(), 2);
    }

    #[tokio::test]
    async fn test_rollback_unknown_backup() {
        let temp = TempDir::new().unwrap();
        let store = Arc::new(test_store());
        let pruner = pruner(&store, &temp);
        assert!(matches!(
            pruner.rollback("backup_nope", None).await,
            Err(CortexError::NotFound { .. })
        ));
        assert!(pruner.list_backups().unwrap().is_empty());
    }
}
