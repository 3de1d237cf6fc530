//! Background maintenance: scheduled deduplication and pruning.
//!
//! The loop wakes every `poll_interval_secs`, runs whichever tasks are due
//! over the left, right and shared pools in turn, and exits within one poll
//! once the stop channel flips to `true`. A failing pool is logged and the
//! sweep moves on.

use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;

use super::dedup::Deduplicator;
use super::merger::Merger;
use super::pruner::Pruner;
use super::quality::PrunePolicy;
use crate::config::{Config, MaintenanceConfig};
use crate::core::Pool;
use crate::error::{CortexError, Result};
use crate::memory::KnowledgeStore;
use crate::stats::EventKind;

/// How often a task runs on its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Schedule {
    Manual,
    Daily,
    Weekly,
    Monthly,
}

impl Schedule {
    pub fn interval(&self) -> chrono::Duration {
        match self {
            Self::Manual => chrono::Duration::days(365),
            Self::Daily => chrono::Duration::days(1),
            Self::Weekly => chrono::Duration::weeks(1),
            Self::Monthly => chrono::Duration::days(30),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Manual => "manual",
            Self::Daily => "daily",
            Self::Weekly => "weekly",
            Self::Monthly => "monthly",
        }
    }

    /// Whether a task last run at `last` is due at `now`. Manual never is.
    pub fn is_due(&self, last: Option<DateTime<Utc>>, now: DateTime<Utc>) -> bool {
        match (self, last) {
            (Self::Manual, _) => false,
            (_, None) => true,
            (_, Some(last)) => now >= last + self.interval(),
        }
    }

    fn next_run(&self, last: Option<DateTime<Utc>>) -> Option<DateTime<Utc>> {
        match self {
            Self::Manual => None,
            _ => last.map(|t| t + self.interval()),
        }
    }
}

impl fmt::Display for Schedule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Schedule {
    type Err = CortexError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "manual" => Ok(Self::Manual),
            "daily" => Ok(Self::Daily),
            "weekly" => Ok(Self::Weekly),
            "monthly" => Ok(Self::Monthly),
            other => Err(CortexError::invalid_policy("schedule", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MaintenanceTask {
    Deduplicate,
    Prune,
    /// Deduplicate, then prune.
    Full,
}

impl MaintenanceTask {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Deduplicate => "deduplicate",
            Self::Prune => "prune",
            Self::Full => "full",
        }
    }
}

impl FromStr for MaintenanceTask {
    type Err = CortexError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "deduplicate" | "dedup" => Ok(Self::Deduplicate),
            "prune" => Ok(Self::Prune),
            "full" => Ok(Self::Full),
            other => Err(CortexError::invalid_policy("maintenance task", other)),
        }
    }
}

/// Outcome of one task across all pools.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MaintenanceResult {
    pub task: MaintenanceTask,
    pub timestamp: DateTime<Utc>,
    pub pools: Vec<Pool>,
    pub duplicates_removed: usize,
    pub bullets_pruned: usize,
    pub duration_ms: u64,
    /// False when any pool failed.
    pub success: bool,
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MaintenanceStatus {
    pub running: bool,
    pub enabled: bool,
    pub dedup_schedule: Schedule,
    pub prune_schedule: Schedule,
    pub last_dedup: Option<DateTime<Utc>>,
    pub last_prune: Option<DateTime<Utc>>,
    pub next_dedup: Option<DateTime<Utc>>,
    pub next_prune: Option<DateTime<Utc>>,
    pub tasks_completed: usize,
    pub last_result: Option<MaintenanceResult>,
}

#[derive(Debug, Default)]
struct SchedulerState {
    last_dedup: Option<DateTime<Utc>>,
    last_prune: Option<DateTime<Utc>>,
    history: Vec<MaintenanceResult>,
}

pub struct MaintenanceScheduler {
    store: Arc<KnowledgeStore>,
    dedup: Deduplicator,
    merger: Merger,
    pruner: Pruner,
    config: MaintenanceConfig,
    dedup_schedule: Schedule,
    prune_schedule: Schedule,
    state: Mutex<SchedulerState>,
    running: AtomicBool,
}

impl MaintenanceScheduler {
    /// Build a scheduler over `store`, persisting under the configured data dir.
    pub fn new(store: Arc<KnowledgeStore>, config: &Config) -> Result<Self> {
        let data_dir = config.data_dir();
        Ok(Self {
            dedup: Deduplicator::new(Arc::clone(&store), &config.dedup),
            merger: Merger::new(Arc::clone(&store), &data_dir),
            pruner: Pruner::new(Arc::clone(&store), &config.prune, &data_dir),
            dedup_schedule: config.maintenance.dedup_schedule.parse()?,
            prune_schedule: config.maintenance.prune_schedule.parse()?,
            config: config.maintenance.clone(),
            store,
            state: Mutex::new(SchedulerState::default()),
            running: AtomicBool::new(false),
        })
    }

    pub fn merger(&self) -> &Merger {
        &self.merger
    }

    pub fn pruner(&self) -> &Pruner {
        &self.pruner
    }

    /// Seed last-run times recorded by an earlier process.
    pub fn set_last_runs(&self, last_dedup: Option<DateTime<Utc>>, last_prune: Option<DateTime<Utc>>) {
        let mut state = self.state.lock();
        state.last_dedup = last_dedup;
        state.last_prune = last_prune;
    }

    /// Run tasks on demand. Fails with `InvalidState` when maintenance is
    /// disabled and `force` is not set.
    pub async fn run_maintenance(
        &self,
        tasks: &[MaintenanceTask],
        force: bool,
    ) -> Result<Vec<MaintenanceResult>> {
        if !self.config.enabled && !force {
            return Err(CortexError::invalid_state(
                "maintenance is disabled (use force to override)",
            ));
        }
        let tasks = if tasks.is_empty() {
            &[MaintenanceTask::Full][..]
        } else {
            tasks
        };

        let mut results = Vec::new();
        for task in tasks {
            if matches!(task, MaintenanceTask::Deduplicate | MaintenanceTask::Full) {
                results.push(self.run_deduplication().await);
            }
            if matches!(task, MaintenanceTask::Prune | MaintenanceTask::Full) {
                results.push(self.run_pruning());
            }
        }
        Ok(results)
    }

    /// Run every task whose schedule is due at `now`.
    pub async fn run_due(&self, now: DateTime<Utc>) -> Vec<MaintenanceResult> {
        let (dedup_due, prune_due) = {
            let state = self.state.lock();
            (
                self.dedup_schedule.is_due(state.last_dedup, now),
                self.prune_schedule.is_due(state.last_prune, now),
            )
        };
        let mut results = Vec::new();
        if dedup_due {
            results.push(self.run_deduplication().await);
        }
        if prune_due {
            results.push(self.run_pruning());
        }
        results
    }

    async fn run_deduplication(&self) -> MaintenanceResult {
        let started = Instant::now();
        let mut removed = 0;
        let mut errors = Vec::new();

        for pool in Pool::all().iter().copied() {
            let outcome = match self.dedup.find_duplicates(pool, None, None).await {
                Ok(clusters) => self.merger.merge_all(&clusters, false),
                Err(e) => Err(e),
            };
            match outcome {
                Ok(summary) => {
                    tracing::info!(pool = %pool, removed = summary.bullets_removed, "pool deduplicated");
                    removed += summary.bullets_removed;
                }
                Err(e) => {
                    tracing::error!(pool = %pool, "deduplication failed: {}", e);
                    errors.push(format!("{}: {}", pool, e));
                }
            }
        }

        self.finish(MaintenanceTask::Deduplicate, started, removed, 0, errors)
    }

    /// The configured prune policy, or balanced when it does not parse.
    fn scheduled_policy(&self) -> PrunePolicy {
        self.pruner.default_policy().unwrap_or_else(|e| {
            tracing::warn!(error = %e, "invalid prune policy, using balanced");
            PrunePolicy::Balanced
        })
    }

    fn run_pruning(&self) -> MaintenanceResult {
        let started = Instant::now();
        let mut pruned = 0;
        let mut errors = Vec::new();
        let policy = self.scheduled_policy();

        for pool in Pool::all().iter().copied() {
            match self.pruner.prune_collection(pool, policy, false, true)
            {
                Ok(result) => {
                    tracing::info!(
                        pool = %pool,
                        pruned = result.pruned,
                        backup_id = %result.backup_id,
                        "pool pruned"
                    );
                    pruned += result.pruned;
                }
                Err(e) => {
                    tracing::error!(pool = %pool, "pruning failed: {}", e);
                    errors.push(format!("{}: {}", pool, e));
                }
            }
        }

        self.finish(MaintenanceTask::Prune, started, 0, pruned, errors)
    }

    fn finish(
        &self,
        task: MaintenanceTask,
        started: Instant,
        duplicates_removed: usize,
        bullets_pruned: usize,
        errors: Vec<String>,
    ) -> MaintenanceResult {
        let now = Utc::now();
        let result = MaintenanceResult {
            task,
            timestamp: now,
            pools: Pool::all().to_vec(),
            duplicates_removed,
            bullets_pruned,
            duration_ms: started.elapsed().as_millis() as u64,
            success: errors.is_empty(),
            error: (!errors.is_empty()).then(|| errors.join("; ")),
        };

        {
            let mut state = self.state.lock();
            match task {
                MaintenanceTask::Prune => state.last_prune = Some(now),
                _ => state.last_dedup = Some(now),
            }
            state.history.push(result.clone());
        }

        self.store.record_event(EventKind::Maintenance {
            task: task.as_str().to_string(),
            success: result.success,
            duplicates_removed,
            bullets_pruned,
        });
        tracing::info!(
            task = task.as_str(),
            duplicates_removed,
            bullets_pruned,
            duration_ms = result.duration_ms,
            "maintenance task complete"
        );
        result
    }

    pub fn status(&self) -> MaintenanceStatus {
        let state = self.state.lock();
        MaintenanceStatus {
            running: self.running.load(Ordering::SeqCst),
            enabled: self.config.enabled,
            dedup_schedule: self.dedup_schedule,
            prune_schedule: self.prune_schedule,
            last_dedup: state.last_dedup,
            last_prune: state.last_prune,
            next_dedup: self.dedup_schedule.next_run(state.last_dedup),
            next_prune: self.prune_schedule.next_run(state.last_prune),
            tasks_completed: state.history.len(),
            last_result: state.history.last().cloned(),
        }
    }

    /// Results from the last `days` days, oldest first.
    pub fn history(&self, days: i64) -> Vec<MaintenanceResult> {
        let cutoff = Utc::now() - chrono::Duration::days(days);
        self.state
            .lock()
            .history
            .iter()
            .filter(|r| r.timestamp >= cutoff)
            .cloned()
            .collect()
    }

    /// Background loop. Returns when `stop` becomes true or its sender drops.
    pub async fn run(self: Arc<Self>, mut stop: watch::Receiver<bool>) {
        if !self.config.enabled {
            tracing::info!("maintenance scheduler disabled");
            return;
        }
        if self.running.swap(true, Ordering::SeqCst) {
            tracing::warn!("maintenance scheduler already running");
            return;
        }

        let poll = Duration::from_secs(self.config.poll_interval_secs.max(1));
        tracing::info!(
            dedup = %self.dedup_schedule,
            prune = %self.prune_schedule,
            poll_secs = poll.as_secs(),
            "maintenance scheduler started"
        );

        loop {
            if *stop.borrow() {
                break;
            }
            self.run_due(Utc::now()).await;

            tokio::select! {
                _ = tokio::time::sleep(poll) => {}
                changed = stop.changed() => {
                    if changed.is_err() || *stop.borrow() {
                        break;
                    }
                }
            }
        }

        self.running.store(false, Ordering::SeqCst);
        tracing::info!("maintenance scheduler stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{Bullet, BulletKind};
    use crate::memory::store::tests::{add, test_store};
    use tempfile::TempDir;

    fn config_in(temp: &TempDir) -> Config {
        let mut config = Config::default();
        config.memory.data_dir = Some(temp.path().to_path_buf());
        config
    }

    #[test]
    fn test_schedule_due() {
        let now = Utc::now();
        assert!(Schedule::Daily.is_due(None, now));
        assert!(!Schedule::Manual.is_due(None, now));
        assert!(!Schedule::Weekly.is_due(Some(now - chrono::Duration::days(3)), now));
        assert!(Schedule::Weekly.is_due(Some(now - chrono::Duration::days(8)), now));
        assert_eq!(Schedule::Monthly.interval(), chrono::Duration::days(30));
        assert!("hourly".parse::<Schedule>().is_err());
        assert_eq!("dedup".parse::<MaintenanceTask>().unwrap(), MaintenanceTask::Deduplicate);
    }

    #[tokio::test]
    async fn test_disabled_requires_force() {
        let temp = TempDir::new().unwrap();
        let mut config = config_in(&temp);
        config.maintenance.enabled = false;
        let scheduler = MaintenanceScheduler::new(Arc::new(test_store()), &config).unwrap();

        assert!(matches!(
            scheduler.run_maintenance(&[], false).await,
            Err(CortexError::InvalidState { .. })
        ));
        let results = scheduler.run_maintenance(&[], true).await.unwrap();
        assert_eq!(results.len(), 2);
        assert!(results.iter().all(|r| r.success));
    }

    #[tokio::test]
    async fn test_full_run_dedups_and_prunes() {
        let temp = TempDir::new().unwrap();
        let config = config_in(&temp);
        let store = Arc::new(test_store());
        add(&store, "Check the logs first", Pool::Right).await;
        add(&store, "check the logs first", Pool::Right).await;
        let stale = Bullet::new("ancient unused advice", Pool::Left, BulletKind::Concept)
            .with_created_at(Utc::now() - chrono::Duration::days(90));
        store.insert_existing(stale, "test").await.unwrap();

        let scheduler = MaintenanceScheduler::new(Arc::clone(&store), &config).unwrap();
        let results = scheduler
            .run_maintenance(&[MaintenanceTask::Full], false)
            .await
            .unwrap();
        assert_eq!(results[0].task, MaintenanceTask::Deduplicate);
        assert_eq!(results[0].duplicates_removed, 1);
        assert_eq!(results[1].bullets_pruned, 1);
        assert_eq!(store.count(Pool::Right).unwrap(), 1);
        assert_eq!(store.count(Pool::Left).unwrap(), 0);

        let status = scheduler.status();
        assert_eq!(status.tasks_completed, 2);
        assert!(status.next_dedup.is_some());
        assert_eq!(status.last_result.unwrap().task, MaintenanceTask::Prune);
        assert_eq!(scheduler.history(1).len(), 2);
        assert!(temp.path().join("backups").exists());
    }

    #[tokio::test]
    async fn test_pruning_uses_configured_policy() {
        let temp = TempDir::new().unwrap();
        let mut config = config_in(&temp);
        let store = Arc::new(test_store());
        // unused for 10 days: past the aggressive cutoff, inside the balanced one
        let unused = Bullet::new("recent unused advice", Pool::Left, BulletKind::Concept)
            .with_created_at(Utc::now() - chrono::Duration::days(10));
        store.insert_existing(unused, "test").await.unwrap();

        config.prune.policy = "balanced".to_string();
        let balanced = MaintenanceScheduler::new(Arc::clone(&store), &config).unwrap();
        let results = balanced
            .run_maintenance(&[MaintenanceTask::Prune], false)
            .await
            .unwrap();
        assert_eq!(results[0].bullets_pruned, 0);

        config.prune.policy = "aggressive".to_string();
        let aggressive = MaintenanceScheduler::new(Arc::clone(&store), &config).unwrap();
        let results = aggressive
            .run_maintenance(&[MaintenanceTask::Prune], false)
            .await
            .unwrap();
        assert_eq!(results[0].bullets_pruned, 1);
        assert_eq!(store.count(Pool::Left).unwrap(), 0);
    }

    #[tokio::test]
    async fn test_invalid_policy_falls_back_to_balanced() {
        let temp = TempDir::new().unwrap();
        let mut config = config_in(&temp);
        config.prune.policy = "reckless".to_string();
        let scheduler = MaintenanceScheduler::new(Arc::new(test_store()), &config).unwrap();
        assert_eq!(scheduler.scheduled_policy(), PrunePolicy::Balanced);
    }

    #[tokio::test]
    async fn test_run_due_respects_schedule() {
        let temp = TempDir::new().unwrap();
        let mut config = config_in(&temp);
        config.maintenance.prune_schedule = "manual".to_string();
        let scheduler = MaintenanceScheduler::new(Arc::new(test_store()), &config).unwrap();

        let first = scheduler.run_due(Utc::now()).await;
        assert_eq!(first.len(), 1);
        assert_eq!(first[0].task, MaintenanceTask::Deduplicate);
        assert!(scheduler.run_due(Utc::now()).await.is_empty());
        assert!(scheduler.status().next_prune.is_none());
    }

    #[test]
    fn test_invalid_schedule_rejected() {
        let mut config = Config::default();
        config.maintenance.dedup_schedule = "hourly".to_string();
        assert!(MaintenanceScheduler::new(Arc::new(test_store()), &config).is_err());
    }

    #[tokio::test]
    async fn test_loop_stops_on_signal() {
        let temp = TempDir::new().unwrap();
        let config = config_in(&temp);
        let scheduler = Arc::new(MaintenanceScheduler::new(Arc::new(test_store()), &config).unwrap());
        let (tx, rx) = watch::channel(false);

        let handle = tokio::spawn(Arc::clone(&scheduler).run(rx));
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(scheduler.status().running);

        tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();
        assert!(!scheduler.status().running);
        assert_eq!(scheduler.status().tasks_completed, 2);
    }
}
