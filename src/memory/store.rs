//! The knowledge store.
//!
//! Owns the bullet metadata schema on top of a [`VectorIndex`] and an
//! [`Embedder`]. Outcome counters, activation and promotion for one bullet
//! are serialized by a per-id lock; pools are independent inside the index,
//! so traffic on one pool never waits on another.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::backends::{embed_one, embed_with_timeout, Embedder};
use crate::config::{Config, MemoryConfig};
use crate::core::{normalize_text, Bullet, BulletKind, BulletStatus, Metadata, Pool};
use crate::error::{CortexError, Result};
use crate::stats::{EventKind, EventLog};
use crate::storage::{IndexEntry, IndexFilter, IndexMetadata, VectorIndex};

// =============================================================================
// Requests and results
// =============================================================================

/// A bullet to be created.
#[derive(Debug, Clone)]
pub struct NewBullet {
    pub text: String,
    pub pool: Pool,
    pub kind: BulletKind,
    pub tags: Vec<String>,
    pub confidence: f64,
    pub status: BulletStatus,
    pub source_trace_id: String,
    pub metadata: Metadata,
}

impl NewBullet {
    /// A quarantined bullet with confidence 0.5.
    pub fn new(text: impl Into<String>, pool: Pool, kind: BulletKind) -> Self {
        Self {
            text: text.into(),
            pool,
            kind,
            tags: Vec::new(),
            confidence: 0.5,
            status: BulletStatus::Quarantined,
            source_trace_id: String::new(),
            metadata: Metadata::new(),
        }
    }

    pub fn with_tags(mut self, tags: Vec<String>) -> Self {
        self.tags = tags;
        self
    }

    pub fn with_confidence(mut self, confidence: f64) -> Self {
        self.confidence = confidence;
        self
    }

    pub fn with_status(mut self, status: BulletStatus) -> Self {
        self.status = status;
        self
    }

    pub fn with_source_trace(mut self, trace_id: impl Into<String>) -> Self {
        self.source_trace_id = trace_id.into();
        self
    }

    pub fn with_metadata(mut self, metadata: Metadata) -> Self {
        self.metadata = metadata;
        self
    }
}

/// A retrieval request.
#[derive(Debug, Clone)]
pub struct Query {
    pub text: String,
    pub pool: Pool,
    /// Own-pool result count; defaults to the pool's configured k.
    pub k: Option<usize>,
    pub min_confidence: f64,
    pub include_shared: bool,
    /// Keep only bullets carrying at least one of these tags.
    pub tags: Vec<String>,
}

impl Query {
    pub fn new(text: impl Into<String>, pool: Pool) -> Self {
        Self {
            text: text.into(),
            pool,
            k: None,
            min_confidence: 0.0,
            include_shared: true,
            tags: Vec::new(),
        }
    }

    pub fn with_k(mut self, k: usize) -> Self {
        self.k = Some(k);
        self
    }

    pub fn with_min_confidence(mut self, min: f64) -> Self {
        self.min_confidence = min;
        self
    }

    pub fn without_shared(mut self) -> Self {
        self.include_shared = false;
        self
    }

    pub fn with_tags(mut self, tags: Vec<String>) -> Self {
        self.tags = tags;
        self
    }
}

/// Retrieved bullets plus the ids that count as "used".
#[derive(Debug, Clone, Default)]
pub struct QueryResult {
    pub bullets: Vec<Bullet>,
    pub used_ids: Vec<String>,
}

/// What one `record_outcome` call changed.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct OutcomeReport {
    pub updated: Vec<String>,
    pub activated: Vec<String>,
    /// Ids of shared copies created.
    pub promoted: Vec<String>,
    pub missing: Vec<String>,
}

/// Per-pool counts.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PoolStats {
    pub total: usize,
    pub active: usize,
    pub quarantined: usize,
    pub deprecated: usize,
    pub avg_confidence: f64,
    pub helpful: u64,
    pub harmful: u64,
}

/// Store-wide counts.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StoreStats {
    pub left: PoolStats,
    pub right: PoolStats,
    pub shared: PoolStats,
}

impl StoreStats {
    pub fn pool(&self, pool: Pool) -> &PoolStats {
        match pool {
            Pool::Left => &self.left,
            Pool::Right => &self.right,
            Pool::Shared => &self.shared,
        }
    }

    pub fn total(&self) -> usize {
        self.left.total + self.right.total + self.shared.total
    }
}

// =============================================================================
// Schema mapping
// =============================================================================

pub(crate) fn to_metadata(bullet: &Bullet) -> IndexMetadata {
    IndexMetadata {
        pool: bullet.pool,
        kind: bullet.kind,
        tags: bullet.tags.join(","),
        status: bullet.status,
        confidence: bullet.confidence,
        helpful_count: bullet.helpful_count,
        harmful_count: bullet.harmful_count,
        created_at: bullet.created_at,
        last_used_at: bullet.last_used_at,
        source_trace_id: bullet.source_trace_id.clone(),
        extra: bullet.metadata.clone(),
    }
}

pub(crate) fn to_entry(bullet: &Bullet, embedding: Vec<f32>) -> IndexEntry {
    IndexEntry {
        id: bullet.id.clone(),
        text: bullet.text.clone(),
        embedding,
        metadata: to_metadata(bullet),
    }
}

pub(crate) fn from_entry(entry: IndexEntry) -> Bullet {
    let md = entry.metadata;
    Bullet {
        id: entry.id,
        text: entry.text,
        pool: md.pool,
        kind: md.kind,
        tags: md
            .tags
            .split(',')
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(String::from)
            .collect(),
        status: md.status,
        confidence: md.confidence,
        helpful_count: md.helpful_count,
        harmful_count: md.harmful_count,
        created_at: md.created_at,
        last_used_at: md.last_used_at,
        source_trace_id: md.source_trace_id,
        metadata: md.extra,
    }
}

/// Pool implied by an id's prefix, if any.
fn pool_hint(id: &str) -> Option<Pool> {
    if id.starts_with("shared__") {
        return Some(Pool::Shared);
    }
    let rest = id.strip_prefix("pb_")?;
    Pool::all()
        .iter()
        .copied()
        .find(|p| rest.starts_with(&format!("{}_", p)))
}

fn sort_by_score(bullets: &mut [Bullet]) {
    bullets.sort_by(|a, b| {
        b.score()
            .partial_cmp(&a.score())
            .unwrap_or(std::cmp::Ordering::Equal)
    });
}

// =============================================================================
// KnowledgeStore
// =============================================================================

/// Scored, pool-partitioned knowledge cache.
pub struct KnowledgeStore {
    index: Arc<dyn VectorIndex>,
    embedder: Arc<dyn Embedder>,
    config: MemoryConfig,
    timeout: Duration,
    locks: DashMap<String, Arc<Mutex<()>>>,
    events: Option<Arc<EventLog>>,
}

impl KnowledgeStore {
    pub fn new(index: Arc<dyn VectorIndex>, embedder: Arc<dyn Embedder>, config: &Config) -> Self {
        Self {
            index,
            embedder,
            config: config.memory.clone(),
            timeout: config.collaborator_timeout(),
            locks: DashMap::new(),
            events: None,
        }
    }

    /// Record lifecycle events to `events`.
    pub fn with_events(mut self, events: Arc<EventLog>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn config(&self) -> &MemoryConfig {
        &self.config
    }

    pub fn embedder(&self) -> &Arc<dyn Embedder> {
        &self.embedder
    }

    /// Deadline applied to every collaborator call.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub(crate) fn record_event(&self, event: EventKind) {
        if let Some(events) = &self.events {
            events.record(event);
        }
    }

    fn lock_for(&self, id: &str) -> Arc<Mutex<()>> {
        self.locks.entry(id.to_string()).or_default().clone()
    }

    /// Drop the id's lock entry once no caller holds or waits on it.
    fn release_lock(&self, id: &str) {
        self.locks.remove_if(id, |_, m| Arc::strong_count(m) == 1);
    }

    fn with_id_lock<R>(&self, id: &str, f: impl FnOnce() -> Result<R>) -> Result<R> {
        let lock = self.lock_for(id);
        let result = {
            let _guard = lock.lock();
            f()
        };
        drop(lock);
        self.release_lock(id);
        result
    }

    #[cfg(test)]
    pub(crate) fn lock_count(&self) -> usize {
        self.locks.len()
    }

    /// Find the pool and entry for an id, trying the pool its prefix names first.
    fn locate(&self, id: &str) -> Result<Option<(Pool, IndexEntry)>> {
        let hint = pool_hint(id);
        let mut order: Vec<Pool> = hint.into_iter().collect();
        order.extend(Pool::all().iter().copied().filter(|p| Some(*p) != hint));

        let key = [id.to_string()];
        for pool in order {
            if let Some(entry) = self.index.get(pool, &key)?.into_iter().next() {
                return Ok(Some((pool, entry)));
            }
        }
        Ok(None)
    }

    /// Embed texts under the collaborator deadline.
    pub async fn embed_texts(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        embed_with_timeout(self.embedder.as_ref(), texts, self.timeout).await
    }

    // -------------------------------------------------------------------------
    // Writes
    // -------------------------------------------------------------------------

    /// Create a bullet. Fails on empty text or collaborator failure, with
    /// nothing written in either case.
    pub async fn add(&self, new: NewBullet) -> Result<Bullet> {
        let text = new.text.trim();
        if text.is_empty() {
            return Err(CortexError::invalid_state("bullet text is empty"));
        }

        let bullet = Bullet::new(text, new.pool, new.kind)
            .with_tags(new.tags)
            .with_confidence(new.confidence)
            .with_status(new.status)
            .with_source_trace(new.source_trace_id)
            .with_metadata(new.metadata);

        let embedding = embed_one(self.embedder.as_ref(), &bullet.text, self.timeout).await?;
        self.index
            .upsert(bullet.pool, vec![to_entry(&bullet, embedding)])?;

        tracing::debug!(id = %bullet.id, pool = %bullet.pool, "bullet added");
        self.record_event(EventKind::BulletAdded {
            bullet_id: bullet.id.clone(),
            pool: bullet.pool,
            kind: bullet.kind.as_str().to_string(),
        });
        Ok(bullet)
    }

    /// Re-insert a bullet as-is (id, counters, timestamps), re-embedding its text.
    pub async fn insert_existing(&self, bullet: Bullet, source: &str) -> Result<()> {
        self.insert_many(vec![bullet], source).await.map(|_| ())
    }

    /// Re-insert several bullets with one embedding call. Returns the count.
    pub async fn insert_many(&self, bullets: Vec<Bullet>, source: &str) -> Result<usize> {
        if bullets.is_empty() {
            return Ok(0);
        }
        let texts: Vec<String> = bullets.iter().map(|b| b.text.clone()).collect();
        let embeddings = self.embed_texts(&texts).await?;

        for pool in Pool::all() {
            let entries: Vec<IndexEntry> = bullets
                .iter()
                .zip(&embeddings)
                .filter(|(b, _)| b.pool == *pool)
                .map(|(b, e)| to_entry(b, e.clone()))
                .collect();
            if !entries.is_empty() {
                self.index.upsert(*pool, entries)?;
            }
        }

        for bullet in &bullets {
            self.record_event(EventKind::BulletRestored {
                bullet_id: bullet.id.clone(),
                pool: bullet.pool,
                source: source.to_string(),
            });
        }
        Ok(bullets.len())
    }

    /// Record a helpful or harmful outcome for each id.
    ///
    /// Under each id's lock: increment, activate when the quarantined bullet
    /// reaches the activation threshold with no harm, then copy it into the
    /// shared pool when it reaches the promotion threshold and no copy exists.
    /// Unknown ids are skipped.
    pub fn record_outcome(&self, ids: &[String], helpful: bool) -> Result<OutcomeReport> {
        let mut report = OutcomeReport::default();
        let now = Utc::now();

        for id in ids {
            self.with_id_lock(id, || self.record_one(id, helpful, now, &mut report))?;
        }

        Ok(report)
    }

    fn record_one(
        &self,
        id: &str,
        helpful: bool,
        now: chrono::DateTime<Utc>,
        report: &mut OutcomeReport,
    ) -> Result<()> {
        let Some((pool, entry)) = self.locate(id)? else {
            tracing::debug!(id = %id, "record_outcome: unknown bullet id, skipping");
            report.missing.push(id.to_string());
            return Ok(());
        };
        let embedding = entry.embedding.clone();
        let mut bullet = from_entry(entry);

        bullet.mark(helpful);
        bullet.last_used_at = Some(now);

        let activated = bullet.should_activate(self.config.activation_threshold);
        if activated {
            bullet.status = BulletStatus::Active;
        }

        self.index
            .update_metadata(pool, &bullet.id, to_metadata(&bullet))?;
        report.updated.push(bullet.id.clone());

        if activated {
            tracing::info!(id = %bullet.id, pool = %pool, "bullet activated");
            report.activated.push(bullet.id.clone());
            self.record_event(EventKind::BulletActivated {
                bullet_id: bullet.id.clone(),
                pool,
            });
        }

        if bullet.should_promote(self.config.promotion_threshold) {
            let shared_id = bullet.shared_copy_id();
            if !self.index.contains(Pool::Shared, &shared_id)? {
                let copy = bullet.promoted_copy();
                self.index
                    .upsert(Pool::Shared, vec![to_entry(&copy, embedding)])?;
                tracing::info!(id = %bullet.id, shared_id = %shared_id, "bullet promoted to shared");
                self.record_event(EventKind::BulletPromoted {
                    bullet_id: bullet.id.clone(),
                    shared_id: shared_id.clone(),
                    from_pool: pool,
                });
                report.promoted.push(shared_id);
            }
        }
        Ok(())
    }

    /// Set `last_used_at` to now.
    pub fn touch(&self, id: &str) -> Result<()> {
        self.modify(id, |b| b.last_used_at = Some(Utc::now()))
            .map(|_| ())
    }

    /// Merge `patch` into a bullet's metadata map.
    pub fn update_metadata(&self, id: &str, patch: Metadata) -> Result<Bullet> {
        self.modify(id, |b| {
            for (key, value) in patch {
                b.metadata.insert(key, value);
            }
        })
    }

    pub fn set_status(&self, id: &str, status: BulletStatus) -> Result<Bullet> {
        self.modify(id, |b| b.status = status)
    }

    fn modify(&self, id: &str, f: impl FnOnce(&mut Bullet)) -> Result<Bullet> {
        self.with_id_lock(id, || {
            let (pool, entry) = self
                .locate(id)?
                .ok_or_else(|| CortexError::not_found("bullet", id))?;
            let mut bullet = from_entry(entry);
            f(&mut bullet);
            self.index.update_metadata(pool, id, to_metadata(&bullet))?;
            Ok(bullet)
        })
    }

    /// Delete ids from a pool, returning the ids that still existed.
    pub fn delete(&self, pool: Pool, ids: &[String], reason: &str) -> Result<Vec<String>> {
        self.locked(ids, |locked| locked.delete(pool, ids, reason))
    }

    /// Run `f` while holding the locks of every id (acquired in sorted order).
    pub fn locked<R>(&self, ids: &[String], f: impl FnOnce(&LockedStore<'_>) -> Result<R>) -> Result<R> {
        let mut sorted: Vec<&String> = ids.iter().collect();
        sorted.sort();
        sorted.dedup();
        let mutexes: Vec<Arc<Mutex<()>>> = sorted.iter().map(|id| self.lock_for(id)).collect();
        let result = {
            let _guards: Vec<_> = mutexes.iter().map(|m| m.lock()).collect();
            f(&LockedStore { store: self })
        };
        drop(mutexes);
        for id in sorted {
            self.release_lock(id);
        }
        result
    }

    // -------------------------------------------------------------------------
    // Reads
    // -------------------------------------------------------------------------

    /// Retrieve bullets for a task.
    ///
    /// Own pool first (top k, deprecated excluded, sorted by score), then the
    /// shared pool under a raised confidence floor. Duplicates by normalized
    /// text are dropped. The first k results are marked used.
    pub async fn query(&self, query: &Query) -> Result<QueryResult> {
        let k = query.k.unwrap_or_else(|| self.config.k_for(query.pool));
        let embedding = embed_one(self.embedder.as_ref(), query.text.trim(), self.timeout).await?;

        let mut bullets = self.fetch(query.pool, &embedding, k, query.min_confidence, &query.tags)?;

        let shared_k = if query.include_shared && query.pool != Pool::Shared {
            self.config.k_shared
        } else {
            0
        };
        if shared_k > 0 {
            let floor = query.min_confidence.max(self.config.shared_min_confidence);
            bullets.extend(self.fetch(Pool::Shared, &embedding, shared_k, floor, &query.tags)?);
        }

        let mut seen = HashSet::new();
        bullets.retain(|b| seen.insert(normalize_text(&b.text)));
        bullets.truncate(k + shared_k);

        let now = Utc::now();
        let mut used_ids = Vec::new();
        for bullet in bullets.iter_mut().take(k) {
            bullet.last_used_at = Some(now);
            if let Err(e) = self.touch(&bullet.id) {
                tracing::debug!(id = %bullet.id, "touch failed: {}", e);
            }
            used_ids.push(bullet.id.clone());
        }

        Ok(QueryResult { bullets, used_ids })
    }

    /// Nearest live bullets of one pool, best score first.
    ///
    /// Unlike [`query`](Self::query) this marks nothing as used, so it is
    /// safe for duplicate and conflict checks.
    pub async fn similar(&self, text: &str, pool: Pool, k: usize) -> Result<Vec<Bullet>> {
        if k == 0 || text.trim().is_empty() {
            return Ok(Vec::new());
        }
        let embedding = embed_one(self.embedder.as_ref(), text.trim(), self.timeout).await?;
        self.fetch(pool, &embedding, k, 0.0, &[])
    }

    fn fetch(
        &self,
        pool: Pool,
        embedding: &[f32],
        k: usize,
        min_confidence: f64,
        tags: &[String],
    ) -> Result<Vec<Bullet>> {
        let mut filter = IndexFilter::live();
        if min_confidence > 0.0 {
            filter = filter.with_min_confidence(min_confidence);
        }
        // Tags are post-filtered, so over-fetch when they are present.
        let fetch_k = if tags.is_empty() { k } else { k.saturating_mul(3) };
        let mut bullets: Vec<Bullet> = self
            .index
            .query(pool, embedding, fetch_k, &filter)?
            .into_iter()
            .map(|hit| from_entry(hit.entry))
            .filter(|b| tags.is_empty() || b.tags.iter().any(|t| tags.contains(t)))
            .collect();
        bullets.truncate(k);
        sort_by_score(&mut bullets);
        Ok(bullets)
    }

    /// Look up a bullet in any pool.
    pub fn find(&self, id: &str) -> Result<Option<Bullet>> {
        Ok(self.locate(id)?.map(|(_, entry)| from_entry(entry)))
    }

    pub fn get(&self, id: &str) -> Result<Bullet> {
        self.find(id)?
            .ok_or_else(|| CortexError::not_found("bullet", id))
    }

    /// Bullets for the ids that exist, in input order.
    pub fn get_many(&self, ids: &[String]) -> Result<Vec<Bullet>> {
        let mut out = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(bullet) = self.find(id)? {
                out.push(bullet);
            }
        }
        Ok(out)
    }

    pub fn list(&self, pool: Pool, limit: Option<usize>) -> Result<Vec<Bullet>> {
        Ok(self
            .index
            .list(pool, limit)?
            .into_iter()
            .map(from_entry)
            .collect())
    }

    pub fn contains(&self, pool: Pool, id: &str) -> Result<bool> {
        self.index.contains(pool, id)
    }

    pub fn count(&self, pool: Pool) -> Result<usize> {
        self.index.count(pool)
    }

    pub fn stats(&self) -> Result<StoreStats> {
        let summarize = |pool: Pool| -> Result<PoolStats> {
            let bullets = self.list(pool, None)?;
            let mut stats = PoolStats {
                total: bullets.len(),
                ..PoolStats::default()
            };
            for b in &bullets {
                match b.status {
                    BulletStatus::Active => stats.active += 1,
                    BulletStatus::Quarantined => stats.quarantined += 1,
                    BulletStatus::Deprecated => stats.deprecated += 1,
                }
                stats.helpful += b.helpful_count as u64;
                stats.harmful += b.harmful_count as u64;
                stats.avg_confidence += b.confidence;
            }
            if !bullets.is_empty() {
                stats.avg_confidence /= bullets.len() as f64;
            }
            Ok(stats)
        };
        Ok(StoreStats {
            left: summarize(Pool::Left)?,
            right: summarize(Pool::Right)?,
            shared: summarize(Pool::Shared)?,
        })
    }

    /// Render bullets as a prompt playbook.
    pub fn format_for_prompt(&self, bullets: &[Bullet], max_bullets: Option<usize>) -> String {
        super::format::format_for_prompt(bullets, max_bullets)
    }
}

impl std::fmt::Debug for KnowledgeStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KnowledgeStore")
            .field("config", &self.config)
            .field("timeout", &self.timeout)
            .field("locks", &self.locks.len())
            .finish()
    }
}

/// Store operations available while [`KnowledgeStore::locked`] holds id locks.
pub struct LockedStore<'a> {
    store: &'a KnowledgeStore,
}

impl LockedStore<'_> {
    pub fn find(&self, id: &str) -> Result<Option<Bullet>> {
        self.store.find(id)
    }

    /// Overwrite a bullet's mutable fields, keeping its embedding.
    ///
    /// Returns `false` if the bullet no longer exists in its pool.
    pub fn replace(&self, bullet: &Bullet) -> Result<bool> {
        self.store
            .index
            .update_metadata(bullet.pool, &bullet.id, to_metadata(bullet))
    }

    /// Delete ids from a pool, returning the ids that still existed.
    pub fn delete(&self, pool: Pool, ids: &[String], reason: &str) -> Result<Vec<String>> {
        let deleted = self.store.index.delete(pool, ids)?;
        if !deleted.is_empty() {
            tracing::info!(pool = %pool, deleted = deleted.len(), reason, "bullets deleted");
            self.store.record_event(EventKind::BulletsDeleted {
                pool,
                bullet_ids: deleted.clone(),
                reason: reason.to_string(),
            });
        }
        Ok(deleted)
    }
}
