//! Vector index trait for cortex.
//!
//! The knowledge store owns the metadata schema; an index only stores
//! entries (id, text, embedding, metadata) per pool and ranks them by
//! cosine distance.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::core::{BulletKind, BulletStatus, Metadata, Pool};
use crate::error::Result;

/// Flat metadata stored alongside each embedding.
///
/// Tags are a comma-delimited string so backends with scalar-only metadata
/// can hold them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexMetadata {
    pub pool: Pool,
    pub kind: BulletKind,
    #[serde(default)]
    pub tags: String,
    pub status: BulletStatus,
    pub confidence: f64,
    #[serde(default)]
    pub helpful_count: u32,
    #[serde(default)]
    pub harmful_count: u32,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub last_used_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub source_trace_id: String,
    #[serde(default)]
    pub extra: Metadata,
}

/// One stored vector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexEntry {
    pub id: String,
    pub text: String,
    pub embedding: Vec<f32>,
    pub metadata: IndexMetadata,
}

/// Query-time filter applied before ranking.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct IndexFilter {
    pub exclude_deprecated: bool,
    pub min_confidence: Option<f64>,
}

impl IndexFilter {
    /// Filter used by retrieval: live bullets only.
    pub fn live() -> Self {
        Self {
            exclude_deprecated: true,
            min_confidence: None,
        }
    }

    pub fn with_min_confidence(mut self, min: f64) -> Self {
        self.min_confidence = Some(min);
        self
    }

    pub fn matches(&self, metadata: &IndexMetadata) -> bool {
        if self.exclude_deprecated && metadata.status == BulletStatus::Deprecated {
            return false;
        }
        if let Some(min) = self.min_confidence {
            if metadata.confidence < min {
                return false;
            }
        }
        true
    }
}

/// A ranked query result. Distance is `1 - cosine similarity`.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexHit {
    pub entry: IndexEntry,
    pub distance: f64,
}

/// Trait for vector index backends.
///
/// Every method addresses exactly one pool. Implementations must let
/// operations on different pools proceed without blocking each other.
pub trait VectorIndex: Send + Sync {
    /// Insert or replace entries by id.
    fn upsert(&self, pool: Pool, entries: Vec<IndexEntry>) -> Result<()>;

    /// Top `k` entries by ascending distance that pass `filter`.
    fn query(
        &self,
        pool: Pool,
        embedding: &[f32],
        k: usize,
        filter: &IndexFilter,
    ) -> Result<Vec<IndexHit>>;

    /// Entries for the given ids. Missing ids are omitted.
    fn get(&self, pool: Pool, ids: &[String]) -> Result<Vec<IndexEntry>>;

    /// All entries of a pool in id order, optionally truncated.
    fn list(&self, pool: Pool, limit: Option<usize>) -> Result<Vec<IndexEntry>>;

    /// Replace the metadata of an existing entry, keeping its embedding.
    ///
    /// Returns `false` if the id is not in the pool.
    fn update_metadata(&self, pool: Pool, id: &str, metadata: IndexMetadata) -> Result<bool>;

    /// Delete entries, returning the ids that actually existed.
    fn delete(&self, pool: Pool, ids: &[String]) -> Result<Vec<String>>;

    fn count(&self, pool: Pool) -> Result<usize>;

    /// Check if an id exists in a pool.
    fn contains(&self, pool: Pool, id: &str) -> Result<bool> {
        Ok(!self.get(pool, &[id.to_string()])?.is_empty())
    }
}

/// Blanket implementation of VectorIndex for Arc-wrapped indexes.
impl<T: VectorIndex + ?Sized> VectorIndex for Arc<T> {
    fn upsert(&self, pool: Pool, entries: Vec<IndexEntry>) -> Result<()> {
        (**self).upsert(pool, entries)
    }

    fn query(
        &self,
        pool: Pool,
        embedding: &[f32],
        k: usize,
        filter: &IndexFilter,
    ) -> Result<Vec<IndexHit>> {
        (**self).query(pool, embedding, k, filter)
    }

    fn get(&self, pool: Pool, ids: &[String]) -> Result<Vec<IndexEntry>> {
        (**self).get(pool, ids)
    }

    fn list(&self, pool: Pool, limit: Option<usize>) -> Result<Vec<IndexEntry>> {
        (**self).list(pool, limit)
    }

    fn update_metadata(&self, pool: Pool, id: &str, metadata: IndexMetadata) -> Result<bool> {
        (**self).update_metadata(pool, id, metadata)
    }

    fn delete(&self, pool: Pool, ids: &[String]) -> Result<Vec<String>> {
        (**self).delete(pool, ids)
    }

    fn count(&self, pool: Pool) -> Result<usize> {
        (**self).count(pool)
    }
}

/// Rank candidate entries by cosine distance to `embedding`.
///
/// Shared by the built-in backends. Ties keep id order.
pub fn rank_entries<'a>(
    entries: impl Iterator<Item = &'a IndexEntry>,
    embedding: &[f32],
    k: usize,
    filter: &IndexFilter,
) -> Vec<IndexHit> {
    let mut hits: Vec<IndexHit> = entries
        .filter(|e| filter.matches(&e.metadata))
        .map(|e| IndexHit {
            distance: 1.0 - crate::util::cosine_similarity(&e.embedding, embedding),
            entry: e.clone(),
        })
        .collect();
    hits.sort_by(|a, b| {
        a.distance
            .partial_cmp(&b.distance)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    hits.truncate(k);
    hits
}

/// Test utilities for VectorIndex implementations.
#[cfg(test)]
pub mod tests {
    use super::*;

    pub fn entry(id: &str, pool: Pool, embedding: Vec<f32>) -> IndexEntry {
        IndexEntry {
            id: id.to_string(),
            text: format!("text for {}", id),
            embedding,
            metadata: IndexMetadata {
                pool,
                kind: BulletKind::Heuristic,
                tags: "a,b".to_string(),
                status: BulletStatus::Active,
                confidence: 0.7,
                helpful_count: 0,
                harmful_count: 0,
                created_at: Utc::now(),
                last_used_at: None,
                source_trace_id: String::new(),
                extra: Metadata::new(),
            },
        }
    }

    /// Conformance checks every VectorIndex implementation must pass.
    pub fn test_vector_index_contract<I: VectorIndex>(index: &I) {
        assert_eq!(index.count(Pool::Left).unwrap(), 0);

        index
            .upsert(
                Pool::Left,
                vec![
                    entry("a", Pool::Left, vec![1.0, 0.0]),
                    entry("b", Pool::Left, vec![0.0, 1.0]),
                    entry("c", Pool::Left, vec![0.7, 0.7]),
                ],
            )
            .unwrap();
        index
            .upsert(Pool::Right, vec![entry("r", Pool::Right, vec![1.0, 0.0])])
            .unwrap();

        // Pools are isolated
        assert_eq!(index.count(Pool::Left).unwrap(), 3);
        assert_eq!(index.count(Pool::Right).unwrap(), 1);
        assert!(!index.contains(Pool::Left, "r").unwrap());

        // Ranking by distance
        let hits = index
            .query(Pool::Left, &[1.0, 0.0], 2, &IndexFilter::default())
            .unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].entry.id, "a");
        assert_eq!(hits[1].entry.id, "c");
        assert!(hits[0].distance < 1e-6);

        // Filters
        let mut deprecated = entry("b", Pool::Left, vec![0.0, 1.0]);
        deprecated.metadata.status = BulletStatus::Deprecated;
        index.upsert(Pool::Left, vec![deprecated]).unwrap();
        let hits = index
            .query(Pool::Left, &[0.0, 1.0], 10, &IndexFilter::live())
            .unwrap();
        assert!(hits.iter().all(|h| h.entry.id != "b"));
        let hits = index
            .query(
                Pool::Left,
                &[0.0, 1.0],
                10,
                &IndexFilter::default().with_min_confidence(0.9),
            )
            .unwrap();
        assert!(hits.is_empty());

        // Metadata update keeps the embedding
        let mut meta = index.get(Pool::Left, &["a".to_string()]).unwrap()[0]
            .metadata
            .clone();
        meta.helpful_count = 5;
        assert!(index.update_metadata(Pool::Left, "a", meta).unwrap());
        let a = &index.get(Pool::Left, &["a".to_string()]).unwrap()[0];
        assert_eq!(a.metadata.helpful_count, 5);
        assert_eq!(a.embedding, vec![1.0, 0.0]);
        assert!(!index
            .update_metadata(Pool::Left, "zzz", a.metadata.clone())
            .unwrap());

        // List in id order with limit
        let ids: Vec<String> = index
            .list(Pool::Left, None)
            .unwrap()
            .into_iter()
            .map(|e| e.id)
            .collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
        assert_eq!(index.list(Pool::Left, Some(1)).unwrap().len(), 1);

        // Delete reports only existing ids
        let deleted = index
            .delete(Pool::Left, &["a".to_string(), "missing".to_string()])
            .unwrap();
        assert_eq!(deleted, vec!["a".to_string()]);
        assert_eq!(index.count(Pool::Left).unwrap(), 2);
        assert_eq!(index.count(Pool::Right).unwrap(), 1);
    }
}
