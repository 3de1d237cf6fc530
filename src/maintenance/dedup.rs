//! Semantic deduplication.
//!
//! Bullets of one pool are embedded, compared pairwise by cosine similarity,
//! and linked when similarity reaches the threshold. Connected components of
//! at least `min_cluster_size` members become duplicate clusters.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::config::DedupConfig;
use crate::core::{Bullet, Pool};
use crate::error::Result;
use crate::memory::KnowledgeStore;
use crate::util::cosine_similarity;

/// A group of near-identical bullets from one pool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DuplicateCluster {
    pub pool: Pool,
    /// Member ids, primary included.
    pub bullet_ids: Vec<String>,
    /// Member kept when the cluster is merged.
    pub primary_id: String,
    /// Similarity of every member pair.
    pub similarities: Vec<f64>,
}

impl DuplicateCluster {
    pub fn len(&self) -> usize {
        self.bullet_ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bullet_ids.is_empty()
    }

    /// Members other than the primary.
    pub fn secondary_ids(&self) -> Vec<String> {
        self.bullet_ids
            .iter()
            .filter(|id| **id != self.primary_id)
            .cloned()
            .collect()
    }
}

/// Aggregate view of a dedup pass.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DedupStats {
    pub clusters: usize,
    /// Bullets a merge of every cluster would remove.
    pub redundant_bullets: usize,
    pub largest_cluster: usize,
    pub avg_similarity: f64,
}

/// Merge priority: helpful ratio times log usage times confidence.
pub fn primary_score(bullet: &Bullet) -> f64 {
    let uses = bullet.usage_count();
    if uses == 0 {
        return 0.0;
    }
    bullet.helpful_ratio() * (uses as f64).ln_1p() * bullet.confidence
}

/// Best member by [`primary_score`], ties going to the oldest.
pub fn select_primary<'a>(members: &[&'a Bullet]) -> Option<&'a Bullet> {
    members.iter().copied().reduce(|best, b| {
        let (sb, sbest) = (primary_score(b), primary_score(best));
        if sb > sbest || (sb == sbest && b.created_at < best.created_at) {
            b
        } else {
            best
        }
    })
}

pub struct Deduplicator {
    store: Arc<KnowledgeStore>,
    config: DedupConfig,
}

impl Deduplicator {
    pub fn new(store: Arc<KnowledgeStore>, config: &DedupConfig) -> Self {
        Self {
            store,
            config: config.clone(),
        }
    }

    /// Find duplicate clusters in `pool`.
    ///
    /// `threshold` and `min_cluster_size` default to the configured values.
    /// Fails without side effects if the embedder fails.
    pub async fn find_duplicates(
        &self,
        pool: Pool,
        threshold: Option<f64>,
        min_cluster_size: Option<usize>,
    ) -> Result<Vec<DuplicateCluster>> {
        let threshold = threshold.unwrap_or(self.config.threshold);
        let min_size = min_cluster_size
            .unwrap_or(self.config.min_cluster_size)
            .max(2);

        let bullets = self.store.list(pool, None)?;
        if bullets.len() < 2 {
            return Ok(Vec::new());
        }

        let texts: Vec<String> = bullets.iter().map(|b| b.text.clone()).collect();
        let embeddings = self.store.embed_texts(&texts).await?;

        let clusters = cluster_by_similarity(pool, &bullets, &embeddings, threshold, min_size);
        tracing::info!(
            pool = %pool,
            bullets = bullets.len(),
            clusters = clusters.len(),
            threshold,
            "duplicate scan complete"
        );
        Ok(clusters)
    }
}

/// Link pairs at or above `threshold` and collect components by DFS.
pub(crate) fn cluster_by_similarity(
    pool: Pool,
    bullets: &[Bullet],
    embeddings: &[Vec<f32>],
    threshold: f64,
    min_size: usize,
) -> Vec<DuplicateCluster> {
    let n = bullets.len().min(embeddings.len());
    let mut sim = vec![vec![0.0f64; n]; n];
    let mut adjacency: Vec<Vec<usize>> = vec![Vec::new(); n];
    for i in 0..n {
        for j in (i + 1)..n {
            let s = cosine_similarity(&embeddings[i], &embeddings[j]);
            sim[i][j] = s;
            sim[j][i] = s;
            if s >= threshold {
                adjacency[i].push(j);
                adjacency[j].push(i);
            }
        }
    }

    let mut visited = vec![false; n];
    let mut clusters = Vec::new();
    for start in 0..n {
        if visited[start] || adjacency[start].is_empty() {
            continue;
        }
        let mut component = Vec::new();
        let mut stack = vec![start];
        visited[start] = true;
        while let Some(node) = stack.pop() {
            component.push(node);
            for &next in &adjacency[node] {
                if !visited[next] {
                    visited[next] = true;
                    stack.push(next);
                }
            }
        }
        if component.len() < min_size {
            continue;
        }
        component.sort_unstable();

        let members: Vec<&Bullet> = component.iter().map(|&i| &bullets[i]).collect();
        let Some(primary) = select_primary(&members) else {
            continue;
        };
        let mut similarities = Vec::new();
        for (a, &i) in component.iter().enumerate() {
            for &j in &component[a + 1..] {
                similarities.push(sim[i][j]);
            }
        }
        clusters.push(DuplicateCluster {
            pool,
            bullet_ids: members.iter().map(|b| b.id.clone()).collect(),
            primary_id: primary.id.clone(),
            similarities,
        });
    }
    clusters
}

/// Summarize a set of clusters.
pub fn dedup_stats(clusters: &[DuplicateCluster]) -> DedupStats {
    let all: Vec<f64> = clusters
        .iter()
        .flat_map(|c| c.similarities.iter().copied())
        .collect();
    DedupStats {
        clusters: clusters.len(),
        redundant_bullets: clusters.iter().map(|c| c.len().saturating_sub(1)).sum(),
        largest_cluster: clusters.iter().map(DuplicateCluster::len).max().unwrap_or(0),
        avg_similarity: if all.is_empty() {
            0.0
        } else {
            all.iter().sum::<f64>() / all.len() as f64
        },
    }
}
