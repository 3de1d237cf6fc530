//! Pool divergence.
//!
//! Teaching moves knowledge between the left and right pools. Too much of
//! it and the two converge into one. Divergence is measured on tag
//! distributions and, when an embedder is at hand, on the distance between
//! the pools' embedding centroids.

use std::collections::HashMap;

use serde::Serialize;

use crate::config::DiversityConfig;
use crate::core::{Bullet, Pool};
use crate::error::Result;
use crate::memory::KnowledgeStore;
use crate::util::cosine_similarity;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DiversityReport {
    pub enabled: bool,
    pub tag_divergence: f64,
    /// `None` when either pool is empty or embedding failed.
    pub centroid_distance: Option<f64>,
    pub converged: bool,
}

/// Relative tag frequencies across `bullets`.
pub fn tag_distribution(bullets: &[Bullet]) -> HashMap<&str, f64> {
    let mut counts: HashMap<&str, f64> = HashMap::new();
    for tag in bullets.iter().flat_map(|b| b.tags.iter()) {
        *counts.entry(tag.as_str()).or_insert(0.0) += 1.0;
    }
    let total: f64 = counts.values().sum();
    if total > 0.0 {
        counts.values_mut().for_each(|v| *v /= total);
    }
    counts
}

fn sparse_cosine(a: &HashMap<&str, f64>, b: &HashMap<&str, f64>) -> f64 {
    let dot: f64 = a
        .iter()
        .filter_map(|(k, va)| b.get(k).map(|vb| va * vb))
        .sum();
    let norm_a = a.values().map(|v| v * v).sum::<f64>().sqrt();
    let norm_b = b.values().map(|v| v * v).sum::<f64>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

/// One minus the cosine similarity of the two tag distributions.
pub fn tag_divergence(left: &[Bullet], right: &[Bullet]) -> f64 {
    1.0 - sparse_cosine(&tag_distribution(left), &tag_distribution(right))
}

fn centroid(vectors: &[Vec<f32>]) -> Option<Vec<f32>> {
    let first = vectors.first()?;
    let mut acc = vec![0.0f32; first.len()];
    for v in vectors {
        for (a, x) in acc.iter_mut().zip(v) {
            *a += x;
        }
    }
    let n = vectors.len() as f32;
    acc.iter_mut().for_each(|a| *a /= n);
    Some(acc)
}

#[derive(Debug, Clone)]
pub struct DiversityMetrics {
    enabled: bool,
    throttle_on_convergence: bool,
    convergence_warning: f64,
}

impl DiversityMetrics {
    pub fn new(config: &DiversityConfig) -> Self {
        Self {
            enabled: config.enabled,
            throttle_on_convergence: config.throttle_on_convergence,
            convergence_warning: config.convergence_warning,
        }
    }

    pub fn enabled(&self) -> bool {
        self.enabled
    }

    /// Whether teaching should pause when pools have converged.
    pub fn throttles(&self) -> bool {
        self.enabled && self.throttle_on_convergence
    }

    pub fn is_converged(&self, tag_divergence: f64) -> bool {
        tag_divergence < self.convergence_warning
    }

    /// Cosine distance between the pools' embedding centroids.
    ///
    /// Embedding runs under the store's collaborator timeout; a failure is
    /// logged and reported as `None`.
    pub async fn centroid_distance(
        &self,
        store: &KnowledgeStore,
        left_texts: &[String],
        right_texts: &[String],
    ) -> Option<f64> {
        if left_texts.is_empty() || right_texts.is_empty() {
            return None;
        }
        let embedded = async {
            let left = store.embed_texts(left_texts).await?;
            let right = store.embed_texts(right_texts).await?;
            Ok::<_, crate::error::CortexError>((left, right))
        };
        let (left, right) = match embedded.await {
            Ok(v) => v,
            Err(e) => {
                tracing::warn!("centroid distance unavailable: {}", e);
                return None;
            }
        };
        let (lc, rc) = (centroid(&left)?, centroid(&right)?);
        let norm = |v: &[f32]| v.iter().map(|x| (*x as f64).powi(2)).sum::<f64>();
        if norm(&lc) == 0.0 || norm(&rc) == 0.0 {
            return None;
        }
        Some(1.0 - cosine_similarity(&lc, &rc))
    }

    /// Measure the left and right pools of `store`, up to `limit` bullets each.
    pub async fn compute(&self, store: &KnowledgeStore, limit: usize) -> Result<DiversityReport> {
        if !self.enabled {
            return Ok(DiversityReport {
                enabled: false,
                tag_divergence: 1.0,
                centroid_distance: None,
                converged: false,
            });
        }
        let left = store.list(Pool::Left, Some(limit))?;
        let right = store.list(Pool::Right, Some(limit))?;
        let divergence = tag_divergence(&left, &right);

        let texts = |bullets: &[Bullet]| bullets.iter().map(|b| b.text.clone()).collect::<Vec<_>>();
        let centroid_distance = self
            .centroid_distance(store, &texts(&left), &texts(&right))
            .await;

        Ok(DiversityReport {
            enabled: true,
            tag_divergence: divergence,
            centroid_distance,
            converged: self.is_converged(divergence),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::BulletKind;
    use crate::memory::store::tests::test_store;
    use crate::memory::NewBullet;

    fn tagged(pool: Pool, tags: &[&str]) -> Bullet {
        Bullet::new("text", pool, BulletKind::Heuristic)
            .with_tags(tags.iter().map(|t| t.to_string()).collect())
    }

    #[test]
    fn test_tag_divergence() {
        let left = vec![tagged(Pool::Left, &["db", "sql"])];
        let same = vec![tagged(Pool::Right, &["sql", "db"])];
        let other = vec![tagged(Pool::Right, &["ui"])];
        assert!(tag_divergence(&left, &same).abs() < 1e-9);
        assert!((tag_divergence(&left, &other) - 1.0).abs() < 1e-9);
        assert_eq!(tag_divergence(&[], &[]), 1.0);
    }

    #[test]
    fn test_distribution_sums_to_one() {
        let bullets = vec![tagged(Pool::Left, &["a", "b"]), tagged(Pool::Left, &["a"])];
        let dist = tag_distribution(&bullets);
        assert!((dist["a"] - 2.0 / 3.0).abs() < 1e-9);
        assert!((dist.values().sum::<f64>() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_convergence_and_throttle() {
        let metrics = DiversityMetrics::new(&DiversityConfig::default());
        assert!(metrics.is_converged(0.1));
        assert!(!metrics.is_converged(0.2));
        assert!(metrics.throttles());
    }

    #[tokio::test]
    async fn test_compute_from_store() {
        let store = test_store();
        for (pool, text, tag) in [
            (Pool::Left, "Validate every input field", "validation"),
            (Pool::Right, "Question the framing of the task", "reframing"),
        ] {
            store
                .add(NewBullet::new(text, pool, BulletKind::Heuristic).with_tags(vec![tag.into()]))
                .await
                .unwrap();
        }
        let report = DiversityMetrics::new(&DiversityConfig::default())
            .compute(&store, 200)
            .await
            .unwrap();
        assert!(report.enabled);
        assert!(!report.converged);
        let distance = report.centroid_distance.unwrap();
        assert!(distance > 0.0 && distance <= 2.0);
    }

    #[tokio::test]
    async fn test_centroid_needs_both_pools() {
        let store = test_store();
        let metrics = DiversityMetrics::new(&DiversityConfig::default());
        assert!(metrics
            .centroid_distance(&store, &["a".to_string()], &[])
            .await
            .is_none());
    }
}
