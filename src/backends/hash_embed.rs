//! Deterministic local embedder.
//!
//! Hashes lowercased character trigrams into a fixed number of buckets and
//! L2-normalizes the result. Texts that share most of their wording land
//! close together, which is all dedup and retrieval need without a model.

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::RwLock;

use crate::backends::traits::Embedder;
use crate::error::Result;

/// Default vector dimension.
pub const DEFAULT_DIMENSION: usize = 256;

const CACHE_SIZE_LIMIT: usize = 10_000;

/// Character-trigram hashing embedder.
#[derive(Debug)]
pub struct HashEmbedder {
    dimension: usize,
    cache: RwLock<HashMap<String, Vec<f32>>>,
}

impl HashEmbedder {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension: dimension.max(1),
            cache: RwLock::new(HashMap::new()),
        }
    }

    fn hash_trigram(trigram: &[u8]) -> usize {
        let mut hash: usize = 0;
        for (i, &b) in trigram.iter().enumerate() {
            hash = hash.wrapping_add((b as usize).wrapping_mul(31_usize.wrapping_pow(i as u32)));
        }
        hash
    }

    /// Embed one text without touching the cache.
    pub fn embed_text(&self, text: &str) -> Vec<f32> {
        let mut embedding = vec![0.0f32; self.dimension];
        let lowered = text.trim().to_lowercase();
        if lowered.is_empty() {
            return embedding;
        }

        let bytes = lowered.as_bytes();
        if bytes.len() < 3 {
            for (i, &b) in bytes.iter().enumerate() {
                embedding[(b as usize + i * 256) % self.dimension] += 1.0;
            }
        } else {
            for trigram in bytes.windows(3) {
                embedding[Self::hash_trigram(trigram) % self.dimension] += 1.0;
            }
        }

        let norm: f32 = embedding.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            for x in &mut embedding {
                *x /= norm;
            }
        }
        embedding
    }

    fn embed_cached(&self, text: &str) -> Vec<f32> {
        if let Some(hit) = self.cache.read().get(text) {
            return hit.clone();
        }
        let embedding = self.embed_text(text);
        let mut cache = self.cache.write();
        if cache.len() < CACHE_SIZE_LIMIT {
            cache.insert(text.to_string(), embedding.clone());
        }
        embedding
    }
}

impl Default for HashEmbedder {
    fn default() -> Self {
        Self::new(DEFAULT_DIMENSION)
    }
}

#[async_trait]
impl Embedder for HashEmbedder {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| self.embed_cached(t)).collect())
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn name(&self) -> &'static str {
        "hash-embedder"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::util::cosine_similarity;

    #[test]
    fn test_deterministic_and_normalized() {
        let e = HashEmbedder::default();
        let a = e.embed_text("Validate input before parsing");
        let b = e.embed_text("Validate input before parsing");
        assert_eq!(a, b);
        let norm: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_near_duplicates_are_close() {
        let e = HashEmbedder::default();
        let a = e.embed_text("Always validate user input before processing");
        let b = e.embed_text("Always validate user input before processing.");
        let c = e.embed_text("Cache compiled regular expressions across calls");
        assert!(cosine_similarity(&a, &b) > 0.9);
        assert!(cosine_similarity(&a, &c) < 0.6);
    }

    #[test]
    fn test_case_insensitive() {
        let e = HashEmbedder::default();
        assert_eq!(e.embed_text("Use RETRY"), e.embed_text("use retry"));
    }

    #[test]
    fn test_empty_and_short_text() {
        let e = HashEmbedder::new(16);
        assert!(e.embed_text("").iter().all(|x| *x == 0.0));
        assert!(e.embed_text("ab").iter().any(|x| *x > 0.0));
    }

    #[tokio::test]
    async fn test_batch_embed_order() {
        let e = HashEmbedder::default();
        let texts = vec!["one".to_string(), "two".to_string()];
        let vectors = e.embed(&texts).await.unwrap();
        assert_eq!(vectors.len(), 2);
        assert_eq!(vectors[1], e.embed_text("two"));
    }
}
