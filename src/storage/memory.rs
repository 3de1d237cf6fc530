//! In-memory vector index.
//!
//! Each pool has its own lock, so a long scan of one pool never blocks
//! readers or writers of another. Used by tests and as the cache behind
//! [`FileIndex`](super::FileIndex).

use std::collections::BTreeMap;

use parking_lot::RwLock;

use crate::core::Pool;
use crate::error::Result;
use crate::storage::traits::{rank_entries, IndexEntry, IndexFilter, IndexHit, IndexMetadata};
use crate::storage::VectorIndex;

type PoolMap = RwLock<BTreeMap<String, IndexEntry>>;

/// Thread-safe in-memory vector index.
#[derive(Debug, Default)]
pub struct MemoryIndex {
    left: PoolMap,
    right: PoolMap,
    shared: PoolMap,
}

impl MemoryIndex {
    pub fn new() -> Self {
        Self::default()
    }

    fn pool(&self, pool: Pool) -> &PoolMap {
        match pool {
            Pool::Left => &self.left,
            Pool::Right => &self.right,
            Pool::Shared => &self.shared,
        }
    }

    /// Replace the whole contents of a pool.
    pub fn load_pool(&self, pool: Pool, entries: Vec<IndexEntry>) {
        let mut map = self.pool(pool).write();
        map.clear();
        for entry in entries {
            map.insert(entry.id.clone(), entry);
        }
    }

    /// Snapshot of every entry in a pool, in id order.
    pub fn snapshot(&self, pool: Pool) -> Vec<IndexEntry> {
        self.pool(pool).read().values().cloned().collect()
    }

    pub fn is_empty(&self) -> bool {
        Pool::all().iter().all(|p| self.pool(*p).read().is_empty())
    }
}

impl VectorIndex for MemoryIndex {
    fn upsert(&self, pool: Pool, entries: Vec<IndexEntry>) -> Result<()> {
        let mut map = self.pool(pool).write();
        for entry in entries {
            map.insert(entry.id.clone(), entry);
        }
        Ok(())
    }

    fn query(
        &self,
        pool: Pool,
        embedding: &[f32],
        k: usize,
        filter: &IndexFilter,
    ) -> Result<Vec<IndexHit>> {
        let map = self.pool(pool).read();
        Ok(rank_entries(map.values(), embedding, k, filter))
    }

    fn get(&self, pool: Pool, ids: &[String]) -> Result<Vec<IndexEntry>> {
        let map = self.pool(pool).read();
        Ok(ids.iter().filter_map(|id| map.get(id).cloned()).collect())
    }

    fn list(&self, pool: Pool, limit: Option<usize>) -> Result<Vec<IndexEntry>> {
        let map = self.pool(pool).read();
        let iter = map.values().cloned();
        Ok(match limit {
            Some(n) => iter.take(n).collect(),
            None => iter.collect(),
        })
    }

    fn update_metadata(&self, pool: Pool, id: &str, metadata: IndexMetadata) -> Result<bool> {
        let mut map = self.pool(pool).write();
        match map.get_mut(id) {
            Some(entry) => {
                entry.metadata = metadata;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn delete(&self, pool: Pool, ids: &[String]) -> Result<Vec<String>> {
        let mut map = self.pool(pool).write();
        Ok(ids
            .iter()
            .filter(|id| map.remove(id.as_str()).is_some())
            .cloned()
            .collect())
    }

    fn count(&self, pool: Pool) -> Result<usize> {
        Ok(self.pool(pool).read().len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::traits::tests::{entry, test_vector_index_contract};
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_memory_index_contract() {
        let index = MemoryIndex::new();
        test_vector_index_contract(&index);
    }

    #[test]
    fn test_load_pool_replaces_contents() {
        let index = MemoryIndex::new();
        index
            .upsert(Pool::Shared, vec![entry("old", Pool::Shared, vec![1.0])])
            .unwrap();
        index.load_pool(Pool::Shared, vec![entry("new", Pool::Shared, vec![1.0])]);

        let ids: Vec<String> = index.snapshot(Pool::Shared).into_iter().map(|e| e.id).collect();
        assert_eq!(ids, vec!["new"]);
    }

    #[test]
    fn test_concurrent_writers_on_different_pools() {
        let index = Arc::new(MemoryIndex::new());
        let mut handles = Vec::new();
        for (i, pool) in [Pool::Left, Pool::Right, Pool::Shared].into_iter().enumerate() {
            let index = Arc::clone(&index);
            handles.push(thread::spawn(move || {
                for j in 0..50 {
                    let id = format!("{}_{}", i, j);
                    index.upsert(pool, vec![entry(&id, pool, vec![1.0, j as f32])]).unwrap();
                }
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }
        for pool in Pool::all() {
            assert_eq!(index.count(*pool).unwrap(), 50);
        }
        assert!(!index.is_empty());
    }
}
