//! File-backed vector index.
//!
//! Each pool is one JSON array at `{dir}/index/{pool}.json`, loaded into a
//! [`MemoryIndex`] at open and rewritten atomically (temp file + rename)
//! after every mutation of that pool.

use std::fs;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;

use crate::core::Pool;
use crate::error::{CortexError, Result};
use crate::storage::memory::MemoryIndex;
use crate::storage::traits::{IndexEntry, IndexFilter, IndexHit, IndexMetadata};
use crate::storage::VectorIndex;
use crate::util::{read_to_string_with_limit, write_json_atomic};

/// Largest pool file accepted at load time (256 MB).
const MAX_POOL_FILE_SIZE: u64 = 256 * 1024 * 1024;

/// File-based vector index.
#[derive(Debug)]
pub struct FileIndex {
    dir: PathBuf,
    cache: MemoryIndex,
    /// Serializes mutate-then-persist per pool so snapshots are never stale.
    write_locks: [Mutex<()>; 3],
}

impl FileIndex {
    /// Open (or create) an index rooted at `data_dir`.
    pub fn open(data_dir: impl AsRef<Path>) -> Result<Self> {
        let dir = data_dir.as_ref().join("index");
        if !dir.exists() {
            fs::create_dir_all(&dir).map_err(|e| CortexError::storage(&dir, e))?;
        }

        let cache = MemoryIndex::new();
        for pool in Pool::all() {
            let path = pool_path(&dir, *pool);
            if !path.exists() {
                continue;
            }
            let content = read_to_string_with_limit(&path, MAX_POOL_FILE_SIZE)?;
            let entries: Vec<IndexEntry> = serde_json::from_str(&content).map_err(|e| {
                CortexError::serde(format!("{}: {}", path.display(), e))
            })?;
            tracing::debug!(pool = %pool, entries = entries.len(), "loaded index pool");
            cache.load_pool(*pool, entries);
        }

        Ok(Self {
            dir,
            cache,
            write_locks: [Mutex::new(()), Mutex::new(()), Mutex::new(())],
        })
    }

    /// Directory holding the pool files.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn write_lock(&self, pool: Pool) -> &Mutex<()> {
        match pool {
            Pool::Left => &self.write_locks[0],
            Pool::Right => &self.write_locks[1],
            Pool::Shared => &self.write_locks[2],
        }
    }

    fn persist(&self, pool: Pool) -> Result<()> {
        write_json_atomic(&pool_path(&self.dir, pool), &self.cache.snapshot(pool))
    }
}

fn pool_path(dir: &Path, pool: Pool) -> PathBuf {
    dir.join(format!("{}.json", pool))
}

impl VectorIndex for FileIndex {
    fn upsert(&self, pool: Pool, entries: Vec<IndexEntry>) -> Result<()> {
        let _guard = self.write_lock(pool).lock();
        self.cache.upsert(pool, entries)?;
        self.persist(pool)
    }

    fn query(
        &self,
        pool: Pool,
        embedding: &[f32],
        k: usize,
        filter: &IndexFilter,
    ) -> Result<Vec<IndexHit>> {
        self.cache.query(pool, embedding, k, filter)
    }

    fn get(&self, pool: Pool, ids: &[String]) -> Result<Vec<IndexEntry>> {
        self.cache.get(pool, ids)
    }

    fn list(&self, pool: Pool, limit: Option<usize>) -> Result<Vec<IndexEntry>> {
        self.cache.list(pool, limit)
    }

    fn update_metadata(&self, pool: Pool, id: &str, metadata: IndexMetadata) -> Result<bool> {
        let _guard = self.write_lock(pool).lock();
        let updated = self.cache.update_metadata(pool, id, metadata)?;
        if updated {
            self.persist(pool)?;
        }
        Ok(updated)
    }

    fn delete(&self, pool: Pool, ids: &[String]) -> Result<Vec<String>> {
        let _guard = self.write_lock(pool).lock();
        let deleted = self.cache.delete(pool, ids)?;
        if !deleted.is_empty() {
            self.persist(pool)?;
        }
        Ok(deleted)
    }

    fn count(&self, pool: Pool) -> Result<usize> {
        self.cache.count(pool)
    }
}
