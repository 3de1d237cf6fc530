//! JSON-lines record files.
//!
//! Small record stores (suggestions, episodes, procedures) keep one JSON
//! object per line. Every mutation is a read-modify-write of the whole file
//! under a lock, finished by an atomic rewrite, so concurrent writers in the
//! process never interleave and readers never see a half-written file.

use std::io::{BufRead, BufReader};
use std::marker::PhantomData;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::{CortexError, Result};
use crate::util::write_atomic;

/// A JSONL file holding records of type `T`.
#[derive(Debug)]
pub struct JsonlFile<T> {
    path: PathBuf,
    lock: Mutex<()>,
    _marker: PhantomData<fn() -> T>,
}

impl<T> JsonlFile<T>
where
    T: Serialize + DeserializeOwned,
{
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
            _marker: PhantomData,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read every record. A missing file is empty.
    ///
    /// Malformed lines are skipped with a warning rather than failing the read.
    pub fn read_all(&self) -> Result<Vec<T>> {
        let _guard = self.lock.lock();
        Ok(self.read_unlocked()?.0)
    }

    /// Read, modify and atomically rewrite the file.
    ///
    /// The closure's error aborts the write and leaves the file untouched.
    /// Lines that failed to parse are written back verbatim after the
    /// records.
    pub fn update<R>(&self, f: impl FnOnce(&mut Vec<T>) -> Result<R>) -> Result<R> {
        let _guard = self.lock.lock();
        let (mut records, malformed) = self.read_unlocked()?;
        let result = f(&mut records)?;
        self.write_unlocked(&records, &malformed)?;
        Ok(result)
    }

    /// Replace the file contents.
    pub fn write_all(&self, records: &[T]) -> Result<()> {
        let _guard = self.lock.lock();
        self.write_unlocked(records, &[])
    }

    /// Parsed records plus the raw lines that did not parse.
    fn read_unlocked(&self) -> Result<(Vec<T>, Vec<String>)> {
        if !self.path.exists() {
            return Ok((Vec::new(), Vec::new()));
        }
        let file =
            std::fs::File::open(&self.path).map_err(|e| CortexError::storage(&self.path, e))?;
        let reader = BufReader::new(file);

        let mut records = Vec::new();
        let mut malformed = Vec::new();
        for (line_no, line) in reader.lines().enumerate() {
            let line = line.map_err(|e| CortexError::storage(&self.path, e))?;
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<T>(&line) {
                Ok(record) => records.push(record),
                Err(e) => {
                    tracing::warn!(
                        path = %self.path.display(),
                        line = line_no + 1,
                        "skipping malformed record: {}",
                        e
                    );
                    malformed.push(line);
                }
            }
        }
        Ok((records, malformed))
    }

    fn write_unlocked(&self, records: &[T], malformed: &[String]) -> Result<()> {
        let mut buf = String::new();
        for record in records {
            buf.push_str(&serde_json::to_string(record)?);
            buf.push('\n');
        }
        for line in malformed {
            buf.push_str(line);
            buf.push('\n');
        }
        write_atomic(&self.path, buf.as_bytes())
    }
}
