//! Durable byte-addressed K/V cache: an out-of-scope collaborator
//! that survives a `close()` and is destroyed only on `drop()`. Used for
//! the four well-known keys `_localHeads`, `_remoteHeads`, `snapshot`,
//! `queue`.

use crate::error::{Result, StoreError};

/// A byte-addressed K/V store. `get` distinguishes "not found" (`Ok(None)`)
/// from an actual I/O failure (`Err`).
pub trait Cache: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;
    fn put(&self, key: &str, value: &[u8]) -> Result<()>;
    fn delete(&self, key: &str) -> Result<()>;
    /// Flushes and releases resources; the cache handle must not be used
    /// again afterwards.
    fn close(&self) -> Result<()>;
    /// Permanently destroys the cache's backing storage. Only called from
    /// `drop()`, never from `close()`.
    fn destroy(&self) -> Result<()>;
}

/// A `sled`-backed cache rooted at a directory, guarded by a directory-level
/// advisory lock so concurrent opens of the same directory are rejected.
pub struct SledCache {
    db: sled::Db,
    directory: std::path::PathBuf,
    _lock: std::fs::File,
}

impl SledCache {
    pub fn open(directory: impl AsRef<std::path::Path>) -> Result<SledCache> {
        let directory = directory.as_ref().to_path_buf();
        std::fs::create_dir_all(&directory)?;

        let lock_path = directory.join(".oplog-store.lock");
        let lock_file = std::fs::OpenOptions::new()
            .create(true)
            .write(true)
            .open(&lock_path)?;
        fs2::FileExt::try_lock_exclusive(&lock_file)
            .map_err(|e| StoreError::CacheRead(format!("directory {} is locked by another store: {}", directory.display(), e)))?;

        let db = sled::open(directory.join("cache.db")).map_err(|e| StoreError::CacheRead(e.to_string()))?;

        Ok(SledCache {
            db,
            directory,
            _lock: lock_file,
        })
    }
}

impl Cache for SledCache {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        self.db
            .get(key)
            .map(|opt| opt.map(|v| v.to_vec()))
            .map_err(|e| StoreError::CacheRead(e.to_string()))
    }

    fn put(&self, key: &str, value: &[u8]) -> Result<()> {
        self.db
            .insert(key, value)
            .map(|_| ())
            .map_err(|e| StoreError::CacheWrite(e.to_string()))
    }

    fn delete(&self, key: &str) -> Result<()> {
        self.db
            .remove(key)
            .map(|_| ())
            .map_err(|e| StoreError::CacheWrite(e.to_string()))
    }

    fn close(&self) -> Result<()> {
        self.db.flush().map(|_| ()).map_err(|e| StoreError::CacheClose(e.to_string()))
    }

    fn destroy(&self) -> Result<()> {
        self.close()?;
        std::fs::remove_dir_all(&self.directory).map_err(StoreError::Io)
    }
}

/// An in-process cache backed by a `DashMap`, for tests and ephemeral
/// stores that don't need durability across process restarts.
#[derive(Default)]
pub struct MemCache {
    entries: dashmap::DashMap<String, Vec<u8>>,
}

impl MemCache {
    pub fn new() -> MemCache {
        MemCache::default()
    }
}

impl Cache for MemCache {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.entries.get(key).map(|v| v.value().clone()))
    }

    fn put(&self, key: &str, value: &[u8]) -> Result<()> {
        self.entries.insert(key.to_owned(), value.to_vec());
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<()> {
        self.entries.remove(key);
        Ok(())
    }

    fn close(&self) -> Result<()> {
        Ok(())
    }

    fn destroy(&self) -> Result<()> {
        self.entries.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mem_cache_round_trips_and_reports_missing() {
        let cache = MemCache::new();
        assert_eq!(cache.get("_localHeads").unwrap(), None);
        cache.put("_localHeads", b"[]").unwrap();
        assert_eq!(cache.get("_localHeads").unwrap(), Some(b"[]".to_vec()));
        cache.delete("_localHeads").unwrap();
        assert_eq!(cache.get("_localHeads").unwrap(), None);
    }

    #[test]
    fn sled_cache_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        {
            let cache = SledCache::open(dir.path()).unwrap();
            cache.put("snapshot", b"bafy123").unwrap();
            cache.close().unwrap();
        }
        let cache = SledCache::open(dir.path()).unwrap();
        assert_eq!(cache.get("snapshot").unwrap(), Some(b"bafy123".to_vec()));
    }

    #[test]
    fn sled_cache_rejects_concurrent_open() {
        let dir = tempfile::tempdir().unwrap();
        let _first = SledCache::open(dir.path()).unwrap();
        assert!(SledCache::open(dir.path()).is_err());
    }
}
