// Storage abstraction for the dedup ledger

use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

/// Key-value facility backing the ledger
pub trait StorageBackend: Send + Sync {
    fn put(&self, key: &[u8], value: &[u8]) -> Result<(), String>;
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, String>;
    /// Atomic insert-if-absent. Returns true when the key was newly created.
    /// This call is the commit-time authority for deduplication — a `get`
    /// pre-check is only an optimization and decides nothing under races.
    fn put_if_absent(&self, key: &[u8], value: &[u8]) -> Result<bool, String>;
    fn remove(&self, key: &[u8]) -> Result<(), String>;
    fn scan(&self) -> Result<Vec<(Vec<u8>, Vec<u8>)>, String>;
    fn flush(&self) -> Result<(), String>;
}

/// In-memory storage, used for tests and for degraded operation when no
/// persistence is available
#[derive(Clone, Default)]
pub struct MemoryStorage {
    data: Arc<RwLock<HashMap<Vec<u8>, Vec<u8>>>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

impl StorageBackend for MemoryStorage {
    fn put(&self, key: &[u8], value: &[u8]) -> Result<(), String> {
        self.data.write().insert(key.to_vec(), value.to_vec());
        Ok(())
    }

    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, String> {
        Ok(self.data.read().get(key).cloned())
    }

    fn put_if_absent(&self, key: &[u8], value: &[u8]) -> Result<bool, String> {
        // single write lock covers check and insert
        let mut data = self.data.write();
        if data.contains_key(key) {
            return Ok(false);
        }
        data.insert(key.to_vec(), value.to_vec());
        Ok(true)
    }

    fn remove(&self, key: &[u8]) -> Result<(), String> {
        self.data.write().remove(key);
        Ok(())
    }

    fn scan(&self) -> Result<Vec<(Vec<u8>, Vec<u8>)>, String> {
        Ok(self
            .data
            .read()
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect())
    }

    fn flush(&self) -> Result<(), String> {
        Ok(())
    }
}

/// Sled-backed persistent storage
pub struct SledStorage {
    db: sled::Db,
}

impl SledStorage {
    pub fn new(path: &str) -> Result<Self, String> {
        let db = sled::open(path).map_err(|e| e.to_string())?;
        Ok(Self { db })
    }
}

impl StorageBackend for SledStorage {
    fn put(&self, key: &[u8], value: &[u8]) -> Result<(), String> {
        self.db.insert(key, value).map_err(|e| e.to_string())?;
        Ok(())
    }

    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, String> {
        let value = self.db.get(key).map_err(|e| e.to_string())?;
        Ok(value.map(|ivec| ivec.to_vec()))
    }

    fn put_if_absent(&self, key: &[u8], value: &[u8]) -> Result<bool, String> {
        // compare_and_swap against an absent key commits atomically
        let outcome = self
            .db
            .compare_and_swap(key, None as Option<&[u8]>, Some(value))
            .map_err(|e| e.to_string())?;
        Ok(outcome.is_ok())
    }

    fn remove(&self, key: &[u8]) -> Result<(), String> {
        self.db.remove(key).map_err(|e| e.to_string())?;
        Ok(())
    }

    fn scan(&self) -> Result<Vec<(Vec<u8>, Vec<u8>)>, String> {
        let mut results = Vec::new();
        for item in self.db.iter() {
            let (k, v) = item.map_err(|e| e.to_string())?;
            results.push((k.to_vec(), v.to_vec()));
        }
        Ok(results)
    }

    fn flush(&self) -> Result<(), String> {
        self.db.flush().map_err(|e| e.to_string())?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn exercise(backend: &dyn StorageBackend) {
        assert!(backend.put_if_absent(b"a", b"1").unwrap());
        assert!(!backend.put_if_absent(b"a", b"2").unwrap());
        assert_eq!(backend.get(b"a").unwrap().unwrap(), b"1");

        backend.put(b"a", b"3").unwrap();
        assert_eq!(backend.get(b"a").unwrap().unwrap(), b"3");

        backend.put(b"b", b"4").unwrap();
        assert_eq!(backend.scan().unwrap().len(), 2);

        backend.remove(b"a").unwrap();
        assert!(backend.get(b"a").unwrap().is_none());
        backend.flush().unwrap();
    }

    #[test]
    fn test_memory_backend() {
        exercise(&MemoryStorage::new());
    }

    #[test]
    fn test_sled_backend() {
        let dir = tempdir().unwrap();
        let backend = SledStorage::new(dir.path().to_str().unwrap()).unwrap();
        exercise(&backend);
    }

    #[test]
    fn test_put_if_absent_does_not_clobber() {
        let backend = MemoryStorage::new();
        backend.put_if_absent(b"k", b"first").unwrap();
        assert!(!backend.put_if_absent(b"k", b"second").unwrap());
        assert_eq!(backend.get(b"k").unwrap().unwrap(), b"first");
    }
}
