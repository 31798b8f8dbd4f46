//! The raw key → bytes persistence interface the sequence layer is built on.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use crate::err::StoreResult;
use crate::util::validate_key;

/// A durable key → raw bytes mapping.
///
/// Implementations must make `put` and `delete` durable before returning `Ok`
/// and must never leave a partially written value observable after an error.
/// Storage-medium problems are reported as `StoreError::StorageFailure` and are
/// not retried. There is no compare-and-swap: callers that read, modify and
/// write back must provide their own exclusion.
pub trait Backend: Send + Sync {
    /// Return the raw bytes stored under `key`, or `None` if absent.
    fn get(&self, key: &str) -> StoreResult<Option<Vec<u8>>>;

    /// Replace the value stored under `key`.
    fn put(&self, key: &str, value: &[u8]) -> StoreResult<()>;

    /// Remove `key`. Removing an absent key is not an error.
    fn delete(&self, key: &str) -> StoreResult<()>;

    /// All live keys, sorted.
    fn keys(&self) -> StoreResult<Vec<String>>;

    /// Remove every live key.
    fn clear(&self) -> StoreResult<()> {
        for key in self.keys()? {
            self.delete(&key)?;
        }
        Ok(())
    }
}

impl<T: Backend + ?Sized> Backend for Arc<T> {
    fn get(&self, key: &str) -> StoreResult<Option<Vec<u8>>> {
        (**self).get(key)
    }

    fn put(&self, key: &str, value: &[u8]) -> StoreResult<()> {
        (**self).put(key, value)
    }

    fn delete(&self, key: &str) -> StoreResult<()> {
        (**self).delete(key)
    }

    fn keys(&self) -> StoreResult<Vec<String>> {
        (**self).keys()
    }

    fn clear(&self) -> StoreResult<()> {
        (**self).clear()
    }
}

/// Process-local backend. Nothing survives the process; useful for tests and
/// scratch stores.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    map: RwLock<HashMap<String, Vec<u8>>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.map.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Backend for MemoryBackend {
    fn get(&self, key: &str) -> StoreResult<Option<Vec<u8>>> {
        validate_key(key)?;
        let map = self.map.read().unwrap_or_else(PoisonError::into_inner);
        Ok(map.get(key).cloned())
    }

    fn put(&self, key: &str, value: &[u8]) -> StoreResult<()> {
        validate_key(key)?;
        let mut map = self.map.write().unwrap_or_else(PoisonError::into_inner);
        map.insert(key.to_string(), value.to_vec());
        Ok(())
    }

    fn delete(&self, key: &str) -> StoreResult<()> {
        validate_key(key)?;
        let mut map = self.map.write().unwrap_or_else(PoisonError::into_inner);
        map.remove(key);
        Ok(())
    }

    fn keys(&self) -> StoreResult<Vec<String>> {
        let map = self.map.read().unwrap_or_else(PoisonError::into_inner);
        let mut keys: Vec<String> = map.keys().cloned().collect();
        keys.sort();
        Ok(keys)
    }

    fn clear(&self) -> StoreResult<()> {
        self.map.write().unwrap_or_else(PoisonError::into_inner).clear();
        Ok(())
    }
}
