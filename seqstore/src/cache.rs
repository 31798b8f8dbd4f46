use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

struct Entry {
    raw: Vec<u8>,
    items: Vec<String>,
}

/// Bounded memo of decoded sequences, keyed by the exact bytes they were decoded from.
///
/// The cache never decides what is current: callers always read the stored bytes
/// from the backend and only skip decoding when those bytes are the ones cached.
/// A value changed behind the store's back simply misses.
pub struct SequenceCache {
    capacity: usize,
    map: RwLock<HashMap<String, Entry>>,
}

impl SequenceCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            map: RwLock::new(HashMap::new()),
        }
    }

    /// The decoded sequence for `key` if it was cached from exactly `raw`.
    pub fn get(&self, key: &str, raw: &[u8]) -> Option<Vec<String>> {
        let map = self.map.read().unwrap_or_else(PoisonError::into_inner);
        map.get(key).filter(|e| e.raw == raw).map(|e| e.items.clone())
    }

    pub fn insert(&self, key: &str, raw: Vec<u8>, items: Vec<String>) {
        if self.capacity == 0 {
            return;
        }
        let mut map = self.map.write().unwrap_or_else(PoisonError::into_inner);

        // make room by dropping an arbitrary entry
        if map.len() >= self.capacity && !map.contains_key(key) {
            if let Some(victim) = map.keys().next().cloned() {
                map.remove(&victim);
            }
        }
        map.insert(key.to_string(), Entry { raw, items });
    }

    pub fn remove(&self, key: &str) {
        self.map.write().unwrap_or_else(PoisonError::into_inner).remove(key);
    }

    pub fn clear(&self) {
        self.map.write().unwrap_or_else(PoisonError::into_inner).clear();
    }

    pub fn contains(&self, key: &str) -> bool {
        self.map.read().unwrap_or_else(PoisonError::into_inner).contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.map.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
