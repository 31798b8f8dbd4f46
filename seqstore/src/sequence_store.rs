use std::sync::{PoisonError, RwLock, RwLockReadGuard};

use log::{debug, info, warn};
use seqstore_common::backend::Backend;
use seqstore_common::config::{StoreConfig, DEFAULT_CACHE_CAPACITY, DEFAULT_LOCK_STRIPES};
use seqstore_common::err::{StoreError, StoreResult};
use seqstore_common::util::validate_key;
use seqstore_logstore::LogStructuredStore;

use crate::cache::SequenceCache;
use crate::codec;
use crate::key_lock::KeyLocks;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreOptions {
    pub lock_stripes: usize,
    pub cache_capacity: usize,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            lock_stripes: DEFAULT_LOCK_STRIPES,
            cache_capacity: DEFAULT_CACHE_CAPACITY,
        }
    }
}

impl From<&StoreConfig> for StoreOptions {
    fn from(config: &StoreConfig) -> Self {
        Self {
            lock_stripes: config.lock_stripes,
            cache_capacity: config.cache_capacity,
        }
    }
}

/// Key → ordered sequence of strings, on top of a raw [`Backend`].
///
/// Every write to a key runs its whole read-decode-modify-encode-write cycle
/// while holding that key's stripe lock, which is what makes
/// [`append_to_sequence`](Self::append_to_sequence) safe against concurrent
/// appends and sets. The lock is in-process only: two processes sharing one
/// storage directory are not supported.
pub struct SequenceStore<B> {
    backend: B,
    locks: KeyLocks,
    cache: SequenceCache,
    // shared by keyed operations, exclusive for clear
    gate: RwLock<()>,
}

impl SequenceStore<LogStructuredStore> {
    /// Open the log-structured store described by `config`.
    pub fn open(config: &StoreConfig) -> StoreResult<Self> {
        let backend = LogStructuredStore::open_with_max_segment_size(&config.storage_dir, config.max_segment_size)
            .map_err(|e| StoreError::storage("open", e))?;
        info!(
            "seqstore: opened {} ({} lock stripes, cache capacity {})",
            config.storage_dir, config.lock_stripes, config.cache_capacity
        );
        Ok(Self::with_options(backend, StoreOptions::from(config)))
    }

    /// Rewrite the storage directory so it only holds current values.
    pub fn compact(&self) -> StoreResult<()> {
        self.backend.compact().map_err(|e| StoreError::storage("compact", e))
    }

    /// Write the active segment's footer, for a clean shutdown.
    pub fn flush(&self) -> StoreResult<()> {
        self.backend.flush().map_err(|e| StoreError::storage("flush", e))
    }
}

impl<B: Backend> SequenceStore<B> {
    pub fn new(backend: B) -> Self {
        Self::with_options(backend, StoreOptions::default())
    }

    pub fn with_options(backend: B, options: StoreOptions) -> Self {
        Self {
            backend,
            locks: KeyLocks::new(options.lock_stripes),
            cache: SequenceCache::new(options.cache_capacity),
            gate: RwLock::new(()),
        }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    fn shared(&self) -> RwLockReadGuard<'_, ()> {
        self.gate.read().unwrap_or_else(PoisonError::into_inner)
    }

    /// The sequence stored under `key`, or an empty sequence if there is none.
    pub fn get_sequence(&self, key: &str) -> StoreResult<Vec<String>> {
        validate_key(key)?;
        let _gate = self.shared();

        // no stripe needed: cache entries are checked against the bytes just read
        self.load_sequence(key)
    }

    /// Replace whatever is stored under `key` with `items`.
    pub fn set_sequence<S: AsRef<str>>(&self, key: &str, items: &[S]) -> StoreResult<()> {
        validate_key(key)?;
        let _gate = self.shared();
        let _guard = self.locks.lock(key);

        let items: Vec<String> = items.iter().map(|s| s.as_ref().to_owned()).collect();
        debug!("seqstore: set {} element(s) under {:?}", items.len(), key);
        self.store_sequence(key, items)
    }

    /// Same as [`set_sequence`](Self::set_sequence); one backend write for the whole list.
    pub fn set_sequence_bulk<S: AsRef<str>>(&self, key: &str, items: &[S]) -> StoreResult<()> {
        self.set_sequence(key, items)
    }

    /// Append `element` to the sequence under `key`, creating it if absent.
    ///
    /// Fails with `DecodeFailure`, writing nothing, if the current value is not a
    /// sequence.
    pub fn append_to_sequence(&self, key: &str, element: &str) -> StoreResult<()> {
        validate_key(key)?;
        let _gate = self.shared();
        let _guard = self.locks.lock(key);

        let mut items = self.load_sequence(key)?;
        items.push(element.to_owned());
        debug!("seqstore: append under {:?}, now {} element(s)", key, items.len());
        self.store_sequence(key, items)
    }

    pub fn get_item(&self, key: &str) -> StoreResult<Option<String>> {
        validate_key(key)?;
        let _gate = self.shared();

        match self.backend.get(key)? {
            None => Ok(None),
            Some(raw) => codec::decode_text(&raw)
                .map(Some)
                .map_err(|e| self.decode_failure(key, e)),
        }
    }

    pub fn set_item(&self, key: &str, value: &str) -> StoreResult<()> {
        validate_key(key)?;
        let _gate = self.shared();
        let _guard = self.locks.lock(key);

        self.backend.put(key, &codec::encode_text(value))?;
        self.cache.remove(key);
        Ok(())
    }

    /// Delete `key`, whatever shape its value has. Absent keys are fine.
    pub fn remove_item(&self, key: &str) -> StoreResult<()> {
        validate_key(key)?;
        let _gate = self.shared();
        let _guard = self.locks.lock(key);

        self.backend.delete(key)?;
        self.cache.remove(key);
        debug!("seqstore: removed {:?}", key);
        Ok(())
    }

    /// Remove every entry. Waits for in-flight operations and blocks new ones until done.
    pub fn clear(&self) -> StoreResult<()> {
        let _gate = self.gate.write().unwrap_or_else(PoisonError::into_inner);

        // drop the cache even on failure; the backend may have cleared part of the keys
        let res = self.backend.clear();
        self.cache.clear();
        res?;
        info!("seqstore: cleared all entries");
        Ok(())
    }

    pub fn keys(&self) -> StoreResult<Vec<String>> {
        let _gate = self.shared();
        self.backend.keys()
    }

    // Always reads the backend; the cache only saves decoding bytes seen before.
    fn load_sequence(&self, key: &str) -> StoreResult<Vec<String>> {
        let Some(raw) = self.backend.get(key)? else {
            self.cache.remove(key);
            return Ok(Vec::new());
        };
        if let Some(items) = self.cache.get(key, &raw) {
            return Ok(items);
        }

        let items = codec::decode_sequence(&raw).map_err(|e| self.decode_failure(key, e))?;
        self.cache.insert(key, raw, items.clone());
        Ok(items)
    }

    // caller holds the key's stripe
    fn store_sequence(&self, key: &str, items: Vec<String>) -> StoreResult<()> {
        let raw = codec::encode_sequence(&items).map_err(|e| StoreError::storage("encode", e))?;
        self.backend.put(key, &raw)?;
        self.cache.insert(key, raw, items);
        Ok(())
    }

    fn decode_failure(&self, key: &str, e: codec::DecodeError) -> StoreError {
        warn!("seqstore: value under {:?} cannot be decoded: {}", key, e);
        StoreError::decode(key, e)
    }
}
