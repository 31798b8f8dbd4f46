use std::io;

use seqstore_common::backend::Backend;
use seqstore_common::err::{StoreError, StoreResult};
use seqstore_common::util::validate_key;

use crate::log_store::LogStructuredStore;

impl Backend for LogStructuredStore {
    fn get(&self, key: &str) -> StoreResult<Option<Vec<u8>>> {
        validate_key(key)?;
        LogStructuredStore::get(self, key.as_bytes()).map_err(|e| StoreError::storage("get", e))
    }

    fn put(&self, key: &str, value: &[u8]) -> StoreResult<()> {
        validate_key(key)?;
        LogStructuredStore::put(self, key.as_bytes(), value).map_err(|e| StoreError::storage("put", e))
    }

    fn delete(&self, key: &str) -> StoreResult<()> {
        validate_key(key)?;
        LogStructuredStore::delete(self, key.as_bytes()).map_err(|e| StoreError::storage("delete", e))
    }

    fn keys(&self) -> StoreResult<Vec<String>> {
        let raw = LogStructuredStore::keys(self).map_err(|e| StoreError::storage("keys", e))?;
        raw.into_iter()
            .map(|k| {
                String::from_utf8(k).map_err(|e| {
                    StoreError::storage("keys", io::Error::new(io::ErrorKind::InvalidData, e))
                })
            })
            .collect()
    }

    fn clear(&self) -> StoreResult<()> {
        LogStructuredStore::clear(self).map_err(|e| StoreError::storage("clear", e))
    }
}
