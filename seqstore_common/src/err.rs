use std::io;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    // Precondition errors (rejected before the backend is touched)
    #[error("invalid key: {0}")]
    InvalidKey(String),

    // Backend errors (disk full, permission denied, corrupt record, ...)
    #[error("storage failure during {op}: {source}")]
    StorageFailure {
        op: &'static str,
        #[source]
        source: io::Error,
    },

    // Data-integrity errors (stored bytes are not a value of the expected shape)
    #[error("cannot decode value stored under \"{key}\": {reason}")]
    DecodeFailure { key: String, reason: String },
}

impl StoreError {
    /// Wrap an I/O error raised by the backend while performing `op`.
    pub fn storage(op: &'static str, source: io::Error) -> Self {
        StoreError::StorageFailure { op, source }
    }

    pub fn decode(key: &str, reason: impl ToString) -> Self {
        StoreError::DecodeFailure {
            key: key.to_string(),
            reason: reason.to_string(),
        }
    }

    pub fn is_invalid_key(&self) -> bool {
        matches!(self, StoreError::InvalidKey(_))
    }

    pub fn is_storage_failure(&self) -> bool {
        matches!(self, StoreError::StorageFailure { .. })
    }

    pub fn is_decode_failure(&self) -> bool {
        matches!(self, StoreError::DecodeFailure { .. })
    }
}

impl From<io::Error> for StoreError {
    fn from(v: io::Error) -> Self {
        StoreError::StorageFailure { op: "io", source: v }
    }
}

pub type StoreResult<T> = Result<T, StoreError>;
