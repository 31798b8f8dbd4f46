//! Persistent key → ordered sequence of strings store with atomic append.

pub mod cache;
pub mod codec;
pub mod key_lock;
pub mod sequence_store;

// Re-export commonly used types
pub use sequence_store::{SequenceStore, StoreOptions};
pub use seqstore_common::backend::{Backend, MemoryBackend};
pub use seqstore_common::config::StoreConfig;
pub use seqstore_common::err::{StoreError, StoreResult};
pub use seqstore_logstore::LogStructuredStore;
