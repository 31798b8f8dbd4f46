//! Log-structured, crash-safe key → bytes storage.

mod backend;
pub mod log_store;
pub mod record;
mod segment;

// Re-export commonly used types
pub use log_store::{LogStructuredStore, MAX_SEG_SIZE};
pub use record::{Record, RecordFlags};
