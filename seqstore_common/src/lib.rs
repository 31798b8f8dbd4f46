pub mod backend;
pub mod config;
pub mod err;
pub mod util;

pub use backend::{Backend, MemoryBackend};
pub use config::{ConfigError, StoreConfig};
pub use err::{StoreError, StoreResult};
