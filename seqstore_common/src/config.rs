//! module containing the configuration of a store: where it lives on disk and
//! how the sequence layer is tuned.

use std::fs;
use std::io;
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const DEFAULT_MAX_SEGMENT_SIZE: u32 = 4 * 1024 * 1024; // 4 MiB
pub const DEFAULT_LOCK_STRIPES: usize = 64;
pub const DEFAULT_CACHE_CAPACITY: usize = 1024;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config file: {0}")]
    Io(#[from] io::Error),
    #[error("cannot parse config file: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreConfig {
    pub storage_dir: String,
    #[serde(default = "default_max_segment_size")]
    pub max_segment_size: u32,
    #[serde(default = "default_lock_stripes")]
    pub lock_stripes: usize,
    /// Number of decoded sequences kept in memory. 0 disables the cache.
    #[serde(default = "default_cache_capacity")]
    pub cache_capacity: usize,
}

fn default_max_segment_size() -> u32 {
    DEFAULT_MAX_SEGMENT_SIZE
}

fn default_lock_stripes() -> usize {
    DEFAULT_LOCK_STRIPES
}

fn default_cache_capacity() -> usize {
    DEFAULT_CACHE_CAPACITY
}

impl StoreConfig {
    pub fn new(storage_dir: impl Into<String>) -> StoreConfig {
        StoreConfig {
            storage_dir: storage_dir.into(),
            max_segment_size: DEFAULT_MAX_SEGMENT_SIZE,
            lock_stripes: DEFAULT_LOCK_STRIPES,
            cache_capacity: DEFAULT_CACHE_CAPACITY,
        }
    }

    pub fn from_file<P: AsRef<Path>>(file_path: P) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(file_path)?;
        let config: StoreConfig = serde_json::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.storage_dir.is_empty() {
            return Err(ConfigError::Invalid("storage_dir must not be empty".into()));
        }
        if self.max_segment_size == 0 {
            return Err(ConfigError::Invalid("max_segment_size must be positive".into()));
        }
        if self.lock_stripes == 0 {
            return Err(ConfigError::Invalid("lock_stripes must be positive".into()));
        }
        Ok(())
    }
}
