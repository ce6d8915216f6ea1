//! Configuration structures for CairnDB.

use crate::page::PAGE_SIZE;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Storage configuration for the database engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Directory for the data and log files.
    pub data_dir: PathBuf,
    /// Buffer pool size in number of frames.
    pub buffer_pool_pages: usize,
    /// K parameter for LRU-K replacement.
    pub replacer_k: usize,
    /// Enable fsync for durability.
    pub fsync_enabled: bool,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data"),
            buffer_pool_pages: 8192, // 32 MB with 4 KB pages
            replacer_k: 2,
            fsync_enabled: true,
        }
    }
}

impl StorageConfig {
    /// Returns the total buffer pool size in bytes.
    pub fn buffer_pool_size_bytes(&self) -> usize {
        self.buffer_pool_pages * PAGE_SIZE
    }

    /// Path of the data file inside `data_dir`.
    pub fn db_path(&self) -> PathBuf {
        self.data_dir.join("cairn.db")
    }

    /// Path of the write-ahead log file inside `data_dir`.
    pub fn log_path(&self) -> PathBuf {
        self.data_dir.join("cairn.log")
    }
}
