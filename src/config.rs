//! Configuration for the storage core.

use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default page size in bytes.
pub const DEFAULT_PAGE_SIZE: usize = 4096;

/// Default number of pages the buffer pool keeps resident.
pub const DEFAULT_POOL_PAGES: usize = 50;

/// Default time a lock request may wait before its transaction is aborted.
pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(1);

/// Default name of the log file inside the data directory.
pub const DEFAULT_LOG_FILE: &str = "wal.log";

/// Buffer pool configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BufferPoolConfig {
    /// Maximum number of resident pages.
    pub capacity: usize,
    /// Bounded wait for a page lock.
    pub lock_timeout: Duration,
}

impl Default for BufferPoolConfig {
    fn default() -> Self {
        BufferPoolConfig {
            capacity: DEFAULT_POOL_PAGES,
            lock_timeout: DEFAULT_LOCK_TIMEOUT,
        }
    }
}

impl BufferPoolConfig {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            capacity,
            ..Default::default()
        }
    }
}

/// Configuration for a [`Database`](crate::database::Database).
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    /// Directory holding table files and the log.
    pub data_dir: PathBuf,
    /// Page size shared by the page store, the buffer pool and the log.
    pub page_size: usize,
    /// Buffer pool settings.
    pub buffer_pool: BufferPoolConfig,
    /// Log file name, relative to `data_dir`.
    pub log_file_name: String,
}

impl DatabaseConfig {
    pub fn new(data_dir: impl AsRef<Path>) -> Self {
        Self {
            data_dir: data_dir.as_ref().to_path_buf(),
            page_size: DEFAULT_PAGE_SIZE,
            buffer_pool: BufferPoolConfig::default(),
            log_file_name: DEFAULT_LOG_FILE.to_string(),
        }
    }

    pub fn log_path(&self) -> PathBuf {
        self.data_dir.join(&self.log_file_name)
    }
}
