//! Storage layer for vibestore.
//!
//! Pages are fixed-size blocks addressed by [`PageId`]. Key components:
//!
//! - **PageStore**: the durable home of pages; [`FilePageStore`] keeps one
//!   file per table, [`MemoryPageStore`] keeps them in memory
//! - **BufferPool**: bounded page cache with per-page locks and no-steal
//!   LRU eviction
//! - **LogFile**: the write-ahead log every page write-back goes through

pub mod buffer;
pub mod disk;
pub mod error;
pub mod memory;
pub mod page;
pub mod store;
pub mod wal;

pub use buffer::BufferPool;
pub use disk::FilePageStore;
pub use error::{BufferError, BufferResult, StorageError, StorageResult, WalError, WalResult};
pub use memory::MemoryPageStore;
pub use page::{CachedPage, PageId, PageRef, Permissions, TableId};
pub use store::PageStore;
pub use wal::{LogFile, LogRecord, PageImage};
