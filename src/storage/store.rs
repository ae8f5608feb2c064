//! The page store seam.

use crate::storage::error::StorageResult;
use crate::storage::page::{PageId, TableId};

/// Durable storage of fixed-size pages.
///
/// Every image read or written is exactly [`page_size`](PageStore::page_size)
/// bytes. A single `write_page` must be atomic per page.
pub trait PageStore: Send + Sync {
    fn page_size(&self) -> usize;

    fn read_page(&self, pid: PageId) -> StorageResult<Vec<u8>>;

    fn write_page(&self, pid: PageId, data: &[u8]) -> StorageResult<()>;

    /// Number of pages currently stored for `table_id`.
    fn page_count(&self, table_id: TableId) -> StorageResult<u32>;

    /// Appends a zeroed page to `table_id` and returns its id.
    fn allocate_page(&self, table_id: TableId) -> StorageResult<PageId>;
}
