//! In-memory page store.
//!
//! Counts reads and writes and can be told to fail writes, which makes it the
//! store of choice for exercising the buffer pool without touching disk.

use crate::storage::error::{StorageError, StorageResult};
use crate::storage::page::{PageId, TableId};
use crate::storage::store::PageStore;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

#[derive(Debug)]
pub struct MemoryPageStore {
    page_size: usize,
    pages: Mutex<HashMap<PageId, Vec<u8>>>,
    reads: AtomicUsize,
    writes: AtomicUsize,
    fail_writes: AtomicBool,
}

impl MemoryPageStore {
    pub fn new(page_size: usize) -> Self {
        Self {
            page_size,
            pages: Mutex::new(HashMap::new()),
            reads: AtomicUsize::new(0),
            writes: AtomicUsize::new(0),
            fail_writes: AtomicBool::new(false),
        }
    }

    /// Creates a store holding `pages` zeroed pages of table `table_id`.
    pub fn with_pages(page_size: usize, table_id: TableId, pages: u32) -> Self {
        let store = Self::new(page_size);
        {
            let mut map = store.pages.lock();
            for page_no in 0..pages {
                map.insert(PageId::new(table_id, page_no), vec![0u8; page_size]);
            }
        }
        store
    }

    /// Number of `read_page` calls served so far.
    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    /// Number of successful `write_page` calls so far.
    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    /// Makes every following write fail with [`StorageError::WriteFailed`].
    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Stored image of `pid` without counting a read.
    pub fn peek(&self, pid: PageId) -> Option<Vec<u8>> {
        self.pages.lock().get(&pid).cloned()
    }
}

impl PageStore for MemoryPageStore {
    fn page_size(&self) -> usize {
        self.page_size
    }

    fn read_page(&self, pid: PageId) -> StorageResult<Vec<u8>> {
        let pages = self.pages.lock();
        let data = pages.get(&pid).cloned().ok_or(StorageError::PageNotFound(pid))?;
        self.reads.fetch_add(1, Ordering::SeqCst);
        Ok(data)
    }

    fn write_page(&self, pid: PageId, data: &[u8]) -> StorageResult<()> {
        if data.len() != self.page_size {
            return Err(StorageError::PageSizeMismatch {
                expected: self.page_size,
                actual: data.len(),
            });
        }
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StorageError::WriteFailed(pid));
        }
        self.pages.lock().insert(pid, data.to_vec());
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn page_count(&self, table_id: TableId) -> StorageResult<u32> {
        let pages = self.pages.lock();
        let count = pages
            .keys()
            .filter(|pid| pid.table_id == table_id)
            .map(|pid| pid.page_no + 1)
            .max()
            .unwrap_or(0);
        Ok(count)
    }

    fn allocate_page(&self, table_id: TableId) -> StorageResult<PageId> {
        let pid = PageId::new(table_id, self.page_count(table_id)?);
        self.pages.lock().insert(pid, vec![0u8; self.page_size]);
        Ok(pid)
    }
}
