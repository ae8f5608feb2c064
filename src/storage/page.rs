//! Page identifiers and the in-memory page representation.

use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::concurrency::LockMode;
use crate::transaction::TransactionId;

/// Identifier of a table (one file in the page store).
pub type TableId = u32;

/// Identifies a page by table and page number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PageId {
    pub table_id: TableId,
    pub page_no: u32,
}

impl PageId {
    pub fn new(table_id: TableId, page_no: u32) -> Self {
        Self { table_id, page_no }
    }
}

impl fmt::Display for PageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({},{})", self.table_id, self.page_no)
    }
}

/// Access a transaction asks for when fetching a page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Permissions {
    ReadOnly,
    ReadWrite,
}

impl Permissions {
    pub fn lock_mode(self) -> LockMode {
        match self {
            Permissions::ReadOnly => LockMode::Shared,
            Permissions::ReadWrite => LockMode::Exclusive,
        }
    }
}

/// Shared handle to a page owned by the buffer pool.
///
/// Only valid while the holder keeps the page lock it was fetched under.
pub type PageRef = Arc<RwLock<CachedPage>>;

/// A page resident in the buffer pool.
///
/// The before-image is the content the page had when it was last clean.
/// It differs from the current content only while the page is dirty.
#[derive(Debug, Clone)]
pub struct CachedPage {
    id: PageId,
    data: Vec<u8>,
    before_image: Vec<u8>,
    dirtied_by: Option<TransactionId>,
}

impl CachedPage {
    pub fn new(id: PageId, data: Vec<u8>) -> Self {
        Self {
            id,
            before_image: data.clone(),
            data,
            dirtied_by: None,
        }
    }

    pub fn id(&self) -> PageId {
        self.id
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Copies `bytes` into the page at `offset` and marks it dirtied by `tid`.
    ///
    /// # Panics
    ///
    /// Panics if the write runs past the end of the page.
    pub fn write_at(&mut self, tid: TransactionId, offset: usize, bytes: &[u8]) {
        self.data[offset..offset + bytes.len()].copy_from_slice(bytes);
        self.mark_dirty(tid);
    }

    pub fn mark_dirty(&mut self, tid: TransactionId) {
        self.dirtied_by = Some(tid);
    }

    pub fn is_dirty(&self) -> bool {
        self.dirtied_by.is_some()
    }

    /// Transaction that last dirtied the page, if it is dirty.
    pub fn dirtied_by(&self) -> Option<TransactionId> {
        self.dirtied_by
    }

    pub fn before_image(&self) -> &[u8] {
        &self.before_image
    }

    /// Snapshots the current content as the before-image.
    pub fn set_before_image(&mut self) {
        self.before_image.clear();
        self.before_image.extend_from_slice(&self.data);
    }

    /// Clears the dirty flag after a successful write-back.
    pub(crate) fn mark_clean(&mut self) {
        self.dirtied_by = None;
        self.set_before_image();
    }

    /// Replaces the content with a freshly read image, leaving the page clean.
    pub(crate) fn reload(&mut self, data: Vec<u8>) {
        self.before_image = data.clone();
        self.data = data;
        self.dirtied_by = None;
    }
}
