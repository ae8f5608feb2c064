use crate::storage::page::PageId;
use std::fmt::Debug;

pub trait Replacer: Send + Sync + Debug {
    /// Record a touch of `pid`, making it the most recently used page.
    fn record_access(&mut self, pid: PageId);

    /// Forget `pid`.
    fn remove(&mut self, pid: PageId);

    /// Select the page to evict among those `evictable` accepts.
    /// Returns None if no tracked page qualifies.
    fn victim(&self, evictable: &dyn Fn(PageId) -> bool) -> Option<PageId>;

    /// Get the number of tracked pages.
    fn size(&self) -> usize;
}
