use super::replacer::Replacer;
use crate::storage::page::PageId;
use std::collections::HashMap;

/// Least-recently-used order kept as a monotonically increasing access stamp
/// per page.
#[derive(Debug, Default)]
pub struct LruReplacer {
    clock: u64,
    last_access: HashMap<PageId, u64>,
}

impl LruReplacer {
    pub fn new(capacity: usize) -> Self {
        Self {
            clock: 0,
            last_access: HashMap::with_capacity(capacity),
        }
    }

    #[cfg(test)]
    fn stamp(&self, pid: PageId) -> Option<u64> {
        self.last_access.get(&pid).copied()
    }
}

impl Replacer for LruReplacer {
    fn record_access(&mut self, pid: PageId) {
        self.clock += 1;
        self.last_access.insert(pid, self.clock);
    }

    fn remove(&mut self, pid: PageId) {
        self.last_access.remove(&pid);
    }

    fn victim(&self, evictable: &dyn Fn(PageId) -> bool) -> Option<PageId> {
        self.last_access
            .iter()
            .filter(|(pid, _)| evictable(**pid))
            .min_by_key(|(_, stamp)| **stamp)
            .map(|(pid, _)| *pid)
    }

    fn size(&self) -> usize {
        self.last_access.len()
    }
}
