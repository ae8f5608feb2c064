//! Buffer pool.
//!
//! A bounded cache of pages keyed by [`PageId`]. Every page the pool tracks
//! has a [`PageLock`]; `fetch` acquires it before touching the cache, so a
//! transaction blocked on a lock never holds up unrelated fetches.
//!
//! The pool never writes back a page a running transaction has dirtied
//! except on that transaction's commit or an explicit flush. Eviction only
//! considers clean pages, and fails when there are none.

pub mod lru;
pub mod replacer;

use crate::concurrency::{LockError, LockMode, PageLock};
use crate::config::BufferPoolConfig;
use crate::storage::error::{BufferError, BufferResult};
use crate::storage::page::{CachedPage, PageId, PageRef, Permissions};
use crate::storage::store::PageStore;
use crate::storage::wal::LogFile;
use crate::transaction::TransactionId;
use dashmap::DashMap;
use log::{debug, warn};
use lru::LruReplacer;
use parking_lot::{Mutex, RwLock};
use replacer::Replacer;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

pub struct BufferPool {
    store: Arc<dyn PageStore>,
    log: Arc<LogFile>,
    config: BufferPoolConfig,
    state: Mutex<PoolState>,
    locks: DashMap<PageId, Arc<PageLock>>,
}

/// Cache tables, mutated only under the pool mutex.
struct PoolState {
    pages: HashMap<PageId, PageRef>,
    replacer: Box<dyn Replacer>,
    /// Pages each running transaction has fetched.
    touched: HashMap<TransactionId, HashSet<PageId>>,
}

impl BufferPool {
    pub fn new(store: Arc<dyn PageStore>, log: Arc<LogFile>, config: BufferPoolConfig) -> Self {
        let replacer = Box::new(LruReplacer::new(config.capacity));
        Self {
            store,
            log,
            state: Mutex::new(PoolState {
                pages: HashMap::with_capacity(config.capacity),
                replacer,
                touched: HashMap::new(),
            }),
            locks: DashMap::new(),
            config,
        }
    }

    pub fn capacity(&self) -> usize {
        self.config.capacity
    }

    pub fn page_size(&self) -> usize {
        self.store.page_size()
    }

    fn lock_for(&self, pid: PageId) -> Arc<PageLock> {
        Arc::clone(
            self.locks
                .entry(pid)
                .or_insert_with(|| Arc::new(PageLock::new(pid)))
                .value(),
        )
    }

    fn existing_lock(&self, pid: PageId) -> Option<Arc<PageLock>> {
        self.locks.get(&pid).map(|entry| Arc::clone(entry.value()))
    }

    /// Fetches `pid` for `tid` under `perm`, blocking until the page lock is
    /// granted.
    ///
    /// Fails with [`BufferError::TransactionAborted`] when the lock wait times
    /// out and with [`BufferError::BufferExhausted`] when the page is not
    /// cached and no resident page can be evicted. Either way the caller's
    /// transaction must abort.
    pub fn fetch(&self, tid: TransactionId, pid: PageId, perm: Permissions) -> BufferResult<PageRef> {
        let mode = perm.lock_mode();
        loop {
            match self.lock_for(pid).acquire(tid, mode, self.config.lock_timeout) {
                Ok(()) => break,
                Err(LockError::Retired(_)) => continue,
                Err(LockError::Timeout { .. }) => {
                    return Err(BufferError::TransactionAborted { tid, pid });
                }
            }
        }

        let mut guard = self.state.lock();
        let state = &mut *guard;
        let page = match state.pages.get(&pid) {
            Some(page) => Arc::clone(page),
            None => {
                if state.pages.len() >= self.config.capacity {
                    self.evict(state)?;
                }
                let data = self.store.read_page(pid)?;
                debug!("loaded page {} for {}", pid, tid);
                let page = Arc::new(RwLock::new(CachedPage::new(pid, data)));
                state.pages.insert(pid, Arc::clone(&page));
                page
            }
        };
        state.replacer.record_access(pid);
        state.touched.entry(tid).or_default().insert(pid);
        Ok(page)
    }

    /// Releases `tid`'s lock on `pid` before the transaction completes.
    pub fn release(&self, tid: TransactionId, pid: PageId) {
        if let Some(lock) = self.existing_lock(pid) {
            lock.release(tid);
        }
    }

    /// Finishes `tid`'s use of the pool.
    ///
    /// On commit every page `tid` dirtied is written back, each preceded by
    /// its forced UPDATE record. On abort those pages are reloaded from the
    /// page store. Then every lock `tid` holds or awaits is released and its
    /// bookkeeping dropped.
    pub fn complete(&self, tid: TransactionId, commit: bool) -> BufferResult<()> {
        let pages: Vec<PageRef> = {
            let state = self.state.lock();
            state
                .touched
                .get(&tid)
                .map(|pids| pids.iter().filter_map(|pid| state.pages.get(pid).cloned()).collect())
                .unwrap_or_default()
        };

        for page in &pages {
            let pid = {
                let page = page.read();
                if page.dirtied_by() != Some(tid) {
                    continue;
                }
                page.id()
            };
            if commit {
                self.flush_page(page)?;
            } else {
                let data = self.store.read_page(pid)?;
                page.write().reload(data);
                debug!("reverted page {} for {}", pid, tid);
            }
        }

        let involved: Vec<Arc<PageLock>> = self
            .locks
            .iter()
            .filter(|entry| entry.value().involves(tid))
            .map(|entry| Arc::clone(entry.value()))
            .collect();
        for lock in involved {
            let _completing = lock.begin_completion();
            if let Some(page) = self.cached(lock.page_id()) {
                if let Some(mut page) = page.try_write() {
                    if !page.is_dirty() {
                        page.set_before_image();
                    }
                }
            }
            lock.release(tid);
        }

        let mut state = self.state.lock();
        state.touched.remove(&tid);
        let pages = &state.pages;
        self.locks
            .retain(|pid, lock| pages.contains_key(pid) || !lock.retire_if_idle());
        debug!("{} completed ({})", tid, if commit { "commit" } else { "abort" });
        Ok(())
    }

    /// Writes `pid` back if it is cached and dirty.
    pub fn flush(&self, pid: PageId) -> BufferResult<()> {
        match self.cached(pid) {
            Some(page) => self.flush_page(&page),
            None => Ok(()),
        }
    }

    /// Writes back every dirty cached page.
    pub fn flush_all(&self) -> BufferResult<()> {
        let pages: Vec<PageRef> = self.state.lock().pages.values().cloned().collect();
        for page in &pages {
            self.flush_page(page)?;
        }
        Ok(())
    }

    /// Writes back the cached pages `tid` has dirtied.
    pub fn flush_pages(&self, tid: TransactionId) -> BufferResult<()> {
        let pages: Vec<PageRef> = {
            let state = self.state.lock();
            state
                .touched
                .get(&tid)
                .map(|pids| pids.iter().filter_map(|pid| state.pages.get(pid).cloned()).collect())
                .unwrap_or_default()
        };
        for page in pages.iter().filter(|page| page.read().dirtied_by() == Some(tid)) {
            self.flush_page(page)?;
        }
        Ok(())
    }

    /// Drops `pid` from the cache without writing it back. Its lock state is
    /// kept.
    pub fn discard(&self, pid: PageId) {
        let mut state = self.state.lock();
        if state.pages.remove(&pid).is_some() {
            state.replacer.remove(pid);
            debug!("discarded page {}", pid);
        }
    }

    /// Logs, forces and writes back one page if it is dirty. A failed write
    /// leaves the page dirty.
    fn flush_page(&self, page: &PageRef) -> BufferResult<()> {
        let mut page = page.write();
        let Some(dirtier) = page.dirtied_by() else {
            return Ok(());
        };
        let pid = page.id();
        self.log
            .log_update(dirtier, pid, page.before_image(), page.data())?;
        self.log.force()?;
        self.store.write_page(pid, page.data())?;
        page.mark_clean();
        debug!("flushed page {} dirtied by {}", pid, dirtier);
        Ok(())
    }

    /// Evicts the least recently used clean page that is not exclusively
    /// locked.
    fn evict(&self, state: &mut PoolState) -> BufferResult<()> {
        let pages = &state.pages;
        let victim = state.replacer.victim(&|pid| {
            pages
                .get(&pid)
                .is_some_and(|page| self.is_evictable(pid, page))
        });
        let Some(victim) = victim else {
            warn!(
                "buffer pool exhausted: no clean page among {} resident",
                state.pages.len()
            );
            return Err(BufferError::BufferExhausted {
                capacity: self.config.capacity,
            });
        };

        state.pages.remove(&victim);
        state.replacer.remove(victim);
        for pids in state.touched.values_mut() {
            pids.remove(&victim);
        }
        self.locks.remove_if(&victim, |_, lock| lock.retire_if_idle());
        debug!("evicted page {}", victim);
        Ok(())
    }

    fn is_evictable(&self, pid: PageId, page: &PageRef) -> bool {
        let clean = page.try_read().is_some_and(|page| !page.is_dirty());
        let exclusively_locked = self
            .locks
            .get(&pid)
            .is_some_and(|lock| lock.grant_mode() == Some(LockMode::Exclusive));
        clean && !exclusively_locked
    }

    /// The cached copy of `pid`, without taking its page lock.
    pub fn cached(&self, pid: PageId) -> Option<PageRef> {
        self.state.lock().pages.get(&pid).cloned()
    }

    pub fn is_resident(&self, pid: PageId) -> bool {
        self.state.lock().pages.contains_key(&pid)
    }

    pub fn resident_count(&self) -> usize {
        self.state.lock().pages.len()
    }

    pub fn holds_lock(&self, tid: TransactionId, pid: PageId) -> bool {
        self.existing_lock(pid)
            .is_some_and(|lock| lock.holds(tid).is_some())
    }

    /// Number of transactions currently granted the lock on `pid`.
    pub fn num_holders(&self, pid: PageId) -> usize {
        self.existing_lock(pid).map_or(0, |lock| lock.holder_count())
    }
}
