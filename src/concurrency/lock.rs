//! Per-page locking.
//!
//! Every page the buffer pool tracks has one [`PageLock`]. Any number of
//! transactions may share it, exactly one may hold it exclusively, and the
//! sole shared holder may upgrade in place. Requests that cannot be granted
//! wait on a condition variable until the state changes or their time budget
//! runs out; a timed-out request means the caller's transaction must abort.

use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

use log::{debug, warn};
use parking_lot::{Condvar, Mutex};
use thiserror::Error;

use crate::storage::PageId;
use crate::transaction::TransactionId;

/// Lock modes supported by the system.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LockMode {
    /// Shared lock for read operations.
    Shared,
    /// Exclusive lock for write operations.
    Exclusive,
}

impl LockMode {
    /// Checks if this lock mode is compatible with another.
    pub fn is_compatible_with(&self, other: &LockMode) -> bool {
        matches!((self, other), (LockMode::Shared, LockMode::Shared))
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LockError {
    #[error("{tid} timed out after {waited:?} waiting for {mode:?} lock on page {pid}")]
    Timeout {
        tid: TransactionId,
        pid: PageId,
        mode: LockMode,
        waited: Duration,
    },

    /// The lock was dropped from the pool's lock table; look it up again.
    #[error("Lock on page {0} was retired")]
    Retired(PageId),
}

#[derive(Debug, Clone, Copy)]
struct Waiter {
    tid: TransactionId,
    mode: LockMode,
}

#[derive(Debug, Default)]
struct LockState {
    holders: HashMap<TransactionId, LockMode>,
    waiting: VecDeque<Waiter>,
    /// Number of in-flight transaction completions touching this page.
    completing: usize,
    retired: bool,
}

impl LockState {
    fn is_idle(&self) -> bool {
        self.holders.is_empty() && self.waiting.is_empty() && self.completing == 0
    }

    fn grant_mode(&self) -> Option<LockMode> {
        if self.holders.is_empty() {
            None
        } else if self.holders.values().any(|m| *m == LockMode::Exclusive) {
            Some(LockMode::Exclusive)
        } else {
            Some(LockMode::Shared)
        }
    }

    /// `tid` already holds a grant at least as strong as `mode`.
    fn satisfies(&self, tid: TransactionId, mode: LockMode) -> bool {
        matches!(
            (self.holders.get(&tid), mode),
            (Some(LockMode::Exclusive), _) | (Some(LockMode::Shared), LockMode::Shared)
        )
    }

    fn compatible(&self, tid: TransactionId, mode: LockMode) -> bool {
        match (self.holders.get(&tid), mode) {
            (Some(LockMode::Exclusive), _) => true,
            (Some(LockMode::Shared), LockMode::Shared) => true,
            (Some(LockMode::Shared), LockMode::Exclusive) => self.holders.len() == 1,
            (None, LockMode::Shared) => self.grant_mode() != Some(LockMode::Exclusive),
            (None, LockMode::Exclusive) => self.holders.is_empty(),
        }
    }

    /// A grant is possible when no completion is running, the holders allow
    /// it, and no waiter queued ahead could take a conflicting grant instead.
    fn grantable(&self, tid: TransactionId, mode: LockMode) -> bool {
        if self.completing > 0 || !self.compatible(tid, mode) {
            return false;
        }
        self.waiting
            .iter()
            .take_while(|w| w.tid != tid)
            .all(|w| !(self.compatible(w.tid, w.mode) && conflicts(w.mode, mode)))
    }

    fn remove_waiter(&mut self, tid: TransactionId) -> bool {
        let before = self.waiting.len();
        self.waiting.retain(|w| w.tid != tid);
        self.waiting.len() != before
    }
}

fn conflicts(a: LockMode, b: LockMode) -> bool {
    !a.is_compatible_with(&b)
}

/// Lock state of a single page.
#[derive(Debug)]
pub struct PageLock {
    pid: PageId,
    state: Mutex<LockState>,
    changed: Condvar,
}

impl PageLock {
    pub fn new(pid: PageId) -> Self {
        Self {
            pid,
            state: Mutex::new(LockState::default()),
            changed: Condvar::new(),
        }
    }

    pub fn page_id(&self) -> PageId {
        self.pid
    }

    /// Acquires `mode` for `tid`, waiting at most `timeout`.
    ///
    /// Re-requesting a mode already covered by the current grant returns at
    /// once. A shared holder asking for exclusive is an upgrade: granted
    /// immediately when it is the sole holder, otherwise queued while keeping
    /// its shared grant. The first pending upgrade goes to the front of the
    /// queue; any further upgrade queues behind ordinary waiters.
    pub fn acquire(
        &self,
        tid: TransactionId,
        mode: LockMode,
        timeout: Duration,
    ) -> Result<(), LockError> {
        let mut state = self.state.lock();
        if state.retired {
            return Err(LockError::Retired(self.pid));
        }
        if state.satisfies(tid, mode) {
            return Ok(());
        }
        if state.grantable(tid, mode) {
            state.holders.insert(tid, mode);
            return Ok(());
        }

        let upgrade = state.holders.contains_key(&tid);
        let upgrade_pending = state
            .waiting
            .iter()
            .any(|w| state.holders.contains_key(&w.tid));
        let waiter = Waiter { tid, mode };
        if upgrade && !upgrade_pending {
            state.waiting.push_front(waiter);
        } else {
            state.waiting.push_back(waiter);
        }
        debug!("{} waiting for {:?} lock on page {}", tid, mode, self.pid);

        let started = Instant::now();
        let deadline = started + timeout;
        loop {
            let timed_out = self.changed.wait_until(&mut state, deadline).timed_out();
            if state.grantable(tid, mode) {
                state.remove_waiter(tid);
                state.holders.insert(tid, mode);
                drop(state);
                self.changed.notify_all();
                return Ok(());
            }
            if timed_out {
                state.remove_waiter(tid);
                drop(state);
                self.changed.notify_all();
                let waited = started.elapsed();
                warn!(
                    "{} gave up on {:?} lock for page {} after {:?}",
                    tid, mode, self.pid, waited
                );
                return Err(LockError::Timeout {
                    tid,
                    pid: self.pid,
                    mode,
                    waited,
                });
            }
        }
    }

    /// Drops `tid`'s grant or pending request. Returns false if it had neither.
    pub fn release(&self, tid: TransactionId) -> bool {
        let mut state = self.state.lock();
        let released = state.holders.remove(&tid).is_some();
        let dequeued = state.remove_waiter(tid);
        drop(state);
        if released || dequeued {
            self.changed.notify_all();
        }
        released || dequeued
    }

    pub fn holds(&self, tid: TransactionId) -> Option<LockMode> {
        self.state.lock().holders.get(&tid).copied()
    }

    /// True if `tid` holds or waits for this lock.
    pub fn involves(&self, tid: TransactionId) -> bool {
        let state = self.state.lock();
        state.holders.contains_key(&tid) || state.waiting.iter().any(|w| w.tid == tid)
    }

    pub fn holder_count(&self) -> usize {
        self.state.lock().holders.len()
    }

    pub fn grant_mode(&self) -> Option<LockMode> {
        self.state.lock().grant_mode()
    }

    #[cfg(test)]
    fn is_idle(&self) -> bool {
        self.state.lock().is_idle()
    }

    /// Marks the lock retired if nobody holds, awaits or is completing on it.
    /// Requests arriving afterwards fail with [`LockError::Retired`].
    pub fn retire_if_idle(&self) -> bool {
        let mut state = self.state.lock();
        if state.is_idle() {
            state.retired = true;
        }
        state.retired
    }

    /// Blocks new grants until the returned guard is dropped.
    pub fn begin_completion(&self) -> CompletionGuard<'_> {
        self.state.lock().completing += 1;
        CompletionGuard { lock: self }
    }
}

/// Holds a [`PageLock`] in its completing state.
pub struct CompletionGuard<'a> {
    lock: &'a PageLock,
}

impl Drop for CompletionGuard<'_> {
    fn drop(&mut self) {
        self.lock.state.lock().completing -= 1;
        self.lock.changed.notify_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Barrier};
    use std::thread;

    const SHORT: Duration = Duration::from_millis(100);
    const LONG: Duration = Duration::from_secs(5);

    fn tid(id: u64) -> TransactionId {
        TransactionId::new(id)
    }

    fn page_lock() -> PageLock {
        PageLock::new(PageId::new(1, 0))
    }

    #[test]
    fn test_lock_compatibility() {
        assert!(LockMode::Shared.is_compatible_with(&LockMode::Shared));
        assert!(!LockMode::Shared.is_compatible_with(&LockMode::Exclusive));
        assert!(!LockMode::Exclusive.is_compatible_with(&LockMode::Shared));
        assert!(!LockMode::Exclusive.is_compatible_with(&LockMode::Exclusive));
    }

    #[test]
    fn test_multiple_shared_locks() {
        let lock = page_lock();
        lock.acquire(tid(1), LockMode::Shared, SHORT).unwrap();
        lock.acquire(tid(2), LockMode::Shared, SHORT).unwrap();
        lock.acquire(tid(3), LockMode::Shared, SHORT).unwrap();

        assert_eq!(lock.holder_count(), 3);
        assert_eq!(lock.grant_mode(), Some(LockMode::Shared));
        assert_eq!(lock.holds(tid(2)), Some(LockMode::Shared));
    }

    #[test]
    fn test_exclusive_reentrant() {
        let lock = page_lock();
        lock.acquire(tid(1), LockMode::Exclusive, SHORT).unwrap();
        lock.acquire(tid(1), LockMode::Shared, SHORT).unwrap();
        lock.acquire(tid(1), LockMode::Exclusive, SHORT).unwrap();

        assert_eq!(lock.holder_count(), 1);
        assert_eq!(lock.holds(tid(1)), Some(LockMode::Exclusive));
    }

    #[test]
    fn test_exclusive_blocks_until_release() {
        let lock = Arc::new(page_lock());
        let barrier = Arc::new(Barrier::new(2));
        lock.acquire(tid(1), LockMode::Shared, SHORT).unwrap();

        let lock_clone = Arc::clone(&lock);
        let barrier_clone = Arc::clone(&barrier);
        let handle = thread::spawn(move || {
            barrier_clone.wait();
            lock_clone.acquire(tid(2), LockMode::Exclusive, LONG)
        });

        barrier.wait();
        thread::sleep(Duration::from_millis(50));
        assert_eq!(lock.holds(tid(2)), None);
        assert!(lock.involves(tid(2)));

        assert!(lock.release(tid(1)));
        handle.join().unwrap().unwrap();
        assert_eq!(lock.holds(tid(2)), Some(LockMode::Exclusive));
    }

    #[test]
    fn test_timeout_removes_waiter() {
        let lock = page_lock();
        lock.acquire(tid(1), LockMode::Exclusive, SHORT).unwrap();

        let err = lock.acquire(tid(2), LockMode::Shared, SHORT).unwrap_err();
        match err {
            LockError::Timeout { tid: t, mode, waited, .. } => {
                assert_eq!(t, tid(2));
                assert_eq!(mode, LockMode::Shared);
                assert!(waited >= SHORT);
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(!lock.involves(tid(2)));
        assert_eq!(lock.holder_count(), 1);
    }

    #[test]
    fn test_sole_shared_holder_upgrades() {
        let lock = page_lock();
        lock.acquire(tid(1), LockMode::Shared, SHORT).unwrap();
        lock.acquire(tid(1), LockMode::Exclusive, SHORT).unwrap();

        assert_eq!(lock.holds(tid(1)), Some(LockMode::Exclusive));
        assert_eq!(lock.holder_count(), 1);
    }

    #[test]
    fn test_upgrade_waits_for_other_holders() {
        let lock = Arc::new(page_lock());
        lock.acquire(tid(1), LockMode::Shared, SHORT).unwrap();
        lock.acquire(tid(2), LockMode::Shared, SHORT).unwrap();

        assert!(lock.acquire(tid(1), LockMode::Exclusive, SHORT).is_err());
        assert_eq!(lock.holds(tid(1)), Some(LockMode::Shared));

        let lock_clone = Arc::clone(&lock);
        let handle = thread::spawn(move || lock_clone.acquire(tid(1), LockMode::Exclusive, LONG));
        thread::sleep(Duration::from_millis(50));
        assert_eq!(lock.holds(tid(1)), Some(LockMode::Shared));

        lock.release(tid(2));
        handle.join().unwrap().unwrap();
        assert_eq!(lock.holds(tid(1)), Some(LockMode::Exclusive));
    }

    #[test]
    fn test_competing_upgrades_resolve_by_timeout() {
        let lock = Arc::new(page_lock());
        let barrier = Arc::new(Barrier::new(2));
        lock.acquire(tid(1), LockMode::Shared, SHORT).unwrap();
        lock.acquire(tid(2), LockMode::Shared, SHORT).unwrap();

        let patient = {
            let lock = Arc::clone(&lock);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                lock.acquire(tid(1), LockMode::Exclusive, LONG)
            })
        };
        let impatient = {
            let lock = Arc::clone(&lock);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                thread::sleep(Duration::from_millis(20));
                let result = lock.acquire(tid(2), LockMode::Exclusive, SHORT);
                // The loser aborts and gives up its shared grant.
                lock.release(tid(2));
                result
            })
        };

        assert!(matches!(
            impatient.join().unwrap(),
            Err(LockError::Timeout { .. })
        ));
        patient.join().unwrap().unwrap();
        assert_eq!(lock.holds(tid(1)), Some(LockMode::Exclusive));
        assert_eq!(lock.holder_count(), 1);
    }

    #[test]
    fn test_release_unknown_is_noop() {
        let lock = page_lock();
        assert!(!lock.release(tid(9)));
        lock.acquire(tid(1), LockMode::Shared, SHORT).unwrap();
        assert!(!lock.release(tid(9)));
        assert_eq!(lock.holder_count(), 1);
    }

    #[test]
    fn test_completion_blocks_new_grants() {
        let lock = page_lock();
        {
            let _guard = lock.begin_completion();
            assert!(lock.acquire(tid(1), LockMode::Shared, SHORT).is_err());
            assert!(!lock.is_idle());
        }
        lock.acquire(tid(1), LockMode::Shared, SHORT).unwrap();
    }

    #[test]
    fn test_completion_wakes_waiters() {
        let lock = Arc::new(page_lock());
        let guard_lock = Arc::clone(&lock);
        let handle = {
            let lock = Arc::clone(&lock);
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(20));
                lock.acquire(tid(2), LockMode::Exclusive, LONG)
            })
        };
        {
            let _guard = guard_lock.begin_completion();
            thread::sleep(Duration::from_millis(100));
            assert_eq!(lock.holds(tid(2)), None);
        }
        handle.join().unwrap().unwrap();
        assert_eq!(lock.holds(tid(2)), Some(LockMode::Exclusive));
    }

    #[test]
    fn test_retire_only_when_idle() {
        let lock = page_lock();
        lock.acquire(tid(1), LockMode::Shared, SHORT).unwrap();
        assert!(!lock.retire_if_idle());

        lock.release(tid(1));
        assert!(lock.is_idle());
        assert!(lock.retire_if_idle());
        assert_eq!(
            lock.acquire(tid(2), LockMode::Shared, SHORT),
            Err(LockError::Retired(PageId::new(1, 0)))
        );
    }
}
