//! Transaction manager for coordinating transaction lifecycle.
//!
//! Commit writes back the transaction's dirty pages, makes its COMMIT record
//! durable and only then releases its locks. Abort undoes whatever reached
//! the page store using the log, logs ABORT, and reverts the cached pages.

use std::collections::HashSet;
use std::sync::Arc;

use log::{debug, warn};
use parking_lot::Mutex;
use thiserror::Error;

use super::id::{TransactionId, TransactionIdGenerator};
use super::state::TransactionState;
use crate::recovery::{RecoveryError, RecoveryManager};
use crate::storage::error::{BufferError, WalError};
use crate::storage::page::{PageId, PageRef, Permissions};
use crate::storage::wal::LogFile;
use crate::storage::BufferPool;

/// Error types for transaction operations.
#[derive(Error, Debug)]
pub enum TransactionError {
    /// The transaction hit a lock timeout or buffer exhaustion and was rolled back.
    #[error("Transaction {0} was aborted")]
    Aborted(TransactionId),

    #[error("Transaction {0} is not active")]
    NotActive(TransactionId),

    #[error("Buffer error: {0}")]
    Buffer(#[from] BufferError),

    #[error("Log error: {0}")]
    Wal(#[from] WalError),

    #[error("Recovery error: {0}")]
    Recovery(#[from] RecoveryError),
}

/// Result type for transaction operations.
pub type Result<T> = std::result::Result<T, TransactionError>;

/// The transaction manager handles the lifecycle of all transactions.
pub struct TransactionManager {
    /// Generator for unique transaction IDs.
    id_generator: TransactionIdGenerator,
    /// Transactions that have begun and not yet finished.
    active: Mutex<HashSet<TransactionId>>,
    pool: Arc<BufferPool>,
    log: Arc<LogFile>,
    recovery: Arc<RecoveryManager>,
}

impl TransactionManager {
    pub fn new(
        pool: Arc<BufferPool>,
        log: Arc<LogFile>,
        recovery: Arc<RecoveryManager>,
        id_generator: TransactionIdGenerator,
    ) -> Self {
        Self {
            id_generator,
            active: Mutex::new(HashSet::new()),
            pool,
            log,
            recovery,
        }
    }

    pub fn buffer_pool(&self) -> &Arc<BufferPool> {
        &self.pool
    }

    /// Begins a new transaction and logs its BEGIN record.
    pub fn begin(&self) -> Result<TransactionId> {
        let mut active = self.active.lock();
        let id = self.id_generator.next();
        self.log.log_begin(id)?;
        active.insert(id);
        drop(active);
        debug!("{} began", id);
        Ok(id)
    }

    /// Commits a transaction.
    pub fn commit(&self, id: TransactionId) -> Result<()> {
        self.ensure_active(id)?;
        self.pool.flush_pages(id)?;
        {
            let mut active = self.active.lock();
            self.log.log_commit(id)?;
            active.remove(&id);
        }
        self.pool.complete(id, true)?;
        debug!("{} committed", id);
        Ok(())
    }

    /// Aborts a transaction.
    pub fn abort(&self, id: TransactionId) -> Result<()> {
        self.ensure_active(id)?;
        let undone = self.recovery.rollback(id)?;
        {
            let mut active = self.active.lock();
            self.log.log_abort(id)?;
            active.remove(&id);
        }
        self.pool.complete(id, false)?;
        debug!("{} aborted ({} pages restored from log)", id, undone);
        Ok(())
    }

    /// Runs `f` over the sorted active set. No BEGIN, COMMIT or ABORT record
    /// can be logged until `f` returns, so a record `f` appends sees exactly
    /// the transactions that began and have not finished before it.
    pub fn with_active<T>(&self, f: impl FnOnce(&[TransactionId]) -> T) -> T {
        let active = self.active.lock();
        let mut ids: Vec<TransactionId> = active.iter().copied().collect();
        ids.sort();
        f(&ids)
    }

    /// Returns a sorted list of all active transactions.
    pub fn active_transactions(&self) -> Vec<TransactionId> {
        self.with_active(|ids| ids.to_vec())
    }

    /// Checks if a transaction exists and is active.
    pub fn is_active(&self, id: TransactionId) -> bool {
        self.active.lock().contains(&id)
    }

    fn ensure_active(&self, id: TransactionId) -> Result<()> {
        if !self.is_active(id) {
            return Err(TransactionError::NotActive(id));
        }
        Ok(())
    }
}

/// A handle to a transaction that automatically aborts on drop if still active.
pub struct Transaction {
    id: TransactionId,
    manager: Arc<TransactionManager>,
    state: TransactionState,
}

impl Transaction {
    /// Begins a new transaction.
    pub fn begin(manager: Arc<TransactionManager>) -> Result<Self> {
        let id = manager.begin()?;
        Ok(Self {
            id,
            manager,
            state: TransactionState::Active,
        })
    }

    /// Gets the transaction ID.
    pub fn id(&self) -> TransactionId {
        self.id
    }

    pub fn state(&self) -> TransactionState {
        self.state
    }

    /// Fetches a page under `perm`.
    ///
    /// A lock timeout or buffer exhaustion rolls the whole transaction back
    /// before [`TransactionError::Aborted`] is returned.
    pub fn fetch(&mut self, pid: PageId, perm: Permissions) -> Result<PageRef> {
        if !self.state.is_active() {
            return Err(TransactionError::NotActive(self.id));
        }
        match self.manager.pool.fetch(self.id, pid, perm) {
            Ok(page) => Ok(page),
            Err(e) if e.is_abort_condition() => {
                warn!("{} aborting: {}", self.id, e);
                self.state = TransactionState::Aborted;
                self.manager.abort(self.id)?;
                Err(TransactionError::Aborted(self.id))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Gives up the lock on `pid` early.
    pub fn release(&self, pid: PageId) {
        self.manager.pool.release(self.id, pid);
    }

    /// Commits the transaction. If the COMMIT record was not written, the
    /// handle stays active and aborts when dropped.
    pub fn commit(mut self) -> Result<()> {
        let result = self.manager.commit(self.id);
        if !self.manager.is_active(self.id) {
            self.state = TransactionState::Committed;
        }
        result
    }

    /// Aborts the transaction.
    pub fn abort(mut self) -> Result<()> {
        self.state = TransactionState::Aborted;
        self.manager.abort(self.id)
    }
}

impl Drop for Transaction {
    fn drop(&mut self) {
        if self.state.is_active() {
            if let Err(e) = self.manager.abort(self.id) {
                warn!("abort of dropped {} failed: {}", self.id, e);
            }
        }
    }
}
