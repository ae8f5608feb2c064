//! Rollback and crash recovery over the write-ahead log.
//!
//! Rollback walks the log backwards from the tail, restoring the
//! before-image of every update the transaction logged and recording each
//! restore as a compensation record. Recovery replays every update and
//! compensation after the last checkpoint, then rolls back the transactions
//! that never finished.

use std::collections::BTreeSet;
use std::sync::Arc;

use log::{debug, info};
use thiserror::Error;

use crate::storage::error::{BufferError, StorageError, WalError};
use crate::storage::wal::{LogFile, LogRecord, LOG_HEADER_SIZE};
use crate::storage::{BufferPool, PageStore};
use crate::transaction::TransactionId;

#[derive(Error, Debug)]
pub enum RecoveryError {
    /// Rollback reached the transaction's COMMIT record.
    #[error("Cannot roll back {0}: it has already committed")]
    AlreadyCommitted(TransactionId),

    #[error("Log error: {0}")]
    Wal(#[from] WalError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Buffer error: {0}")]
    Buffer(#[from] BufferError),
}

pub type RecoveryResult<T> = Result<T, RecoveryError>;

/// Recovery statistics.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RecoveryStats {
    /// Records read from the log.
    pub records_scanned: usize,
    /// Page images re-applied by the redo pass.
    pub pages_redone: usize,
    /// Page images restored while rolling back losers.
    pub pages_undone: usize,
    /// Transactions rolled back, in rollback order.
    pub losers: Vec<TransactionId>,
    /// Largest transaction id appearing anywhere in the log.
    pub max_transaction_id: Option<TransactionId>,
}

pub struct RecoveryManager {
    log: Arc<LogFile>,
    store: Arc<dyn PageStore>,
    pool: Arc<BufferPool>,
}

impl RecoveryManager {
    pub fn new(log: Arc<LogFile>, store: Arc<dyn PageStore>, pool: Arc<BufferPool>) -> Self {
        Self { log, store, pool }
    }

    /// Undoes every logged update of `tid` and returns how many pages were
    /// restored.
    ///
    /// Fails with [`RecoveryError::AlreadyCommitted`] if `tid`'s COMMIT is
    /// found first. Finding its ABORT first means it was already rolled back.
    pub fn rollback(&self, tid: TransactionId) -> RecoveryResult<usize> {
        let mut undone = 0;
        for entry in self.log.iter_backward() {
            let (offset, record) = entry?;
            if record.tid() != Some(tid) {
                continue;
            }
            match record {
                LogRecord::Commit(_) => return Err(RecoveryError::AlreadyCommitted(tid)),
                LogRecord::Abort(_) => {
                    debug!("{} already rolled back at offset {}", tid, offset);
                    break;
                }
                LogRecord::Begin(_) => break,
                LogRecord::Update { before, .. } => {
                    self.store.write_page(before.pid, &before.data)?;
                    self.pool.discard(before.pid);
                    debug!("undid {} update of page {} at offset {}", tid, before.pid, offset);
                    self.log.log_compensation(tid, before)?;
                    undone += 1;
                }
                LogRecord::Compensation { .. } | LogRecord::Checkpoint { .. } => {}
            }
        }
        self.log.force()?;
        Ok(undone)
    }

    /// Brings the page store to the state of all committed work.
    pub fn recover(&self) -> RecoveryResult<RecoveryStats> {
        let checkpoint = self.log.last_checkpoint()?;
        let redo_from = checkpoint.unwrap_or(LOG_HEADER_SIZE);
        match checkpoint {
            Some(offset) => info!("recovery: redo from checkpoint at offset {}", offset),
            None => info!("recovery: no checkpoint, redo from start of log"),
        }

        let mut stats = RecoveryStats::default();
        let mut losers = BTreeSet::new();
        for entry in self.log.iter_from(LOG_HEADER_SIZE) {
            let (offset, record) = entry?;
            stats.records_scanned += 1;
            stats.max_transaction_id = stats.max_transaction_id.max(record.tid());
            if offset < redo_from {
                continue;
            }

            match &record {
                LogRecord::Begin(tid) => {
                    losers.insert(*tid);
                }
                LogRecord::Commit(tid) | LogRecord::Abort(tid) => {
                    losers.remove(tid);
                }
                LogRecord::Checkpoint { active } => losers.extend(active.iter().copied()),
                LogRecord::Update { .. } | LogRecord::Compensation { .. } => {}
            }
            if let Some(image) = record.redo_image() {
                self.store.write_page(image.pid, &image.data)?;
                self.pool.discard(image.pid);
                stats.pages_redone += 1;
            }
        }

        for &tid in losers.iter().rev() {
            let undone = self.rollback(tid)?;
            self.log.log_abort(tid)?;
            info!("recovery: rolled back {} ({} pages)", tid, undone);
            stats.pages_undone += undone;
            stats.losers.push(tid);
        }
        self.log.force()?;

        info!(
            "recovery: scanned {} records, redid {} pages, rolled back {} transactions",
            stats.records_scanned,
            stats.pages_redone,
            stats.losers.len()
        );
        Ok(stats)
    }
}
