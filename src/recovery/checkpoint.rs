//! Checkpoints.
//!
//! A checkpoint writes back every dirty page, each preceded by its UPDATE
//! record, then logs the set of running transactions. Recovery only replays
//! the log from the most recent checkpoint onwards.

use std::sync::Arc;

use log::debug;

use super::manager::RecoveryResult;
use crate::storage::wal::LogFile;
use crate::storage::BufferPool;
use crate::transaction::TransactionManager;

pub struct Checkpointer {
    pool: Arc<BufferPool>,
    log: Arc<LogFile>,
}

impl Checkpointer {
    pub fn new(pool: Arc<BufferPool>, log: Arc<LogFile>) -> Self {
        Self { pool, log }
    }

    /// Takes a checkpoint and returns the offset of the checkpoint record.
    ///
    /// The active set is read after the write-back, while `transactions`
    /// holds off BEGIN, COMMIT and ABORT records, so the record lists exactly
    /// the transactions running at its position in the log.
    pub fn checkpoint(&self, transactions: &TransactionManager) -> RecoveryResult<u64> {
        self.log.force()?;
        self.pool.flush_all()?;
        let offset = transactions.with_active(|active| self.log.log_checkpoint(active))?;
        debug!("checkpoint complete at offset {}", offset);
        Ok(offset)
    }
}
