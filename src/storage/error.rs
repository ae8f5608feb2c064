//! Storage layer error types.

use thiserror::Error;

use crate::storage::page::PageId;
use crate::transaction::TransactionId;

/// Errors raised by a page store.
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Page not found: {0}")]
    PageNotFound(PageId),

    #[error("Page size mismatch: expected {expected} bytes, got {actual}")]
    PageSizeMismatch { expected: usize, actual: usize },

    #[error("Write of page {0} failed")]
    WriteFailed(PageId),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for page store operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors raised by the write-ahead log.
#[derive(Error, Debug)]
pub enum WalError {
    #[error("Corrupt log record at offset {offset}: {reason}")]
    Corrupt { offset: u64, reason: String },

    #[error("Unknown log record type {tag} at offset {offset}")]
    UnknownRecordType { tag: i32, offset: u64 },

    #[error("Page image of {actual} bytes does not match page size {expected}")]
    PageSizeMismatch { expected: usize, actual: usize },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl WalError {
    /// True when the record was cut short by the end of the file.
    pub fn is_truncated(&self) -> bool {
        matches!(self, WalError::Io(e) if e.kind() == std::io::ErrorKind::UnexpectedEof)
    }
}

/// Result type for log operations.
pub type WalResult<T> = Result<T, WalError>;

/// Errors surfaced by the buffer pool.
///
/// Lock timeouts and exhaustion are expected conditions that the caller
/// resolves by aborting its transaction. Storage and log failures are
/// infrastructure faults.
#[derive(Error, Debug)]
pub enum BufferError {
    #[error("Transaction {tid} aborted: lock wait on page {pid} timed out")]
    TransactionAborted { tid: TransactionId, pid: PageId },

    #[error("Buffer pool exhausted: no clean page among {capacity} resident pages")]
    BufferExhausted { capacity: usize },

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Log error: {0}")]
    Wal(#[from] WalError),
}

impl BufferError {
    /// True for conditions resolved by aborting the requesting transaction.
    pub fn is_abort_condition(&self) -> bool {
        matches!(
            self,
            BufferError::TransactionAborted { .. } | BufferError::BufferExhausted { .. }
        )
    }
}

/// Result type for buffer pool operations.
pub type BufferResult<T> = Result<T, BufferError>;
