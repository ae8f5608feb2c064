//! Transaction identifiers.
//!
//! Every log record carries the id of the transaction that wrote it as a
//! signed 64-bit field, with negative values reserved for records that
//! belong to no transaction. A reopened database must hand out ids past the
//! largest one recovery found in the log.

use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TransactionId(pub u64);

impl TransactionId {
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    pub fn value(&self) -> u64 {
        self.0
    }

    /// The id as written into a log record's transaction field.
    pub fn to_log(self) -> i64 {
        self.0 as i64
    }

    /// Reads a log record's transaction field. `None` for the negative
    /// values no transaction can own.
    pub fn from_log(raw: i64) -> Option<Self> {
        u64::try_from(raw).ok().map(Self)
    }
}

impl std::fmt::Display for TransactionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "T_{}", self.0)
    }
}

/// Hands out increasing transaction ids, shared by every thread that
/// begins transactions.
pub struct TransactionIdGenerator {
    next_id: AtomicU64,
}

impl TransactionIdGenerator {
    /// A generator that never returns `last` or anything below it. Ids start
    /// at 1 on an empty log.
    pub fn after(last: Option<TransactionId>) -> Self {
        let first = last.map_or(1, |id| id.value().saturating_add(1).max(1));
        Self {
            next_id: AtomicU64::new(first.min(i64::MAX as u64)),
        }
    }

    pub fn next(&self) -> TransactionId {
        TransactionId::new(self.next_id.fetch_add(1, Ordering::SeqCst))
    }
}
