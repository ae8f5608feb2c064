//! Transaction management module.
//!
//! This module provides transaction support for vibestore, including:
//! - Transaction identifiers that stay unique across restarts
//! - Transaction lifecycle management (begin, commit, abort)
//! - Handles that abort automatically when dropped while active

pub mod id;
pub mod manager;
pub mod state;

// Re-export commonly used types
pub use id::{TransactionId, TransactionIdGenerator};
pub use manager::{Transaction, TransactionError, TransactionManager};
pub use state::TransactionState;
