//! Recovery.
//!
//! - Transaction rollback using before-images from the log
//! - Crash recovery: redo from the last checkpoint, then undo of losers
//! - Checkpoints bounding how much log recovery has to replay

pub mod checkpoint;
pub mod manager;

pub use checkpoint::Checkpointer;
pub use manager::{RecoveryError, RecoveryManager, RecoveryResult, RecoveryStats};
