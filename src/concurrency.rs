//! Concurrency control.
//!
//! Pages are locked individually under strict two-phase locking: a
//! transaction keeps every page lock until it commits or aborts. Deadlocks
//! are broken by lock wait timeouts rather than a wait-for graph.

pub mod lock;

pub use lock::{CompletionGuard, LockError, LockMode, PageLock};
