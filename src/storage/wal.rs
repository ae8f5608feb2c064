//! Write-ahead log.
//!
//! An UPDATE record describing a page change is forced to the log before the
//! changed page reaches the page store, so the log always covers at least
//! what is durable in the pages.

pub mod log_file;
pub mod record;

pub use log_file::{LogFile, LogIter, ReverseLogIter};
pub use record::{LogRecord, PageImage, RecordType, LOG_HEADER_SIZE, NO_CHECKPOINT};
