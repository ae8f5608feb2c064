pub mod concurrency;
pub mod config;
pub mod database;
pub mod recovery;
pub mod storage;
pub mod transaction;
