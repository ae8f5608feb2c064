//! File-backed page store.

pub mod file_store;

pub use file_store::FilePageStore;
