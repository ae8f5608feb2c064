#![allow(dead_code)]

use anyhow::Result;
use std::path::Path;
use std::time::Duration;
use vibestore::config::DatabaseConfig;
use vibestore::database::Database;
use vibestore::storage::page::{PageId, Permissions, TableId};
use vibestore::storage::PageStore;
use vibestore::transaction::Transaction;

pub const PAGE_SIZE: usize = 64;
pub const TABLE: TableId = 1;

// Small pages and a short lock timeout keep the tests fast
pub fn test_config(dir: &Path, capacity: usize) -> DatabaseConfig {
    let mut config = DatabaseConfig::new(dir);
    config.page_size = PAGE_SIZE;
    config.buffer_pool.capacity = capacity;
    config.buffer_pool.lock_timeout = Duration::from_millis(200);
    config
}

pub fn open_db(dir: &Path) -> Result<Database> {
    Ok(Database::open(test_config(dir, 8))?)
}

// Allocate `count` pages in the test table
pub fn allocate_pages(db: &Database, count: usize) -> Result<Vec<PageId>> {
    let mut pids = Vec::with_capacity(count);
    for _ in 0..count {
        pids.push(db.allocate_page(TABLE)?);
    }
    Ok(pids)
}

pub fn write_u32(txn: &mut Transaction, pid: PageId, value: u32) -> Result<()> {
    let page = txn.fetch(pid, Permissions::ReadWrite)?;
    page.write().write_at(txn.id(), 0, &value.to_be_bytes());
    Ok(())
}

pub fn read_u32(txn: &mut Transaction, pid: PageId) -> Result<u32> {
    let page = txn.fetch(pid, Permissions::ReadOnly)?;
    let guard = page.read();
    Ok(u32::from_be_bytes(guard.data()[..4].try_into()?))
}

// Value stored on disk, bypassing the buffer pool
pub fn stored_u32(db: &Database, pid: PageId) -> Result<u32> {
    let data = db.store().read_page(pid)?;
    Ok(u32::from_be_bytes(data[..4].try_into()?))
}

// Leave a transaction running across a simulated crash
pub fn crash_with(txn: Transaction) {
    std::mem::forget(txn);
}
