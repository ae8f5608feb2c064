use crate::config::DatabaseConfig;
use crate::recovery::{Checkpointer, RecoveryManager, RecoveryResult, RecoveryStats};
use crate::storage::error::StorageResult;
use crate::storage::page::{PageId, TableId};
use crate::storage::wal::LogFile;
use crate::storage::{BufferPool, FilePageStore, PageStore};
use crate::transaction::{Transaction, TransactionError, TransactionIdGenerator, TransactionManager};
use anyhow::{bail, Context, Result};
use log::{info, warn};
use std::sync::Arc;

/// Owns every component of an open database.
///
/// Opening runs crash recovery before any transaction can begin.
pub struct Database {
    config: DatabaseConfig,
    store: Arc<dyn PageStore>,
    log: Arc<LogFile>,
    buffer_pool: Arc<BufferPool>,
    recovery: Arc<RecoveryManager>,
    transactions: Arc<TransactionManager>,
    checkpointer: Checkpointer,
    recovery_stats: RecoveryStats,
}

impl Database {
    /// Open the database in `config.data_dir`, creating it if needed
    pub fn open(config: DatabaseConfig) -> Result<Self> {
        let store = FilePageStore::open(&config.data_dir, config.page_size)
            .with_context(|| format!("Failed to open page store in {:?}", config.data_dir))?;
        Self::open_with_store(config, Arc::new(store))
    }

    /// Open the database on top of an existing page store
    pub fn open_with_store(config: DatabaseConfig, store: Arc<dyn PageStore>) -> Result<Self> {
        if store.page_size() != config.page_size {
            bail!(
                "Page store uses {}-byte pages but the database is configured for {}",
                store.page_size(),
                config.page_size
            );
        }
        std::fs::create_dir_all(&config.data_dir)
            .with_context(|| format!("Failed to create data directory {:?}", config.data_dir))?;

        let log_path = config.log_path();
        let log = Arc::new(
            LogFile::open(&log_path, config.page_size)
                .with_context(|| format!("Failed to open log {:?}", log_path))?,
        );
        let buffer_pool = Arc::new(BufferPool::new(
            Arc::clone(&store),
            Arc::clone(&log),
            config.buffer_pool.clone(),
        ));
        let recovery = Arc::new(RecoveryManager::new(
            Arc::clone(&log),
            Arc::clone(&store),
            Arc::clone(&buffer_pool),
        ));
        let recovery_stats = recovery.recover().context("Crash recovery failed")?;

        let transactions = Arc::new(TransactionManager::new(
            Arc::clone(&buffer_pool),
            Arc::clone(&log),
            Arc::clone(&recovery),
            TransactionIdGenerator::after(recovery_stats.max_transaction_id),
        ));
        let checkpointer = Checkpointer::new(Arc::clone(&buffer_pool), Arc::clone(&log));
        info!(
            "opened database in {} ({} pages of {} bytes cached)",
            config.data_dir.display(),
            config.buffer_pool.capacity,
            config.page_size
        );

        Ok(Self {
            config,
            store,
            log,
            buffer_pool,
            recovery,
            transactions,
            checkpointer,
            recovery_stats,
        })
    }

    /// Begin a new transaction
    pub fn begin(&self) -> Result<Transaction, TransactionError> {
        Transaction::begin(Arc::clone(&self.transactions))
    }

    /// Take a checkpoint covering the currently running transactions
    pub fn checkpoint(&self) -> RecoveryResult<u64> {
        self.checkpointer.checkpoint(&self.transactions)
    }

    /// Append a zeroed page to a table
    pub fn allocate_page(&self, table_id: TableId) -> StorageResult<PageId> {
        self.store.allocate_page(table_id)
    }

    pub fn config(&self) -> &DatabaseConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn PageStore> {
        &self.store
    }

    pub fn log(&self) -> &Arc<LogFile> {
        &self.log
    }

    pub fn buffer_pool(&self) -> &Arc<BufferPool> {
        &self.buffer_pool
    }

    pub fn recovery_manager(&self) -> &Arc<RecoveryManager> {
        &self.recovery
    }

    pub fn transaction_manager(&self) -> &Arc<TransactionManager> {
        &self.transactions
    }

    /// What recovery did when the database was opened
    pub fn recovery_stats(&self) -> &RecoveryStats {
        &self.recovery_stats
    }
}

impl Drop for Database {
    fn drop(&mut self) {
        if let Err(e) = self.log.force() {
            warn!("failed to force log on close: {}", e);
        }
    }
}
