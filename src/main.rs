//! vibestore - maintenance tool for a vibestore data directory

use anyhow::{bail, Context, Result};
use clap::{Parser as ClapParser, Subcommand};
use std::io::{self, Write};
use std::path::PathBuf;
use vibestore::config::{DatabaseConfig, DEFAULT_PAGE_SIZE, DEFAULT_POOL_PAGES};
use vibestore::database::Database;
use vibestore::storage::wal::LogFile;

/// vibestore - page store with a buffer pool, page locks and a write-ahead log
#[derive(ClapParser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Data directory
    #[arg(short = 'D', long, default_value = "./vibestore_data")]
    data_dir: PathBuf,

    /// Page size in bytes
    #[arg(short = 'p', long, default_value_t = DEFAULT_PAGE_SIZE)]
    page_size: usize,

    /// Number of pages the buffer pool may hold
    #[arg(short = 'n', long, default_value_t = DEFAULT_POOL_PAGES)]
    pool_pages: usize,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run crash recovery and report what it did
    Recover,
    /// Print every record in the write-ahead log
    DumpLog,
    /// Run recovery, then write a checkpoint
    Checkpoint,
}

fn main() -> Result<()> {
    let args = Args::parse();

    let log_level = if args.debug { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(log_level)).init();

    let mut config = DatabaseConfig::new(&args.data_dir);
    config.page_size = args.page_size;
    config.buffer_pool.capacity = args.pool_pages;

    match args.command {
        Command::Recover => {
            let db = Database::open(config).context("Failed to open database")?;
            let stats = db.recovery_stats();
            println!("records scanned: {}", stats.records_scanned);
            println!("pages redone:    {}", stats.pages_redone);
            println!("pages undone:    {}", stats.pages_undone);
            let losers: Vec<String> = stats.losers.iter().map(|t| t.to_string()).collect();
            println!("rolled back:     [{}]", losers.join(", "));
            match stats.max_transaction_id {
                Some(tid) => println!("last txn id:     {}", tid),
                None => println!("last txn id:     none"),
            }
        }
        Command::DumpLog => {
            let path = config.log_path();
            if !path.exists() {
                bail!("No log at {:?}", path);
            }
            let log = LogFile::open(&path, config.page_size)
                .with_context(|| format!("Failed to open log {:?}", path))?;
            let stdout = io::stdout();
            let mut out = stdout.lock();
            log.dump(&mut out).context("Failed to read log")?;
            out.flush()?;
        }
        Command::Checkpoint => {
            let db = Database::open(config).context("Failed to open database")?;
            let offset = db.checkpoint().context("Checkpoint failed")?;
            println!("checkpoint written at offset {}", offset);
        }
    }

    Ok(())
}
