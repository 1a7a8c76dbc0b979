use std::path::PathBuf;
use std::process;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use serde_json::json;

use efspurge::config::PurgeConfig;
use efspurge::logging::{JsonLogger, LogLevel};
use efspurge::purger::Purger;

/// High-performance async file purger for AWS EFS and network storage.
#[derive(Parser, Debug)]
#[command(name = "efspurge", version, about, long_about = None)]
struct Cli {
    /// Root path to scan and purge
    path: PathBuf,

    /// Files older than this (in days) will be purged
    #[arg(long, default_value_t = 30.0, env = "EFSPURGE_MAX_AGE_DAYS")]
    max_age_days: f64,

    /// Deprecated: sets both scanning and deletion concurrency
    #[arg(long, env = "EFSPURGE_MAX_CONCURRENCY")]
    max_concurrency: Option<usize>,

    /// Maximum concurrent metadata operations (higher for network storage)
    #[arg(long, default_value_t = 1000, env = "EFSPURGE_MAX_CONCURRENCY_SCANNING")]
    max_concurrency_scanning: usize,

    /// Maximum concurrent delete operations
    #[arg(long, default_value_t = 1000, env = "EFSPURGE_MAX_CONCURRENCY_DELETION")]
    max_concurrency_deletion: usize,

    /// Soft resident-memory limit in MB (0 disables back-pressure)
    #[arg(long, default_value_t = 800, env = "EFSPURGE_MEMORY_LIMIT_MB")]
    memory_limit_mb: u64,

    /// File tasks buffered per directory before draining
    #[arg(long, default_value_t = 5000, env = "EFSPURGE_TASK_BATCH_SIZE")]
    task_batch_size: usize,

    /// Don't actually delete anything, just report what would be deleted
    #[arg(long, env = "EFSPURGE_DRY_RUN")]
    dry_run: bool,

    /// Logging level (DEBUG, INFO, WARNING, ERROR, CRITICAL)
    #[arg(long, default_value = "INFO", env = "EFSPURGE_LOG_LEVEL")]
    log_level: String,

    /// Remove directories that are (or become) empty
    #[arg(long, env = "EFSPURGE_REMOVE_EMPTY_DIRS")]
    remove_empty_dirs: bool,

    /// Maximum empty directories to delete per run (0 = unlimited)
    #[arg(long, default_value_t = 500, env = "EFSPURGE_MAX_EMPTY_DIRS_TO_DELETE")]
    max_empty_dirs_to_delete: u64,

    /// Maximum subdirectory scans in flight
    #[arg(long, default_value_t = 100, env = "EFSPURGE_MAX_CONCURRENT_SUBDIRS")]
    max_concurrent_subdirs: usize,
}

fn prepare(
    cli: &Cli,
    logger: &JsonLogger,
    level: LogLevel,
) -> Result<(Arc<Purger>, tokio::runtime::Runtime)> {
    let mut config = PurgeConfig::new(cli.path.clone(), cli.max_age_days);
    config.log_level = level;
    config.max_concurrency_scanning = cli.max_concurrency_scanning;
    config.max_concurrency_deletion = cli.max_concurrency_deletion;
    config.memory_limit_mb = cli.memory_limit_mb;
    config.task_batch_size = cli.task_batch_size;
    config.dry_run = cli.dry_run;
    config.remove_empty_dirs = cli.remove_empty_dirs;
    config.max_empty_dirs_to_delete = cli.max_empty_dirs_to_delete;
    config.max_concurrent_subdirs = cli.max_concurrent_subdirs;

    if let Some(value) = cli.max_concurrency {
        logger.warning(
            "--max-concurrency is deprecated, use --max-concurrency-scanning and --max-concurrency-deletion",
            Some(json!({"max_concurrency": value})),
        );
        config.max_concurrency_scanning = value;
        config.max_concurrency_deletion = value;
    }

    // Blocking threads are what actually overlap the NFS round-trips; give
    // the pool enough to saturate the configured concurrency, capped at
    // tokio's default of 512.
    let requested = config
        .max_concurrency_scanning
        .saturating_add(config.max_concurrency_deletion);
    let blocking_threads = requested.max(num_cpus::get() * 4).min(512);

    let purger = Purger::new(config, logger.clone())?;

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .max_blocking_threads(blocking_threads)
        .build()
        .context("failed to build tokio runtime")?;

    Ok((Arc::new(purger), runtime))
}

fn main() {
    let cli = Cli::parse();

    let level = match cli.log_level.parse::<LogLevel>() {
        Ok(level) => level,
        Err(err) => {
            eprintln!("Fatal error: {err}");
            process::exit(1);
        }
    };
    let logger = JsonLogger::new("efspurge", level);

    let (purger, runtime) = match prepare(&cli, &logger, level) {
        Ok(prepared) => prepared,
        Err(err) => {
            logger.error(&format!("Fatal error: {err:#}"), None);
            process::exit(1);
        }
    };

    let code = runtime.block_on(async {
        tokio::select! {
            result = Arc::clone(&purger).run() => match result {
                Ok(_) => 0,
                Err(err) => {
                    logger.error(&format!("Fatal error: {err}"), None);
                    1
                }
            },
            _ = tokio::signal::ctrl_c() => {
                logger.warning("Operation cancelled by user", None);
                130
            }
        }
    });

    process::exit(code);
}
