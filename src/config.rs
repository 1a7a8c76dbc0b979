use std::env;
use std::path::{Path, PathBuf};

use crate::error::PurgeError;
use crate::logging::LogLevel;
use crate::stats::epoch_secs;

/// System paths that must never be purged. A root equal to or nested within
/// any of these refuses to run.
pub const DENY_LIST: &[&str] = &[
    "/proc", "/sys", "/dev", "/run", "/var/run", "/boot", "/bin", "/sbin", "/lib", "/lib64",
    "/usr/bin", "/usr/sbin", "/usr/lib", "/etc",
];

pub const DEFAULT_MAX_CONCURRENCY: usize = 1000;
pub const DEFAULT_TASK_BATCH_SIZE: usize = 5000;
pub const DEFAULT_MAX_CONCURRENT_SUBDIRS: usize = 100;
pub const DEFAULT_MEMORY_LIMIT_MB: u64 = 800;
pub const DEFAULT_MAX_EMPTY_DIRS_TO_DELETE: u64 = 500;
pub const DEFAULT_PROGRESS_INTERVAL_SECS: f64 = 30.0;

/// Run configuration. Built with [`PurgeConfig::new`], tuned by assigning
/// fields, then frozen by [`Purger::new`](crate::purger::Purger::new), which
/// validates it.
#[derive(Debug, Clone)]
pub struct PurgeConfig {
    pub root: PathBuf,
    pub max_age_days: f64,
    /// Files with mtime strictly below this are purge candidates. Captured
    /// once at construction; later field tweaks never move it.
    pub cutoff_mtime: f64,
    pub max_concurrency_scanning: usize,
    pub max_concurrency_deletion: usize,
    pub task_batch_size: usize,
    pub max_concurrent_subdirs: usize,
    /// Soft resident-memory threshold in MB; 0 disables back-pressure.
    pub memory_limit_mb: u64,
    /// Per-run cap on attempted empty-directory deletions; 0 means unlimited.
    pub max_empty_dirs_to_delete: u64,
    pub dry_run: bool,
    pub remove_empty_dirs: bool,
    pub log_level: LogLevel,
    pub progress_interval_secs: f64,
}

impl PurgeConfig {
    pub fn new(root: impl Into<PathBuf>, max_age_days: f64) -> Self {
        Self {
            root: absolutize(root.into()),
            max_age_days,
            cutoff_mtime: epoch_secs() - max_age_days * 86_400.0,
            max_concurrency_scanning: DEFAULT_MAX_CONCURRENCY,
            max_concurrency_deletion: DEFAULT_MAX_CONCURRENCY,
            task_batch_size: DEFAULT_TASK_BATCH_SIZE,
            max_concurrent_subdirs: DEFAULT_MAX_CONCURRENT_SUBDIRS,
            memory_limit_mb: DEFAULT_MEMORY_LIMIT_MB,
            max_empty_dirs_to_delete: DEFAULT_MAX_EMPTY_DIRS_TO_DELETE,
            dry_run: true,
            remove_empty_dirs: false,
            log_level: LogLevel::Info,
            progress_interval_secs: DEFAULT_PROGRESS_INTERVAL_SECS,
        }
    }

    pub fn validate(&self) -> Result<(), PurgeError> {
        if !self.max_age_days.is_finite() || self.max_age_days < 0.0 {
            return Err(PurgeError::InvalidParameter(
                "max_age_days must be >= 0".into(),
            ));
        }
        if self.max_concurrency_scanning < 1 {
            return Err(PurgeError::InvalidParameter(
                "max_concurrency_scanning must be >= 1".into(),
            ));
        }
        if self.max_concurrency_deletion < 1 {
            return Err(PurgeError::InvalidParameter(
                "max_concurrency_deletion must be >= 1".into(),
            ));
        }
        if self.task_batch_size < 1 {
            return Err(PurgeError::InvalidParameter(
                "task_batch_size must be >= 1".into(),
            ));
        }
        if self.max_concurrent_subdirs < 1 {
            return Err(PurgeError::InvalidParameter(
                "max_concurrent_subdirs must be >= 1".into(),
            ));
        }
        if !self.progress_interval_secs.is_finite() || self.progress_interval_secs <= 0.0 {
            return Err(PurgeError::InvalidParameter(
                "progress_interval_secs must be > 0".into(),
            ));
        }
        if let Some(denied) = deny_list_hit(&self.root) {
            return Err(PurgeError::DenyListViolation {
                root: self.root.clone(),
                denied,
            });
        }
        Ok(())
    }
}

fn absolutize(path: PathBuf) -> PathBuf {
    if path.is_absolute() {
        path
    } else {
        match env::current_dir() {
            Ok(cwd) => cwd.join(path),
            Err(_) => path,
        }
    }
}

/// The deny-list entry the root falls under, if any. Prefix matching is
/// component-wise, so `/procs` does not match `/proc`.
pub fn deny_list_hit(root: &Path) -> Option<&'static str> {
    DENY_LIST
        .iter()
        .copied()
        .find(|denied| root.starts_with(denied))
}
