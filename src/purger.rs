//! The purge engine: orchestration, per-file processing, directory
//! scanning, and the constant-concurrency subdirectory dispatcher.

use std::collections::{HashSet, VecDeque};
use std::future::Future;
use std::io;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use serde::Serialize;
use serde_json::json;
use tokio::sync::{Mutex, Semaphore};
use tokio::task::JoinSet;
use uuid::Uuid;

use crate::config::PurgeConfig;
use crate::error::{classify_io_error, IoErrorClass, PurgeError};
use crate::fs_ops;
use crate::logging::{JsonLogger, LogLevel};
use crate::memory;
use crate::rate_tracker::{RateMetric, RatePhase, RateTracker};
use crate::stats::{epoch_secs, round1, round2, Phase, PurgeStats, RunState};

/// Final run report: the counter set plus derived operator-facing figures.
#[derive(Debug, Clone, Serialize)]
pub struct PurgeReport {
    #[serde(flatten)]
    pub stats: PurgeStats,
    pub duration_seconds: f64,
    pub files_per_second: f64,
    pub mb_freed: f64,
    pub peak_memory_mb: f64,
}

pub(crate) struct MemoryCheckState {
    pub(crate) last_warning: f64,
}

pub struct Purger {
    pub(crate) config: PurgeConfig,
    pub(crate) logger: JsonLogger,
    pub(crate) run_id: String,
    /// The statistics mutex: counters, phase label, empty-dir set.
    pub(crate) state: Mutex<RunState>,
    pub(crate) rate_tracker: StdMutex<RateTracker>,
    /// Directories currently being scanned, for stuck diagnostics only.
    pub(crate) active_dirs: Mutex<HashSet<PathBuf>>,
    /// Serializes memory samples and the back-pressure pause.
    pub(crate) memory_check: Mutex<MemoryCheckState>,
    pub(crate) scan_semaphore: Arc<Semaphore>,
    pub(crate) delete_semaphore: Arc<Semaphore>,
    pub(crate) subdir_semaphore: Arc<Semaphore>,
    pub(crate) active_tasks: AtomicU64,
    pub(crate) max_active_tasks: AtomicU64,
}

impl Purger {
    pub fn new(config: PurgeConfig, logger: JsonLogger) -> Result<Self, PurgeError> {
        config.validate()?;
        Ok(Self {
            scan_semaphore: Arc::new(Semaphore::new(config.max_concurrency_scanning)),
            delete_semaphore: Arc::new(Semaphore::new(config.max_concurrency_deletion)),
            subdir_semaphore: Arc::new(Semaphore::new(config.max_concurrent_subdirs)),
            state: Mutex::new(RunState::new()),
            rate_tracker: StdMutex::new(RateTracker::new()),
            active_dirs: Mutex::new(HashSet::new()),
            memory_check: Mutex::new(MemoryCheckState { last_warning: 0.0 }),
            active_tasks: AtomicU64::new(0),
            max_active_tasks: AtomicU64::new(0),
            run_id: Uuid::new_v4().to_string(),
            config,
            logger,
        })
    }

    pub fn config(&self) -> &PurgeConfig {
        &self.config
    }

    pub async fn stats_snapshot(&self) -> PurgeStats {
        self.state.lock().await.stats.clone()
    }

    /// Number of empty-directory candidates currently registered.
    pub async fn pending_empty_dirs(&self) -> usize {
        self.state.lock().await.empty_dirs.len()
    }

    pub(crate) fn record_sample(&self, phase: RatePhase, metric: RateMetric, count: u64) {
        if let Ok(mut tracker) = self.rate_tracker.lock() {
            tracker.record(phase, metric, count);
        }
    }

    pub(crate) fn set_rate_phase(&self, phase: RatePhase) {
        if let Ok(mut tracker) = self.rate_tracker.lock() {
            tracker.set_phase_start(phase);
        }
    }

    fn enter_task(&self) {
        let active = self.active_tasks.fetch_add(1, Ordering::Relaxed) + 1;
        self.max_active_tasks.fetch_max(active, Ordering::Relaxed);
    }

    fn leave_task(&self) {
        self.active_tasks.fetch_sub(1, Ordering::Relaxed);
    }

    /// Run the full purge: scan, then (optionally) reap empty directories,
    /// with the progress reporter alive throughout.
    pub async fn run(self: Arc<Self>) -> Result<PurgeReport, PurgeError> {
        let mode = if self.config.dry_run { "DRY RUN" } else { "PURGE" };
        let fs_type = fs_ops::detect_filesystem_type(&self.config.root);
        self.logger.info(
            &format!("Starting EFS purge - {mode} MODE"),
            Some(json!({
                "run_id": self.run_id,
                "root_path": self.config.root.display().to_string(),
                "max_age_days": self.config.max_age_days,
                "cutoff_mtime": self.config.cutoff_mtime,
                "max_concurrency_scanning": self.config.max_concurrency_scanning,
                "max_concurrency_deletion": self.config.max_concurrency_deletion,
                "task_batch_size": self.config.task_batch_size,
                "max_concurrent_subdirs": self.config.max_concurrent_subdirs,
                "memory_limit_mb": self.config.memory_limit_mb,
                "max_empty_dirs_to_delete": self.config.max_empty_dirs_to_delete,
                "remove_empty_dirs": self.config.remove_empty_dirs,
                "dry_run": self.config.dry_run,
                "filesystem_type": fs_type.as_str(),
            })),
        );

        if !fs_ops::exists(&self.config.root).await {
            self.logger.error(
                "Root path does not exist",
                Some(json!({"root_path": self.config.root.display().to_string()})),
            );
            return Err(PurgeError::RootNotFound(self.config.root.clone()));
        }

        {
            let mut st = self.state.lock().await;
            st.phase = Phase::Scanning;
        }
        self.set_rate_phase(RatePhase::Scanning);
        // Deletions happen during the scan, so their phase clock starts now.
        self.set_rate_phase(RatePhase::Deletion);

        let reporter = tokio::spawn(Arc::clone(&self).progress_reporter());

        Arc::clone(&self)
            .scan_directory(self.config.root.clone(), false)
            .await;

        {
            let mut st = self.state.lock().await;
            if st.stats.scanning_end_time.is_none() {
                st.stats.scanning_end_time = Some(epoch_secs());
            }
        }

        if self.config.remove_empty_dirs {
            self.remove_empty_directories().await;
        }

        {
            let mut st = self.state.lock().await;
            st.phase = Phase::Completed;
        }

        reporter.abort();
        let _ = reporter.await;

        let report = self.build_report().await;
        self.logger.info(
            "Purge operation completed",
            Some(serde_json::to_value(&report).unwrap_or_default()),
        );
        Ok(report)
    }

    async fn build_report(&self) -> PurgeReport {
        let now = epoch_secs();
        let stats = self.stats_snapshot().await;
        PurgeReport {
            duration_seconds: round2(now - stats.start_time),
            files_per_second: round2(stats.overall_files_per_second(now)),
            mb_freed: round2(stats.bytes_freed as f64 / (1024.0 * 1024.0)),
            peak_memory_mb: round1(memory::current_rss_mb()),
            stats,
        }
    }

    /// Recursively scan one directory. `dispatched` marks a scanner that is
    /// holding a dispatcher slot; it must recurse sequentially instead of
    /// re-entering the dispatcher gate.
    pub fn scan_directory(
        self: Arc<Self>,
        directory: PathBuf,
        dispatched: bool,
    ) -> Pin<Box<dyn Future<Output = ()> + Send>> {
        Box::pin(async move {
            self.active_dirs.lock().await.insert(directory.clone());
            {
                let mut st = self.state.lock().await;
                st.stats.dirs_scanned += 1;
            }
            self.record_sample(RatePhase::Scanning, RateMetric::Dirs, 1);
            self.check_memory_pressure().await;

            Arc::clone(&self)
                .scan_entries(directory.clone(), dispatched)
                .await;

            self.active_dirs.lock().await.remove(&directory);
        })
    }

    async fn scan_entries(self: Arc<Self>, directory: PathBuf, dispatched: bool) {
        let entries = match fs_ops::scan_dir(&directory).await {
            Ok(entries) => entries,
            Err(err) => {
                self.handle_dir_error(&directory, &err).await;
                return;
            }
        };

        let mut file_batch: Vec<PathBuf> = Vec::new();
        let mut subdirs: Vec<PathBuf> = Vec::new();

        for entry in entries {
            if entry.is_symlink {
                {
                    let mut st = self.state.lock().await;
                    st.stats.symlinks_skipped += 1;
                }
                self.logger.debug(
                    "Skipping symlink",
                    Some(json!({"path": entry.path.display().to_string()})),
                );
            } else if entry.is_file {
                file_batch.push(entry.path);
                if file_batch.len() >= self.config.task_batch_size {
                    Arc::clone(&self).drain_file_batch(&mut file_batch).await;
                }
            } else if entry.is_dir {
                subdirs.push(entry.path);
            } else {
                // Sockets, FIFOs, devices.
                {
                    let mut st = self.state.lock().await;
                    st.stats.special_files_skipped += 1;
                }
                self.logger.debug(
                    "Skipping special file",
                    Some(json!({"path": entry.path.display().to_string()})),
                );
            }
        }

        Arc::clone(&self).drain_file_batch(&mut file_batch).await;

        if !subdirs.is_empty() {
            if dispatched {
                for subdir in subdirs {
                    Arc::clone(&self).scan_directory(subdir, true).await;
                }
            } else {
                Arc::clone(&self).process_subdirs(subdirs).await;
            }
        }

        if self.config.remove_empty_dirs {
            self.register_if_empty(&directory).await;
        }
    }

    /// Re-check the directory after its children were handled and register
    /// it as an empty-dir candidate. The re-scan deliberately happens inside
    /// the statistics mutex: the emptiness observation and the set insert
    /// must be atomic with respect to the reaper.
    async fn register_if_empty(&self, directory: &Path) {
        let mut st = self.state.lock().await;
        match fs_ops::scan_dir(directory).await {
            Ok(entries) if entries.is_empty() => {
                if directory != self.config.root {
                    st.empty_dirs.insert(directory.to_path_buf());
                }
            }
            Ok(_) => {}
            Err(err) => {
                if classify_io_error(&err) != IoErrorClass::Raced {
                    st.stats.errors += 1;
                    drop(st);
                    self.logger.log_io_error(
                        LogLevel::Warning,
                        "Error re-checking directory for emptiness",
                        &err,
                        Some(json!({"directory": directory.display().to_string()})),
                    );
                }
            }
        }
    }

    /// Drain the per-directory file buffer with a gather that collects every
    /// result; the buffer is emptied up front so a failed drain cannot
    /// replay entries.
    async fn drain_file_batch(self: Arc<Self>, batch: &mut Vec<PathBuf>) {
        if batch.is_empty() {
            return;
        }
        let paths = std::mem::take(batch);
        let mut tasks: JoinSet<()> = JoinSet::new();
        for path in paths {
            let this = Arc::clone(&self);
            tasks.spawn(async move { this.process_file(path).await });
        }
        while let Some(result) = tasks.join_next().await {
            if let Err(err) = result {
                {
                    let mut st = self.state.lock().await;
                    st.stats.errors += 1;
                }
                self.logger.error(
                    "File task failed unexpectedly",
                    Some(json!({"error": err.to_string()})),
                );
            }
        }
    }

    /// Stat one regular file, and unlink it when it is older than the
    /// cutoff. Absorbs every error into counters; a bad file never sinks
    /// its batch.
    pub async fn process_file(self: Arc<Self>, path: PathBuf) {
        self.enter_task();
        let Ok(_scan_permit) = self.scan_semaphore.acquire().await else {
            self.leave_task();
            return;
        };
        match fs_ops::stat(&path).await {
            Ok(meta) => {
                {
                    let mut st = self.state.lock().await;
                    st.stats.files_scanned += 1;
                }
                self.record_sample(RatePhase::Scanning, RateMetric::Files, 1);

                if meta.mtime < self.config.cutoff_mtime {
                    {
                        let mut st = self.state.lock().await;
                        st.stats.files_to_purge += 1;
                    }
                    if self.config.dry_run {
                        self.logger.debug(
                            "Would purge file",
                            Some(json!({"file": path.display().to_string()})),
                        );
                    } else {
                        self.purge_file(&path, meta.size).await;
                    }
                }
            }
            Err(err) => self.handle_file_error(&path, &err).await,
        }
        self.leave_task();
    }

    async fn purge_file(&self, path: &Path, size: u64) {
        let Ok(_delete_permit) = self.delete_semaphore.acquire().await else {
            return;
        };
        match fs_ops::unlink(path).await {
            Ok(()) => {
                {
                    let mut st = self.state.lock().await;
                    st.stats.files_purged += 1;
                    st.stats.bytes_freed += size;
                }
                self.record_sample(RatePhase::Deletion, RateMetric::Files, 1);
                self.logger.debug(
                    "Purged file",
                    Some(json!({"file": path.display().to_string()})),
                );
            }
            Err(err) => self.handle_file_error(path, &err).await,
        }
    }

    async fn handle_file_error(&self, path: &Path, err: &io::Error) {
        match classify_io_error(err) {
            IoErrorClass::Raced => {
                // Another deleter got there first.
                self.logger.debug(
                    "File already deleted",
                    Some(json!({"file": path.display().to_string()})),
                );
            }
            IoErrorClass::Denied => {
                {
                    let mut st = self.state.lock().await;
                    st.stats.errors += 1;
                }
                self.logger.log_io_error(
                    LogLevel::Warning,
                    "Permission denied",
                    err,
                    Some(json!({"file": path.display().to_string()})),
                );
            }
            IoErrorClass::Other => {
                {
                    let mut st = self.state.lock().await;
                    st.stats.errors += 1;
                }
                self.logger.log_io_error(
                    LogLevel::Error,
                    "Error processing file",
                    err,
                    Some(json!({"file": path.display().to_string()})),
                );
            }
        }
    }

    async fn handle_dir_error(&self, directory: &Path, err: &io::Error) {
        match classify_io_error(err) {
            IoErrorClass::Raced => {
                self.logger.debug(
                    "Directory vanished before scan",
                    Some(json!({"directory": directory.display().to_string()})),
                );
            }
            IoErrorClass::Denied => {
                {
                    let mut st = self.state.lock().await;
                    st.stats.errors += 1;
                }
                self.logger.log_io_error(
                    LogLevel::Warning,
                    "Permission denied for directory",
                    err,
                    Some(json!({"directory": directory.display().to_string()})),
                );
            }
            IoErrorClass::Other => {
                {
                    let mut st = self.state.lock().await;
                    st.stats.errors += 1;
                }
                self.logger.log_io_error(
                    LogLevel::Error,
                    "Error scanning directory",
                    err,
                    Some(json!({"directory": directory.display().to_string()})),
                );
            }
        }
    }

    /// Keep up to `max_concurrent_subdirs` subtree scans in flight, starting
    /// the next pending path the moment a slot frees. Tasks are created on
    /// demand; the pending queue holds plain paths, never futures, so a
    /// multi-hundred-thousand-directory listing stays cheap.
    pub(crate) async fn process_subdirs(self: Arc<Self>, subdirs: Vec<PathBuf>) {
        let total = subdirs.len();
        let max_iterations = total as u64 * 2 + 1000;
        let mut pending: VecDeque<PathBuf> = subdirs.into();
        let mut in_flight: JoinSet<()> = JoinSet::new();
        let mut iterations: u64 = 0;

        while !pending.is_empty() || !in_flight.is_empty() {
            iterations += 1;
            if iterations > max_iterations {
                self.logger.error(
                    "Subdirectory dispatcher exceeded its iteration guard",
                    Some(json!({
                        "iterations": iterations,
                        "pending": pending.len(),
                        "in_flight": in_flight.len(),
                    })),
                );
                break;
            }

            while in_flight.len() < self.config.max_concurrent_subdirs {
                let Some(next) = pending.pop_front() else {
                    break;
                };
                let this = Arc::clone(&self);
                let gate = Arc::clone(&self.subdir_semaphore);
                in_flight.spawn(async move {
                    let Ok(_permit) = gate.acquire_owned().await else {
                        return;
                    };
                    this.scan_directory(next, true).await;
                });
            }

            if let Some(result) = in_flight.join_next().await {
                if let Err(err) = result {
                    {
                        let mut st = self.state.lock().await;
                        st.stats.errors += 1;
                    }
                    self.logger.error(
                        "Subdirectory scan task failed unexpectedly",
                        Some(json!({"error": err.to_string()})),
                    );
                }
            }
        }
    }

    /// Sample resident memory and pause cooperatively when over the limit.
    /// The dedicated mutex makes concurrent callers queue behind one sleep
    /// instead of stacking their own.
    pub(crate) async fn check_memory_pressure(&self) {
        if self.config.memory_limit_mb == 0 {
            return;
        }
        let mut guard = self.memory_check.lock().await;
        let current_mb = memory::current_rss_mb();
        if current_mb <= self.config.memory_limit_mb as f64 {
            return;
        }
        {
            let mut st = self.state.lock().await;
            st.stats.memory_backpressure_events += 1;
        }
        let now = epoch_secs();
        if now - guard.last_warning >= 60.0 {
            guard.last_warning = now;
            self.logger.warning(
                "Memory limit exceeded, applying back-pressure",
                Some(json!({
                    "memory_mb": round1(current_mb),
                    "memory_limit_mb": self.config.memory_limit_mb,
                })),
            );
        }
        tokio::time::sleep(Duration::from_millis(500)).await;
        memory::release_unused();
    }
}
