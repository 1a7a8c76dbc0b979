use std::collections::HashSet;
use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::Serialize;

/// Wall-clock time as fractional seconds since the Unix epoch.
pub fn epoch_secs() -> f64 {
    match SystemTime::now().duration_since(UNIX_EPOCH) {
        Ok(elapsed) => elapsed.as_secs_f64(),
        Err(_) => 0.0,
    }
}

pub(crate) fn round1(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

pub(crate) fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Observable phases of a run. Scan and reap durations are tracked
/// separately so operator-facing throughput reflects the scan alone.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Initializing,
    Scanning,
    RemovingEmptyDirs,
    Completed,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Initializing => "initializing",
            Phase::Scanning => "scanning",
            Phase::RemovingEmptyDirs => "removing_empty_dirs",
            Phase::Completed => "completed",
        }
    }
}

/// Monotonic run counters, one fixed field per metric; every mutation
/// happens under the statistics mutex in `RunState`.
#[derive(Debug, Clone, Serialize)]
pub struct PurgeStats {
    pub files_scanned: u64,
    pub files_to_purge: u64,
    pub files_purged: u64,
    pub dirs_scanned: u64,
    pub symlinks_skipped: u64,
    pub special_files_skipped: u64,
    pub errors: u64,
    pub bytes_freed: u64,
    pub memory_backpressure_events: u64,
    pub empty_dirs_to_delete: u64,
    pub empty_dirs_deleted: u64,
    pub start_time: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scanning_end_time: Option<f64>,
}

impl PurgeStats {
    pub fn new() -> Self {
        Self {
            files_scanned: 0,
            files_to_purge: 0,
            files_purged: 0,
            dirs_scanned: 0,
            symlinks_skipped: 0,
            special_files_skipped: 0,
            errors: 0,
            bytes_freed: 0,
            memory_backpressure_events: 0,
            empty_dirs_to_delete: 0,
            empty_dirs_deleted: 0,
            start_time: epoch_secs(),
            scanning_end_time: None,
        }
    }

    /// Scan duration once scanning has ended, otherwise elapsed so far.
    /// Reap-phase time never dilutes this figure.
    pub fn scan_duration(&self, now: f64) -> f64 {
        match self.scanning_end_time {
            Some(end) => end - self.start_time,
            None => now - self.start_time,
        }
    }

    pub fn overall_files_per_second(&self, now: f64) -> f64 {
        let duration = self.scan_duration(now);
        if duration > 0.0 {
            self.files_scanned as f64 / duration
        } else {
            0.0
        }
    }

    pub fn overall_dirs_per_second(&self, now: f64) -> f64 {
        let duration = self.scan_duration(now);
        if duration > 0.0 {
            self.dirs_scanned as f64 / duration
        } else {
            0.0
        }
    }
}

impl Default for PurgeStats {
    fn default() -> Self {
        Self::new()
    }
}

/// Everything guarded by the single statistics mutex: the counters, the
/// current phase label, and the empty-directory candidate set.
#[derive(Debug)]
pub struct RunState {
    pub stats: PurgeStats,
    pub phase: Phase,
    pub empty_dirs: HashSet<PathBuf>,
}

impl RunState {
    pub fn new() -> Self {
        Self {
            stats: PurgeStats::new(),
            phase: Phase::Initializing,
            empty_dirs: HashSet::new(),
        }
    }
}

impl Default for RunState {
    fn default() -> Self {
        Self::new()
    }
}
