//! Periodic progress reporting and hang detection.
//!
//! A background task wakes every `progress_interval_secs`, snapshots the
//! counters under the statistics mutex, and emits a single progress record
//! after releasing it. Two consecutive snapshots with frozen counters mean
//! the filesystem may be unresponsive; the reporter warns with the active
//! directories but never aborts the run.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use serde_json::json;

use crate::memory;
use crate::purger::Purger;
use crate::rate_tracker::{PeakKind, RateMetric, RatePhase};
use crate::stats::{epoch_secs, round1, round2, Phase, PurgeStats};

const STALL_TICKS_BEFORE_WARNING: u32 = 2;
const ACTIVE_DIR_DUMP_LIMIT: usize = 10;

/// One progress emission. Phase-specific and DEBUG-only fields stay out of
/// the record entirely when they do not apply.
#[derive(Debug, Serialize)]
struct ProgressRecord {
    elapsed_seconds: f64,
    phase: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    files_scanned: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    files_purged: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    dirs_scanned: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    files_to_purge: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    dirs_purged: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    dirs_to_purge: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    dirs_per_second: Option<f64>,
    errors: u64,
    memory_backpressure_events: u64,
    files_per_second: f64,
    memory_mb: f64,
    memory_usage_percent: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    files_per_second_instant: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    files_per_second_short: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    files_per_second_phase: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    dirs_per_second_phase: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    peak_files_per_second: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    peak_dirs_per_second: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    peak_files_deleted_per_second: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    active_tasks: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_active_tasks: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    concurrency_utilization_percent: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    memory_mb_per_1k_files: Option<f64>,
}

#[derive(Default)]
struct StallTracker {
    files_scanned: u64,
    dirs_scanned: u64,
    empty_dirs_to_delete: u64,
    empty_dirs_deleted: u64,
    stalled_ticks: u32,
}

impl StallTracker {
    /// Compare against the previous tick; equal counters bump the stall
    /// count, any movement resets it.
    fn observe(&mut self, phase: Phase, stats: &PurgeStats) -> u32 {
        let progressing = match phase {
            Phase::Scanning => {
                stats.files_scanned != self.files_scanned
                    || stats.dirs_scanned != self.dirs_scanned
            }
            Phase::RemovingEmptyDirs => {
                stats.empty_dirs_deleted != self.empty_dirs_deleted
                    || stats.empty_dirs_to_delete != self.empty_dirs_to_delete
            }
            _ => true,
        };
        self.files_scanned = stats.files_scanned;
        self.dirs_scanned = stats.dirs_scanned;
        self.empty_dirs_to_delete = stats.empty_dirs_to_delete;
        self.empty_dirs_deleted = stats.empty_dirs_deleted;
        if progressing {
            self.stalled_ticks = 0;
        } else {
            self.stalled_ticks += 1;
        }
        self.stalled_ticks
    }
}

impl Purger {
    pub(crate) async fn progress_reporter(self: Arc<Self>) {
        let interval = Duration::from_secs_f64(self.config.progress_interval_secs);
        let mut stall = StallTracker::default();
        loop {
            tokio::time::sleep(interval).await;
            self.progress_tick(&mut stall).await;
        }
    }

    async fn progress_tick(&self, stall: &mut StallTracker) {
        let (stats, phase, empty_dir_total) = {
            let st = self.state.lock().await;
            (st.stats.clone(), st.phase, st.empty_dirs.len() as u64)
        };
        let now = epoch_secs();
        let memory_mb = memory::current_rss_mb();
        let files_per_second = stats.overall_files_per_second(now);
        let dirs_per_second_overall = stats.overall_dirs_per_second(now);

        if let Ok(mut tracker) = self.rate_tracker.lock() {
            tracker.update_peak_rate(PeakKind::FilesPerSecond, files_per_second);
            tracker.update_peak_rate(PeakKind::DirsPerSecond, dirs_per_second_overall);
            let deletion_rate = tracker.get_phase_rate(RatePhase::Deletion, RateMetric::Files);
            tracker.update_peak_rate(PeakKind::FilesDeletedPerSecond, deletion_rate);
            let reap_rate =
                tracker.get_phase_rate(RatePhase::RemovingEmptyDirs, RateMetric::Dirs);
            tracker.update_peak_rate(PeakKind::DirsDeletedPerSecond, reap_rate);
        }

        let record = self.build_progress_record(
            &stats,
            phase,
            now,
            memory_mb,
            files_per_second,
            empty_dir_total,
        );
        self.logger.info(
            "Progress update",
            Some(serde_json::to_value(&record).unwrap_or_default()),
        );

        let stalled = stall.observe(phase, &stats);
        if stalled >= STALL_TICKS_BEFORE_WARNING
            && matches!(phase, Phase::Scanning | Phase::RemovingEmptyDirs)
        {
            let active: Vec<String> = {
                let dirs = self.active_dirs.lock().await;
                dirs.iter()
                    .take(ACTIVE_DIR_DUMP_LIMIT)
                    .map(|p| p.display().to_string())
                    .collect()
            };
            self.logger.warning(
                "No progress detected, filesystem may be unresponsive",
                Some(json!({
                    "phase": phase.as_str(),
                    "stalled_ticks": stalled,
                    "stalled_seconds": round1(
                        stalled as f64 * self.config.progress_interval_secs
                    ),
                    "active_directories": active,
                    "advisory": "check filesystem health and NFS server responsiveness",
                })),
            );
        }
    }

    fn build_progress_record(
        &self,
        stats: &PurgeStats,
        phase: Phase,
        now: f64,
        memory_mb: f64,
        files_per_second: f64,
        empty_dir_total: u64,
    ) -> ProgressRecord {
        let scanning = phase == Phase::Scanning;
        let reaping = phase == Phase::RemovingEmptyDirs;

        let reap_rate = if reaping {
            self.rate_tracker
                .lock()
                .map(|t| t.get_phase_rate(RatePhase::RemovingEmptyDirs, RateMetric::Dirs))
                .unwrap_or(0.0)
        } else {
            0.0
        };

        let mut record = ProgressRecord {
            elapsed_seconds: round1(now - stats.start_time),
            phase: phase.as_str(),
            files_scanned: scanning.then_some(stats.files_scanned),
            files_purged: scanning.then_some(stats.files_purged),
            dirs_scanned: scanning.then_some(stats.dirs_scanned),
            files_to_purge: (scanning && stats.files_to_purge > 0)
                .then_some(stats.files_to_purge),
            dirs_purged: reaping.then_some(stats.empty_dirs_deleted),
            dirs_to_purge: reaping.then_some(empty_dir_total),
            dirs_per_second: reaping.then_some(round2(reap_rate)),
            errors: stats.errors,
            memory_backpressure_events: stats.memory_backpressure_events,
            files_per_second: round2(files_per_second),
            memory_mb: round1(memory_mb),
            memory_usage_percent: round1(memory::usage_percent(
                memory_mb,
                self.config.memory_limit_mb,
            )),
            files_per_second_instant: None,
            files_per_second_short: None,
            files_per_second_phase: None,
            dirs_per_second_phase: None,
            peak_files_per_second: None,
            peak_dirs_per_second: None,
            peak_files_deleted_per_second: None,
            active_tasks: None,
            max_active_tasks: None,
            concurrency_utilization_percent: None,
            memory_mb_per_1k_files: None,
        };

        if self.logger.debug_enabled() {
            if let Ok(tracker) = self.rate_tracker.lock() {
                record.files_per_second_instant = Some(round2(tracker.get_rate(
                    RatePhase::Scanning,
                    RateMetric::Files,
                    10.0,
                )));
                record.files_per_second_short = Some(round2(tracker.get_rate(
                    RatePhase::Scanning,
                    RateMetric::Files,
                    60.0,
                )));
                record.files_per_second_phase = Some(round2(
                    tracker.get_phase_rate(RatePhase::Scanning, RateMetric::Files),
                ));
                record.dirs_per_second_phase = Some(round2(if reaping {
                    tracker.get_phase_rate(RatePhase::RemovingEmptyDirs, RateMetric::Dirs)
                } else {
                    tracker.get_phase_rate(RatePhase::Scanning, RateMetric::Dirs)
                }));
                record.peak_files_per_second =
                    Some(round2(tracker.peak(PeakKind::FilesPerSecond).value));
                record.peak_dirs_per_second =
                    Some(round2(tracker.peak(PeakKind::DirsPerSecond).value));
                record.peak_files_deleted_per_second =
                    Some(round2(tracker.peak(PeakKind::FilesDeletedPerSecond).value));
            }
            let active = self.active_tasks.load(Ordering::Relaxed);
            let max_active = self.max_active_tasks.load(Ordering::Relaxed);
            record.active_tasks = Some(active);
            record.max_active_tasks = Some(max_active);
            record.concurrency_utilization_percent = Some(round1(
                max_active as f64 / self.config.max_concurrency_scanning as f64 * 100.0,
            ));
            record.memory_mb_per_1k_files = Some(if stats.files_scanned > 0 {
                round2(memory_mb / (stats.files_scanned as f64 / 1000.0))
            } else {
                0.0
            });
        }

        record
    }
}
