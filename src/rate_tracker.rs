//! Phase-aware throughput tracking over a bounded sample ring.
//!
//! Samples feed three views: sliding-window rates (sum over the samples
//! inside the window divided by their time span), whole-phase rates
//! (phase counter over phase elapsed time), and retained peak rates.

use std::collections::VecDeque;

use crate::stats::epoch_secs;

pub const SAMPLE_CAPACITY: usize = 10_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RatePhase {
    Scanning,
    Deletion,
    RemovingEmptyDirs,
}

impl RatePhase {
    fn index(self) -> usize {
        match self {
            RatePhase::Scanning => 0,
            RatePhase::Deletion => 1,
            RatePhase::RemovingEmptyDirs => 2,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateMetric {
    Files,
    Dirs,
}

/// Named peak rates retained for the whole run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeakKind {
    FilesPerSecond,
    DirsPerSecond,
    FilesDeletedPerSecond,
    DirsDeletedPerSecond,
}

impl PeakKind {
    fn index(self) -> usize {
        match self {
            PeakKind::FilesPerSecond => 0,
            PeakKind::DirsPerSecond => 1,
            PeakKind::FilesDeletedPerSecond => 2,
            PeakKind::DirsDeletedPerSecond => 3,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Sample {
    timestamp: f64,
    phase: RatePhase,
    metric: RateMetric,
    count: u64,
}

#[derive(Debug, Clone, Copy, Default)]
struct PhaseCounts {
    files: u64,
    dirs: u64,
}

impl PhaseCounts {
    fn get(&self, metric: RateMetric) -> u64 {
        match metric {
            RateMetric::Files => self.files,
            RateMetric::Dirs => self.dirs,
        }
    }

    fn add(&mut self, metric: RateMetric, count: u64) {
        match metric {
            RateMetric::Files => self.files += count,
            RateMetric::Dirs => self.dirs += count,
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct PeakRate {
    pub value: f64,
    pub timestamp: Option<f64>,
}

#[derive(Debug)]
pub struct RateTracker {
    samples: VecDeque<Sample>,
    phase_starts: [Option<f64>; 3],
    phase_counts: [PhaseCounts; 3],
    peaks: [PeakRate; 4],
}

impl RateTracker {
    pub fn new() -> Self {
        Self {
            samples: VecDeque::with_capacity(SAMPLE_CAPACITY),
            phase_starts: [None; 3],
            phase_counts: [PhaseCounts::default(); 3],
            peaks: [PeakRate::default(); 4],
        }
    }

    pub fn record(&mut self, phase: RatePhase, metric: RateMetric, count: u64) {
        self.record_at(epoch_secs(), phase, metric, count);
    }

    fn record_at(&mut self, now: f64, phase: RatePhase, metric: RateMetric, count: u64) {
        if self.samples.len() == SAMPLE_CAPACITY {
            self.samples.pop_front();
        }
        self.samples.push_back(Sample {
            timestamp: now,
            phase,
            metric,
            count,
        });
        self.phase_counts[phase.index()].add(metric, count);
    }

    /// Rate over the trailing `window_secs`, or 0.0 with fewer than two
    /// matching in-window samples or a non-positive time span.
    pub fn get_rate(&self, phase: RatePhase, metric: RateMetric, window_secs: f64) -> f64 {
        self.rate_at(epoch_secs(), phase, metric, window_secs)
    }

    fn rate_at(&self, now: f64, phase: RatePhase, metric: RateMetric, window_secs: f64) -> f64 {
        let cutoff = now - window_secs;
        let mut total: u64 = 0;
        let mut matched: usize = 0;
        let mut first: f64 = 0.0;
        let mut last: f64 = 0.0;
        for sample in &self.samples {
            if sample.timestamp > cutoff && sample.phase == phase && sample.metric == metric {
                if matched == 0 {
                    first = sample.timestamp;
                }
                last = sample.timestamp;
                total += sample.count;
                matched += 1;
            }
        }
        if matched < 2 {
            return 0.0;
        }
        let span = last - first;
        if span <= 0.0 {
            return 0.0;
        }
        total as f64 / span
    }

    /// Start (or restart) a phase: capture the start time and reset the
    /// phase-scoped counters.
    pub fn set_phase_start(&mut self, phase: RatePhase) {
        self.phase_starts[phase.index()] = Some(epoch_secs());
        self.phase_counts[phase.index()] = PhaseCounts::default();
    }

    pub fn phase_started(&self, phase: RatePhase) -> bool {
        self.phase_starts[phase.index()].is_some()
    }

    pub fn phase_count(&self, phase: RatePhase, metric: RateMetric) -> u64 {
        self.phase_counts[phase.index()].get(metric)
    }

    /// Average rate since the phase started, or 0.0 when the phase has not
    /// started or no time has elapsed.
    pub fn get_phase_rate(&self, phase: RatePhase, metric: RateMetric) -> f64 {
        let Some(start) = self.phase_starts[phase.index()] else {
            return 0.0;
        };
        let elapsed = epoch_secs() - start;
        if elapsed <= 0.0 {
            return 0.0;
        }
        self.phase_counts[phase.index()].get(metric) as f64 / elapsed
    }

    pub fn update_peak_rate(&mut self, kind: PeakKind, rate: f64) {
        let peak = &mut self.peaks[kind.index()];
        if rate > peak.value {
            peak.value = rate;
            peak.timestamp = Some(epoch_secs());
        }
    }

    pub fn peak(&self, kind: PeakKind) -> PeakRate {
        self.peaks[kind.index()]
    }
}

impl Default for RateTracker {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tracker_starts_empty() {
        let tracker = RateTracker::new();
        assert_eq!(tracker.samples.len(), 0);
        assert_eq!(tracker.peak(PeakKind::FilesPerSecond).value, 0.0);
        assert!(tracker.peak(PeakKind::DirsPerSecond).timestamp.is_none());
    }

    #[test]
    fn test_record_sample() {
        let mut tracker = RateTracker::new();
        tracker.record(RatePhase::Scanning, RateMetric::Files, 1);
        assert_eq!(tracker.samples.len(), 1);
        let sample = tracker.samples[0];
        assert_eq!(sample.phase, RatePhase::Scanning);
        assert_eq!(sample.metric, RateMetric::Files);
        assert_eq!(sample.count, 1);
    }

    #[test]
    fn test_record_bumps_phase_counts() {
        let mut tracker = RateTracker::new();
        tracker.record(RatePhase::Scanning, RateMetric::Files, 5);
        tracker.record(RatePhase::Scanning, RateMetric::Dirs, 2);
        assert_eq!(tracker.phase_count(RatePhase::Scanning, RateMetric::Files), 5);
        assert_eq!(tracker.phase_count(RatePhase::Scanning, RateMetric::Dirs), 2);
    }

    #[test]
    fn test_ring_evicts_oldest() {
        let mut tracker = RateTracker::new();
        for i in 0..(SAMPLE_CAPACITY + 10) {
            tracker.record_at(i as f64, RatePhase::Scanning, RateMetric::Files, 1);
        }
        assert_eq!(tracker.samples.len(), SAMPLE_CAPACITY);
        assert_eq!(tracker.samples.front().unwrap().timestamp, 10.0);
    }

    #[test]
    fn test_windowed_rate() {
        let mut tracker = RateTracker::new();
        let now = 1_000_000.0;
        // 10 files every 5 seconds; the 12 s window sees the last two
        // samples, 20 files over a 5 second span.
        tracker.record_at(now - 20.0, RatePhase::Scanning, RateMetric::Files, 10);
        tracker.record_at(now - 15.0, RatePhase::Scanning, RateMetric::Files, 10);
        tracker.record_at(now - 10.0, RatePhase::Scanning, RateMetric::Files, 10);
        tracker.record_at(now - 5.0, RatePhase::Scanning, RateMetric::Files, 10);
        let rate = tracker.rate_at(now, RatePhase::Scanning, RateMetric::Files, 12.0);
        assert_eq!(rate, 20.0 / 5.0);

        // A wider window picks up the older samples too.
        let rate = tracker.rate_at(now, RatePhase::Scanning, RateMetric::Files, 30.0);
        assert_eq!(rate, 40.0 / 15.0);
    }

    #[test]
    fn test_rate_zero_without_samples() {
        let tracker = RateTracker::new();
        assert_eq!(tracker.get_rate(RatePhase::Scanning, RateMetric::Files, 10.0), 0.0);
    }

    #[test]
    fn test_rate_zero_with_single_sample() {
        let mut tracker = RateTracker::new();
        tracker.record_at(100.0, RatePhase::Scanning, RateMetric::Files, 10);
        assert_eq!(tracker.rate_at(101.0, RatePhase::Scanning, RateMetric::Files, 10.0), 0.0);
    }

    #[test]
    fn test_rate_filters_phase_and_metric() {
        let mut tracker = RateTracker::new();
        tracker.record_at(100.0, RatePhase::Scanning, RateMetric::Files, 10);
        tracker.record_at(101.0, RatePhase::Scanning, RateMetric::Files, 10);
        assert_eq!(tracker.rate_at(102.0, RatePhase::Deletion, RateMetric::Files, 10.0), 0.0);
        assert_eq!(tracker.rate_at(102.0, RatePhase::Scanning, RateMetric::Dirs, 10.0), 0.0);
    }

    #[test]
    fn test_set_phase_start_resets_counters() {
        let mut tracker = RateTracker::new();
        tracker.record(RatePhase::Scanning, RateMetric::Files, 7);
        tracker.set_phase_start(RatePhase::Scanning);
        assert!(tracker.phase_started(RatePhase::Scanning));
        assert_eq!(tracker.phase_count(RatePhase::Scanning, RateMetric::Files), 0);
        assert_eq!(tracker.phase_count(RatePhase::Scanning, RateMetric::Dirs), 0);
    }

    #[test]
    fn test_phase_rate_not_started_is_zero() {
        let tracker = RateTracker::new();
        assert_eq!(tracker.get_phase_rate(RatePhase::Scanning, RateMetric::Files), 0.0);
    }

    #[test]
    fn test_phase_rate_after_start() {
        let mut tracker = RateTracker::new();
        tracker.set_phase_start(RatePhase::Scanning);
        tracker.phase_starts[RatePhase::Scanning.index()] = Some(epoch_secs() - 10.0);
        tracker.record(RatePhase::Scanning, RateMetric::Files, 100);
        let rate = tracker.get_phase_rate(RatePhase::Scanning, RateMetric::Files);
        assert!(rate > 5.0 && rate < 15.0, "unexpected rate {rate}");
    }

    #[test]
    fn test_peak_rate_retains_maximum() {
        let mut tracker = RateTracker::new();
        tracker.update_peak_rate(PeakKind::FilesPerSecond, 100.0);
        assert_eq!(tracker.peak(PeakKind::FilesPerSecond).value, 100.0);
        assert!(tracker.peak(PeakKind::FilesPerSecond).timestamp.is_some());

        tracker.update_peak_rate(PeakKind::FilesPerSecond, 150.0);
        assert_eq!(tracker.peak(PeakKind::FilesPerSecond).value, 150.0);

        tracker.update_peak_rate(PeakKind::FilesPerSecond, 120.0);
        assert_eq!(tracker.peak(PeakKind::FilesPerSecond).value, 150.0);
    }
}
