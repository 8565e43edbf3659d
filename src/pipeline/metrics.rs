// src/pipeline/metrics.rs
//
// Session counters. Clones share the same atomics. Summarized into the
// diagnostics log line, the final report and the snapshot file.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

#[derive(Debug, Clone)]
pub struct PipelineMetrics {
    pub frames_processed: Arc<AtomicU64>,
    pub frames_skipped: Arc<AtomicU64>,
    pub detections_seen: Arc<AtomicU64>,
    pub detections_dropped: Arc<AtomicU64>,
    pub tracks_created: Arc<AtomicU64>,
    pub tracks_pruned: Arc<AtomicU64>,
    pub transitions: Arc<AtomicU64>,
    pub manual_overrides: Arc<AtomicU64>,
    pub process_time_us: Arc<AtomicU64>,
    pub started_at: Instant,
}

impl PipelineMetrics {
    pub fn new() -> Self {
        Self {
            frames_processed: Arc::new(AtomicU64::new(0)),
            frames_skipped: Arc::new(AtomicU64::new(0)),
            detections_seen: Arc::new(AtomicU64::new(0)),
            detections_dropped: Arc::new(AtomicU64::new(0)),
            tracks_created: Arc::new(AtomicU64::new(0)),
            tracks_pruned: Arc::new(AtomicU64::new(0)),
            transitions: Arc::new(AtomicU64::new(0)),
            manual_overrides: Arc::new(AtomicU64::new(0)),
            process_time_us: Arc::new(AtomicU64::new(0)),
            started_at: Instant::now(),
        }
    }

    pub fn inc(&self, counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Bumps `counter` by `n`.
    pub fn add(&self, counter: &AtomicU64, n: u64) {
        counter.fetch_add(n, Ordering::Relaxed);
    }

    /// Overwrites a timing gauge with the latest duration in microseconds.
    pub fn set_timing(&self, counter: &AtomicU64, duration_us: u64) {
        counter.store(duration_us, Ordering::Relaxed);
    }

    pub fn fps(&self) -> f64 {
        let frames = self.frames_processed.load(Ordering::Relaxed);
        let elapsed = self.started_at.elapsed().as_secs_f64();
        if elapsed > 0.01 {
            frames as f64 / elapsed
        } else {
            0.0
        }
    }

    pub fn summary(&self) -> MetricsSummary {
        MetricsSummary {
            frames_processed: self.frames_processed.load(Ordering::Relaxed),
            frames_skipped: self.frames_skipped.load(Ordering::Relaxed),
            fps: self.fps(),
            detections_seen: self.detections_seen.load(Ordering::Relaxed),
            detections_dropped: self.detections_dropped.load(Ordering::Relaxed),
            tracks_created: self.tracks_created.load(Ordering::Relaxed),
            tracks_pruned: self.tracks_pruned.load(Ordering::Relaxed),
            transitions: self.transitions.load(Ordering::Relaxed),
            manual_overrides: self.manual_overrides.load(Ordering::Relaxed),
            last_process_us: self.process_time_us.load(Ordering::Relaxed),
            elapsed_secs: self.started_at.elapsed().as_secs_f64(),
        }
    }
}

impl Default for PipelineMetrics {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct MetricsSummary {
    pub frames_processed: u64,
    pub frames_skipped: u64,
    pub fps: f64,
    pub detections_seen: u64,
    pub detections_dropped: u64,
    pub tracks_created: u64,
    pub tracks_pruned: u64,
    pub transitions: u64,
    pub manual_overrides: u64,
    pub last_process_us: u64,
    pub elapsed_secs: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clones_share_counters() {
        let m = PipelineMetrics::new();
        let other = m.clone();
        other.inc(&other.frames_processed);
        m.add(&m.transitions, 3);
        let s = m.summary();
        assert_eq!(s.frames_processed, 1);
        assert_eq!(s.transitions, 3);
    }

    #[test]
    fn timing_keeps_only_the_latest_value() {
        let m = PipelineMetrics::new();
        m.set_timing(&m.process_time_us, 900);
        m.set_timing(&m.process_time_us, 120);
        assert_eq!(m.summary().last_process_us, 120);
    }
}
