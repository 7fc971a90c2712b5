use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// Lock-free counters shared by every worker of a run
#[derive(Debug, Clone)]
pub struct RunMetrics {
    jobs_matched: Arc<AtomicU64>,
    jobs_without_match: Arc<AtomicU64>,
    jobs_failed: Arc<AtomicU64>,
    records_written: Arc<AtomicU64>,

    chunks_completed: Arc<AtomicU64>,
    chunks_failed: Arc<AtomicU64>,
    chunks_stopped: Arc<AtomicU64>,

    // Sum of per-chunk wall time, in milliseconds
    chunk_millis: Arc<AtomicU64>,
}

impl RunMetrics {
    pub fn new() -> Self {
        Self {
            jobs_matched: Arc::new(AtomicU64::new(0)),
            jobs_without_match: Arc::new(AtomicU64::new(0)),
            jobs_failed: Arc::new(AtomicU64::new(0)),
            records_written: Arc::new(AtomicU64::new(0)),
            chunks_completed: Arc::new(AtomicU64::new(0)),
            chunks_failed: Arc::new(AtomicU64::new(0)),
            chunks_stopped: Arc::new(AtomicU64::new(0)),
            chunk_millis: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn record_match(&self, records: usize) {
        self.jobs_matched.fetch_add(1, Ordering::Relaxed);
        self.records_written
            .fetch_add(records as u64, Ordering::Relaxed);
    }

    pub fn record_no_match(&self) {
        self.jobs_without_match.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_failure(&self, jobs: usize) {
        self.jobs_failed.fetch_add(jobs as u64, Ordering::Relaxed);
    }

    /// Records the end of one chunk run
    pub fn record_chunk(&self, elapsed: Duration, failed: bool, stopped: bool) {
        let millis = elapsed.as_millis().min(u64::MAX as u128) as u64;
        let total = self.chunk_millis.fetch_add(millis, Ordering::Relaxed) + millis;
        self.chunks_completed.fetch_add(1, Ordering::Relaxed);
        if failed {
            self.chunks_failed.fetch_add(1, Ordering::Relaxed);
        }
        if stopped {
            self.chunks_stopped.fetch_add(1, Ordering::Relaxed);
        }
        debug!(
            "Chunk finished in {} ms, cumulative chunk time {} ms",
            millis, total
        );
    }

    pub fn get_stats(&self) -> RunStats {
        RunStats {
            jobs_matched: self.jobs_matched.load(Ordering::Relaxed),
            jobs_without_match: self.jobs_without_match.load(Ordering::Relaxed),
            jobs_failed: self.jobs_failed.load(Ordering::Relaxed),
            records_written: self.records_written.load(Ordering::Relaxed),
            chunks_completed: self.chunks_completed.load(Ordering::Relaxed),
            chunks_failed: self.chunks_failed.load(Ordering::Relaxed),
            chunks_stopped: self.chunks_stopped.load(Ordering::Relaxed),
            chunk_time: Duration::from_millis(self.chunk_millis.load(Ordering::Relaxed)),
        }
    }

    pub fn log_stats(&self) {
        let stats = self.get_stats();
        info!(
            "Run stats:\n\
             Jobs matched/no match/failed: {}/{}/{}\n\
             Match records written: {}\n\
             Chunks completed/failed/stopped: {}/{}/{}\n\
             Cumulative chunk time: {}",
            stats.jobs_matched,
            stats.jobs_without_match,
            stats.jobs_failed,
            stats.records_written,
            stats.chunks_completed,
            stats.chunks_failed,
            stats.chunks_stopped,
            humantime::format_duration(stats.chunk_time)
        );
    }
}

impl Default for RunMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Snapshot of [`RunMetrics`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunStats {
    pub jobs_matched: u64,
    pub jobs_without_match: u64,
    pub jobs_failed: u64,
    pub records_written: u64,
    pub chunks_completed: u64,
    pub chunks_failed: u64,
    pub chunks_stopped: u64,
    pub chunk_time: Duration,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_counters() {
        let metrics = RunMetrics::new();
        metrics.record_match(3);
        metrics.record_match(2);
        metrics.record_no_match();
        metrics.record_failure(4);

        let stats = metrics.get_stats();
        assert_eq!(stats.jobs_matched, 2);
        assert_eq!(stats.records_written, 5);
        assert_eq!(stats.jobs_without_match, 1);
        assert_eq!(stats.jobs_failed, 4);
    }

    #[test]
    fn test_chunk_counters() {
        let metrics = RunMetrics::new();
        metrics.record_chunk(Duration::from_millis(120), false, false);
        metrics.record_chunk(Duration::from_millis(30), true, false);
        metrics.record_chunk(Duration::from_millis(50), false, true);

        let stats = metrics.get_stats();
        assert_eq!(stats.chunks_completed, 3);
        assert_eq!(stats.chunks_failed, 1);
        assert_eq!(stats.chunks_stopped, 1);
        assert_eq!(stats.chunk_time, Duration::from_millis(200));
    }

    #[test]
    fn test_clones_share_counters() {
        let metrics = RunMetrics::new();
        let clone = metrics.clone();
        clone.record_no_match();
        assert_eq!(metrics.get_stats().jobs_without_match, 1);
    }
}
