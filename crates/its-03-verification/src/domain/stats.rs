//! Pipeline counters and batch latency statistics.

use parking_lot::Mutex;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tracing::info;

/// Point-in-time copy of [`PipelineStats`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct PipelineStatsSnapshot {
    pub submitted: u64,
    pub callbacks: u64,
    pub stale_callbacks: u64,
    pub overwritten: u64,
    pub dropped_busy: u64,
    pub submit_errors: u64,
    pub log_overflows: u64,
    pub compaction_recovered: u64,
    pub processed: u64,
    pub verified: u64,
    pub failed: u64,
    pub replays: u64,
    pub misbehavior_detected: u64,
    pub misbehavior_clean: u64,
}

#[derive(Debug)]
struct Batch {
    started: Instant,
    count: u64,
    total: Duration,
    min: Duration,
    max: Duration,
}

impl Batch {
    fn new() -> Self {
        Self {
            started: Instant::now(),
            count: 0,
            total: Duration::ZERO,
            min: Duration::MAX,
            max: Duration::ZERO,
        }
    }
}

/// Counters shared by the submit side, the callback side and the consumer.
#[derive(Debug)]
pub struct PipelineStats {
    pub(crate) submitted: AtomicU64,
    pub(crate) callbacks: AtomicU64,
    pub(crate) stale_callbacks: AtomicU64,
    pub(crate) overwritten: AtomicU64,
    pub(crate) dropped_busy: AtomicU64,
    pub(crate) submit_errors: AtomicU64,
    pub(crate) log_overflows: AtomicU64,
    pub(crate) compaction_recovered: AtomicU64,
    pub(crate) processed: AtomicU64,
    pub(crate) verified: AtomicU64,
    pub(crate) failed: AtomicU64,
    pub(crate) replays: AtomicU64,
    pub(crate) misbehavior_detected: AtomicU64,
    pub(crate) misbehavior_clean: AtomicU64,
    batch_size: u64,
    batch: Mutex<Batch>,
}

impl PipelineStats {
    #[must_use]
    pub fn new(batch_size: u64) -> Self {
        Self {
            submitted: AtomicU64::new(0),
            callbacks: AtomicU64::new(0),
            stale_callbacks: AtomicU64::new(0),
            overwritten: AtomicU64::new(0),
            dropped_busy: AtomicU64::new(0),
            submit_errors: AtomicU64::new(0),
            log_overflows: AtomicU64::new(0),
            compaction_recovered: AtomicU64::new(0),
            processed: AtomicU64::new(0),
            verified: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            replays: AtomicU64::new(0),
            misbehavior_detected: AtomicU64::new(0),
            misbehavior_clean: AtomicU64::new(0),
            batch_size: batch_size.max(1),
            batch: Mutex::new(Batch::new()),
        }
    }

    pub(crate) fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Adds one latency sample; logs and resets the batch when full.
    pub fn record_latency(&self, latency: Duration) {
        let mut batch = self.batch.lock();
        batch.count += 1;
        batch.total += latency;
        batch.min = batch.min.min(latency);
        batch.max = batch.max.max(latency);

        if batch.count >= self.batch_size {
            let elapsed = batch.started.elapsed().as_secs_f64();
            let rate = if elapsed > 0.0 {
                batch.count as f64 / elapsed
            } else {
                0.0
            };
            let avg_ms = batch.total.as_secs_f64() * 1000.0 / batch.count as f64;
            info!(
                samples = batch.count,
                rate_per_sec = rate,
                min_ms = batch.min.as_secs_f64() * 1000.0,
                max_ms = batch.max.as_secs_f64() * 1000.0,
                avg_ms,
                "Verification batch statistics"
            );
            *batch = Batch::new();
        }
    }

    /// Samples accumulated in the current batch.
    #[must_use]
    pub fn batch_fill(&self) -> u64 {
        self.batch.lock().count
    }

    #[must_use]
    pub fn snapshot(&self) -> PipelineStatsSnapshot {
        let load = |c: &AtomicU64| c.load(Ordering::Relaxed);
        PipelineStatsSnapshot {
            submitted: load(&self.submitted),
            callbacks: load(&self.callbacks),
            stale_callbacks: load(&self.stale_callbacks),
            overwritten: load(&self.overwritten),
            dropped_busy: load(&self.dropped_busy),
            submit_errors: load(&self.submit_errors),
            log_overflows: load(&self.log_overflows),
            compaction_recovered: load(&self.compaction_recovered),
            processed: load(&self.processed),
            verified: load(&self.verified),
            failed: load(&self.failed),
            replays: load(&self.replays),
            misbehavior_detected: load(&self.misbehavior_detected),
            misbehavior_clean: load(&self.misbehavior_clean),
        }
    }
}

impl Default for PipelineStats {
    fn default() -> Self {
        Self::new(super::config::DEFAULT_STAT_BATCH)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Test: a full batch resets the accumulator
    #[test]
    fn test_batch_rolls_over() {
        let stats = PipelineStats::new(3);
        stats.record_latency(Duration::from_millis(1));
        stats.record_latency(Duration::from_millis(2));
        assert_eq!(stats.batch_fill(), 2);
        stats.record_latency(Duration::from_millis(3));
        assert_eq!(stats.batch_fill(), 0);
    }

    #[test]
    fn test_snapshot_reads_counters() {
        let stats = PipelineStats::default();
        PipelineStats::bump(&stats.verified);
        PipelineStats::bump(&stats.verified);
        PipelineStats::bump(&stats.failed);
        let snap = stats.snapshot();
        assert_eq!(snap.verified, 2);
        assert_eq!(snap.failed, 1);
        assert_eq!(snap.submitted, 0);
    }
}
