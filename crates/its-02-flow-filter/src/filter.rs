//! # Flow Filter
//!
//! Per-sender message counters used for flood detection and relevance
//! filtering. Caller-driven: nothing here runs on a timer.
//!
//! ## Flood rule
//!
//! ```text
//! rate     = (total - last_total) * 1000 / (now - last_evaluated)
//! flagged  = rate > rate_threshold && utilization >= utilization_threshold
//! duration = utilization < 1 ? max(100 * utilization - 25, 0) : 75   (ms)
//! ```

use crate::domain::{RvClassification, RvFlowRecord};
use parking_lot::Mutex;
use shared_types::entities::{L2Address, L2FilterEntry, Timestamp};
use shared_types::time::TimeSource;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Rate windows shorter than this are stretched to it.
pub const MIN_RATE_WINDOW_MS: u64 = 100;

/// Drop duration for a flooding sender at the given utilization.
#[must_use]
pub fn filtering_duration_ms(utilization: f64) -> u32 {
    if utilization < 1.0 {
        (100.0 * utilization - 25.0).max(0.0) as u32
    } else {
        75
    }
}

/// Per-sender flow tracker.
pub struct FlowFilter {
    records: Mutex<HashMap<L2Address, RvFlowRecord>>,
    staleness_ms: u64,
    clock: Arc<dyn TimeSource>,
    purged: AtomicU64,
}

impl FlowFilter {
    #[must_use]
    pub fn new(staleness: Duration, clock: Arc<dyn TimeSource>) -> Self {
        Self {
            records: Mutex::new(HashMap::new()),
            staleness_ms: staleness.as_millis() as u64,
            clock,
            purged: AtomicU64::new(0),
        }
    }

    /// Counts one message from `sender`, creating its record if absent.
    pub fn on_message(&self, sender: L2Address) {
        let now = self.clock.now_ms();
        let mut records = self.records.lock();
        let record = records
            .entry(sender)
            .or_insert_with(|| RvFlowRecord::new(now));
        record.total += 1;
        record.last_seen_ms = now;
    }

    /// Stores zone and motion flags for `sender`.
    pub fn classify(&self, sender: L2Address, classification: RvClassification) {
        let now = self.clock.now_ms();
        self.records
            .lock()
            .entry(sender)
            .or_insert_with(|| RvFlowRecord::new(now))
            .classification = Some(classification);
    }

    /// Computes the senders to drop for flooding.
    ///
    /// Stale records are purged first. Every remaining sender whose rate
    /// since the last evaluation exceeds `rate_threshold` is returned while
    /// `current_utilization >= utilization_threshold`. `period_ms` is the
    /// window used when a sender has no elapsed time since its last
    /// evaluation.
    pub fn evaluate(
        &self,
        period_ms: u64,
        rate_threshold: f64,
        utilization_threshold: f64,
        current_utilization: f64,
    ) -> Vec<L2FilterEntry> {
        let now = self.clock.now_ms();
        let mut records = self.records.lock();
        self.purge_locked(&mut records, now);

        let congested = current_utilization >= utilization_threshold;
        let duration_ms = filtering_duration_ms(current_utilization);
        let mut flagged = Vec::new();

        for (source, record) in records.iter_mut() {
            if record.total > record.last_total {
                let elapsed = match now.saturating_sub(record.last_evaluated_ms) {
                    0 => period_ms,
                    ms => ms,
                }
                .max(MIN_RATE_WINDOW_MS);
                let delta = record.total - record.last_total;
                record.rate = delta as f64 * 1000.0 / elapsed as f64;

                if record.rate > rate_threshold && congested {
                    debug!(
                        source = *source,
                        rate = record.rate,
                        utilization = current_utilization,
                        duration_ms,
                        "Flooding sender flagged"
                    );
                    flagged.push(L2FilterEntry {
                        source: *source,
                        duration_ms,
                    });
                }
            } else {
                record.rate = 0.0;
            }

            record.last_evaluated_ms = now;
            record.last_total = record.total;
        }

        flagged.sort_by_key(|e| e.source);
        flagged
    }

    /// Picks up to `filter_rate / 10` classified senders that are not a
    /// relevant threat, least relevant first.
    pub fn relevance_filter(&self, filter_rate: u32, duration_ms: u32) -> Vec<L2FilterEntry> {
        let budget = (filter_rate / 10) as usize;
        let now = self.clock.now_ms();
        let mut records = self.records.lock();
        self.purge_locked(&mut records, now);

        let mut candidates: Vec<(u8, L2Address)> = records
            .iter()
            .filter_map(|(source, record)| {
                let class = record.classification?;
                class
                    .is_irrelevant()
                    .then_some((class.drop_rank(), *source))
            })
            .collect();
        candidates.sort_unstable();

        candidates
            .into_iter()
            .take(budget)
            .map(|(_, source)| L2FilterEntry {
                source,
                duration_ms,
            })
            .collect()
    }

    fn purge_locked(&self, records: &mut HashMap<L2Address, RvFlowRecord>, now: Timestamp) {
        let before = records.len();
        records.retain(|_, r| !r.is_stale(now, self.staleness_ms));
        let purged = before - records.len();
        if purged > 0 {
            self.purged.fetch_add(purged as u64, Ordering::Relaxed);
            debug!(purged, remaining = records.len(), "Stale senders purged");
        }
    }

    /// Copy of the record for `sender`.
    #[must_use]
    pub fn record(&self, sender: L2Address) -> Option<RvFlowRecord> {
        self.records.lock().get(&sender).copied()
    }

    /// Number of tracked senders.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Records removed for staleness since creation.
    #[must_use]
    pub fn purged_total(&self) -> u64 {
        self.purged.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::LanePosition;
    use shared_types::time::ManualClock;

    fn filter() -> (FlowFilter, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(0));
        (FlowFilter::new(Duration::from_secs(5), clock.clone()), clock)
    }

    /// Emits `count` messages spread evenly across `span_ms`.
    fn emit(filter: &FlowFilter, clock: &ManualClock, sender: L2Address, count: u64, span_ms: u64) {
        let step = span_ms / count;
        for _ in 0..count {
            filter.on_message(sender);
            clock.advance(step);
        }
    }

    /// Test: first message creates the record
    #[test]
    fn test_on_message_creates_record() {
        let (filter, _) = filter();
        filter.on_message(0xAA);
        filter.on_message(0xAA);

        let record = filter.record(0xAA).unwrap();
        assert_eq!(record.total, 2);
        assert_eq!(filter.len(), 1);
    }

    /// Test: over-rate sender is flagged only under load
    #[test]
    fn test_over_rate_sender_flagged_under_load() {
        let (filter, clock) = filter();
        emit(&filter, &clock, 2, 50, 1000);
        emit(&filter, &clock, 1, 200, 1000);

        let flagged = filter.evaluate(1000, 100.0, 0.5, 0.8);
        assert_eq!(flagged.len(), 1);
        assert_eq!(flagged[0].source, 1);
        assert_eq!(flagged[0].duration_ms, 55);
    }

    /// Test: no flagging below the utilization threshold
    #[test]
    fn test_low_utilization_does_not_flag() {
        let (filter, clock) = filter();
        emit(&filter, &clock, 1, 200, 1000);

        assert!(filter.evaluate(1000, 100.0, 0.5, 0.3).is_empty());
        assert!(filter.record(1).unwrap().rate > 100.0);
    }

    /// Test: rate is measured since the previous evaluation only
    #[test]
    fn test_rate_resets_between_evaluations() {
        let (filter, clock) = filter();
        emit(&filter, &clock, 1, 200, 1000);
        assert_eq!(filter.evaluate(1000, 100.0, 0.5, 1.0).len(), 1);

        emit(&filter, &clock, 1, 20, 1000);
        assert!(filter.evaluate(1000, 100.0, 0.5, 1.0).is_empty());
        let rate = filter.record(1).unwrap().rate;
        assert!((rate - 20.0).abs() < 1e-9, "rate {rate}");
    }

    /// Test: saturated verification uses the fixed 75 ms duration
    #[test]
    fn test_duration_by_utilization() {
        assert_eq!(filtering_duration_ms(0.5), 25);
        assert_eq!(filtering_duration_ms(0.9), 65);
        assert_eq!(filtering_duration_ms(1.0), 75);
        assert_eq!(filtering_duration_ms(3.0), 75);
        assert_eq!(filtering_duration_ms(0.1), 0);
    }

    /// Test: silent sender is purged by the next evaluation
    #[test]
    fn test_stale_sender_purged() {
        let (filter, clock) = filter();
        filter.on_message(1);
        clock.advance(4_000);
        filter.on_message(2);
        clock.advance(1_500);

        filter.evaluate(1000, 100.0, 0.5, 0.0);

        assert!(filter.record(1).is_none());
        assert!(filter.record(2).is_some());
        assert_eq!(filter.purged_total(), 1);
    }

    /// Test: relevance filter honors the budget and skips relevant senders
    #[test]
    fn test_relevance_filter_budget() {
        let (filter, _) = filter();
        let irrelevant = RvClassification {
            out_of_zone: true,
            ttc_ms: 0,
            rapid_deceleration: false,
            stopped: false,
            lane: LanePosition::Unknown,
        };
        let threat = RvClassification {
            out_of_zone: false,
            ttc_ms: 2_000,
            rapid_deceleration: true,
            stopped: false,
            lane: LanePosition::SameAhead,
        };

        for sender in 1..=5 {
            filter.classify(sender, irrelevant);
        }
        filter.classify(99, threat);
        filter.on_message(100);

        let picked = filter.relevance_filter(30, 500);
        assert_eq!(picked.len(), 3);
        assert!(picked.iter().all(|e| e.source != 99 && e.source != 100));
        assert!(picked.iter().all(|e| e.duration_ms == 500));
    }
}
