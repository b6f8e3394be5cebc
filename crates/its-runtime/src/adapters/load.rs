//! Verification load as seen from the pipeline.
//!
//! Demand is every verification the pipeline has finished or still has in
//! flight. `load()` reports its growth per second since the previous call,
//! which the flood detector makes once per evaluation round.

use its_02_flow_filter::{LoadError, LoadMonitor};
use its_03_verification::AsyncVerificationPipeline;
use parking_lot::Mutex;
use shared_types::entities::Timestamp;
use shared_types::time::TimeSource;
use std::sync::Arc;

#[derive(Debug, Default)]
struct Sample {
    at_ms: Option<Timestamp>,
    demand: u64,
    rate: f64,
}

pub struct PipelineLoadMonitor {
    pipeline: Arc<AsyncVerificationPipeline>,
    capacity: Option<f64>,
    clock: Arc<dyn TimeSource>,
    last: Mutex<Sample>,
}

impl PipelineLoadMonitor {
    /// `capacity` is what the security service reports, if anything.
    pub fn new(
        pipeline: Arc<AsyncVerificationPipeline>,
        capacity: Option<f64>,
        clock: Arc<dyn TimeSource>,
    ) -> Self {
        Self {
            pipeline,
            capacity,
            clock,
            last: Mutex::new(Sample::default()),
        }
    }

    fn demand(&self) -> u64 {
        self.pipeline.stats().processed + self.pipeline.in_flight() as u64
    }
}

impl LoadMonitor for PipelineLoadMonitor {
    fn load(&self) -> f64 {
        let now = self.clock.now_ms();
        let demand = self.demand();
        let mut last = self.last.lock();
        let Some(at_ms) = last.at_ms else {
            *last = Sample {
                at_ms: Some(now),
                demand,
                rate: 0.0,
            };
            return 0.0;
        };

        let elapsed_ms = now.saturating_sub(at_ms);
        if elapsed_ms == 0 {
            return last.rate;
        }
        let rate = demand.saturating_sub(last.demand) as f64 * 1000.0 / elapsed_ms as f64;
        *last = Sample {
            at_ms: Some(now),
            demand,
            rate,
        };
        rate
    }

    fn capacity(&self) -> Result<f64, LoadError> {
        self.capacity
            .ok_or_else(|| LoadError::CapacityUnavailable("security service reports none".into()))
    }
}
