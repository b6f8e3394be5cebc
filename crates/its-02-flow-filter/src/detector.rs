//! # Flood Detector
//!
//! Drives [`FlowFilter::evaluate`] from the configured thresholds and the
//! measured verification utilization. While utilization is at or above the
//! threshold it also sheds the excess load through
//! [`FlowFilter::relevance_filter`]:
//!
//! ```text
//! filter_rate = ceil(load - utilization_threshold * capacity)   (msg/s)
//! ```
//!
//! ```text
//! [QUIET] ──senders flagged──→ [MITIGATING]   evaluation every period / 2
//!    ↑                               │
//!    └──────── nothing flagged ──────┘         evaluation every period
//! ```

use crate::domain::FloodDetectionConfig;
use crate::filter::FlowFilter;
use crate::ports::LoadMonitor;
use shared_types::entities::L2FilterEntry;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Outcome of one evaluation round.
#[derive(Debug, Clone, PartialEq)]
pub struct FloodDecision {
    pub utilization: f64,
    /// Flooding senders.
    pub entries: Vec<L2FilterEntry>,
    /// Excess verification load to shed, in messages per second.
    pub filter_rate: u32,
    /// Irrelevant senders picked to shed `filter_rate`.
    pub relevance: Vec<L2FilterEntry>,
}

impl FloodDecision {
    /// Every sender to filter at the radio, flooding senders first.
    #[must_use]
    pub fn filter_list(&self) -> Vec<L2FilterEntry> {
        let mut list = self.entries.clone();
        list.extend_from_slice(&self.relevance);
        list
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty() && self.relevance.is_empty()
    }
}

#[derive(Debug, Clone, Copy)]
struct Measurement {
    load: f64,
    capacity: f64,
}

impl Measurement {
    fn utilization(self) -> f64 {
        if self.capacity <= 0.0 {
            0.0
        } else {
            self.load / self.capacity
        }
    }
}

pub struct FloodDetector {
    filter: Arc<FlowFilter>,
    monitor: Arc<dyn LoadMonitor>,
    config: FloodDetectionConfig,
    mitigating: AtomicBool,
    rounds: AtomicU64,
    flagged_total: AtomicU64,
    relevance_total: AtomicU64,
}

impl FloodDetector {
    pub fn new(
        filter: Arc<FlowFilter>,
        monitor: Arc<dyn LoadMonitor>,
        config: FloodDetectionConfig,
    ) -> Self {
        Self {
            filter,
            monitor,
            config,
            mitigating: AtomicBool::new(false),
            rounds: AtomicU64::new(0),
            flagged_total: AtomicU64::new(0),
            relevance_total: AtomicU64::new(0),
        }
    }

    /// Current verification utilization.
    ///
    /// Uses the capacity override when set. An unknown or zero capacity
    /// yields zero utilization, which disables flagging.
    #[must_use]
    pub fn utilization(&self) -> f64 {
        self.measure().map_or(0.0, Measurement::utilization)
    }

    /// Samples the load monitor once.
    fn measure(&self) -> Option<Measurement> {
        let capacity = match self.config.capacity_override {
            Some(capacity) => capacity,
            None => match self.monitor.capacity() {
                Ok(capacity) => capacity,
                Err(e) => {
                    warn!(error = %e, "Verification capacity unknown, flood flagging idle");
                    return None;
                }
            },
        };
        Some(Measurement {
            load: self.monitor.load(),
            capacity,
        })
    }

    /// Runs one evaluation round.
    pub fn run_once(&self) -> FloodDecision {
        let measurement = self.measure();
        let utilization = measurement.map_or(0.0, Measurement::utilization);
        let period_ms = self.next_interval().as_millis() as u64;
        let entries = self.filter.evaluate(
            period_ms,
            self.config.rate_threshold,
            self.config.utilization_threshold,
            utilization,
        );

        let filter_rate = match measurement {
            Some(m) if m.capacity > 0.0 && utilization >= self.config.utilization_threshold => {
                (m.load - self.config.utilization_threshold * m.capacity)
                    .ceil()
                    .max(0.0) as u32
            }
            _ => 0,
        };
        let relevance: Vec<L2FilterEntry> = if filter_rate > 0 {
            self.filter
                .relevance_filter(filter_rate, self.config.relevance_filter_duration_ms)
                .into_iter()
                .filter(|r| entries.iter().all(|e| e.source != r.source))
                .collect()
        } else {
            Vec::new()
        };
        if !relevance.is_empty() {
            debug!(
                filter_rate,
                senders = relevance.len(),
                "Irrelevant senders filtered to shed load"
            );
        }

        self.rounds.fetch_add(1, Ordering::Relaxed);
        self.flagged_total
            .fetch_add(entries.len() as u64, Ordering::Relaxed);
        self.relevance_total
            .fetch_add(relevance.len() as u64, Ordering::Relaxed);

        let active = !entries.is_empty();
        let was_active = self.mitigating.swap(active, Ordering::AcqRel);
        if active && !was_active {
            warn!(
                senders = entries.len(),
                utilization, "Flooding detected, mitigation on"
            );
        } else if !active && was_active {
            info!(utilization, "Flooding subsided, mitigation off");
        }

        FloodDecision {
            utilization,
            entries,
            filter_rate,
            relevance,
        }
    }

    /// Delay before the next round: half the period while mitigating.
    #[must_use]
    pub fn next_interval(&self) -> Duration {
        if self.is_mitigating() {
            self.config.evaluation_period / 2
        } else {
            self.config.evaluation_period
        }
    }

    #[must_use]
    pub fn is_mitigating(&self) -> bool {
        self.mitigating.load(Ordering::Acquire)
    }

    #[must_use]
    pub fn rounds(&self) -> u64 {
        self.rounds.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn flagged_total(&self) -> u64 {
        self.flagged_total.load(Ordering::Relaxed)
    }

    /// Senders filtered for relevance since creation.
    #[must_use]
    pub fn relevance_total(&self) -> u64 {
        self.relevance_total.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn config(&self) -> &FloodDetectionConfig {
        &self.config
    }

    #[must_use]
    pub fn filter(&self) -> &Arc<FlowFilter> {
        &self.filter
    }
}
