//! Prometheus metrics for the safety stack.
//!
//! All metrics follow the naming convention: `its_<component>_<metric>_<unit>`
//!
//! ## Metric Types
//!
//! - **Counter**: monotonically increasing (e.g. `its_verification_results_total`)
//! - **Gauge**: point-in-time value (e.g. `its_ldm_slots`)
//! - **Histogram**: distribution (e.g. `its_verification_latency_seconds`)

use lazy_static::lazy_static;
use prometheus::{
    exponential_buckets, Counter, CounterVec, Encoder, Gauge, GaugeVec, Histogram, HistogramOpts,
    Opts, Registry, TextEncoder,
};

use crate::TelemetryError;

lazy_static! {
    /// Global metrics registry
    pub static ref REGISTRY: Registry = Registry::new();

    // =========================================================================
    // LDM METRICS (Component 01)
    // =========================================================================

    /// Slots by state
    pub static ref LDM_SLOTS: GaugeVec = GaugeVec::new(
        Opts::new("its_ldm_slots", "LDM slots by state"),
        &["state"]  // state: total/free/bound
    ).expect("metric creation failed");

    /// Entries removed by age or size pressure
    pub static ref LDM_EVICTIONS: CounterVec = CounterVec::new(
        Opts::new("its_ldm_evictions_total", "LDM entries removed"),
        &["reason"]  // reason: age/pressure
    ).expect("metric creation failed");

    // =========================================================================
    // FLOW FILTER METRICS (Component 02)
    // =========================================================================

    /// Senders handed to the link-layer filter
    pub static ref FLOW_FLAGGED_SENDERS: Counter = Counter::new(
        "its_flow_flagged_senders_total",
        "Senders flagged for link-layer filtering"
    ).expect("metric creation failed");

    /// Verification utilization seen by the last evaluation
    pub static ref FLOW_UTILIZATION: Gauge = Gauge::new(
        "its_flow_verification_utilization",
        "Verification load divided by capacity"
    ).expect("metric creation failed");

    // =========================================================================
    // VERIFICATION METRICS (Component 03)
    // =========================================================================

    /// Completed verifications by result
    pub static ref VERIFICATION_RESULTS: CounterVec = CounterVec::new(
        Opts::new("its_verification_results_total", "Completed verifications"),
        &["result"]  // result: verified/failed
    ).expect("metric creation failed");

    /// Requests lost before post-processing
    pub static ref VERIFICATION_DROPS: CounterVec = CounterVec::new(
        Opts::new("its_verification_drops_total", "Verification requests dropped"),
        &["reason"]  // reason: busy/overwritten/stale/overflow
    ).expect("metric creation failed");

    /// Slots awaiting a callback
    pub static ref VERIFICATION_IN_FLIGHT: Gauge = Gauge::new(
        "its_verification_in_flight",
        "Async verifications awaiting a callback"
    ).expect("metric creation failed");

    /// Submission to callback
    pub static ref VERIFICATION_LATENCY: Histogram = Histogram::with_opts(
        HistogramOpts::new(
            "its_verification_latency_seconds",
            "Time from submission to verification result"
        ).buckets(exponential_buckets(0.0001, 2.0, 15).unwrap_or_default())
    ).expect("metric creation failed");

    // =========================================================================
    // TRANSMIT METRICS (Component 04)
    // =========================================================================

    /// Outgoing messages by kind and outcome
    pub static ref TX_MESSAGES: CounterVec = CounterVec::new(
        Opts::new("its_tx_messages_total", "Host messages by kind and outcome"),
        &["kind", "outcome"]  // kind: sps/event, outcome: sent/suppressed/failed
    ).expect("metric creation failed");

    /// Mode transitions
    pub static ref MODE_CHANGES: CounterVec = CounterVec::new(
        Opts::new("its_mode_changes_total", "Transmit mode transitions"),
        &["mode"]  // mode: normal/critical
    ).expect("metric creation failed");

    /// Pseudonym changes
    pub static ref IDENTITY_CHANGES: Counter = Counter::new(
        "its_identity_changes_total",
        "Host pseudonym changes"
    ).expect("metric creation failed");

    // =========================================================================
    // EVENT BUS AND ERRORS
    // =========================================================================

    /// Events published on the bus
    pub static ref EVENT_BUS_MESSAGES: CounterVec = CounterVec::new(
        Opts::new("its_eventbus_messages_total", "Events published on the bus"),
        &["event_type"]
    ).expect("metric creation failed");

    /// Errors by component and type
    pub static ref COMPONENT_ERRORS: CounterVec = CounterVec::new(
        Opts::new("its_component_errors_total", "Errors by component and type"),
        &["component", "error_type"]
    ).expect("metric creation failed");
}

/// Registers every collector with [`REGISTRY`].
pub fn register_metrics() -> Result<(), TelemetryError> {
    let metrics: Vec<Box<dyn prometheus::core::Collector>> = vec![
        Box::new(LDM_SLOTS.clone()),
        Box::new(LDM_EVICTIONS.clone()),
        Box::new(FLOW_FLAGGED_SENDERS.clone()),
        Box::new(FLOW_UTILIZATION.clone()),
        Box::new(VERIFICATION_RESULTS.clone()),
        Box::new(VERIFICATION_DROPS.clone()),
        Box::new(VERIFICATION_IN_FLIGHT.clone()),
        Box::new(VERIFICATION_LATENCY.clone()),
        Box::new(TX_MESSAGES.clone()),
        Box::new(MODE_CHANGES.clone()),
        Box::new(IDENTITY_CHANGES.clone()),
        Box::new(EVENT_BUS_MESSAGES.clone()),
        Box::new(COMPONENT_ERRORS.clone()),
    ];

    for metric in metrics {
        REGISTRY
            .register(metric)
            .map_err(|e| TelemetryError::MetricsInit(e.to_string()))?;
    }
    Ok(())
}

/// Encode all metrics as Prometheus text format.
pub fn encode_metrics() -> Result<String, TelemetryError> {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    encoder
        .encode(&metric_families, &mut buffer)
        .map_err(|e| TelemetryError::MetricsInit(e.to_string()))?;
    String::from_utf8(buffer).map_err(|e| TelemetryError::MetricsInit(e.to_string()))
}

/// Increments `counter` by the growth of a cumulative value.
pub fn advance_counter(counter: &Counter, previous: u64, current: u64) {
    if current > previous {
        counter.inc_by((current - previous) as f64);
    }
}
