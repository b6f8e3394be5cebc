//! Flood detection configuration.

use std::time::Duration;

/// Thresholds and cadence for flood detection and relevance filtering.
#[derive(Debug, Clone, PartialEq)]
pub struct FloodDetectionConfig {
    /// Run the periodic flood evaluation.
    pub enabled: bool,
    /// Per-sender rate (messages/s) above which a sender is flooding.
    pub rate_threshold: f64,
    /// Verification utilization at or above which flooding is acted on.
    pub utilization_threshold: f64,
    /// Fixed verification capacity (verifications/s) replacing the
    /// measured one.
    pub capacity_override: Option<f64>,
    /// Evaluation cadence while no sender is being filtered.
    pub evaluation_period: Duration,
    /// Records silent for longer than this are purged.
    pub staleness: Duration,
    /// Drop duration for senders picked by the relevance filter.
    pub relevance_filter_duration_ms: u32,
}

impl Default for FloodDetectionConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            rate_threshold: 100.0,
            utilization_threshold: 0.5,
            capacity_override: None,
            evaluation_period: Duration::from_millis(1000),
            staleness: Duration::from_secs(5),
            relevance_filter_duration_ms: 1000,
        }
    }
}
