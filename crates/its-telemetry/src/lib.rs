//! # ITS Telemetry
//!
//! Logging and metrics setup shared by every binary in the workspace.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use its_telemetry::{init_telemetry, TelemetryConfig};
//!
//! fn main() -> anyhow::Result<()> {
//!     let _guard = init_telemetry(TelemetryConfig::from_env())?;
//!     // ...
//!     Ok(())
//! }
//! ```
//!
//! ## Environment Variables
//!
//! | Variable | Default | Description |
//! |----------|---------|-------------|
//! | `ITS_LOG_LEVEL` / `RUST_LOG` | `info` | Log filter |
//! | `ITS_JSON_LOGS` | `false` | JSON log lines |
//! | `ITS_CONSOLE_OUTPUT` | `true` | Write logs to stderr |
//! | `ITS_METRICS` | `true` | Register Prometheus collectors |
//! | `ITS_SERVICE_NAME` | `v2x-safety-stack` | Service name in logs |

mod config;
mod logging;
pub mod metrics;

pub use config::TelemetryConfig;
pub use logging::init_logging;
pub use metrics::{
    advance_counter, encode_metrics, register_metrics, COMPONENT_ERRORS, EVENT_BUS_MESSAGES,
    FLOW_FLAGGED_SENDERS, FLOW_UTILIZATION, IDENTITY_CHANGES, LDM_EVICTIONS, LDM_SLOTS,
    MODE_CHANGES, TX_MESSAGES, VERIFICATION_DROPS, VERIFICATION_IN_FLIGHT, VERIFICATION_LATENCY,
    VERIFICATION_RESULTS,
};

use thiserror::Error;

/// Telemetry initialization errors
#[derive(Error, Debug)]
pub enum TelemetryError {
    #[error("Failed to initialize logging: {0}")]
    LoggingInit(String),

    #[error("Failed to initialize Prometheus metrics: {0}")]
    MetricsInit(String),

    #[error("Invalid configuration: {0}")]
    Config(String),
}

/// Initializes logging and, when enabled, metrics.
///
/// Hold the returned guard for the lifetime of the process.
pub fn init_telemetry(config: TelemetryConfig) -> Result<TelemetryGuard, TelemetryError> {
    if config.metrics_enabled {
        register_metrics()?;
    }
    init_logging(&config)?;
    Ok(TelemetryGuard {
        service_name: config.service_name,
    })
}

/// Guard that keeps telemetry active.
pub struct TelemetryGuard {
    service_name: String,
}

impl Drop for TelemetryGuard {
    fn drop(&mut self) {
        tracing::info!(service = %self.service_name, "Shutting down telemetry");
    }
}

/// Convenience macro for recording a metric increment.
#[macro_export]
macro_rules! metric_inc {
    ($metric:expr) => {
        $metric.inc()
    };
    ($metric:expr, $labels:expr) => {
        $metric.with_label_values($labels).inc()
    };
}

/// Convenience macro for recording a metric with a value.
#[macro_export]
macro_rules! metric_observe {
    ($metric:expr, $value:expr) => {
        $metric.observe($value)
    };
    ($metric:expr, $labels:expr, $value:expr) => {
        $metric.with_label_values($labels).observe($value)
    };
}
