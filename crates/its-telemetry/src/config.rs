//! Telemetry configuration from environment variables.

use std::env;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TelemetryConfig {
    /// Service name attached to every log line.
    pub service_name: String,

    /// Filter directive (trace, debug, info, warn, error, or a full
    /// `EnvFilter` expression).
    pub log_level: String,

    /// Whether to write logs to stderr at all.
    pub console_output: bool,

    /// Emit one JSON object per line instead of human-readable text.
    pub json_logs: bool,

    /// Register the Prometheus collectors.
    pub metrics_enabled: bool,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            service_name: "v2x-safety-stack".to_string(),
            log_level: "info".to_string(),
            console_output: true,
            json_logs: false,
            metrics_enabled: true,
        }
    }
}

fn flag(value: &str) -> bool {
    let v = value.to_ascii_lowercase();
    v == "true" || v == "1" || v == "yes"
}

impl TelemetryConfig {
    /// Create configuration from environment variables.
    ///
    /// # Environment Variables
    ///
    /// - `ITS_SERVICE_NAME`: Service name (default: v2x-safety-stack)
    /// - `ITS_LOG_LEVEL` or `RUST_LOG`: Log filter (default: info)
    /// - `ITS_CONSOLE_OUTPUT`: Enable console output (default: true)
    /// - `ITS_JSON_LOGS`: JSON log lines (default: false)
    /// - `ITS_METRICS`: Register Prometheus collectors (default: true)
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            service_name: env::var("ITS_SERVICE_NAME").unwrap_or(defaults.service_name),
            log_level: env::var("ITS_LOG_LEVEL")
                .or_else(|_| env::var("RUST_LOG"))
                .unwrap_or(defaults.log_level),
            console_output: env::var("ITS_CONSOLE_OUTPUT")
                .map(|v| v.to_ascii_lowercase() != "false" && v != "0")
                .unwrap_or(defaults.console_output),
            json_logs: env::var("ITS_JSON_LOGS")
                .map(|v| flag(&v))
                .unwrap_or(defaults.json_logs),
            metrics_enabled: env::var("ITS_METRICS")
                .map(|v| flag(&v))
                .unwrap_or(defaults.metrics_enabled),
        }
    }

    /// Same configuration with a different filter, for `--log-level`.
    #[must_use]
    pub fn with_log_level(mut self, level: impl Into<String>) -> Self {
        self.log_level = level.into();
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = TelemetryConfig::default();
        assert_eq!(config.service_name, "v2x-safety-stack");
        assert_eq!(config.log_level, "info");
        assert!(!config.json_logs);
    }

    #[test]
    fn test_flag_parsing() {
        assert!(flag("TRUE"));
        assert!(flag("1"));
        assert!(!flag("off"));
    }

    #[test]
    fn test_with_log_level() {
        let config = TelemetryConfig::default().with_log_level("debug");
        assert_eq!(config.log_level, "debug");
    }
}
