//! Pipeline configuration.

use super::errors::PipelineError;
use serde::{Deserialize, Serialize};

/// Latency samples per batch statistics line.
pub const DEFAULT_STAT_BATCH: u64 = 2500;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Number of in-flight verification slots (N).
    pub window_size: usize,
    /// The cursor wraps back to the top when it reaches this index.
    pub low_watermark: usize,
    /// Capacity of the completion log (M).
    pub completion_log_size: usize,
    /// Run the misbehavior check on verified beacons.
    pub misbehavior_detection: bool,
    /// Latency samples per batch statistics line.
    pub stat_batch_size: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            window_size: 2048,
            low_watermark: 0,
            completion_log_size: 4096,
            misbehavior_detection: false,
            stat_batch_size: DEFAULT_STAT_BATCH,
        }
    }
}

impl PipelineConfig {
    /// A window of `window_size` slots with a log of twice that.
    #[must_use]
    pub fn with_window(window_size: usize) -> Self {
        Self {
            window_size,
            completion_log_size: window_size.saturating_mul(2),
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<(), PipelineError> {
        if self.window_size == 0 {
            return Err(PipelineError::InvalidConfig(
                "window size must be at least 1".into(),
            ));
        }
        if self.low_watermark >= self.window_size {
            return Err(PipelineError::InvalidConfig(format!(
                "low watermark {} must be below window size {}",
                self.low_watermark, self.window_size
            )));
        }
        if self.completion_log_size == 0 {
            return Err(PipelineError::InvalidConfig(
                "completion log size must be at least 1".into(),
            ));
        }
        Ok(())
    }
}
