//! Transmit-side configuration.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// When the host pseudonym rotates.
///
/// A change needs both the interval to have elapsed and the host to have
/// travelled at least `distance_m` since the previous change. Without an
/// interval, rotation is off.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct IdentityChangePolicy {
    pub interval: Option<Duration>,
    pub distance_m: f64,
}

impl IdentityChangePolicy {
    /// Builds the policy from raw settings; a zero interval disables rotation.
    #[must_use]
    pub fn from_settings(interval_ms: u64, distance_m: f64) -> Self {
        Self {
            interval: (interval_ms > 0).then(|| Duration::from_millis(interval_ms)),
            distance_m: distance_m.max(0.0),
        }
    }

    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.interval.is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GateConfig {
    /// Gate transmissions on congestion-control permits.
    pub congestion_control: bool,
    /// Period of both transmit loops.
    pub transmit_interval: Duration,
    pub identity_change: IdentityChangePolicy,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            congestion_control: false,
            transmit_interval: Duration::from_millis(100),
            identity_change: IdentityChangePolicy::default(),
        }
    }
}
