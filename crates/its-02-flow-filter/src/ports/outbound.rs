//! Outbound (Driven) ports for the flow filter.

use thiserror::Error;

/// Errors from querying verification load.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum LoadError {
    /// The security collaborator did not report a capacity.
    #[error("verification capacity unavailable: {0}")]
    CapacityUnavailable(String),
}

/// Verification load as seen by the security collaborator.
///
/// Utilization is `load / capacity`; flood mitigation acts only when the
/// verifier is busy.
pub trait LoadMonitor: Send + Sync {
    /// Verification requests per second over the recent window.
    fn load(&self) -> f64;

    /// Verifications per second the collaborator can sustain.
    fn capacity(&self) -> Result<f64, LoadError>;
}
