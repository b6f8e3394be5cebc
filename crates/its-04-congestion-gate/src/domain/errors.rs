//! Error types for the transmit side.

use shared_types::errors::SecurityError;
use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransmitError {
    /// The gate was closed while waiting for a permit.
    #[error("transmission gate closed")]
    GateClosed,

    #[error("encoding failed: {0}")]
    Encode(String),

    #[error(transparent)]
    Security(#[from] SecurityError),

    #[error("radio send failed: {0}")]
    Radio(String),
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CongestionError {
    #[error("congestion control failed to start: {0}")]
    StartFailed(String),
}
