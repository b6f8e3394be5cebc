//! # Error Types
//!
//! Errors shared across components.

use std::path::PathBuf;
use thiserror::Error;

/// Errors raised while opening or writing an audit log.
#[derive(Debug, Error)]
pub enum AuditLogError {
    /// The log file could not be created or truncated.
    #[error("cannot open audit log {path}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A line could not be appended.
    #[error("cannot write audit log {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Errors reported by the security collaborator.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SecurityError {
    /// The service session is not open.
    #[error("security service unavailable: {0}")]
    Unavailable(String),

    /// The request was refused before verification started.
    #[error("verification request refused: {0}")]
    Refused(String),

    /// Signing failed.
    #[error("signing failed: {0}")]
    Signing(String),

    /// The pseudonym change did not complete.
    #[error("identity change failed: {0}")]
    IdentityChange(String),
}
