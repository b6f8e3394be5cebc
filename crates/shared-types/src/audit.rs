//! # Audit Logs
//!
//! Append-only, comma-delimited latency logs. One line is written per
//! completed verification, sign or misbehavior check:
//!
//! ```text
//! <timestamp_ms>, <latency_ms>
//! ```
//!
//! The file is truncated when the log is opened, so each process run starts
//! with an empty log.

use crate::entities::Timestamp;
use crate::errors::AuditLogError;
use parking_lot::Mutex;
use std::fs::{File, OpenOptions};
use std::io::{LineWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::debug;

struct Sink {
    path: PathBuf,
    writer: Mutex<LineWriter<File>>,
}

/// A latency audit log. A disabled log accepts and discards every record.
pub struct AuditLog {
    sink: Option<Sink>,
    lines: AtomicU64,
}

impl AuditLog {
    /// Opens `path`, truncating any previous content.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, AuditLogError> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&path)
            .map_err(|source| AuditLogError::Open {
                path: path.clone(),
                source,
            })?;

        debug!(path = %path.display(), "Audit log opened");

        Ok(Self {
            sink: Some(Sink {
                path,
                writer: Mutex::new(LineWriter::new(file)),
            }),
            lines: AtomicU64::new(0),
        })
    }

    /// A log that records nothing.
    #[must_use]
    pub fn disabled() -> Self {
        Self {
            sink: None,
            lines: AtomicU64::new(0),
        }
    }

    /// Opens `path` when `enabled`, otherwise returns a disabled log.
    pub fn open_if(enabled: bool, path: impl AsRef<Path>) -> Result<Self, AuditLogError> {
        if enabled {
            Self::open(path)
        } else {
            Ok(Self::disabled())
        }
    }

    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.sink.is_some()
    }

    /// Appends one `timestamp, latency` line.
    pub fn record(&self, timestamp_ms: Timestamp, latency_ms: f64) -> Result<(), AuditLogError> {
        let Some(sink) = &self.sink else {
            return Ok(());
        };

        let mut writer = sink.writer.lock();
        writeln!(writer, "{timestamp_ms}, {latency_ms:.3}").map_err(|source| {
            AuditLogError::Write {
                path: sink.path.clone(),
                source,
            }
        })?;
        self.lines.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Number of lines written since the log was opened.
    #[must_use]
    pub fn lines_written(&self) -> u64 {
        self.lines.load(Ordering::Relaxed)
    }
}

impl std::fmt::Debug for AuditLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuditLog")
            .field("path", &self.sink.as_ref().map(|s| s.path.display().to_string()))
            .field("lines", &self.lines_written())
            .finish()
    }
}
