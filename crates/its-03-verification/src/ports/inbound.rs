//! # Inbound Ports (Driving Ports / API)

use crate::domain::{PipelineError, PipelineStatsSnapshot};
use crate::service::Ingested;
use shared_types::entities::SafetyMessage;

/// Entry point for decoded messages.
pub trait VerificationApi: Send + Sync {
    /// Verifies `message` synchronously or hands it to the async window,
    /// depending on the configured mode.
    fn ingest(&self, message: &SafetyMessage) -> Result<Ingested, PipelineError>;

    fn stats(&self) -> PipelineStatsSnapshot;
}
