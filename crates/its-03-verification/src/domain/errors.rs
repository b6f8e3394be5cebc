//! Error types for the verification pipeline.

use shared_types::entities::SlotIndex;
use shared_types::errors::SecurityError;
use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PipelineError {
    /// The next slot holds a result the consumer has not taken yet; the
    /// message is dropped.
    #[error("slot {slot} is awaiting consumption")]
    SlotAwaitingConsumption { slot: SlotIndex },

    /// The slot was reused before this request's result was consumed.
    #[error("result for slot {slot} was discarded")]
    Discarded { slot: SlotIndex },

    /// The pipeline is stopping and accepts no new work.
    #[error("verification pipeline is shutting down")]
    ShuttingDown,

    #[error("invalid pipeline configuration: {0}")]
    InvalidConfig(String),

    #[error("security collaborator error: {0}")]
    Security(#[from] SecurityError),
}
