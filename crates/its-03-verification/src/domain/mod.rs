//! Domain layer of the verification pipeline.

pub mod config;
pub mod errors;
pub mod request;
pub mod slot;
pub mod stats;

pub use config::PipelineConfig;
pub use errors::PipelineError;
pub use request::{Processed, Verdict, VerificationRequest};
pub use slot::{AsyncSlot, PhaseCounts, SlotPhase};
pub use stats::{PipelineStats, PipelineStatsSnapshot};
