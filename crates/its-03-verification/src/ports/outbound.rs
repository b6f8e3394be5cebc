//! # Outbound Ports (Driven Ports / SPI)
//!
//! Collaborators the pipeline calls into.

use crate::pipeline::VerificationTicket;
use shared_types::entities::{CongestionSample, Kinematics, SafetyMessage};
use shared_types::errors::SecurityError;

/// The security collaborator's verification side.
pub trait SecurityVerifier: Send + Sync {
    /// Verifies `message` on the calling thread.
    fn verify_sync(&self, message: &SafetyMessage) -> Result<bool, SecurityError>;

    /// Starts verification of `message` and returns immediately.
    ///
    /// The implementation must call [`VerificationTicket::complete`] exactly
    /// once, from any thread, when the result is known. Returning an error
    /// means the ticket was not taken and the request is counted as failed.
    fn verify_async(
        &self,
        message: &SafetyMessage,
        priority: u8,
        ticket: VerificationTicket,
    ) -> Result<(), SecurityError>;

    /// Plausibility check of verified kinematics. `true` means misbehavior.
    fn misbehavior_check(&self, kinematics: &Kinematics) -> Result<bool, SecurityError>;
}

/// Receives kinematics of every verified beacon for channel-load estimation.
pub trait CongestionFeed: Send + Sync {
    fn add_data(&self, sample: &CongestionSample);
}
