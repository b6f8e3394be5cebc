//! # Outbound Ports (Driven Ports / SPI)
//!
//! Collaborators the transmit side calls into. Each is owned by the host
//! platform and injected at start-up.

use crate::domain::{CongestionError, TransmitError};
use async_trait::async_trait;
use shared_types::entities::{PseudonymId, TransmitType, VehicleState};
use shared_types::errors::SecurityError;
use std::sync::Arc;

/// Called by congestion control at every transmit opportunity.
pub trait PermitListener: Send + Sync {
    fn on_transmit_opportunity(&self);
}

/// Channel-load based pacing of host transmissions.
pub trait CongestionControl: Send + Sync {
    /// Begins posting transmit opportunities to `listener`.
    fn start(&self, listener: Arc<dyn PermitListener>) -> Result<(), CongestionError>;

    /// Switches pacing to the event-message schedule.
    fn notify_critical_event(&self);

    /// Returns pacing to the periodic schedule.
    fn disable_critical_event(&self);

    fn stop(&self);
}

/// Pseudonym management of the security collaborator.
pub trait IdentityService: Send + Sync {
    /// Rotates the host pseudonym and returns the new one.
    fn change_identity(&self) -> Result<PseudonymId, SecurityError>;

    /// Blocks pseudonym changes until [`IdentityService::unlock_identity`].
    fn lock_identity(&self) -> Result<(), SecurityError>;

    fn unlock_identity(&self) -> Result<(), SecurityError>;
}

/// Signing profile of an outgoing message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignMode {
    /// Full certificate attached; used for event messages.
    Certificate,
    /// Digest or certificate chosen by the signer; used for periodic beacons.
    Auto,
}

pub trait MessageEncoder: Send + Sync {
    fn encode(&self, state: &VehicleState, kind: TransmitType) -> Result<Vec<u8>, TransmitError>;
}

pub trait MessageSigner: Send + Sync {
    fn sign(&self, payload: &[u8], mode: SignMode) -> Result<Vec<u8>, SecurityError>;
}

#[async_trait]
pub trait RadioTransmitter: Send + Sync {
    /// Sends one signed frame; returns the bytes written.
    async fn transmit(&self, frame: &[u8], kind: TransmitType) -> Result<usize, TransmitError>;
}

/// Source of the host state to encode.
pub trait HostVehicle: Send + Sync {
    fn snapshot(&self) -> VehicleState;
}
