//! Host vehicle state and transmit outcomes.

use crate::ports::HostVehicle;
use parking_lot::RwLock;
use shared_types::entities::{OperatingMode, VehicleState};

/// Latest host state reported on the vehicle bus.
#[derive(Debug, Default)]
pub struct HostState {
    state: RwLock<VehicleState>,
}

impl HostState {
    #[must_use]
    pub fn new(initial: VehicleState) -> Self {
        Self {
            state: RwLock::new(initial),
        }
    }

    pub fn update(&self, state: VehicleState) {
        *self.state.write() = state;
    }
}

impl HostVehicle for HostState {
    fn snapshot(&self) -> VehicleState {
        *self.state.read()
    }
}

/// Result of one transmit attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    Transmitted { bytes: usize, identity_changed: bool },
    /// The message kind does not go out in the current mode.
    Suppressed { mode: OperatingMode },
}

impl SendOutcome {
    #[must_use]
    pub fn is_transmitted(&self) -> bool {
        matches!(self, Self::Transmitted { .. })
    }
}
