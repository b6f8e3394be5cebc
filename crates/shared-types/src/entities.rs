//! # Core Domain Entities
//!
//! Records exchanged between the pipeline components.
//!
//! Kinematic fields use the fixed-point units of the basic safety message:
//!
//! | Field | Unit |
//! |-------|------|
//! | `latitude`, `longitude` | 1e-7 degree |
//! | `elevation` | 0.1 m |
//! | `speed` | 0.02 m/s |
//! | `heading` | 0.0125 degree |
//! | `long_accel`, `lat_accel` | 0.01 m/s² |
//! | `yaw_rate` | 0.01 degree/s |

use serde::{Deserialize, Serialize};

/// Rotating pseudonymous identifier carried inside a safety message.
pub type PseudonymId = u32;

/// Link-layer source address of a remote sender.
pub type L2Address = u32;

/// Milliseconds since the UNIX epoch.
pub type Timestamp = u64;

/// Index of a slot in a fixed or growable pool.
pub type SlotIndex = usize;

/// Provider service identifier of a basic safety message.
pub const PSID_BSM: u32 = 0x20;

/// Provider service identifier of a signal phase and timing message.
pub const PSID_SPAT: u32 = 0x82;

/// Message count field wraps at this value.
pub const MSG_COUNT_MODULUS: u16 = 128;

/// Safety-relevant fields of one vehicle state beacon.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Kinematics {
    /// Pseudonymous sender id.
    pub id: PseudonymId,
    /// Sequence number in `0..128`.
    pub msg_count: u8,
    /// Generation time at the sender.
    pub timestamp_ms: Timestamp,
    pub latitude: i32,
    pub longitude: i32,
    pub elevation: u16,
    pub speed: u32,
    pub heading: u16,
    pub long_accel: i16,
    pub lat_accel: i16,
    pub yaw_rate: i32,
    /// Brake system status bits.
    pub brakes: u16,
    pub leap_seconds: u8,
}

impl Kinematics {
    /// Latitude in degrees.
    #[must_use]
    pub fn latitude_deg(&self) -> f64 {
        f64::from(self.latitude) / 1e7
    }

    /// Longitude in degrees.
    #[must_use]
    pub fn longitude_deg(&self) -> f64 {
        f64::from(self.longitude) / 1e7
    }

    /// Heading in degrees.
    #[must_use]
    pub fn heading_deg(&self) -> f64 {
        f64::from(self.heading) * 0.0125
    }

    /// Speed in metres per second.
    #[must_use]
    pub fn speed_mps(&self) -> f64 {
        f64::from(self.speed) * 0.02
    }

    /// Speed in kilometres per hour.
    #[must_use]
    pub fn speed_kph(&self) -> f64 {
        self.speed_mps() * 3.6
    }
}

/// A decoded inbound message, ready for verification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SafetyMessage {
    /// Link-layer sender.
    pub source: L2Address,
    /// Provider service identifier.
    pub psid: u32,
    pub kinematics: Kinematics,
    /// Signed payload handed to the security collaborator.
    pub signed_payload: Vec<u8>,
    /// Local arrival time.
    pub received_at_ms: Timestamp,
}

impl SafetyMessage {
    /// True for basic safety messages, the only kind cached in the LDM.
    #[must_use]
    pub fn is_bsm(&self) -> bool {
        self.psid == PSID_BSM
    }
}

/// Class of an outbound transmission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TransmitType {
    /// Semi-persistent periodic beacon, paced by congestion control.
    Sps,
    /// Event-driven emergency broadcast.
    Event,
}

impl TransmitType {
    /// Radio priority. Emergency broadcasts go out on the higher class.
    #[must_use]
    pub fn priority(self) -> u8 {
        match self {
            TransmitType::Sps => 2,
            TransmitType::Event => 5,
        }
    }
}

/// Transmission mode of the host station.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum OperatingMode {
    /// Periodic beacons paced by congestion control.
    #[default]
    Normal,
    /// Safety event in progress: periodic beacons suppressed, emergency
    /// broadcasts ungated, pseudonym changes locked.
    Critical,
}

/// Vehicle event bits reported by the host vehicle bus.
pub mod vehicle_events {
    pub const HAZARD_LIGHTS: u16 = 1 << 0;
    pub const STOP_LINE_VIOLATION: u16 = 1 << 1;
    pub const ABS_ACTIVATED: u16 = 1 << 2;
    pub const TRACTION_CONTROL_LOSS: u16 = 1 << 3;
    pub const STABILITY_CONTROL_ACTIVATED: u16 = 1 << 4;
    pub const HARD_BRAKING: u16 = 1 << 7;
    pub const AIRBAG_DEPLOYMENT: u16 = 1 << 10;
}

/// Snapshot of the host vehicle delivered with every state change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct VehicleState {
    pub kinematics: Kinematics,
    /// Bitset of [`vehicle_events`].
    pub event_flags: u16,
}

impl VehicleState {
    /// Whether any of the given event bits is set.
    #[must_use]
    pub fn has_event(&self, mask: u16) -> bool {
        self.event_flags & mask != 0
    }
}

/// Kinematic sample fed to the congestion-control collaborator for every
/// verified remote beacon.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CongestionSample {
    pub sender: PseudonymId,
    pub latitude_deg: f64,
    pub longitude_deg: f64,
    pub heading_deg: f64,
    pub speed_mps: f64,
    pub timestamp_ms: Timestamp,
    pub msg_count: u8,
}

impl From<&Kinematics> for CongestionSample {
    fn from(k: &Kinematics) -> Self {
        Self {
            sender: k.id,
            latitude_deg: k.latitude_deg(),
            longitude_deg: k.longitude_deg(),
            heading_deg: k.heading_deg(),
            speed_mps: k.speed_mps(),
            timestamp_ms: k.timestamp_ms,
            msg_count: k.msg_count,
        }
    }
}

/// One link-layer drop instruction for the radio.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct L2FilterEntry {
    pub source: L2Address,
    /// How long the radio should drop frames from `source`.
    pub duration_ms: u32,
}
