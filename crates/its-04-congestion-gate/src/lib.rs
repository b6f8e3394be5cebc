//! # Congestion Gate
//!
//! **Component:** 04
//!
//! ## Purpose
//!
//! Paces host transmissions on congestion-control permits, switches between
//! periodic beacons (`Normal`) and event messages (`Critical`) on vehicle
//! events, and keeps the pseudonym fixed for the duration of a critical
//! event.
//!
//! ## Event Flow
//!
//! ```text
//! VehicleStateChanged ─→ ModeController ─→ CriticalState ─┬─→ periodic loop (parks)
//!                              │                          └─→ event loop (wakes)
//!                              ├─→ IdentityChangeScheduler (lock / unlock)
//!                              ├─→ CongestionControl (event schedule on / off)
//!                              └─→ ModeChanged on the bus
//!
//! CongestionControl ──permit──→ CongestionGate ──→ TransmitScheduler::send
//! ```
//!
//! ## Module Structure
//!
//! ```text
//! domain/critical.rs  - CriticalState: mode flag and wakeups
//! domain/host.rs      - HostState, SendOutcome
//! gate.rs             - CongestionGate: counting semaphore
//! mode.rs             - ModeController
//! identity.rs         - IdentityChangeScheduler
//! transmit.rs         - TransmitScheduler: send path and both loops
//! ports/outbound.rs   - congestion control, identity, encoder, signer, radio
//! ```

#![cfg_attr(test, allow(clippy::unwrap_used))]

pub mod domain;
pub mod gate;
pub mod identity;
pub mod mode;
pub mod ports;
pub mod transmit;

pub use domain::{
    is_critical_event, CongestionError, CriticalState, GateConfig, HostState,
    IdentityChangePolicy, SendOutcome, TransmitError, CRITICAL_EVENT_MASK,
};
pub use gate::{CongestionGate, GateStats};
pub use identity::IdentityChangeScheduler;
pub use mode::ModeController;
pub use ports::{
    CongestionControl, HostVehicle, IdentityService, MessageEncoder, MessageSigner,
    PermitListener, RadioTransmitter, SignMode,
};
pub use transmit::{TransmitPorts, TransmitScheduler, TransmitStats};
