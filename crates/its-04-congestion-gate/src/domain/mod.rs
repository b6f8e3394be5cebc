//! Domain layer of the transmission gate.

pub mod config;
pub mod critical;
pub mod errors;
pub mod host;

pub use config::{GateConfig, IdentityChangePolicy};
pub use critical::{is_critical_event, CriticalState, CRITICAL_EVENT_MASK};
pub use errors::{CongestionError, TransmitError};
pub use host::{HostState, SendOutcome};
