//! LDM domain types.

pub mod config;
pub mod consistency;
pub mod errors;
pub mod slot;

pub use config::LdmConfig;
pub use consistency::Assessment;
pub use errors::LdmError;
pub use slot::{IndexEntry, RecordValidity, Slot, SlotState, VehicleRecord};
