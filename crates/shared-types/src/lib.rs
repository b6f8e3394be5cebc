//! # Shared Types Crate
//!
//! Domain records shared by the receive, verify, cache and transmit
//! components of the safety stack.
//!
//! ## Design Principles
//!
//! - **Single Source of Truth**: every record that crosses a crate boundary
//!   (kinematics, decoded messages, vehicle state) is defined here.
//! - **Fixed-point on the wire**: kinematic fields keep the integer units of
//!   the over-the-air format; conversion helpers produce SI values.
//! - **Injectable time**: components read time through [`TimeSource`] so that
//!   age and rate logic is deterministic under test.

pub mod audit;
pub mod entities;
pub mod errors;
pub mod geo;
pub mod time;

pub use audit::AuditLog;
pub use entities::*;
pub use errors::*;
pub use geo::{distance_m, GeoPoint};
pub use time::{ManualClock, SystemTimeSource, TimeSource};
