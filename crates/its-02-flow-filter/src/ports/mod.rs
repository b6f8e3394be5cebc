//! Ports of the flow filter.

pub mod outbound;

pub use outbound::{LoadError, LoadMonitor};
