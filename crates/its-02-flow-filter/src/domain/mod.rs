//! Flow filter domain types.

pub mod config;
pub mod record;
pub mod threat;

pub use config::FloodDetectionConfig;
pub use record::{LanePosition, RvClassification, RvFlowRecord};
pub use threat::classify_remote;
