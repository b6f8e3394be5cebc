//! # Flow Filter
//!
//! **Component:** 02
//!
//! ## Purpose
//!
//! Tracks message counts per link-layer sender to detect flooding under
//! verification load, and to pick irrelevant senders for link-layer
//! filtering when the host is overloaded.
//!
//! ## Concurrency
//!
//! One mutex guards the sender map. Evaluation is caller-driven; the
//! runtime calls [`FloodDetector::run_once`] at [`FloodDetector::next_interval`].
//!
//! ## Module Structure
//!
//! ```text
//! domain/record.rs   - RvFlowRecord, RvClassification
//! domain/config.rs   - FloodDetectionConfig
//! domain/threat.rs   - classify_remote: zone, lane and TTC of a remote vehicle
//! filter.rs          - FlowFilter: on_message, evaluate, relevance_filter
//! detector.rs        - FloodDetector: utilization and cadence
//! ports/outbound.rs  - LoadMonitor
//! ```

#![cfg_attr(test, allow(clippy::unwrap_used))]

pub mod detector;
pub mod domain;
pub mod filter;
pub mod ports;

pub use detector::{FloodDecision, FloodDetector};
pub use domain::{
    classify_remote, FloodDetectionConfig, LanePosition, RvClassification, RvFlowRecord,
};
pub use filter::{filtering_duration_ms, FlowFilter};
pub use ports::{LoadError, LoadMonitor};
