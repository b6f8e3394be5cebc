//! # ITS Runtime
//!
//! Composition root of the V2X safety stack: configuration, simulation
//! adapters for every outbound port, the application context and the task
//! runtime.
//!
//! ## Module Structure
//!
//! ```text
//! container/config.rs   - key=value StackConfig loader
//! container/context.rs  - AppContext: builds and wires every component
//! adapters/             - UDP radio, bincode codec, simulated security,
//!                         paced congestion control, pipeline load monitor
//! runtime.rs            - ItsRuntime: task spawning and ordered shutdown
//! ```
//!
//! ## Startup Sequence
//!
//! 1. Load configuration (`ITS_CONFIG`, or defaults)
//! 2. Build the context; a security service that cannot open is fatal
//! 3. Start the gate, eviction, the verification consumer and the tasks
//! 4. Run until Ctrl+C, then shut down in order

#![cfg_attr(test, allow(clippy::unwrap_used))]

pub mod adapters;
pub mod container;
pub mod runtime;

pub use container::{AppContext, ConfigError, StackConfig, CONFIG_PATH_ENV};
pub use runtime::{FinalStats, ItsRuntime};
