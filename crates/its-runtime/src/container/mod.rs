//! # Application Container
//!
//! Configuration loading and the composition root that builds every
//! component with its collaborators.

pub mod config;
pub mod context;

pub use config::{ConfigError, StackConfig, CONFIG_PATH_ENV};
pub use context::AppContext;
