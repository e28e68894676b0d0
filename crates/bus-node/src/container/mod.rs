//! # Node Container
//!
//! Configuration and process-wide context every node is built from.

pub mod config;
pub mod context;

pub use config::{ConfigError, NodeConfig};
pub use context::BusContext;
