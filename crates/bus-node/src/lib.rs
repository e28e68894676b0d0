//! # Bus Node
//!
//! Runtime for one routing node: configuration, the process-wide
//! [`BusContext`], the local endpoint and the wiring between the
//! [`DaemonRouter`](bus_router::DaemonRouter) and the
//! [`PeerAuthEngine`](bus_peer_auth::PeerAuthEngine).
//!
//! ## Usage
//!
//! ```rust,ignore
//! let bus = LoopbackBus::new();
//! let node = BusNode::start(NodeConfig::from_env()?, bus, listener)?;
//! node.add_match("type='signal',interface='org.example'")?;
//! while let Some(msg) = node.local().recv().await {
//!     // ...
//! }
//! ```
//!
//! ## Modules
//!
//! - `container/` - configuration and process-wide context
//! - `adapters/` - the local endpoint and in-process peer links
//! - `wiring/` - `BusNode`, joining router and authentication engine

#![warn(clippy::all)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

pub mod adapters;
pub mod container;
pub mod wiring;

pub use adapters::{LocalEndpoint, PeerLink};
pub use container::{BusContext, ConfigError, NodeConfig};
pub use wiring::BusNode;
