//! # Bus Test Suite
//!
//! Scenarios that span more than one crate. Unit tests live next to the
//! code they cover; this crate wires the router, the authentication
//! engine and whole nodes together the way an application would.
//!
//! ## Structure
//!
//! ```text
//! tests/src/
//! └── integration/
//!     ├── fixtures.rs          # listeners, node builders, inbox helpers
//!     ├── router_auth_flows.rs # DaemonRouter + PeerAuthEngine, wired by hand
//!     └── node_flows.rs        # BusNode meshes, encryption, key persistence
//! ```
//!
//! ## Running Tests
//!
//! ```bash
//! cargo test -p bus-tests
//! cargo test -p bus-tests integration::node_flows
//! ```

#![cfg_attr(test, allow(clippy::unwrap_used))]

pub mod integration;
