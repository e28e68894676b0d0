//! # Bus Router
//!
//! Decides, for every message entering the routing node, which endpoints
//! receive it.
//!
//! ## Architecture
//!
//! | Layer     | Contents                                                |
//! |-----------|---------------------------------------------------------|
//! | `domain`  | `NameTable`, `RuleTable`, `MatchRule`                   |
//! | `ports`   | `MessageRouter` (inbound), collaborators (outbound)     |
//! | `service` | `DaemonRouter` and its `push_message` pipeline          |
//!
//! ## Routing Kinds
//!
//! - **Unicast**: non-empty destination, delivered to the name's owner
//! - **Broadcast**: no destination, no session; delivered where a match rule fits
//! - **Sessioncast**: no destination, non-zero session; delivered to session members
//!
//! ## Features
//!
//! - `push-compat` (default): legacy delivery quirks, see `service/compat.rs`
//! - `test-utils`: recording endpoints and collaborators

#![warn(clippy::all)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

pub mod config;
pub mod domain;
pub mod ports;
pub mod service;

#[cfg(any(test, feature = "test-utils"))]
pub mod testing;

pub use config::RouterConfig;
pub use domain::{AliasDisposition, MatchRule, NameTable, RuleTable};
pub use ports::{BusController, MessagePolicy, MessageRouter, NameListener, SessionlessDelivery};
pub use service::{DaemonRouter, BLOCKED_ERROR_NAME, DAEMON_INTERFACE, DETACH_SESSION_MEMBER};
