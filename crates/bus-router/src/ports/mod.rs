//! # Ports Layer - Hexagonal Architecture Boundaries
//!
//! - **Driving Ports (Inbound):** the routing API the daemon calls
//! - **Driven Ports (Outbound):** sessionless delivery, bus controller and
//!   policy collaborators supplied by the host

pub mod inbound;
pub mod outbound;

pub use inbound::MessageRouter;
pub use outbound::{BusController, MessagePolicy, NameListener, SessionlessDelivery};
