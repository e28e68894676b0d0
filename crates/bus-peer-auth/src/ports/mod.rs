//! # Ports Layer - Hexagonal Architecture Boundaries
//!
//! - **Driving Ports (Inbound):** the control interface remote peers call
//!   and the security API the node calls
//! - **Driven Ports (Outbound):** key store, transport, application
//!   listener and message delivery

pub mod inbound;
pub mod outbound;

pub use inbound::{member, PeerControlInbound, PeerSecurity, PEER_INTERFACE, PEER_OBJECT_PATH};
pub use outbound::{AuthListener, DeliveryPort, KeyStore, PeerTransport, SERVICE_UNKNOWN};
