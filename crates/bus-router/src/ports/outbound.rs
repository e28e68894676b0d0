//! # Driven Ports (Outbound SPI)
//!
//! Collaborators the router calls out to. All are synchronous: the router
//! never awaits inside `push_message`.

use bus_types::{BusResult, EndpointRef, Message, SessionId};

use crate::domain::MatchRule;

pub use crate::domain::NameListener;

/// Owner of sessionless-signal caching and catch-up delivery.
pub trait SessionlessDelivery: Send + Sync {
    /// Deliver catch-up traffic that arrived over a bus-to-bus link bound to
    /// `session_id`.
    fn route_sessionless_message(&self, session_id: SessionId, msg: &Message);

    /// Cache and fan out a locally originated sessionless broadcast.
    ///
    /// # Errors
    ///
    /// Any delivery status; the router reports it as its own.
    fn push_message(&self, msg: &Message) -> BusResult<()>;

    /// Mirror of a rule the router accepted.
    fn add_rule(&self, endpoint: &str, rule: &MatchRule);

    /// Mirror of a rule the router removed.
    fn remove_rule(&self, endpoint: &str, rule: &MatchRule);
}

/// Topology observer for bus-to-bus links.
pub trait BusController: Send + Sync {
    /// # Errors
    ///
    /// Returned verbatim from `register_endpoint`.
    fn add_bus_to_bus(&self, endpoint: &EndpointRef) -> BusResult<()>;

    fn remove_bus_to_bus(&self, endpoint: &EndpointRef);
}

/// Access policy consulted for every candidate destination.
pub trait MessagePolicy: Send + Sync {
    fn ok_to_send(&self, msg: &Message, src: &EndpointRef, dest: &EndpointRef) -> bool;

    fn ok_to_receive(&self, msg: &Message, dest: &EndpointRef) -> bool;
}
