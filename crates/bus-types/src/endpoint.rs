//! # Bus Endpoints
//!
//! A [`BusEndpoint`] is anything the router can deliver a message to: the
//! local endpoint of the routing node, directly connected clients, virtual
//! endpoints standing for names behind other routing nodes, and bus-to-bus
//! links to those nodes.
//!
//! Pushing a message is a non-blocking handoff to the endpoint's own send
//! queue. Endpoints never perform network I/O on the caller's thread.

use std::fmt;
use std::sync::Arc;

use crate::errors::BusResult;
use crate::message::{Message, SessionId};

/// Endpoint variants known to the router.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EndpointType {
    /// The routing node's own endpoint.
    Local,
    /// In-process client attached without a transport.
    Null,
    /// Client connected over a transport.
    Remote,
    /// Stand-in for a name hosted behind another routing node.
    Virtual,
    /// Link to another routing node.
    Bus2Bus,
}

impl EndpointType {
    /// Directly connected to this routing node.
    #[must_use]
    pub const fn is_direct(self) -> bool {
        matches!(self, Self::Local | Self::Null | Self::Remote)
    }
}

impl fmt::Display for EndpointType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Local => "local",
            Self::Null => "null",
            Self::Remote => "remote",
            Self::Virtual => "virtual",
            Self::Bus2Bus => "bus2bus",
        };
        f.write_str(name)
    }
}

/// Destination for routed messages.
pub trait BusEndpoint: Send + Sync {
    /// Unique bus name (`:x.y`).
    fn unique_name(&self) -> &str;

    fn endpoint_type(&self) -> EndpointType;

    /// False once the endpoint has been torn down.
    fn is_valid(&self) -> bool {
        true
    }

    /// Whether the endpoint accepts messages originating off-device.
    fn allow_remote_messages(&self) -> bool;

    /// Session membership predicate.
    fn is_in_session(&self, session_id: SessionId) -> bool;

    /// Session a bus-to-bus link is bound to (zero when unbound).
    fn session_id(&self) -> SessionId {
        0
    }

    /// Hand the message to the endpoint's send queue.
    ///
    /// # Errors
    ///
    /// Returns `BusError::EndpointClosing` or `BusError::Stopping` when the
    /// endpoint can no longer accept traffic.
    fn push_message(&self, msg: &Message) -> BusResult<()>;

    /// Deliver over a specific session. Only virtual endpoints distinguish
    /// this from [`BusEndpoint::push_message`].
    ///
    /// # Errors
    ///
    /// Same as [`BusEndpoint::push_message`].
    fn push_session_message(&self, msg: &Message, session_id: SessionId) -> BusResult<()> {
        let _ = session_id;
        self.push_message(msg)
    }

    /// Called once the local endpoint is registered with the router.
    fn on_bus_connected(&self) {}

    /// Called when the endpoint is unregistered for good.
    fn invalidate(&self) {}
}

/// Shared handle to an endpoint.
pub type EndpointRef = Arc<dyn BusEndpoint>;

/// Identity comparison for endpoint handles.
#[must_use]
pub fn same_endpoint(a: &EndpointRef, b: &EndpointRef) -> bool {
    Arc::ptr_eq(a, b) || a.unique_name() == b.unique_name()
}
