//! # Driving Ports (Inbound API)
//!
//! What the rest of the daemon calls on the router.

use bus_types::{BusResult, EndpointRef, Message, SessionId};

use crate::domain::MatchRule;

/// Message routing API.
///
/// Every method is safe to call concurrently from many transport threads.
pub trait MessageRouter: Send + Sync {
    /// Route `msg` received from `src` to every eligible destination.
    ///
    /// # Errors
    ///
    /// `NoRoute`, `PolicyViolation`, `EndpointClosing` or `Stopping`.
    fn push_message(&self, msg: &Message, src: &EndpointRef) -> BusResult<()>;

    /// # Errors
    ///
    /// Propagates the bus controller's refusal of a bus-to-bus link.
    fn register_endpoint(&self, endpoint: EndpointRef) -> BusResult<()>;

    fn unregister_endpoint(&self, unique_name: &str);

    fn find_endpoint(&self, name: &str) -> Option<EndpointRef>;

    /// # Errors
    ///
    /// Status of the rule table insertion.
    fn add_rule(&self, endpoint: &EndpointRef, rule: MatchRule) -> BusResult<()>;

    /// # Errors
    ///
    /// `MatchRuleNotFound` if the endpoint never added the rule.
    fn remove_rule(&self, endpoint: &EndpointRef, rule: &MatchRule) -> BusResult<()>;

    fn register_self_join(&self, unique_name: &str, session_id: SessionId);

    fn unregister_self_join(&self, unique_name: &str, session_id: SessionId);
}
