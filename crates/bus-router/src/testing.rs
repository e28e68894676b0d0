//! Recording endpoints and collaborators for router tests.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use bus_types::{BusEndpoint, BusError, BusResult, EndpointRef, EndpointType, Message, SessionId};
use parking_lot::Mutex;

use crate::domain::MatchRule;
use crate::ports::{BusController, SessionlessDelivery};

/// Endpoint that records every delivered message.
pub struct TestEndpoint {
    name: String,
    endpoint_type: EndpointType,
    allow_remote: AtomicBool,
    valid: AtomicBool,
    link_session: SessionId,
    sessions: Mutex<HashSet<SessionId>>,
    fail_with: Mutex<Option<BusError>>,
    received: Mutex<Vec<(Message, SessionId)>>,
    connected: AtomicBool,
}

impl TestEndpoint {
    /// Valid endpoint that accepts remote messages.
    #[must_use]
    pub fn new(name: &str, endpoint_type: EndpointType) -> Arc<Self> {
        Self::build(name, endpoint_type, 0)
    }

    /// Bus-to-bus link bound to `session_id`.
    #[must_use]
    pub fn bus_to_bus(name: &str, session_id: SessionId) -> Arc<Self> {
        let ep = Self::build(name, EndpointType::Bus2Bus, session_id);
        ep.join(session_id);
        ep
    }

    fn build(name: &str, endpoint_type: EndpointType, link_session: SessionId) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            endpoint_type,
            allow_remote: AtomicBool::new(true),
            valid: AtomicBool::new(true),
            link_session,
            sessions: Mutex::new(HashSet::new()),
            fail_with: Mutex::new(None),
            received: Mutex::new(Vec::new()),
            connected: AtomicBool::new(false),
        })
    }

    pub fn set_allow_remote(&self, allow: bool) {
        self.allow_remote.store(allow, Ordering::SeqCst);
    }

    pub fn join(&self, session_id: SessionId) {
        self.sessions.lock().insert(session_id);
    }

    /// Make every subsequent push fail with `status`.
    pub fn fail_with(&self, status: BusError) {
        *self.fail_with.lock() = Some(status);
    }

    #[must_use]
    pub fn received(&self) -> Vec<Message> {
        self.received.lock().iter().map(|(m, _)| m.clone()).collect()
    }

    /// Session ids used for session-qualified pushes, zero for plain pushes.
    #[must_use]
    pub fn received_sessions(&self) -> Vec<SessionId> {
        self.received.lock().iter().map(|(_, s)| *s).collect()
    }

    #[must_use]
    pub fn count(&self) -> usize {
        self.received.lock().len()
    }

    #[must_use]
    pub fn was_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn endpoint(self: &Arc<Self>) -> EndpointRef {
        Arc::clone(self) as EndpointRef
    }

    fn record(&self, msg: &Message, session_id: SessionId) -> BusResult<()> {
        if let Some(status) = self.fail_with.lock().clone() {
            return Err(status);
        }
        self.received.lock().push((msg.clone(), session_id));
        Ok(())
    }
}

impl BusEndpoint for TestEndpoint {
    fn unique_name(&self) -> &str {
        &self.name
    }

    fn endpoint_type(&self) -> EndpointType {
        self.endpoint_type
    }

    fn is_valid(&self) -> bool {
        self.valid.load(Ordering::SeqCst)
    }

    fn allow_remote_messages(&self) -> bool {
        self.allow_remote.load(Ordering::SeqCst)
    }

    fn is_in_session(&self, session_id: SessionId) -> bool {
        self.sessions.lock().contains(&session_id)
    }

    fn session_id(&self) -> SessionId {
        self.link_session
    }

    fn push_message(&self, msg: &Message) -> BusResult<()> {
        self.record(msg, 0)
    }

    fn push_session_message(&self, msg: &Message, session_id: SessionId) -> BusResult<()> {
        self.record(msg, session_id)
    }

    fn on_bus_connected(&self) {
        self.connected.store(true, Ordering::SeqCst);
    }

    fn invalidate(&self) {
        self.valid.store(false, Ordering::SeqCst);
    }
}

/// Sessionless collaborator that records what the router hands it.
#[derive(Default)]
pub struct RecordingSessionless {
    pub routed: Mutex<Vec<(SessionId, Message)>>,
    pub pushed: Mutex<Vec<Message>>,
    pub rules: Mutex<Vec<(String, MatchRule)>>,
}

impl SessionlessDelivery for RecordingSessionless {
    fn route_sessionless_message(&self, session_id: SessionId, msg: &Message) {
        self.routed.lock().push((session_id, msg.clone()));
    }

    fn push_message(&self, msg: &Message) -> BusResult<()> {
        self.pushed.lock().push(msg.clone());
        Ok(())
    }

    fn add_rule(&self, endpoint: &str, rule: &MatchRule) {
        self.rules.lock().push((endpoint.to_string(), rule.clone()));
    }

    fn remove_rule(&self, endpoint: &str, rule: &MatchRule) {
        self.rules
            .lock()
            .retain(|(ep, r)| !(ep == endpoint && r == rule));
    }
}

/// Bus controller that records link changes.
#[derive(Default)]
pub struct RecordingController {
    pub links: Mutex<Vec<String>>,
}

impl BusController for RecordingController {
    fn add_bus_to_bus(&self, endpoint: &EndpointRef) -> BusResult<()> {
        self.links.lock().push(endpoint.unique_name().to_string());
        Ok(())
    }

    fn remove_bus_to_bus(&self, endpoint: &EndpointRef) {
        self.links.lock().retain(|name| name != endpoint.unique_name());
    }
}
