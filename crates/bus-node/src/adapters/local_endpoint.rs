//! The node's own endpoint. Pushed messages land in an inbox the
//! application drains with [`LocalEndpoint::recv`].

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use bus_types::{BusEndpoint, BusError, BusResult, EndpointType, Message, SessionId};
use parking_lot::Mutex;
use tokio::sync::mpsc;

pub struct LocalEndpoint {
    name: String,
    allow_remote: bool,
    valid: AtomicBool,
    connected: AtomicBool,
    sessions: Mutex<HashSet<SessionId>>,
    tx: mpsc::UnboundedSender<Message>,
    inbox: tokio::sync::Mutex<mpsc::UnboundedReceiver<Message>>,
}

impl LocalEndpoint {
    #[must_use]
    pub fn new(name: &str, allow_remote: bool) -> Arc<Self> {
        let (tx, rx) = mpsc::unbounded_channel();
        Arc::new(Self {
            name: name.to_string(),
            allow_remote,
            valid: AtomicBool::new(true),
            connected: AtomicBool::new(false),
            sessions: Mutex::new(HashSet::new()),
            tx,
            inbox: tokio::sync::Mutex::new(rx),
        })
    }

    /// Next delivered message. `None` once the endpoint is gone and the
    /// inbox is drained.
    pub async fn recv(&self) -> Option<Message> {
        if !self.is_valid() {
            return self.inbox.lock().await.try_recv().ok();
        }
        self.inbox.lock().await.recv().await
    }

    /// Next delivered message if one is waiting.
    #[must_use]
    pub fn try_recv(&self) -> Option<Message> {
        self.inbox.try_lock().ok()?.try_recv().ok()
    }

    pub fn join_session(&self, session_id: SessionId) {
        self.sessions.lock().insert(session_id);
    }

    pub fn leave_session(&self, session_id: SessionId) {
        self.sessions.lock().remove(&session_id);
    }

    /// True once the router has accepted the endpoint.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }
}

impl BusEndpoint for LocalEndpoint {
    fn unique_name(&self) -> &str {
        &self.name
    }

    fn endpoint_type(&self) -> EndpointType {
        EndpointType::Local
    }

    fn is_valid(&self) -> bool {
        self.valid.load(Ordering::Acquire)
    }

    fn allow_remote_messages(&self) -> bool {
        self.allow_remote
    }

    fn is_in_session(&self, session_id: SessionId) -> bool {
        self.sessions.lock().contains(&session_id)
    }

    fn push_message(&self, msg: &Message) -> BusResult<()> {
        if !self.is_valid() {
            return Err(BusError::EndpointClosing);
        }
        self.tx.send(msg.clone()).map_err(|_| BusError::EndpointClosing)
    }

    fn on_bus_connected(&self) {
        self.connected.store(true, Ordering::Release);
    }

    fn invalidate(&self) {
        self.valid.store(false, Ordering::Release);
        self.connected.store(false, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bus_types::MsgArg;

    fn ping() -> Message {
        Message::method_call(":a.1", ":b.1", "/p", "org.example", "Ping", vec![MsgArg::U32(1)])
    }

    #[tokio::test]
    async fn test_pushed_messages_reach_inbox_in_order() {
        let ep = LocalEndpoint::new(":b.1", true);
        let mut second = ping();
        second.serial = 2;
        ep.push_message(&ping()).unwrap();
        ep.push_message(&second).unwrap();
        assert_eq!(ep.recv().await.unwrap().serial, 0);
        assert_eq!(ep.recv().await.unwrap().serial, 2);
        assert!(ep.try_recv().is_none());
    }

    #[tokio::test]
    async fn test_invalidated_endpoint_refuses_and_drains() {
        let ep = LocalEndpoint::new(":b.1", true);
        ep.push_message(&ping()).unwrap();
        ep.invalidate();
        assert_eq!(ep.push_message(&ping()), Err(BusError::EndpointClosing));
        assert!(ep.recv().await.is_some());
        assert!(ep.recv().await.is_none());
    }

    #[test]
    fn test_session_membership() {
        let ep = LocalEndpoint::new(":b.1", false);
        assert!(!ep.allow_remote_messages());
        ep.join_session(7);
        assert!(ep.is_in_session(7));
        ep.leave_session(7);
        assert!(!ep.is_in_session(7));
    }
}
