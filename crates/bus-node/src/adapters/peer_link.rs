//! In-process link to another node.
//!
//! The link is registered in the owning node's router under the remote
//! node's unique name. Pushing only enqueues; a spawned task hands queued
//! messages to the remote node, so routing never re-enters a router on the
//! caller's stack.
//!
//! Broadcast and sessioncast traffic is relayed only when it originated on
//! the owning node, which keeps signals from echoing between nodes.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use bus_telemetry::{log_event, SUBSYSTEM_NODE};
use bus_types::{BusEndpoint, BusError, BusResult, EndpointType, Message, SessionId};
use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::sync::mpsc;

pub struct PeerLink {
    /// Unique name of the owning node.
    owner: String,
    /// Unique name of the node at the far end.
    remote: String,
    valid: AtomicBool,
    sessions: Mutex<HashSet<SessionId>>,
    tx: mpsc::UnboundedSender<Message>,
}

impl PeerLink {
    /// Create the link and its forwarding task. `deliver` runs on that task
    /// once per message, in push order.
    ///
    /// # Errors
    ///
    /// Fails outside a tokio runtime.
    pub fn spawn<F>(owner: &str, remote: &str, deliver: F) -> BusResult<Arc<Self>>
    where
        F: Fn(Message) + Send + 'static,
    {
        let handle = Handle::try_current()
            .map_err(|_| BusError::Fail("peer link needs a tokio runtime".into()))?;
        let (tx, mut rx) = mpsc::unbounded_channel::<Message>();
        let label = format!("{owner}->{remote}");
        handle.spawn(async move {
            while let Some(msg) = rx.recv().await {
                deliver(msg);
            }
            log_event!(trace, SUBSYSTEM_NODE, "peer link closed", link = %label);
        });
        Ok(Arc::new(Self {
            owner: owner.to_string(),
            remote: remote.to_string(),
            valid: AtomicBool::new(true),
            sessions: Mutex::new(HashSet::new()),
            tx,
        }))
    }

    pub fn join_session(&self, session_id: SessionId) {
        self.sessions.lock().insert(session_id);
    }

    pub fn leave_session(&self, session_id: SessionId) {
        self.sessions.lock().remove(&session_id);
    }
}

impl BusEndpoint for PeerLink {
    fn unique_name(&self) -> &str {
        &self.remote
    }

    fn endpoint_type(&self) -> EndpointType {
        EndpointType::Remote
    }

    fn is_valid(&self) -> bool {
        self.valid.load(Ordering::Acquire)
    }

    fn allow_remote_messages(&self) -> bool {
        true
    }

    fn is_in_session(&self, session_id: SessionId) -> bool {
        self.sessions.lock().contains(&session_id)
    }

    fn push_message(&self, msg: &Message) -> BusResult<()> {
        if !self.is_valid() {
            return Err(BusError::EndpointClosing);
        }
        if msg.destination.is_empty() && msg.sender != self.owner {
            log_event!(
                trace,
                SUBSYSTEM_NODE,
                "not relaying foreign signal",
                link = %self.remote,
                sender = %msg.sender
            );
            return Ok(());
        }
        self.tx.send(msg.clone()).map_err(|_| BusError::EndpointClosing)
    }

    fn invalidate(&self) {
        self.valid.store(false, Ordering::Release);
    }
}
