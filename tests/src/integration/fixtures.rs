//! Shared listeners, node builders and inbox helpers.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bus_node::{BusNode, NodeConfig};
use bus_peer_auth::{AuthListener, Credentials, LoopbackBus};
use bus_types::{flags, BusError, Message, MsgArg};
use parking_lot::Mutex;

pub const IFACE: &str = "org.example.Relay";

/// Answers every mechanism: no credentials for ECDHE_NULL, the configured
/// password for the rest.
#[derive(Default)]
pub struct Listener {
    password: String,
    pub violations: Mutex<Vec<BusError>>,
    pub completions: Mutex<Vec<(String, bool)>>,
}

impl Listener {
    pub fn new(password: &str) -> Arc<Self> {
        Arc::new(Self {
            password: password.to_string(),
            ..Self::default()
        })
    }

    pub fn violations(&self) -> Vec<BusError> {
        self.violations.lock().clone()
    }
}

#[async_trait]
impl AuthListener for Listener {
    async fn request_credentials(
        &self,
        mechanism: &str,
        _peer: &str,
        _attempt: u16,
        _user_name: &str,
        _mask: u16,
    ) -> Option<Credentials> {
        match mechanism {
            "ALLJOYN_ECDHE_NULL" => Some(Credentials::default()),
            _ => Some(Credentials::default().with_password(self.password.clone())),
        }
    }

    fn security_violation(&self, status: &BusError, _msg: &Message) {
        self.violations.lock().push(status.clone());
    }

    fn authentication_complete(&self, mechanism: &str, _peer: &str, success: bool) {
        self.completions.lock().push((mechanism.to_string(), success));
    }
}

pub fn node(bus: &Arc<LoopbackBus>, mechanisms: &str, listener: Arc<Listener>) -> Arc<BusNode> {
    let config = NodeConfig::for_testing().with_mechanisms(mechanisms);
    BusNode::start(config, Arc::clone(bus), listener).unwrap()
}

/// Link every pair of `nodes`.
pub fn mesh(nodes: &[&Arc<BusNode>]) {
    for (i, a) in nodes.iter().enumerate() {
        for b in &nodes[i + 1..] {
            a.connect(b).unwrap();
        }
    }
}

pub fn call(to: &str, text: &str) -> Message {
    Message::method_call("", to, "/relay", IFACE, "Relay", vec![MsgArg::Str(text.to_string())])
}

pub fn signal(member: &str, text: &str) -> Message {
    Message::signal("", "", 0, IFACE, member, vec![MsgArg::Str(text.to_string())])
}

pub fn encrypted(mut msg: Message) -> Message {
    msg.flags |= flags::ENCRYPTED;
    msg
}

pub async fn next(node: &BusNode) -> Message {
    tokio::time::timeout(Duration::from_secs(5), node.local().recv())
        .await
        .expect("nothing delivered in time")
        .expect("inbox closed")
}

/// Give in-flight link tasks a moment, then check the inbox is empty.
pub async fn assert_quiet(node: &BusNode) {
    tokio::time::sleep(Duration::from_millis(50)).await;
    let stray = node.local().try_recv();
    assert!(stray.is_none(), "{} got {:?}", node.unique_name(), stray.map(|m| m.member));
}

/// Poll `cond` until it holds or five seconds pass.
pub async fn eventually(mut cond: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !cond() {
        assert!(tokio::time::Instant::now() < deadline, "condition not reached in time");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
