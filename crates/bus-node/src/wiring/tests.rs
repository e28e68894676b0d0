//! Tests for BusNode

use super::*;
use crate::container::NodeConfig;
use async_trait::async_trait;
use bus_peer_auth::{AuthListener, Credentials, LoopbackBus, PeerSecurity};
use bus_router::MessageRouter;
use bus_types::{flags, BusEndpoint, BusError, Message, MessageType, MsgArg, ERROR_STATUS_NAME};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;

const IFACE: &str = "org.example.Echo";

struct Listener {
    password: String,
    violations: Mutex<Vec<BusError>>,
}

impl Listener {
    fn new(password: &str) -> Arc<Self> {
        Arc::new(Self {
            password: password.to_string(),
            violations: Mutex::new(Vec::new()),
        })
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
}

fn node(bus: &Arc<LoopbackBus>, mechanisms: &str, listener: Arc<Listener>) -> Arc<BusNode> {
    BusNode::start(NodeConfig::for_testing().with_mechanisms(mechanisms), Arc::clone(bus), listener).unwrap()
}

fn linked(mechanisms: &str, pa: &str, pb: &str) -> (Arc<LoopbackBus>, Arc<BusNode>, Arc<BusNode>) {
    let bus = LoopbackBus::new();
    let a = node(&bus, mechanisms, Listener::new(pa));
    let b = node(&bus, mechanisms, Listener::new(pb));
    a.connect(&b).unwrap();
    (bus, a, b)
}

fn call(to: &str, text: &str) -> Message {
    Message::method_call("", to, "/echo", IFACE, "Echo", vec![MsgArg::Str(text.to_string())])
}

fn encrypted(mut msg: Message) -> Message {
    msg.flags |= flags::ENCRYPTED;
    msg
}

async fn next(node: &BusNode) -> Message {
    tokio::time::timeout(Duration::from_secs(5), node.local().recv())
        .await
        .expect("nothing delivered in time")
        .expect("inbox closed")
}

// =============================================================================
// TEST GROUP 1: Startup and local traffic
// =============================================================================

#[tokio::test]
async fn test_start_registers_local_endpoint() {
    let bus = LoopbackBus::new();
    let a = node(&bus, "", Listener::new(""));
    assert!(a.local().is_connected());
    assert!(a.router().get_bus_names().contains(&a.unique_name().to_string()));
    assert!(a.router().is_valid_local_unique_name(a.unique_name()));
}

#[tokio::test]
async fn test_call_to_self_reaches_inbox() {
    let bus = LoopbackBus::new();
    let a = node(&bus, "", Listener::new(""));
    let serial = a.send(call(a.unique_name(), "hi")).unwrap();
    let msg = next(&a).await;
    assert_eq!(msg.serial, serial);
    assert_eq!(msg.sender, a.unique_name());
    assert_eq!(msg.args, vec![MsgArg::Str("hi".into())]);
}

#[tokio::test]
async fn test_well_known_name_routes_to_owner() {
    let bus = LoopbackBus::new();
    let a = node(&bus, "", Listener::new(""));
    a.request_name("org.example.Service").unwrap();
    a.send(call("org.example.Service", "by alias")).unwrap();
    assert_eq!(next(&a).await.member, "Echo");
    a.release_name("org.example.Service").unwrap();
}

#[tokio::test]
async fn test_invalid_config_is_rejected() {
    let bus = LoopbackBus::new();
    let config = NodeConfig {
        unique_name: Some("no-colon".into()),
        ..NodeConfig::for_testing()
    };
    let err = BusNode::start(config, bus, Listener::new("")).err().unwrap();
    assert!(err.to_string().contains("invalid node configuration"));
}

#[tokio::test]
async fn test_file_key_store_keeps_node_guid() {
    let dir = tempfile::tempdir().unwrap();
    let config = NodeConfig {
        keystore_path: Some(dir.path().join("keys.bin")),
        ..NodeConfig::for_testing()
    };
    let bus = LoopbackBus::new();
    let first = BusNode::start(config.clone(), Arc::clone(&bus), Listener::new("")).unwrap();
    let guid = first.engine().key_store().guid();
    first.shutdown();
    drop(first);

    let second = BusNode::start(config, bus, Listener::new("")).unwrap();
    assert_eq!(second.engine().key_store().guid(), guid);
    assert!(second.unique_name().starts_with(&format!(":{}.", guid.short())));
}

// =============================================================================
// TEST GROUP 2: Traffic between linked nodes
// =============================================================================

#[tokio::test]
async fn test_plain_call_and_reply_cross_link() {
    let (_bus, a, b) = linked("", "", "");
    let serial = a.send(call(b.unique_name(), "ping")).unwrap();

    let received = next(&b).await;
    assert_eq!(received.sender, a.unique_name());
    assert_eq!(received.serial, serial);

    b.send(Message::method_return(&received, vec![MsgArg::Str("pong".into())])).unwrap();
    let reply = next(&a).await;
    assert_eq!(reply.msg_type, MessageType::MethodReturn);
    assert_eq!(reply.reply_serial, serial);
}

#[tokio::test]
async fn test_signal_follows_match_rules() {
    let (_bus, a, b) = linked("", "", "");
    b.add_match(&format!("type='signal',interface='{IFACE}'")).unwrap();

    a.send(Message::signal("", "", 0, "org.example.Other", "Ignored", Vec::new())).unwrap();
    a.send(Message::signal("", "", 0, IFACE, "Tick", Vec::new())).unwrap();
    assert_eq!(next(&b).await.member, "Tick");

    // The signal is not echoed back to its origin.
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(a.local().try_recv().is_none());
}

#[tokio::test]
async fn test_sessioncast_reaches_session_members() {
    let (_bus, a, b) = linked("", "", "");
    a.join_session(7, &[b.unique_name()]);
    b.join_session(7, &[a.unique_name()]);

    a.send(Message::signal("", "", 7, IFACE, "InSession", Vec::new())).unwrap();
    assert_eq!(next(&b).await.session_id, 7);

    b.leave_session(7);
    a.send(Message::signal("", "", 7, IFACE, "AfterLeave", Vec::new())).unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(b.local().try_recv().is_none());
}

#[tokio::test]
async fn test_unknown_destination_gets_blocked_reply() {
    let bus = LoopbackBus::new();
    let a = node(&bus, "", Listener::new(""));
    let result = a.send(call(":nobody.1", "lost"));
    assert_eq!(result, Err(BusError::NoRoute));
    let reply = next(&a).await;
    assert_eq!(reply.error_name, bus_router::BLOCKED_ERROR_NAME);
}

// =============================================================================
// TEST GROUP 3: Encrypted traffic
// =============================================================================

#[tokio::test]
async fn test_encrypted_call_authenticates_first() {
    let (bus, a, b) = linked("ALLJOYN_ECDHE_NULL", "", "");
    assert!(!a.is_peer_secure(b.unique_name()));

    a.send(encrypted(call(b.unique_name(), "secret"))).unwrap();
    let received = next(&b).await;
    assert!(received.is_encrypted());
    assert_eq!(received.args, vec![MsgArg::Str("secret".into())]);
    assert!(a.is_peer_secure(b.unique_name()));
    assert_eq!(bus.calls(bus_peer_auth::ports::member::EXCHANGE_GUIDS), 1);

    b.send(encrypted(Message::method_return(&received, vec![MsgArg::U32(42)]))).unwrap();
    let reply = next(&a).await;
    assert_eq!(reply.args, vec![MsgArg::U32(42)]);
}

#[tokio::test]
async fn test_srp_shared_password_secures_link() {
    let (_bus, a, b) = linked("ALLJOYN_SRP_KEYX", "ABCDEFGH", "ABCDEFGH");
    a.secure_connection(b.unique_name(), false).await.unwrap();
    assert!(a.is_peer_secure(b.unique_name()));
    assert!(b.is_peer_secure(a.unique_name()));

    a.send(encrypted(call(b.unique_name(), "over srp"))).unwrap();
    assert_eq!(next(&b).await.args, vec![MsgArg::Str("over srp".into())]);
}

#[tokio::test]
async fn test_failed_authentication_answers_queued_call() {
    let (_bus, a, b) = linked("ALLJOYN_SRP_KEYX", "ABCDEFGH", "WRONGPWD");
    let serial = a.send(encrypted(call(b.unique_name(), "never"))).unwrap();

    let reply = next(&a).await;
    assert_eq!(reply.msg_type, MessageType::Error);
    assert_eq!(reply.error_name, ERROR_STATUS_NAME);
    assert_eq!(reply.reply_serial, serial);
    assert!(!a.is_peer_secure(b.unique_name()));
    assert!(b.local().try_recv().is_none());
}

#[tokio::test]
async fn test_tampered_message_is_a_violation() {
    let bus = LoopbackBus::new();
    let la = Listener::new("");
    let lb = Listener::new("");
    let a = node(&bus, "ALLJOYN_ECDHE_NULL", Arc::clone(&la));
    let b = node(&bus, "ALLJOYN_ECDHE_NULL", Arc::clone(&lb));
    a.connect(&b).unwrap();
    a.secure_connection(b.unique_name(), false).await.unwrap();

    let mut msg = encrypted(call(b.unique_name(), "x"));
    msg.sender = a.unique_name().to_string();
    msg.serial = a.engine().next_serial();
    a.engine().encrypt_message(&mut msg).unwrap();
    if let Some(MsgArg::Bytes(sealed)) = msg.args.first_mut() {
        sealed[0] ^= 0xFF;
    }

    assert_eq!(b.receive(a.unique_name(), msg), Err(BusError::MessageDecryptionFailed));
    assert_eq!(lb.violations.lock().as_slice(), &[BusError::MessageDecryptionFailed]);
    // Keys of a secure peer are dropped after a decryption failure.
    assert!(!b.is_peer_secure(a.unique_name()));
}

// =============================================================================
// TEST GROUP 4: Teardown
// =============================================================================

#[tokio::test]
async fn test_disconnect_forgets_peer_security() {
    let (_bus, a, b) = linked("ALLJOYN_ECDHE_NULL", "", "");
    a.secure_connection(b.unique_name(), false).await.unwrap();
    assert!(a.is_peer_secure(b.unique_name()));

    a.disconnect(b.unique_name());
    assert!(!a.is_peer_secure(b.unique_name()));
    assert!(a.router().find_endpoint(b.unique_name()).is_none());
}

#[tokio::test]
async fn test_shutdown_closes_local_endpoint() {
    let (_bus, a, b) = linked("", "", "");
    a.shutdown();
    assert!(!a.local().is_valid());
    assert!(a.router().local_endpoint().is_none());
    assert_eq!(a.send(call(b.unique_name(), "late")), Err(BusError::EndpointClosing));
}
