//! Tests for PeerAuthEngine

use super::*;
use crate::adapters::{LoopbackBus, MemoryKeyStore};
use crate::config::AuthConfig;
use crate::domain::{Certificate, CertificateType, Credentials, KeyRole};
use crate::ports::{member, AuthListener, DeliveryPort, KeyStore, PeerSecurity};
use async_trait::async_trait;
use bus_crypto::EcdsaKeyPair;
use bus_types::{flags, BusError, BusResult, Message, MessageType, MsgArg};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

const A: &str = ":a.1";
const B: &str = ":b.1";

#[derive(Default)]
struct TestListener {
    password: Option<String>,
    ecdsa: Option<(Vec<u8>, Vec<Certificate>)>,
    accept_chain: bool,
    requests: AtomicUsize,
    completions: Mutex<Vec<(String, bool)>>,
    violations: Mutex<Vec<BusError>>,
}

impl TestListener {
    fn with_password(password: &str) -> Arc<Self> {
        Arc::new(Self {
            password: Some(password.to_string()),
            ..Self::default()
        })
    }

    fn with_identity(ca: &EcdsaKeyPair) -> Arc<Self> {
        let key = EcdsaKeyPair::generate();
        let mut leaf = Certificate::new(key.public_key(), CertificateType::Identity, 3600);
        leaf.sign(ca).unwrap();
        let mut root = Certificate::new(ca.public_key(), CertificateType::Unrestricted, 7200).with_ca(true);
        root.sign(ca).unwrap();
        Arc::new(Self {
            ecdsa: Some((key.to_bytes().to_vec(), vec![leaf, root])),
            accept_chain: true,
            ..Self::default()
        })
    }

    fn requests(&self) -> usize {
        self.requests.load(Ordering::SeqCst)
    }

    fn successes(&self) -> usize {
        self.completions.lock().iter().filter(|(_, ok)| *ok).count()
    }
}

#[async_trait]
impl AuthListener for TestListener {
    async fn request_credentials(
        &self,
        mechanism: &str,
        _peer: &str,
        _attempt: u16,
        _user_name: &str,
        _mask: u16,
    ) -> Option<Credentials> {
        self.requests.fetch_add(1, Ordering::SeqCst);
        match mechanism {
            "ALLJOYN_ECDHE_NULL" => Some(Credentials::default()),
            "ALLJOYN_ECDHE_ECDSA" => self.ecdsa.clone().map(|(key, chain)| {
                Credentials::default().with_private_key(key).with_cert_chain(chain)
            }),
            _ => self
                .password
                .clone()
                .map(|p| Credentials::default().with_password(p)),
        }
    }

    async fn verify_credentials(&self, _mechanism: &str, _peer: &str, _credentials: &Credentials) -> bool {
        self.accept_chain
    }

    fn security_violation(&self, status: &BusError, _msg: &Message) {
        self.violations.lock().push(status.clone());
    }

    fn authentication_complete(&self, mechanism: &str, _peer: &str, success: bool) {
        self.completions.lock().push((mechanism.to_string(), success));
    }
}

#[derive(Default)]
struct RecordingDelivery {
    routed: Mutex<Vec<Message>>,
    local: Mutex<Vec<Message>>,
}

impl DeliveryPort for RecordingDelivery {
    fn route(&self, msg: &Message) -> BusResult<()> {
        self.routed.lock().push(msg.clone());
        Ok(())
    }

    fn deliver_local(&self, msg: &Message) {
        self.local.lock().push(msg.clone());
    }
}

fn engine(bus: &Arc<LoopbackBus>, name: &str, mechanisms: &str, listener: Arc<TestListener>) -> Arc<PeerAuthEngine> {
    let engine = PeerAuthEngine::new(
        AuthConfig::for_testing().with_mechanisms(mechanisms),
        name,
        Arc::new(MemoryKeyStore::new()),
        bus.clone(),
        listener,
    );
    bus.register(name, &engine);
    engine.start().unwrap();
    engine
}

struct Pair {
    bus: Arc<LoopbackBus>,
    a: Arc<PeerAuthEngine>,
    b: Arc<PeerAuthEngine>,
    la: Arc<TestListener>,
    lb: Arc<TestListener>,
}

fn pair(mechanisms: &str, la: Arc<TestListener>, lb: Arc<TestListener>) -> Pair {
    let bus = LoopbackBus::new();
    let a = engine(&bus, A, mechanisms, Arc::clone(&la));
    let b = engine(&bus, B, mechanisms, Arc::clone(&lb));
    Pair { bus, a, b, la, lb }
}

fn session_key(engine: &PeerAuthEngine, peer: &str) -> Vec<u8> {
    engine.peers().get(peer).unwrap().session_key().unwrap().data().to_vec()
}

fn encrypted_call(from: &str, to: &str, serial: u32) -> Message {
    let mut msg = Message::method_call(from, to, "/obj", "org.example", "Ping", vec![MsgArg::Str("hello".into())]);
    msg.serial = serial;
    msg.flags |= flags::ENCRYPTED;
    msg
}

// =========================================================================
// TEST GROUP 1: Local peer and configuration
// =========================================================================

#[tokio::test]
async fn test_authenticating_self_needs_no_traffic() {
    let bus = LoopbackBus::new();
    let a = engine(&bus, A, "ALLJOYN_SRP_KEYX", Arc::new(TestListener::default()));

    a.authenticate_peer(MessageType::MethodCall, A, true).await.unwrap();

    assert!(a.is_peer_secure(A));
    assert_eq!(bus.total_calls(), 0);
}

#[tokio::test]
async fn test_no_mechanisms_is_an_error() {
    let bus = LoopbackBus::new();
    let a = engine(&bus, A, "", Arc::new(TestListener::default()));

    let result = a.secure_connection(B, false).await;

    assert_eq!(result, Err(BusError::NoAuthenticationMechanism));
}

#[tokio::test]
async fn test_unknown_peer_is_no_such_object() {
    let bus = LoopbackBus::new();
    let listener = Arc::new(TestListener::default());
    let a = engine(&bus, A, "ALLJOYN_ECDHE_NULL", Arc::clone(&listener));

    let result = a.secure_connection(":nobody.1", false).await;

    assert_eq!(result, Err(BusError::NoSuchObject));
    assert!(!a.is_peer_secure(":nobody.1"));
    assert_eq!(listener.violations.lock().len(), 1);
}

// =========================================================================
// TEST GROUP 2: SASL
// =========================================================================

#[tokio::test]
async fn test_srp_keyx_happy_path() {
    let p = pair(
        "ALLJOYN_SRP_KEYX",
        TestListener::with_password("ABCDEFGH"),
        TestListener::with_password("ABCDEFGH"),
    );

    p.a.secure_connection(B, false).await.unwrap();

    assert!(p.a.is_peer_secure(B));
    assert!(p.b.is_peer_secure(A));
    assert_eq!(session_key(&p.a, B), session_key(&p.b, A));
    assert_eq!(p.la.successes(), 1);
    assert_eq!(p.lb.successes(), 1);
    assert!(p.bus.calls(member::AUTH_CHALLENGE) >= 3);
    assert_eq!(p.bus.calls(member::KEY_EXCHANGE), 0);
}

#[tokio::test]
async fn test_srp_wrong_password_fails() {
    let p = pair(
        "ALLJOYN_SRP_KEYX",
        TestListener::with_password("ABCDEFGH"),
        TestListener::with_password("12345678"),
    );

    let result = p.a.secure_connection(B, false).await;

    assert_eq!(result, Err(BusError::AuthFail));
    assert!(!p.a.is_peer_secure(B));
    assert_eq!(p.la.successes(), 0);
    assert_eq!(p.la.violations.lock().as_slice(), &[BusError::AuthFail]);
}

#[tokio::test]
async fn test_declined_srp_credentials_stop_retrying() {
    let p = pair(
        "ALLJOYN_SRP_KEYX",
        Arc::new(TestListener::default()),
        TestListener::with_password("ABCDEFGH"),
    );

    let result = p.a.secure_connection(B, false).await;

    assert_eq!(result, Err(BusError::AuthUserReject));
    assert_eq!(p.la.requests(), 1);
}

#[tokio::test]
async fn test_anonymous_gives_one_way_rights() {
    let p = pair("ANONYMOUS", Arc::new(TestListener::default()), Arc::new(TestListener::default()));

    p.a.secure_connection(B, false).await.unwrap();

    let rights = p.a.peers().get(B).unwrap().rights();
    assert!(rights.allows_tx(MessageType::MethodCall));
    assert!(!rights.allows_rx(MessageType::MethodCall));
    let rights = p.b.peers().get(A).unwrap().rights();
    assert!(rights.allows_rx(MessageType::MethodCall));
    assert!(!rights.allows_tx(MessageType::MethodCall));
}

#[tokio::test]
async fn test_rejected_mechanism_falls_back_to_peer_offer() {
    let bus = LoopbackBus::new();
    let la = TestListener::with_password("ABCDEFGH");
    let a = engine(&bus, A, "ALLJOYN_SRP_KEYX ANONYMOUS", Arc::clone(&la));
    let _b = engine(&bus, B, "ANONYMOUS", Arc::new(TestListener::default()));

    a.secure_connection(B, false).await.unwrap();

    assert!(a.is_peer_secure(B));
    assert_eq!(la.completions.lock().as_slice(), &[("ANONYMOUS".to_string(), true)]);
    assert_eq!(la.requests(), 1);
    assert!(la.violations.lock().is_empty());
}

// =========================================================================
// TEST GROUP 3: ECDHE key exchange
// =========================================================================

#[tokio::test]
async fn test_ecdhe_null_happy_path() {
    let p = pair("ALLJOYN_ECDHE_NULL", Arc::new(TestListener::default()), Arc::new(TestListener::default()));

    p.a.secure_connection(B, false).await.unwrap();

    assert_eq!(session_key(&p.a, B), session_key(&p.b, A));
    assert_eq!(p.bus.calls(member::EXCHANGE_SUITES), 1);
    assert_eq!(p.bus.calls(member::KEY_EXCHANGE), 1);
    assert_eq!(p.bus.calls(member::KEY_AUTHENTICATION), 1);
    assert_eq!(p.bus.calls(member::GEN_SESSION_KEY), 1);
    assert_eq!(p.bus.calls(member::EXCHANGE_GROUP_KEYS), 1);
    assert!(p.a.peers().get(B).unwrap().group_key().is_some());
    assert!(p.b.peers().get(A).unwrap().group_key().is_some());
}

#[tokio::test]
async fn test_ecdhe_psk_matching_secret() {
    let p = pair(
        "ALLJOYN_ECDHE_PSK",
        TestListener::with_password("faaa0af3dd3f1e03"),
        TestListener::with_password("faaa0af3dd3f1e03"),
    );

    p.a.secure_connection(B, false).await.unwrap();

    assert_eq!(session_key(&p.a, B), session_key(&p.b, A));
    assert_eq!(p.lb.successes(), 1);
}

#[tokio::test]
async fn test_ecdhe_psk_mismatch_fails_on_both_sides() {
    let p = pair(
        "ALLJOYN_ECDHE_PSK",
        TestListener::with_password("faaa0af3dd3f1e03"),
        TestListener::with_password("0000000000000000"),
    );

    let result = p.a.secure_connection(B, false).await;

    assert_eq!(result, Err(BusError::AuthFail));
    assert!(!p.b.is_peer_secure(A));
    assert_eq!(p.lb.completions.lock().as_slice(), &[("ALLJOYN_ECDHE_PSK".to_string(), false)]);
}

#[tokio::test]
async fn test_ecdhe_ecdsa_with_certificate_chains() {
    let ca = EcdsaKeyPair::generate();
    let p = pair("ALLJOYN_ECDHE_ECDSA", TestListener::with_identity(&ca), TestListener::with_identity(&ca));

    p.a.secure_connection(B, false).await.unwrap();

    assert_eq!(session_key(&p.a, B), session_key(&p.b, A));
    assert!(p.a.peers().get(B).unwrap().public_key().is_some());
    assert!(p.b.peers().get(A).unwrap().public_key().is_some());
    assert_eq!(p.bus.calls(member::SEND_MANIFEST), 1);
    assert!(p.bus.calls(member::SEND_MEMBERSHIPS) >= 1);
}

#[tokio::test]
async fn test_ecdsa_chain_rejected_by_listener() {
    let ca = EcdsaKeyPair::generate();
    let lb = TestListener::with_identity(&ca);
    let lb = Arc::new(TestListener {
        ecdsa: lb.ecdsa.clone(),
        accept_chain: false,
        ..TestListener::default()
    });
    let p = pair("ALLJOYN_ECDHE_ECDSA", TestListener::with_identity(&ca), lb);

    let result = p.a.secure_connection(B, false).await;

    assert_eq!(result, Err(BusError::AuthFail));
    assert!(!p.a.is_peer_secure(B));
}

#[tokio::test]
async fn test_strongest_common_suite_wins() {
    let p = pair(
        "ALLJOYN_ECDHE_NULL ALLJOYN_ECDHE_PSK",
        TestListener::with_password("secret"),
        TestListener::with_password("secret"),
    );

    p.a.secure_connection(B, false).await.unwrap();

    assert_eq!(p.la.completions.lock()[0].0, "ALLJOYN_ECDHE_PSK");
}

// =========================================================================
// TEST GROUP 4: Re-authentication and collapse
// =========================================================================

#[tokio::test]
async fn test_forced_reauthentication_asks_again() {
    let p = pair(
        "ALLJOYN_SRP_KEYX",
        TestListener::with_password("ABCDEFGH"),
        TestListener::with_password("ABCDEFGH"),
    );
    p.a.secure_connection(B, false).await.unwrap();
    let (before_a, before_b) = (p.la.requests(), p.lb.requests());

    p.a.secure_connection(B, false).await.unwrap();
    assert_eq!(p.la.requests(), before_a);
    assert_eq!(p.lb.requests(), before_b);

    p.a.secure_connection(B, true).await.unwrap();
    assert!(p.la.requests() > before_a);
    assert!(p.lb.requests() > before_b);
    assert!(p.a.is_peer_secure(B));
}

#[tokio::test]
async fn test_stored_master_secret_skips_key_exchange() {
    let p = pair(
        "ALLJOYN_SRP_KEYX",
        TestListener::with_password("ABCDEFGH"),
        TestListener::with_password("ABCDEFGH"),
    );
    p.a.secure_connection(B, false).await.unwrap();
    let challenges = p.bus.calls(member::AUTH_CHALLENGE);
    p.a.peers().get(B).unwrap().clear_keys();

    p.a.secure_connection(B, false).await.unwrap();

    assert_eq!(p.bus.calls(member::AUTH_CHALLENGE), challenges);
    assert_eq!(p.bus.calls(member::GEN_SESSION_KEY), 2);
    assert_eq!(session_key(&p.a, B), session_key(&p.b, A));
}

#[tokio::test]
async fn test_concurrent_authentication_collapses() {
    let p = pair("ALLJOYN_ECDHE_NULL", Arc::new(TestListener::default()), Arc::new(TestListener::default()));

    let attempts = (0..8).map(|_| {
        let a = Arc::clone(&p.a);
        tokio::spawn(async move { a.authenticate_peer(MessageType::MethodCall, B, true).await })
    });
    let outcomes = futures::future::join_all(attempts).await;

    for outcome in outcomes {
        assert_eq!(outcome.unwrap(), Ok(()));
    }
    assert_eq!(p.bus.calls(member::EXCHANGE_GUIDS), 1);
    assert_eq!(p.bus.calls(member::KEY_EXCHANGE), 1);
}

#[tokio::test]
async fn test_non_waiting_caller_gets_would_block_while_in_flight() {
    let p = pair(
        "ALLJOYN_SRP_KEYX",
        TestListener::with_password("ABCDEFGH"),
        TestListener::with_password("ABCDEFGH"),
    );

    let mut first = Box::pin(p.a.secure_connection(B, false));
    assert!(futures::poll!(first.as_mut()).is_pending());

    let result = p.a.authenticate_peer(MessageType::MethodCall, B, false).await;
    assert_eq!(result, Err(BusError::WouldBlock));

    first.await.unwrap();
    assert!(p.a.is_peer_secure(B));
    assert_eq!(p.bus.calls(member::EXCHANGE_GUIDS), 1);
}

#[tokio::test]
async fn test_key_gen_depends_on_nonce_seed() {
    let p = pair(
        "ALLJOYN_ECDHE_PSK",
        TestListener::with_password("shared"),
        TestListener::with_password("shared"),
    );
    p.a.secure_connection(B, false).await.unwrap();
    let sa = p.a.peers().get(B).unwrap();
    let sb = p.b.peers().get(A).unwrap();

    let initiator = p.a.key_gen(&sa, "n1n2", KeyRole::Initiator).unwrap();
    let responder = p.b.key_gen(&sb, "n1n2", KeyRole::Responder).unwrap();
    assert_eq!(initiator, responder);
    assert_eq!(session_key(&p.a, B), session_key(&p.b, A));

    let other_remote = p.a.key_gen(&sa, "n1n3", KeyRole::Initiator).unwrap();
    let other_local = p.a.key_gen(&sa, "n0n2", KeyRole::Initiator).unwrap();
    assert_ne!(initiator, other_remote);
    assert_ne!(initiator, other_local);
    assert_ne!(session_key(&p.a, B), session_key(&p.b, A));
}

#[tokio::test]
async fn test_signals_cannot_start_a_conversation() {
    let p = pair("ALLJOYN_ECDHE_NULL", Arc::new(TestListener::default()), Arc::new(TestListener::default()));

    let result = p.a.authenticate_peer(MessageType::Signal, B, true).await;

    assert_eq!(result, Err(BusError::DestinationNotAuthenticated));
}

// =========================================================================
// TEST GROUP 5: Message protection
// =========================================================================

#[tokio::test]
async fn test_encrypt_then_decrypt_on_peer() {
    let p = pair("ALLJOYN_ECDHE_NULL", Arc::new(TestListener::default()), Arc::new(TestListener::default()));
    p.a.secure_connection(B, false).await.unwrap();

    let mut msg = encrypted_call(A, B, 500);
    p.a.encrypt_message(&mut msg).unwrap();
    assert_ne!(msg.args, vec![MsgArg::Str("hello".into())]);
    let replay = msg.clone();

    p.b.decrypt_message(&mut msg).unwrap();
    assert_eq!(msg.args, vec![MsgArg::Str("hello".into())]);

    let mut replay = replay;
    assert_eq!(p.b.decrypt_message(&mut replay), Err(BusError::InvalidData));
}

#[tokio::test]
async fn test_tampered_body_fails_decryption() {
    let p = pair("ALLJOYN_ECDHE_NULL", Arc::new(TestListener::default()), Arc::new(TestListener::default()));
    p.a.secure_connection(B, false).await.unwrap();

    let mut msg = encrypted_call(A, B, 501);
    p.a.encrypt_message(&mut msg).unwrap();
    msg.member = "Pong".into();

    assert_eq!(p.b.decrypt_message(&mut msg), Err(BusError::MessageDecryptionFailed));
}

#[tokio::test]
async fn test_unencrypted_messages_pass_through() {
    let bus = LoopbackBus::new();
    let a = engine(&bus, A, "ALLJOYN_ECDHE_NULL", Arc::new(TestListener::default()));
    let mut msg = encrypted_call(A, B, 9);
    msg.flags = 0;

    a.encrypt_message(&mut msg).unwrap();

    assert_eq!(msg.args, vec![MsgArg::Str("hello".into())]);
    assert_eq!(a.pending_count(), 0);
}

#[tokio::test]
async fn test_unauthenticated_destination_queues_then_replays() {
    let p = pair("ALLJOYN_ECDHE_NULL", Arc::new(TestListener::default()), Arc::new(TestListener::default()));
    let delivery = Arc::new(RecordingDelivery::default());
    p.a.set_delivery(&delivery);

    let mut msg = encrypted_call(A, B, 42);
    assert_eq!(p.a.encrypt_message(&mut msg), Err(BusError::WouldBlock));

    for _ in 0..200 {
        if !delivery.routed.lock().is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    let routed = delivery.routed.lock().clone();
    assert_eq!(routed.len(), 1);
    assert_eq!(routed[0].serial, 42);
    assert!(p.a.is_peer_secure(B));
    assert_eq!(p.a.pending_count(), 0);
}

#[tokio::test]
async fn test_failed_queued_call_gets_error_reply() {
    let p = pair(
        "ALLJOYN_ECDHE_PSK",
        TestListener::with_password("one"),
        TestListener::with_password("two"),
    );
    let delivery = Arc::new(RecordingDelivery::default());
    p.a.set_delivery(&delivery);

    let mut msg = encrypted_call(A, B, 43);
    assert_eq!(p.a.encrypt_message(&mut msg), Err(BusError::WouldBlock));

    for _ in 0..200 {
        if !delivery.local.lock().is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    let local = delivery.local.lock().clone();
    assert_eq!(local.len(), 1);
    assert_eq!(local[0].msg_type, MessageType::Error);
    assert_eq!(local[0].reply_serial, 43);
    assert!(delivery.routed.lock().is_empty());
}

#[tokio::test]
async fn test_queued_messages_replay_in_order() {
    let p = pair("ALLJOYN_ECDHE_NULL", Arc::new(TestListener::default()), Arc::new(TestListener::default()));
    let delivery = Arc::new(RecordingDelivery::default());
    p.a.set_delivery(&delivery);

    for serial in [50, 51, 52] {
        let mut msg = encrypted_call(A, B, serial);
        assert_eq!(p.a.encrypt_message(&mut msg), Err(BusError::WouldBlock));
    }

    for _ in 0..200 {
        if delivery.routed.lock().len() == 3 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    let serials: Vec<u32> = delivery.routed.lock().iter().map(|m| m.serial).collect();
    assert_eq!(serials, vec![50, 51, 52]);
    assert_eq!(p.a.pending_count(), 0);
    assert_eq!(p.bus.calls(member::KEY_EXCHANGE), 1);
}

#[tokio::test]
async fn test_failed_queue_reports_one_violation() {
    let p = pair(
        "ALLJOYN_ECDHE_PSK",
        TestListener::with_password("one"),
        TestListener::with_password("two"),
    );
    let delivery = Arc::new(RecordingDelivery::default());
    p.a.set_delivery(&delivery);

    for serial in [60, 61] {
        let mut msg = encrypted_call(A, B, serial);
        assert_eq!(p.a.encrypt_message(&mut msg), Err(BusError::WouldBlock));
    }
    let mut signal = Message::signal(A, B, 0, "org.example", "Changed", vec![]);
    signal.serial = 62;
    signal.flags |= flags::ENCRYPTED;
    assert_eq!(p.a.encrypt_message(&mut signal), Err(BusError::WouldBlock));

    for _ in 0..200 {
        if delivery.local.lock().len() == 2 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    let replies: Vec<u32> = delivery.local.lock().iter().map(|m| m.reply_serial).collect();
    assert_eq!(replies, vec![60, 61]);
    assert_eq!(p.a.pending_count(), 0);
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(p.la.violations.lock().len(), 1);
    assert!(delivery.routed.lock().is_empty());
}

// =========================================================================
// TEST GROUP 6: Violations and teardown
// =========================================================================

#[tokio::test]
async fn test_decryption_failure_clears_keys_of_secure_peer() {
    let p = pair("ALLJOYN_ECDHE_NULL", Arc::new(TestListener::default()), Arc::new(TestListener::default()));
    p.a.secure_connection(B, false).await.unwrap();

    let msg = encrypted_call(A, B, 7);
    p.b.handle_security_violation(&msg, &BusError::MessageDecryptionFailed);

    assert!(!p.b.is_peer_secure(A));
    assert_eq!(p.lb.violations.lock().as_slice(), &[BusError::MessageDecryptionFailed]);
}

#[tokio::test]
async fn test_undecryptable_broadcast_is_ignored() {
    let p = pair("ALLJOYN_ECDHE_NULL", Arc::new(TestListener::default()), Arc::new(TestListener::default()));
    p.a.secure_connection(B, false).await.unwrap();

    let mut signal = Message::signal(A, "", 0, "org.example", "Changed", vec![]);
    signal.flags |= flags::ENCRYPTED;
    p.b.handle_security_violation(&signal, &BusError::MessageDecryptionFailed);

    assert!(p.b.is_peer_secure(A));
    assert!(p.lb.violations.lock().is_empty());
}

#[tokio::test]
async fn test_permission_denied_answers_method_call() {
    let bus = LoopbackBus::new();
    let a = engine(&bus, A, "ALLJOYN_ECDHE_NULL", Arc::new(TestListener::default()));
    let delivery = Arc::new(RecordingDelivery::default());
    a.set_delivery(&delivery);

    let mut call = Message::method_call(B, A, "/obj", "org.example", "Ping", vec![]);
    call.serial = 5;
    a.handle_security_violation(&call, &BusError::PermissionDenied);

    let routed = delivery.routed.lock().clone();
    assert_eq!(routed.len(), 1);
    assert_eq!(routed[0].destination, B);
    assert_eq!(routed[0].reply_status(), Some(BusError::PermissionDenied));
}

#[tokio::test]
async fn test_owner_gone_drops_peer_state() {
    let p = pair("ALLJOYN_ECDHE_NULL", Arc::new(TestListener::default()), Arc::new(TestListener::default()));
    p.a.secure_connection(B, false).await.unwrap();

    p.a.name_owner_changed(B, Some(B), None);

    assert!(p.a.peers().get(B).is_none());
    assert!(!p.a.is_peer_secure(B));
}

#[tokio::test]
async fn test_key_store_keeps_master_secret() {
    let p = pair("ALLJOYN_ECDHE_PSK", TestListener::with_password("pw"), TestListener::with_password("pw"));
    p.a.secure_connection(B, false).await.unwrap();

    let guid_b = p.b.key_store().guid();
    let guid_a = p.a.key_store().guid();

    assert!(p.a.key_store().has_key(&guid_b));
    assert!(p.b.key_store().has_key(&guid_a));
}
