use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use bus_crypto::EcdsaPublicKey;
use bus_telemetry::{log_event, SUBSYSTEM_PEER_AUTH};
use bus_types::{BusError, BusResult, Message, MessageType, MsgArg};
use parking_lot::{Mutex, RwLock};
use tokio::sync::oneshot;

use super::dispatcher::Dispatcher;
use crate::config::AuthConfig;
use crate::domain::{sorted_suites, suite_mask, KeyExchanger, PeerStateTable, SaslResponder};
use crate::ports::{
    member, AuthListener, DeliveryPort, KeyStore, PeerControlInbound, PeerSecurity, PeerTransport,
    PEER_INTERFACE, PEER_OBJECT_PATH,
};

/// Peer authentication engine of one bus node.
///
/// Owns the peer state table and runs both sides of every authentication
/// conversation: the initiator side on the caller's task, the responder
/// side from [`PeerControlInbound::handle_control_call`], with the slow
/// handlers moved onto the dispatcher pool.
///
/// # Example
///
/// ```rust,ignore
/// let engine = PeerAuthEngine::new(config, ":abc.1", key_store, transport, listener);
/// engine.start()?;
/// engine.secure_connection(":def.1", false).await?;
/// ```
pub struct PeerAuthEngine {
    pub(crate) config: AuthConfig,
    pub(crate) local_name: String,
    pub(crate) peers: PeerStateTable,
    pub(crate) key_store: Arc<dyn KeyStore>,
    pub(crate) transport: Arc<dyn PeerTransport>,
    pub(crate) listener: Arc<dyn AuthListener>,
    pub(crate) delivery: RwLock<Option<Weak<dyn DeliveryPort>>>,
    pub(crate) serial: AtomicU32,
    /// Messages waiting for their destination to be authenticated.
    pub(crate) pending: Mutex<Vec<Message>>,
    pub(crate) sasl_conversations: Mutex<HashMap<String, SaslResponder>>,
    pub(crate) key_ex_conversations: Mutex<HashMap<String, KeyExchanger>>,
    /// Next membership certificate to send, per peer.
    pub(crate) membership_cursors: Mutex<HashMap<String, usize>>,
    pub(crate) trust_anchors: RwLock<Vec<EcdsaPublicKey>>,
    pub(crate) manifest: RwLock<Vec<u8>>,
    pub(crate) memberships: RwLock<Vec<Vec<u8>>>,
    pub(crate) dispatcher: Dispatcher,
    pub(crate) me: Weak<Self>,
}

impl PeerAuthEngine {
    #[must_use]
    pub fn new(
        config: AuthConfig,
        local_name: impl Into<String>,
        key_store: Arc<dyn KeyStore>,
        transport: Arc<dyn PeerTransport>,
        listener: Arc<dyn AuthListener>,
    ) -> Arc<Self> {
        let local_name = local_name.into();
        Arc::new_cyclic(|me| Self {
            config,
            local_name,
            peers: PeerStateTable::new(),
            key_store,
            transport,
            listener,
            delivery: RwLock::new(None),
            serial: AtomicU32::new(1),
            pending: Mutex::new(Vec::new()),
            sasl_conversations: Mutex::new(HashMap::new()),
            key_ex_conversations: Mutex::new(HashMap::new()),
            membership_cursors: Mutex::new(HashMap::new()),
            trust_anchors: RwLock::new(Vec::new()),
            manifest: RwLock::new(Vec::new()),
            memberships: RwLock::new(Vec::new()),
            dispatcher: Dispatcher::default(),
            me: me.clone(),
        })
    }

    /// Start the dispatcher workers.
    ///
    /// # Errors
    ///
    /// Fails outside a tokio runtime.
    pub fn start(&self) -> BusResult<()> {
        self.dispatcher.start(self.config.dispatcher_workers)?;
        log_event!(
            info,
            SUBSYSTEM_PEER_AUTH,
            "peer authentication started",
            local = %self.local_name,
            workers = self.config.dispatcher_workers,
            mechanisms = self.config.mechanisms.len()
        );
        Ok(())
    }

    /// Refuse further dispatched work.
    pub fn stop(&self) {
        self.dispatcher.stop();
    }

    /// Where replayed and synthesized messages go. Only a weak reference is
    /// kept; the routing layer usually owns the engine.
    pub fn set_delivery<D>(&self, delivery: &Arc<D>)
    where
        D: DeliveryPort + 'static,
    {
        let delivery: Arc<dyn DeliveryPort> = delivery.clone();
        *self.delivery.write() = Some(Arc::downgrade(&delivery));
    }

    // =========================================================================
    // CONFIGURATION
    // =========================================================================

    pub fn set_trust_anchors(&self, anchors: Vec<EcdsaPublicKey>) {
        *self.trust_anchors.write() = anchors;
    }

    /// Manifest sent to membership capable ECDSA peers.
    pub fn set_manifest(&self, manifest: Vec<u8>) {
        *self.manifest.write() = manifest;
    }

    /// Membership certificates sent to membership capable ECDSA peers.
    pub fn set_memberships(&self, memberships: Vec<Vec<u8>>) {
        *self.memberships.write() = memberships;
    }

    // =========================================================================
    // ACCESSORS
    // =========================================================================

    #[must_use]
    pub fn config(&self) -> &AuthConfig {
        &self.config
    }

    #[must_use]
    pub fn local_name(&self) -> &str {
        &self.local_name
    }

    #[must_use]
    pub fn peers(&self) -> &PeerStateTable {
        &self.peers
    }

    #[must_use]
    pub fn key_store(&self) -> &Arc<dyn KeyStore> {
        &self.key_store
    }

    /// True once `peer` holds a session key.
    #[must_use]
    pub fn is_peer_secure(&self, peer: &str) -> bool {
        self.peers.get(peer).is_some_and(|state| state.is_secure())
    }

    /// Messages still waiting for authentication.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.pending.lock().len()
    }

    // =========================================================================
    // HELPERS
    // =========================================================================

    /// Configured suites, heaviest first.
    pub(crate) fn configured_suites(&self) -> Vec<u32> {
        sorted_suites(&self.config.mechanisms)
    }

    pub(crate) fn configured_mask(&self) -> u32 {
        suite_mask(&self.configured_suites())
    }

    pub(crate) fn delivery(&self) -> Option<Arc<dyn DeliveryPort>> {
        self.delivery.read().as_ref().and_then(Weak::upgrade)
    }

    /// Next outgoing serial. Everything this node sends draws from the same
    /// counter so the peer's replay window sees one monotonic sequence.
    pub fn next_serial(&self) -> u32 {
        loop {
            let serial = self.serial.fetch_add(1, Ordering::Relaxed);
            if serial != 0 {
                return serial;
            }
        }
    }

    /// Give an outgoing message this node's name and a fresh serial.
    pub(crate) fn stamp(&self, msg: &mut Message) {
        msg.sender.clone_from(&self.local_name);
        msg.serial = self.next_serial();
    }

    pub(crate) fn reply(&self, call: &Message, args: Vec<MsgArg>) -> Message {
        let mut reply = Message::method_return(call, args);
        self.stamp(&mut reply);
        reply
    }

    pub(crate) fn error(&self, call: &Message, status: &BusError) -> Message {
        let mut reply = Message::error_status(call, status);
        self.stamp(&mut reply);
        reply
    }

    /// Build and stamp a control call to `peer`.
    pub(crate) fn control_call(&self, peer: &str, member: &str, args: Vec<MsgArg>) -> Message {
        let mut call = Message::method_call(
            &self.local_name,
            peer,
            PEER_OBJECT_PATH,
            PEER_INTERFACE,
            member,
            args,
        );
        self.stamp(&mut call);
        call
    }

    /// Send a control call; returns the reply whether or not it is an error.
    pub(crate) async fn round_trip(&self, call: &Message, timeout: Duration) -> BusResult<Message> {
        self.transport.method_call(call.clone(), timeout).await
    }

    /// Run `call` on the dispatcher and wait for its reply.
    async fn dispatch_control_call(&self, call: Message) -> Message {
        if self.config.mechanisms.is_empty() {
            return self.error(&call, &BusError::NoAuthenticationMechanism);
        }
        let Some(engine) = self.me.upgrade() else {
            return self.error(&call, &BusError::Stopping);
        };
        let (tx, rx) = oneshot::channel();
        let work = call.clone();
        let job = Box::pin(async move {
            let reply = engine.handle_dispatched(work).await;
            let _ = tx.send(reply);
        });
        if let Err(e) = self.dispatcher.submit(job) {
            return self.error(&call, &e);
        }
        match rx.await {
            Ok(reply) => reply,
            Err(_) => self.error(&call, &BusError::Stopping),
        }
    }

    async fn handle_dispatched(&self, call: Message) -> Message {
        match call.member.as_str() {
            member::KEY_EXCHANGE => self.respond_key_exchange(&call).await,
            member::KEY_AUTHENTICATION => self.respond_key_authentication(&call).await,
            member::AUTH_CHALLENGE => self.respond_auth_challenge(&call).await,
            _ => self.error(&call, &BusError::Fail(format!("unknown member {}", call.member))),
        }
    }
}

#[async_trait]
impl PeerControlInbound for PeerAuthEngine {
    async fn handle_control_call(&self, call: Message) -> Message {
        log_event!(
            trace,
            SUBSYSTEM_PEER_AUTH,
            "control call",
            member = %call.member,
            sender = %call.sender
        );
        if call.msg_type != MessageType::MethodCall {
            return self.error(&call, &BusError::InvalidData);
        }
        match call.member.as_str() {
            member::EXCHANGE_GUIDS => self.respond_exchange_guids(&call).await,
            member::EXCHANGE_SUITES => self.respond_exchange_suites(&call).await,
            member::GEN_SESSION_KEY => self.respond_gen_session_key(&call).await,
            member::EXCHANGE_GROUP_KEYS => self.respond_exchange_group_keys(call),
            member::SEND_MANIFEST => self.respond_send_manifest(&call),
            member::SEND_MEMBERSHIPS => self.respond_send_memberships(&call),
            member::KEY_EXCHANGE | member::KEY_AUTHENTICATION | member::AUTH_CHALLENGE => {
                self.dispatch_control_call(call).await
            }
            _ => self.error(&call, &BusError::Fail(format!("unknown member {}", call.member))),
        }
    }
}

#[async_trait]
impl PeerSecurity for PeerAuthEngine {
    async fn authenticate_peer(&self, msg_type: MessageType, peer: &str, wait: bool) -> BusResult<()> {
        self.authenticate(msg_type, peer, wait).await
    }

    async fn secure_connection(&self, peer: &str, force: bool) -> BusResult<()> {
        self.secure(peer, force).await
    }

    fn request_authentication(&self, msg: Message) {
        self.queue_for_authentication(msg);
    }

    fn encrypt_message(&self, msg: &mut Message) -> BusResult<()> {
        self.encrypt(msg)
    }

    fn decrypt_message(&self, msg: &mut Message) -> BusResult<()> {
        self.decrypt(msg)
    }

    fn handle_security_violation(&self, msg: &Message, status: &BusError) {
        self.security_violation(msg, status);
    }

    fn name_owner_changed(&self, name: &str, old_owner: Option<&str>, new_owner: Option<&str>) {
        self.owner_changed(name, old_owner, new_owner);
    }
}
