//! # Bus Node
//!
//! One routing node: a [`DaemonRouter`], the [`PeerAuthEngine`] securing
//! its peers and the local endpoint the application reads from.
//!
//! ## Startup Sequence
//!
//! 1. Validate the configuration
//! 2. Take a [`BusContext`] reference (metrics registration)
//! 3. Open the key store (file backed or in memory)
//! 4. Build the router and mint the unique name
//! 5. Build the engine, hand it the node as its delivery port
//! 6. Start the dispatcher, register the local endpoint and the control
//!    handler
//!
//! ## Message Flow
//!
//! ```text
//! send ──encrypt──→ router ──→ LocalEndpoint (inbox)
//!                     │
//!                     └──→ PeerLink ──task──→ remote.receive ──decrypt──→ remote router
//! ```
//!
//! A message flagged `ENCRYPTED` for a peer without a session key is
//! queued by the engine; it is routed from [`DeliveryPort::route`] once
//! the peer is authenticated, or failed with a local error reply.

use std::collections::HashMap;
use std::sync::{Arc, Weak};

use anyhow::Context;
use bus_peer_auth::{
    AuthListener, DeliveryPort, FileKeyStore, KeyStore, LoopbackBus, MemoryKeyStore, PeerAuthEngine,
    PeerSecurity,
};
use bus_router::{AliasDisposition, DaemonRouter, MatchRule, MessageRouter, NameListener};
use bus_telemetry::{log_event, log_peer_event, SUBSYSTEM_NODE};
use bus_types::{BusEndpoint, BusError, BusResult, EndpointRef, Message, SessionId};
use parking_lot::RwLock;

use crate::adapters::{LocalEndpoint, PeerLink};
use crate::container::{BusContext, NodeConfig};

/// Match rule installed on every peer link so signals cross nodes.
const LINK_SIGNAL_RULE: &str = "type='signal'";

/// Forwards name ownership changes to the engine so departed peers lose
/// their security state.
struct PeerDeparture {
    engine: Weak<PeerAuthEngine>,
}

impl NameListener for PeerDeparture {
    fn name_owner_changed(&self, name: &str, old_owner: Option<&str>, new_owner: Option<&str>) {
        if let Some(engine) = self.engine.upgrade() {
            engine.name_owner_changed(name, old_owner, new_owner);
        }
    }
}

pub struct BusNode {
    config: NodeConfig,
    unique_name: String,
    router: DaemonRouter,
    engine: Arc<PeerAuthEngine>,
    transport: Arc<LoopbackBus>,
    local: Arc<LocalEndpoint>,
    links: RwLock<HashMap<String, Arc<PeerLink>>>,
    _context: BusContext,
}

impl BusNode {
    /// Build and start a node. Must run inside a tokio runtime.
    ///
    /// # Errors
    ///
    /// Invalid configuration, an unreadable key store, or no runtime.
    pub fn start(
        config: NodeConfig,
        transport: Arc<LoopbackBus>,
        listener: Arc<dyn AuthListener>,
    ) -> anyhow::Result<Arc<Self>> {
        config.validate().context("invalid node configuration")?;
        let context = BusContext::init();

        let key_store: Arc<dyn KeyStore> = match &config.keystore_path {
            Some(path) => Arc::new(
                FileKeyStore::open(path, config.keystore_shared)
                    .with_context(|| format!("cannot open key store {}", path.display()))?,
            ),
            None => Arc::new(MemoryKeyStore::new()),
        };
        let guid = config.guid.unwrap_or_else(|| key_store.guid());

        let router = DaemonRouter::new(config.router.clone(), guid.short());
        let unique_name = config
            .unique_name
            .clone()
            .unwrap_or_else(|| router.generate_unique_name());

        let peer_transport: Arc<LoopbackBus> = Arc::clone(&transport);
        let engine = PeerAuthEngine::new(
            config.auth.clone(),
            unique_name.clone(),
            key_store,
            peer_transport,
            listener,
        );
        router.name_table().add_listener(Arc::new(PeerDeparture {
            engine: Arc::downgrade(&engine),
        }));

        let local = LocalEndpoint::new(&unique_name, config.allow_remote);
        let node = Arc::new(Self {
            config,
            unique_name,
            router,
            engine,
            transport,
            local,
            links: RwLock::new(HashMap::new()),
            _context: context,
        });

        node.engine.set_delivery(&node);
        node.engine.start().context("cannot start peer authentication")?;
        node.router
            .register_endpoint(node.local_ref())
            .context("cannot register local endpoint")?;
        node.transport.register(&node.unique_name, &node.engine);

        log_event!(
            info,
            SUBSYSTEM_NODE,
            "bus node started",
            name = %node.unique_name,
            guid = %guid.short(),
            mechanisms = node.config.auth.mechanisms.len(),
            keystore = node.config.keystore_path.is_some()
        );
        Ok(node)
    }

    // =========================================================================
    // ACCESSORS
    // =========================================================================

    #[must_use]
    pub fn unique_name(&self) -> &str {
        &self.unique_name
    }

    #[must_use]
    pub fn config(&self) -> &NodeConfig {
        &self.config
    }

    #[must_use]
    pub fn router(&self) -> &DaemonRouter {
        &self.router
    }

    #[must_use]
    pub fn engine(&self) -> &Arc<PeerAuthEngine> {
        &self.engine
    }

    /// The application's inbox.
    #[must_use]
    pub fn local(&self) -> &Arc<LocalEndpoint> {
        &self.local
    }

    fn local_ref(&self) -> EndpointRef {
        self.local.clone()
    }

    // =========================================================================
    // TRAFFIC
    // =========================================================================

    /// Send `msg` from this node's local endpoint. Returns the serial it was
    /// sent with.
    ///
    /// An encrypted message to a peer that is not yet authenticated is
    /// queued, and `Ok` is returned; the outcome arrives later (delivery,
    /// or an error reply in the local inbox for method calls).
    ///
    /// # Errors
    ///
    /// `PermissionDenied` when the peer's rights forbid sending, or any
    /// routing status.
    pub fn send(&self, mut msg: Message) -> BusResult<u32> {
        msg.sender.clone_from(&self.unique_name);
        msg.serial = self.engine.next_serial();
        let serial = msg.serial;
        match self.encrypt_outgoing(&mut msg) {
            Ok(()) => {}
            Err(BusError::WouldBlock) => {
                log_peer_event!(debug, SUBSYSTEM_NODE, "queued until authenticated", &msg.destination, serial = serial);
                return Ok(serial);
            }
            Err(e) => return Err(e),
        }
        self.router.push_message(&msg, &self.local_ref())?;
        Ok(serial)
    }

    fn encrypt_outgoing(&self, msg: &mut Message) -> BusResult<()> {
        if !msg.is_encrypted() || msg.destination == self.unique_name {
            return Ok(());
        }
        self.engine.encrypt_message(msg)
    }

    /// Accept a message arriving over the link from `from`.
    ///
    /// # Errors
    ///
    /// Decryption failures (after reporting the violation), `NoEndpoint`
    /// for an unknown link, or any routing status.
    pub fn receive(&self, from: &str, mut msg: Message) -> BusResult<()> {
        let Some(link) = self.links.read().get(from).cloned() else {
            return Err(BusError::NoEndpoint(from.to_string()));
        };
        if msg.is_encrypted() {
            if let Err(e) = self.engine.decrypt_message(&mut msg) {
                self.engine.handle_security_violation(&msg, &e);
                return Err(e);
            }
        }
        let src: EndpointRef = link;
        self.router.push_message(&msg, &src)
    }

    // =========================================================================
    // SECURITY
    // =========================================================================

    /// Authenticate with `peer` now; `force` discards existing keys first.
    ///
    /// # Errors
    ///
    /// The conversation's failure status.
    pub async fn secure_connection(&self, peer: &str, force: bool) -> BusResult<()> {
        self.engine.secure_connection(peer, force).await
    }

    #[must_use]
    pub fn is_peer_secure(&self, peer: &str) -> bool {
        self.engine.is_peer_secure(peer)
    }

    // =========================================================================
    // NAMES, RULES AND SESSIONS
    // =========================================================================

    /// Ask for a well-known name for the local endpoint.
    ///
    /// # Errors
    ///
    /// `NoEndpoint` once the node is shut down.
    pub fn request_name(&self, alias: &str) -> BusResult<AliasDisposition> {
        self.router.name_table().add_alias(alias, &self.unique_name)
    }

    /// # Errors
    ///
    /// `NoEndpoint` when the name is not owned or queued for.
    pub fn release_name(&self, alias: &str) -> BusResult<()> {
        self.router.name_table().remove_alias(alias, &self.unique_name)
    }

    /// Subscribe the local endpoint to broadcasts matching `rule`.
    ///
    /// # Errors
    ///
    /// `InvalidMatchRule` for a malformed rule.
    pub fn add_match(&self, rule: &str) -> BusResult<()> {
        let rule: MatchRule = rule.parse()?;
        self.router.add_rule(&self.local_ref(), rule)
    }

    /// # Errors
    ///
    /// `InvalidMatchRule` or `MatchRuleNotFound`.
    pub fn remove_match(&self, rule: &str) -> BusResult<()> {
        let rule: MatchRule = rule.parse()?;
        self.router.remove_rule(&self.local_ref(), &rule)
    }

    /// Put the local endpoint and the links to `peers` into `session_id`.
    pub fn join_session(&self, session_id: SessionId, peers: &[&str]) {
        self.local.join_session(session_id);
        let links = self.links.read();
        for peer in peers {
            if let Some(link) = links.get(*peer) {
                link.join_session(session_id);
            }
        }
    }

    /// Let the local endpoint receive its own sessioncasts in `session_id`.
    pub fn self_join(&self, session_id: SessionId) {
        self.local.join_session(session_id);
        self.router.register_self_join(&self.unique_name, session_id);
    }

    pub fn leave_session(&self, session_id: SessionId) {
        self.local.leave_session(session_id);
        for link in self.links.read().values() {
            link.leave_session(session_id);
        }
        self.router.unregister_self_join(&self.unique_name, session_id);
    }

    // =========================================================================
    // LINKS
    // =========================================================================

    /// Link two nodes in both directions.
    ///
    /// # Errors
    ///
    /// Fails outside a tokio runtime or when a router refuses the link.
    pub fn connect(self: &Arc<Self>, other: &Arc<BusNode>) -> BusResult<()> {
        let to_other = Self::spawn_link(self, other)?;
        let to_self = Self::spawn_link(other, self)?;
        self.attach_link(to_other)?;
        other.attach_link(to_self)?;
        log_event!(
            debug,
            SUBSYSTEM_NODE,
            "nodes linked",
            a = %self.unique_name,
            b = %other.unique_name
        );
        Ok(())
    }

    /// Link owned by `owner` that feeds `remote`.
    fn spawn_link(owner: &Arc<BusNode>, remote: &Arc<BusNode>) -> BusResult<Arc<PeerLink>> {
        let target = Arc::downgrade(remote);
        let from = owner.unique_name.clone();
        PeerLink::spawn(&owner.unique_name, &remote.unique_name, move |msg| {
            let Some(node) = target.upgrade() else {
                return;
            };
            if let Err(e) = node.receive(&from, msg) {
                log_peer_event!(debug, SUBSYSTEM_NODE, "inbound message dropped", &from, status = e.status_name());
            }
        })
    }

    fn attach_link(&self, link: Arc<PeerLink>) -> BusResult<()> {
        let name = link.unique_name().to_string();
        let endpoint: EndpointRef = link.clone();
        self.router.register_endpoint(Arc::clone(&endpoint))?;
        self.router.add_rule(&endpoint, LINK_SIGNAL_RULE.parse()?)?;
        self.links.write().insert(name, link);
        Ok(())
    }

    /// Drop the link to `peer`. The router reports the name as gone, which
    /// clears the peer's security state.
    pub fn disconnect(&self, peer: &str) {
        let Some(link) = self.links.write().remove(peer) else {
            return;
        };
        link.invalidate();
        self.router.unregister_endpoint(peer);
        log_peer_event!(debug, SUBSYSTEM_NODE, "link dropped", peer);
    }

    /// Stop the engine, drop every link, close the local endpoint and
    /// persist the key store.
    pub fn shutdown(&self) {
        self.engine.stop();
        self.transport.unregister(&self.unique_name);
        let peers: Vec<String> = self.links.read().keys().cloned().collect();
        for peer in peers {
            self.disconnect(&peer);
        }
        self.router.unregister_endpoint(&self.unique_name);
        if let Err(e) = self.engine.key_store().store() {
            log_event!(warn, SUBSYSTEM_NODE, "key store not persisted", error = %e);
        }
        log_event!(info, SUBSYSTEM_NODE, "bus node stopped", name = %self.unique_name);
    }
}

impl DeliveryPort for BusNode {
    fn route(&self, msg: &Message) -> BusResult<()> {
        let mut msg = msg.clone();
        self.encrypt_outgoing(&mut msg)?;
        self.router.push_message(&msg, &self.local_ref())
    }

    fn deliver_local(&self, msg: &Message) {
        if let Err(e) = self.local.push_message(msg) {
            log_event!(debug, SUBSYSTEM_NODE, "local delivery failed", serial = msg.serial, status = e.status_name());
        }
    }
}
