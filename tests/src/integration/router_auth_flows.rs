//! # Router and Authentication Flows
//!
//! A [`DaemonRouter`](bus_router::DaemonRouter) and a
//! [`PeerAuthEngine`](bus_peer_auth::PeerAuthEngine) wired together by
//! hand, without the node runtime:
//!
//! 1. **Queued replay**: an encrypted call to an unauthenticated peer is
//!    held by the engine and routed through the router once the
//!    conversation succeeds
//! 2. **Failure reply**: a failed conversation answers the queued call on
//!    the local endpoint
//! 3. **Inbound decryption**: a sealed message from the peer is opened and
//!    routed to the local endpoint
//! 4. **Departure**: removing the peer's endpoint from the router drops its
//!    security state through a name listener

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use bus_peer_auth::ports::member;
    use bus_peer_auth::{
        AuthConfig, DeliveryPort, KeyStore, LoopbackBus, MemoryKeyStore, PeerAuthEngine, PeerSecurity,
    };
    use bus_router::testing::TestEndpoint;
    use bus_router::{DaemonRouter, MessageRouter, NameListener, RouterConfig};
    use bus_types::{BusEndpoint, BusError, BusResult, EndpointType, Message, MessageType, MsgArg, ERROR_STATUS_NAME};

    use crate::integration::fixtures::{call, encrypted, eventually, Listener};

    const A: &str = ":a.1";
    const B: &str = ":b.1";

    // =============================================================================
    // TEST FIXTURES
    // =============================================================================

    /// Router side of node A: replays queued messages through the router
    /// and drops local error replies into the local endpoint.
    struct RouterDelivery {
        router: DaemonRouter,
        local: Arc<TestEndpoint>,
        remote: Arc<TestEndpoint>,
        engine: Arc<PeerAuthEngine>,
    }

    impl DeliveryPort for RouterDelivery {
        fn route(&self, msg: &Message) -> BusResult<()> {
            let mut msg = msg.clone();
            self.engine.encrypt_message(&mut msg)?;
            self.router.push_message(&msg, &self.local.endpoint())
        }

        fn deliver_local(&self, msg: &Message) {
            let _ = self.local.push_message(msg);
        }
    }

    struct Forget(Arc<PeerAuthEngine>);

    impl NameListener for Forget {
        fn name_owner_changed(&self, name: &str, old_owner: Option<&str>, new_owner: Option<&str>) {
            self.0.name_owner_changed(name, old_owner, new_owner);
        }
    }

    fn engine(
        bus: &Arc<LoopbackBus>,
        name: &str,
        mechanisms: &str,
        key_store: Arc<dyn KeyStore>,
        listener: Arc<Listener>,
    ) -> Arc<PeerAuthEngine> {
        let engine = PeerAuthEngine::new(
            AuthConfig::for_testing().with_mechanisms(mechanisms),
            name,
            key_store,
            bus.clone(),
            listener,
        );
        bus.register(name, &engine);
        engine.start().unwrap();
        engine
    }

    struct Setup {
        bus: Arc<LoopbackBus>,
        side: Arc<RouterDelivery>,
        peer: Arc<PeerAuthEngine>,
        listener_a: Arc<Listener>,
    }

    fn setup(mechanisms: &str, password_a: &str, password_b: &str) -> Setup {
        let bus = LoopbackBus::new();
        let listener_a = Listener::new(password_a);
        let a = engine(&bus, A, mechanisms, Arc::new(MemoryKeyStore::new()), Arc::clone(&listener_a));
        let peer = engine(&bus, B, mechanisms, Arc::new(MemoryKeyStore::new()), Listener::new(password_b));

        let router = DaemonRouter::new(RouterConfig::default(), "a");
        let local = TestEndpoint::new(A, EndpointType::Local);
        let remote = TestEndpoint::new(B, EndpointType::Remote);
        router.register_endpoint(local.endpoint()).unwrap();
        router.register_endpoint(remote.endpoint()).unwrap();
        router.name_table().add_listener(Arc::new(Forget(Arc::clone(&a))));

        let side = Arc::new(RouterDelivery {
            router,
            local,
            remote,
            engine: a,
        });
        side.engine.set_delivery(&side);
        Setup {
            bus,
            side,
            peer,
            listener_a,
        }
    }

    fn outgoing(engine: &PeerAuthEngine, mut msg: Message) -> Message {
        msg.sender = A.to_string();
        msg.serial = engine.next_serial();
        msg
    }

    // =============================================================================
    // TEST GROUP 1: Outbound encryption through the router
    // =============================================================================

    #[tokio::test]
    async fn test_queued_call_is_routed_after_authentication() {
        let s = setup("ALLJOYN_ECDHE_NULL", "", "");
        let mut msg = outgoing(&s.side.engine, encrypted(call(B, "held")));

        assert_eq!(s.side.engine.encrypt_message(&mut msg), Err(BusError::WouldBlock));
        eventually(|| s.side.remote.count() == 1).await;

        let mut delivered = s.side.remote.received().remove(0);
        assert_eq!(delivered.serial, msg.serial);
        assert_ne!(delivered.args, msg.args);
        s.peer.decrypt_message(&mut delivered).unwrap();
        assert_eq!(delivered.args, vec![MsgArg::Str("held".into())]);
        assert_eq!(s.side.engine.pending_count(), 0);
        assert_eq!(s.bus.calls(member::EXCHANGE_GUIDS), 1);
    }

    #[tokio::test]
    async fn test_failed_conversation_answers_on_local_endpoint() {
        let s = setup("ALLJOYN_SRP_KEYX", "ABCDEFGH", "HGFEDCBA");
        let mut msg = outgoing(&s.side.engine, encrypted(call(B, "refused")));

        assert_eq!(s.side.engine.encrypt_message(&mut msg), Err(BusError::WouldBlock));
        eventually(|| s.side.local.count() == 1).await;

        let reply = s.side.local.received().remove(0);
        assert_eq!(reply.msg_type, MessageType::Error);
        assert_eq!(reply.error_name, ERROR_STATUS_NAME);
        assert_eq!(reply.reply_serial, msg.serial);
        assert_eq!(reply.sender, B);
        assert_eq!(s.side.remote.count(), 0);
        assert!(!s.listener_a.violations().is_empty());
    }

    // =============================================================================
    // TEST GROUP 2: Inbound decryption
    // =============================================================================

    #[tokio::test]
    async fn test_sealed_message_from_peer_reaches_local_endpoint() {
        let s = setup("ALLJOYN_ECDHE_NULL", "", "");
        s.side.engine.secure_connection(B, false).await.unwrap();

        let mut msg = encrypted(call(A, "inbound"));
        msg.sender = B.to_string();
        msg.serial = s.peer.next_serial();
        s.peer.encrypt_message(&mut msg).unwrap();

        s.side.engine.decrypt_message(&mut msg).unwrap();
        s.side.router.push_message(&msg, &s.side.remote.endpoint()).unwrap();

        let received = s.side.local.received();
        assert_eq!(received.len(), 1);
        assert!(received[0].is_encrypted());
        assert_eq!(received[0].args, vec![MsgArg::Str("inbound".into())]);
    }

    // =============================================================================
    // TEST GROUP 3: Peer departure and restart
    // =============================================================================

    #[tokio::test]
    async fn test_unregistered_peer_loses_security_state() {
        let s = setup("ALLJOYN_ECDHE_NULL", "", "");
        s.side.engine.secure_connection(B, false).await.unwrap();
        assert!(s.side.engine.is_peer_secure(B));

        s.side.router.unregister_endpoint(B);

        assert!(!s.side.engine.is_peer_secure(B));
        assert!(s.side.engine.peers().get(B).is_none());
    }

    #[tokio::test]
    async fn test_restarted_engine_reuses_stored_master_secret() {
        let bus = LoopbackBus::new();
        let store_a = Arc::new(MemoryKeyStore::new());
        let first = engine(&bus, A, "ALLJOYN_SRP_KEYX", store_a.clone(), Listener::new("ABCDEFGH"));
        let _b = engine(&bus, B, "ALLJOYN_SRP_KEYX", Arc::new(MemoryKeyStore::new()), Listener::new("ABCDEFGH"));
        first.secure_connection(B, false).await.unwrap();
        let challenges = bus.calls(member::AUTH_CHALLENGE);
        assert!(challenges > 0);
        first.stop();
        drop(first);

        let second = engine(&bus, A, "ALLJOYN_SRP_KEYX", store_a, Listener::new("ABCDEFGH"));
        second.secure_connection(B, false).await.unwrap();

        assert!(second.is_peer_secure(B));
        assert_eq!(bus.calls(member::AUTH_CHALLENGE), challenges);
        assert_eq!(bus.calls(member::GEN_SESSION_KEY), 2);
    }
}
