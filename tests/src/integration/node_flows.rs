//! # Node Flows
//!
//! Whole [`BusNode`](bus_node::BusNode)s linked over in-process peer links.
//!
//! 1. **Mesh broadcast**: a signal reaches every subscribed node exactly once
//! 2. **Sessioncast**: only the nodes linked into the session see it
//! 3. **Encrypted traffic**: one conversation secures both directions,
//!    group-keyed signals open only on authenticated nodes
//! 4. **Persistence**: file-backed key stores let restarted nodes skip the
//!    password exchange

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use bus_node::{BusNode, NodeConfig};
    use bus_peer_auth::ports::member;
    use bus_peer_auth::LoopbackBus;
    use bus_types::{Message, MessageType, MsgArg};

    use crate::integration::fixtures::{
        assert_quiet, call, encrypted, mesh, next, node, signal, Listener, IFACE,
    };

    fn subscribe(node: &BusNode) {
        node.add_match(&format!("type='signal',interface='{IFACE}'")).unwrap();
    }

    // =============================================================================
    // TEST GROUP 1: Plain traffic across a mesh
    // =============================================================================

    #[tokio::test]
    async fn test_broadcast_reaches_each_node_once() {
        let bus = LoopbackBus::new();
        let a = node(&bus, "", Listener::new(""));
        let b = node(&bus, "", Listener::new(""));
        let c = node(&bus, "", Listener::new(""));
        mesh(&[&a, &b, &c]);
        subscribe(&b);
        subscribe(&c);

        a.send(signal("Tick", "1")).unwrap();

        for receiver in [&b, &c] {
            let msg = next(receiver).await;
            assert_eq!(msg.member, "Tick");
            assert_eq!(msg.sender, a.unique_name());
        }
        for n in [&a, &b, &c] {
            assert_quiet(n).await;
        }
    }

    #[tokio::test]
    async fn test_calls_between_every_pair() {
        let bus = LoopbackBus::new();
        let nodes = [
            node(&bus, "", Listener::new("")),
            node(&bus, "", Listener::new("")),
            node(&bus, "", Listener::new("")),
        ];
        mesh(&[&nodes[0], &nodes[1], &nodes[2]]);

        for from in &nodes {
            for to in nodes.iter().filter(|n| n.unique_name() != from.unique_name()) {
                let serial = from.send(call(to.unique_name(), from.unique_name())).unwrap();
                let received = next(to).await;
                assert_eq!(received.serial, serial);
                assert_eq!(received.args, vec![MsgArg::Str(from.unique_name().to_string())]);
            }
        }
    }

    #[tokio::test]
    async fn test_sessioncast_stays_inside_session() {
        let bus = LoopbackBus::new();
        let a = node(&bus, "", Listener::new(""));
        let b = node(&bus, "", Listener::new(""));
        let c = node(&bus, "", Listener::new(""));
        mesh(&[&a, &b, &c]);
        a.join_session(9, &[b.unique_name()]);
        b.join_session(9, &[a.unique_name()]);

        a.send(Message::signal("", "", 9, IFACE, "Members", Vec::new())).unwrap();

        let msg = next(&b).await;
        assert_eq!(msg.session_id, 9);
        assert_quiet(&c).await;
    }

    // =============================================================================
    // TEST GROUP 2: Encrypted traffic
    // =============================================================================

    #[tokio::test]
    async fn test_one_conversation_secures_both_directions() {
        let bus = LoopbackBus::new();
        let a = node(&bus, "ALLJOYN_ECDHE_NULL", Listener::new(""));
        let b = node(&bus, "ALLJOYN_ECDHE_NULL", Listener::new(""));
        a.connect(&b).unwrap();

        a.send(encrypted(call(b.unique_name(), "there"))).unwrap();
        let request = next(&b).await;
        assert!(b.is_peer_secure(a.unique_name()));

        b.send(encrypted(call(a.unique_name(), "and back"))).unwrap();
        let back = next(&a).await;
        assert_eq!(back.args, vec![MsgArg::Str("and back".into())]);

        b.send(encrypted(Message::method_return(&request, Vec::new()))).unwrap();
        assert_eq!(next(&a).await.msg_type, MessageType::MethodReturn);
        assert_eq!(bus.calls(member::EXCHANGE_GUIDS), 1);
    }

    #[tokio::test]
    async fn test_encrypted_signal_opens_only_where_authenticated() {
        let bus = LoopbackBus::new();
        let lc = Listener::new("");
        let a = node(&bus, "ALLJOYN_ECDHE_NULL", Listener::new(""));
        let b = node(&bus, "ALLJOYN_ECDHE_NULL", Listener::new(""));
        let c = node(&bus, "ALLJOYN_ECDHE_NULL", Arc::clone(&lc));
        mesh(&[&a, &b, &c]);
        subscribe(&b);
        subscribe(&c);
        a.secure_connection(b.unique_name(), false).await.unwrap();

        a.send(encrypted(signal("Sealed", "group"))).unwrap();

        let msg = next(&b).await;
        assert!(msg.is_encrypted());
        assert_eq!(msg.args, vec![MsgArg::Str("group".into())]);
        // C never authenticated with A; the signal is dropped without a
        // violation report.
        assert_quiet(&c).await;
        assert!(lc.violations().is_empty());
    }

    #[tokio::test]
    async fn test_psk_mismatch_fails_queued_call() {
        let bus = LoopbackBus::new();
        let la = Listener::new("left");
        let a = node(&bus, "ALLJOYN_ECDHE_PSK", Arc::clone(&la));
        let b = node(&bus, "ALLJOYN_ECDHE_PSK", Listener::new("right"));
        a.connect(&b).unwrap();

        let serial = a.send(encrypted(call(b.unique_name(), "lost"))).unwrap();

        let reply = next(&a).await;
        assert_eq!(reply.msg_type, MessageType::Error);
        assert_eq!(reply.reply_serial, serial);
        assert!(la.completions.lock().iter().any(|(_, ok)| !ok));
        assert_quiet(&b).await;
    }

    // =============================================================================
    // TEST GROUP 3: Key persistence across restarts
    // =============================================================================

    fn file_node(bus: &Arc<LoopbackBus>, dir: &std::path::Path, name: &str) -> Arc<BusNode> {
        let config = NodeConfig {
            unique_name: Some(format!(":{name}.1")),
            keystore_path: Some(dir.join(format!("{name}.keys"))),
            ..NodeConfig::for_testing().with_mechanisms("ALLJOYN_SRP_KEYX")
        };
        BusNode::start(config, Arc::clone(bus), Listener::new("ABCDEFGH")).unwrap()
    }

    #[tokio::test]
    async fn test_restarted_nodes_reuse_master_secret() {
        let dir = tempfile::tempdir().unwrap();

        let first_bus = LoopbackBus::new();
        let a = file_node(&first_bus, dir.path(), "node-a");
        let b = file_node(&first_bus, dir.path(), "node-b");
        a.connect(&b).unwrap();
        a.secure_connection(b.unique_name(), false).await.unwrap();
        assert!(first_bus.calls(member::AUTH_CHALLENGE) > 0);
        a.shutdown();
        b.shutdown();
        drop((a, b));

        let bus = LoopbackBus::new();
        let a = file_node(&bus, dir.path(), "node-a");
        let b = file_node(&bus, dir.path(), "node-b");
        a.connect(&b).unwrap();

        a.send(encrypted(call(b.unique_name(), "remembered"))).unwrap();
        assert_eq!(next(&b).await.args, vec![MsgArg::Str("remembered".into())]);
        assert_eq!(bus.calls(member::AUTH_CHALLENGE), 0);
        assert_eq!(bus.calls(member::GEN_SESSION_KEY), 1);
    }
}
