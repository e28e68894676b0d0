//! Per-message security: body encryption, queued authentication, violation
//! handling and peer teardown.
//!
//! Unicast traffic uses the session key shared with the destination.
//! Broadcast signals use the sender's group key, which every authenticated
//! peer received during `ExchangeGroupKeys`.

use bus_crypto::SessionKey;
use bus_telemetry::{log_peer_event, metric_inc, SECURITY_VIOLATIONS, SUBSYSTEM_PEER_AUTH};
use bus_types::{decode_args, encode_args, BusError, BusResult, Message, MessageType, MsgArg};

use super::core::PeerAuthEngine;

impl PeerAuthEngine {
    // =========================================================================
    // ENCRYPTION
    // =========================================================================

    /// Seal the body of a message flagged for encryption. A destination
    /// without a usable session key gets the message queued.
    pub(crate) fn encrypt(&self, msg: &mut Message) -> BusResult<()> {
        if !msg.is_encrypted() {
            return Ok(());
        }
        let broadcast = msg.is_broadcast_signal();
        let key = if broadcast {
            self.peers.group_key()
        } else {
            let state = self.peers.get(&msg.destination);
            let key = state.as_ref().and_then(|s| s.session_key()).filter(|k| !k.has_expired());
            match (state, key) {
                (Some(state), Some(key)) => {
                    if !state.rights().allows_tx(msg.msg_type) {
                        return Err(BusError::PermissionDenied);
                    }
                    Some(key)
                }
                _ => None,
            }
        };
        let Some(key) = key else {
            log_peer_event!(debug, SUBSYSTEM_PEER_AUTH, "no session key, queueing", &msg.destination, serial = msg.serial);
            self.queue_for_authentication(msg.clone());
            return Err(BusError::WouldBlock);
        };

        let cipher = SessionKey::from_bytes(key.data())?;
        let aad = msg.header_bytes()?;
        let plaintext = encode_args(&msg.args)?;
        let sealed = cipher.seal(key.role().as_byte(), msg.serial, &aad, &plaintext)?;
        msg.args = vec![MsgArg::Bytes(sealed)];
        msg.auth_mechanism = key.tag().to_string();
        Ok(())
    }

    /// Open the body of an encrypted message. The `ENCRYPTED` flag stays set
    /// so receivers can tell the message arrived protected.
    pub(crate) fn decrypt(&self, msg: &mut Message) -> BusResult<()> {
        if !msg.is_encrypted() {
            return Ok(());
        }
        let broadcast = msg.is_broadcast_signal();
        let state = self.peers.get(&msg.sender).ok_or(BusError::MessageDecryptionFailed)?;
        let key = if broadcast { state.group_key() } else { state.session_key() };
        let key = key.ok_or(BusError::MessageDecryptionFailed)?;
        if !broadcast && !state.rights().allows_rx(msg.msg_type) {
            return Err(BusError::PermissionDenied);
        }
        if !state.is_valid_serial(msg.serial, true, false) {
            return Err(BusError::InvalidData);
        }

        let sealed = msg
            .arg(0)
            .and_then(MsgArg::as_bytes)
            .ok_or(BusError::MessageDecryptionFailed)?;
        let cipher = SessionKey::from_bytes(key.data())?;
        let aad = msg.header_bytes()?;
        let plaintext = cipher
            .open(key.role().anti_role().as_byte(), msg.serial, &aad, sealed)
            .map_err(|_| BusError::MessageDecryptionFailed)?;
        msg.args = decode_args(&plaintext)?;
        Ok(())
    }

    // =========================================================================
    // QUEUED AUTHENTICATION
    // =========================================================================

    /// Hold `msg` until its destination is authenticated, then route it (or
    /// fail it) from a dispatcher worker.
    pub(crate) fn queue_for_authentication(&self, msg: Message) {
        let trigger = msg.clone();
        self.pending.lock().push(msg);
        let Some(engine) = self.me.upgrade() else {
            return;
        };
        let job_trigger = trigger.clone();
        let job = Box::pin(async move {
            let destination = job_trigger.destination.as_str();
            let outcome = engine.authenticate(job_trigger.msg_type, destination, false).await;
            // Another job owns the conversation and will flush the queue.
            if !matches!(outcome, Err(BusError::WouldBlock)) {
                engine.flush_pending(destination, &outcome, &job_trigger);
            }
        });
        if let Err(e) = self.dispatcher.submit(job) {
            log_peer_event!(warn, SUBSYSTEM_PEER_AUTH, "cannot queue authentication", &trigger.destination, status = e.status_name());
            self.flush_pending(&trigger.destination, &Err(e), &trigger);
        }
    }

    /// Replay or fail every queued message for `destination`, in queue order.
    /// A failure is reported to the listener once, for `trigger`, the message
    /// that started the conversation.
    fn flush_pending(&self, destination: &str, outcome: &BusResult<()>, trigger: &Message) {
        let ready: Vec<Message> = {
            let mut pending = self.pending.lock();
            let (ready, keep): (Vec<Message>, Vec<Message>) = pending
                .drain(..)
                .partition(|m| self.peers.is_alias(&m.destination, destination));
            *pending = keep;
            ready
        };
        let delivery = self.delivery();
        let any_ready = !ready.is_empty();
        for msg in ready {
            match outcome {
                Ok(()) => {
                    let Some(delivery) = &delivery else { continue };
                    match delivery.route(&msg) {
                        Err(BusError::PermissionDenied) if msg.msg_type == MessageType::MethodCall => {
                            let reply = self.error(&msg, &BusError::PermissionDenied);
                            delivery.deliver_local(&reply);
                        }
                        Err(e) => {
                            log_peer_event!(debug, SUBSYSTEM_PEER_AUTH, "replay failed", destination, status = e.status_name());
                        }
                        Ok(()) => {}
                    }
                }
                Err(status) => {
                    if msg.msg_type == MessageType::MethodCall {
                        if let Some(delivery) = &delivery {
                            let mut reply = Message::error_status(&msg, status);
                            reply.sender.clone_from(&msg.destination);
                            delivery.deliver_local(&reply);
                        }
                    }
                }
            }
        }
        match outcome {
            Err(status) if any_ready => self.listener.security_violation(status, trigger),
            _ => {}
        }
    }

    // =========================================================================
    // VIOLATIONS AND TEARDOWN
    // =========================================================================

    pub(crate) fn security_violation(&self, msg: &Message, status: &BusError) {
        metric_inc!(SECURITY_VIOLATIONS, &[status.status_name()]);
        log_peer_event!(
            warn,
            SUBSYSTEM_PEER_AUTH,
            "security violation",
            &msg.sender,
            status = status.status_name(),
            member = %msg.member
        );
        match status {
            BusError::PermissionDenied => {
                if msg.msg_type == MessageType::MethodCall && msg.reply_expected() {
                    if let Some(delivery) = self.delivery() {
                        let reply = self.error(msg, status);
                        if let Err(e) = delivery.route(&reply) {
                            log_peer_event!(debug, SUBSYSTEM_PEER_AUTH, "error reply not routed", &msg.sender, status = e.status_name());
                        }
                    }
                }
            }
            BusError::MessageDecryptionFailed => {
                if msg.is_broadcast_signal() {
                    // Signals from peers we never authenticated with.
                    return;
                }
                if let Some(state) = self.peers.get(&msg.sender) {
                    if state.is_secure() {
                        state.clear_keys();
                    }
                }
                self.listener.security_violation(status, msg);
            }
            _ => self.listener.security_violation(status, msg),
        }
    }

    /// Forget a peer whose name lost its owner.
    pub(crate) fn owner_changed(&self, name: &str, old_owner: Option<&str>, new_owner: Option<&str>) {
        if new_owner.is_some() {
            return;
        }
        log_peer_event!(debug, SUBSYSTEM_PEER_AUTH, "peer left", name, old_owner = ?old_owner);
        self.peers.remove(name);
        self.sasl_conversations.lock().remove(name);
        self.key_ex_conversations.lock().remove(name);
        self.membership_cursors.lock().remove(name);
    }
}
