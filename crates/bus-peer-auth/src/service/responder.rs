//! Responder side of the fast control calls.
//!
//! These run directly on the task delivering the call. `KeyExchange`,
//! `KeyAuthentication` and `AuthChallenge` can reach credential callbacks
//! and are dispatched instead (see `key_exchange.rs` and `sasl.rs`).

use bus_crypto::rand_hex;
use bus_telemetry::{log_peer_event, PEERS_SECURE, SUBSYSTEM_PEER_AUTH};
use bus_types::{flags, BusError, Guid128, Message, MsgArg};

use super::core::PeerAuthEngine;
use super::initiator::{
    hash_guids, membership, membership_args, next_membership, parse_membership_args, parse_suites,
    NONCE_LEN,
};
use crate::domain::suites::AUTH_SUITE_ECDHE_ECDSA;
use crate::domain::version::{
    auth_version, is_compatible, keygen_version, lower_version, NON_ECDSA_X509_VERSION,
    PREFERRED_AUTH_VERSION,
};
use crate::domain::{KeyBlob, KeyKind, KeyRole, PeerState};

impl PeerAuthEngine {
    /// Start the responder transcript if this is the first hashed call.
    async fn ensure_transcript(&self, state: &PeerState) {
        let version = state.auth_version();
        let Some(remote) = state.guid() else {
            return;
        };
        let mut transcript = state.transcript().await;
        if !transcript.is_initialized() {
            transcript.initialize();
            hash_guids(&mut transcript, version, &self.key_store.guid(), &remote, false);
        }
    }

    /// `ExchangeGuids`: record the caller's GUID and agree on a version.
    pub(crate) async fn respond_exchange_guids(&self, call: &Message) -> Message {
        let guid = call.arg(0).and_then(MsgArg::as_str).map(Guid128::from_hex);
        let version = call.arg(1).and_then(MsgArg::as_u32);
        let (Some(Ok(guid)), Some(proposed)) = (guid, version) else {
            return self.error(call, &BusError::InvalidData);
        };
        // An incompatible proposal gets our preferred version; the caller gives up.
        let agreed = if is_compatible(proposed) {
            lower_version(proposed, PREFERRED_AUTH_VERSION)
        } else {
            PREFERRED_AUTH_VERSION
        };
        let state = self.peers.get_or_create(&call.sender);
        state.set_guid_and_auth_version(guid, agreed);
        // A new conversation starts here; drop whatever a failed one left behind.
        state.transcript().await.free();
        log_peer_event!(
            debug,
            SUBSYSTEM_PEER_AUTH,
            "answered ExchangeGuids",
            &call.sender,
            guid = %guid.short(),
            version = agreed
        );
        self.reply(
            call,
            vec![MsgArg::Str(self.key_store.guid().to_hex()), MsgArg::U32(agreed)],
        )
    }

    /// `ExchangeSuites`: the configured suites the caller also offered, in
    /// our order of preference.
    pub(crate) async fn respond_exchange_suites(&self, call: &Message) -> Message {
        let Some(state) = self.peers.get(&call.sender) else {
            return self.error(call, &BusError::AuthFail);
        };
        self.ensure_transcript(&state).await;
        let reply = match parse_suites(call.arg(0)) {
            Ok(offered) => {
                let mut accepted: Vec<u32> = self
                    .configured_suites()
                    .into_iter()
                    .filter(|s| offered.contains(s))
                    .collect();
                if auth_version(state.auth_version()) <= NON_ECDSA_X509_VERSION {
                    accepted.retain(|s| *s != AUTH_SUITE_ECDHE_ECDSA);
                }
                if self.config.mechanisms.is_empty() {
                    accepted = vec![0];
                }
                self.reply(call, vec![MsgArg::Array(accepted.into_iter().map(MsgArg::U32).collect())])
            }
            Err(e) => self.error(call, &e),
        };
        let mut transcript = state.transcript().await;
        transcript.update_message(call);
        transcript.update_message(&reply);
        reply
    }

    /// `GenSessionKey`: derive a session key from the stored master secret.
    pub(crate) async fn respond_gen_session_key(&self, call: &Message) -> Message {
        let Some(state) = self.peers.get(&call.sender) else {
            return self.error(call, &BusError::NoPeerGuid);
        };
        self.ensure_transcript(&state).await;
        state.transcript().await.update_message(call);

        let addressed_to_us = call
            .arg(1)
            .and_then(MsgArg::as_str)
            .and_then(|hex| Guid128::from_hex(hex).ok())
            .is_some_and(|guid| guid == self.key_store.guid());
        let remote_nonce = call.arg(2).and_then(MsgArg::as_str);
        let reply = match (addressed_to_us, remote_nonce) {
            (true, Some(remote_nonce)) => {
                let nonce = rand_hex(NONCE_LEN);
                match self.key_gen(&state, &format!("{remote_nonce}{nonce}"), KeyRole::Responder) {
                    Ok(verifier) => self.reply(call, vec![MsgArg::Str(nonce), MsgArg::Str(verifier)]),
                    Err(e) => self.error(call, &e),
                }
            }
            (true, None) => self.error(call, &BusError::InvalidData),
            (false, _) => self.error(call, &BusError::NoPeerGuid),
        };

        let mut transcript = state.transcript().await;
        if reply.reply_status().is_none() {
            transcript.free();
        } else {
            transcript.update_message(&reply);
        }
        drop(transcript);
        PEERS_SECURE.set(self.peers.secure_peer_count() as f64);
        reply
    }

    /// `ExchangeGroupKeys`: store the caller's group key, answer with ours.
    pub(crate) fn respond_exchange_group_keys(&self, mut call: Message) -> Message {
        let Some(state) = self.peers.get(&call.sender) else {
            return self.error(&call, &BusError::NoPeerGuid);
        };
        if call.is_encrypted() {
            if let Err(e) = self.decrypt(&mut call) {
                return self.error(&call, &e);
            }
        }
        let version = state.auth_version();
        let send_blob = auth_version(version) <= 1 && keygen_version(version) == 0;
        let Some(bytes) = call.arg(0).and_then(MsgArg::as_bytes) else {
            return self.error(&call, &BusError::InvalidData);
        };
        let received = if send_blob {
            KeyBlob::load(bytes)
        } else {
            Ok(KeyBlob::new(KeyKind::Aes, bytes.to_vec()))
        };
        let mut key = match received {
            Ok(key) => key,
            Err(e) => return self.error(&call, &e),
        };
        key.set_tag(call.auth_mechanism.clone(), KeyRole::NoRole);
        state.set_group_key(key);

        let Some(group) = self.peers.group_key() else {
            return self.error(&call, &BusError::AuthFail);
        };
        let payload = if send_blob { group.store() } else { Ok(group.data().to_vec()) };
        let mut reply = match payload {
            Ok(payload) => self.reply(&call, vec![MsgArg::Bytes(payload)]),
            Err(e) => return self.error(&call, &e),
        };
        reply.flags |= flags::ENCRYPTED;
        match self.encrypt(&mut reply) {
            Ok(()) => reply,
            Err(e) => self.error(&call, &e),
        }
    }

    /// `SendManifest`: keep the caller's manifest, answer with ours.
    pub(crate) fn respond_send_manifest(&self, call: &Message) -> Message {
        let Some(state) = self.peers.get(&call.sender) else {
            return self.error(call, &BusError::AuthFail);
        };
        let Some(manifest) = call.arg(0).and_then(MsgArg::as_bytes) else {
            return self.error(call, &BusError::InvalidData);
        };
        state.set_manifest(manifest.to_vec());
        self.reply(call, vec![MsgArg::Bytes(self.manifest.read().clone())])
    }

    /// `SendMemberships`: one certificate per call each way.
    pub(crate) fn respond_send_memberships(&self, call: &Message) -> Message {
        let Some(state) = self.peers.get(&call.sender) else {
            return self.error(call, &BusError::AuthFail);
        };
        let (remote_flag, certs) = match parse_membership_args(call) {
            Ok(parsed) => parsed,
            Err(e) => return self.error(call, &e),
        };

        let mine = self.memberships.read().clone();
        let mut cursors = self.membership_cursors.lock();
        let next = cursors.entry(call.sender.clone()).or_insert_with(|| {
            state.set_memberships(Vec::new());
            0
        });
        let (flag, reply_certs) = next_membership(&mine, next);
        if remote_flag != membership::MORE && flag != membership::MORE {
            cursors.remove(&call.sender);
        }
        drop(cursors);

        let mut received = state.memberships();
        received.extend(certs);
        state.set_memberships(received);
        self.reply(call, membership_args(flag, reply_certs))
    }
}
