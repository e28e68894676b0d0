//! Initiator side of the authentication conversation.
//!
//! Order of a full conversation:
//!
//! 1. `ExchangeGuids` (never hashed)
//! 2. `GenSessionKey` with a stored master secret, if one exists
//! 3. on failure: `ExchangeSuites` + key exchanger, or SASL, then a second
//!    `GenSessionKey`
//! 4. `ExchangeGroupKeys` (encrypted)
//! 5. `SendManifest` / `SendMemberships` for membership capable ECDSA peers

use std::sync::Arc;

use bus_crypto::{prf, rand_hex, SESSION_KEY_LEN};
use bus_telemetry::{
    log_event, log_peer_event, metric_inc, time_histogram, AUTH_ATTEMPTS, AUTH_DURATION,
    PEERS_SECURE, SUBSYSTEM_PEER_AUTH,
};
use bus_types::{flags, BusError, BusResult, Guid128, Message, MessageType, MsgArg};

use super::core::PeerAuthEngine;
use crate::domain::key_blob::now_ms;
use crate::domain::peer_state::wait_for_outcome;
use crate::domain::version::{
    auth_version, is_compatible, is_membership_capable, keygen_version, lower_version,
    uses_key_exchanger, NON_ECDSA_X509_VERSION, PREFERRED_AUTH_VERSION,
};
use crate::domain::{
    AccessRights, AuthClaim, AuthMechanism, KeyBlob, KeyKind, KeyRole, PeerSecretRecord, PeerState,
    Transcript, SELF_KEY_TAG,
};
use crate::domain::suites::AUTH_SUITE_ECDHE_ECDSA;
use crate::ports::{member, SERVICE_UNKNOWN};

/// Random hex characters each side contributes to the session key seed.
pub(crate) const NONCE_LEN: usize = 28;

/// Bytes of key material after the session key that form the verifier.
const VERIFIER_LEN: usize = 12;

/// Lifetime of a derived session key.
const SESSION_KEY_EXPIRATION_SECS: u32 = 2 * 24 * 60 * 60;

/// Membership flags carried by `SendMemberships`.
pub(crate) mod membership {
    pub const NONE: u8 = 0;
    pub const MORE: u8 = 1;
    pub const LAST: u8 = 2;
}

/// Upper bound on `SendMemberships` round trips in one conversation.
pub(crate) const MAX_MEMBERSHIP_ROUNDS: usize = 64;

/// Hash the negotiated version and both GUIDs, initiator GUID first.
pub(crate) fn hash_guids(
    transcript: &mut Transcript<'_>,
    version: u32,
    local: &Guid128,
    remote: &Guid128,
    local_first: bool,
) {
    transcript.update_v4(&version.to_le_bytes());
    let (first, second) = if local_first { (local, remote) } else { (remote, local) };
    transcript.update_v4(first.as_bytes());
    transcript.update_v4(second.as_bytes());
}

impl PeerAuthEngine {
    // =========================================================================
    // ENTRY POINTS
    // =========================================================================

    pub(crate) async fn authenticate(&self, msg_type: MessageType, peer: &str, wait: bool) -> BusResult<()> {
        if self.config.mechanisms.is_empty() {
            return Err(BusError::NoAuthenticationMechanism);
        }
        let state = self.peers.get_or_create(peer);
        if state.is_secure() {
            return Ok(());
        }
        if peer == self.local_name {
            return self.secure_self(&state);
        }
        let tx = match state.begin_authentication() {
            AuthClaim::InProgress(rx) if wait => return wait_for_outcome(rx).await,
            AuthClaim::InProgress(_) => return Err(BusError::WouldBlock),
            AuthClaim::Started(tx) => tx,
        };
        let timer = time_histogram!(AUTH_DURATION);
        let outcome = self.run_authentication(msg_type, peer, &state, wait).await;
        drop(timer);
        if outcome.is_err() && !state.is_local() {
            state.clear_keys();
        }
        state.finish_authentication(&tx, outcome.clone());
        self.record_outcome(peer, &outcome);
        outcome
    }

    /// Authenticate now; `force` discards the stored master secret first.
    pub(crate) async fn secure(&self, peer: &str, force: bool) -> BusResult<()> {
        if self.config.mechanisms.is_empty() {
            return Err(BusError::NoAuthenticationMechanism);
        }
        if force {
            if let Some(state) = self.peers.get(peer) {
                if let Some(guid) = state.guid() {
                    if self.key_store.del_key(&guid).is_ok() {
                        if let Err(e) = self.key_store.store() {
                            log_peer_event!(warn, SUBSYSTEM_PEER_AUTH, "key store write failed", peer, error = %e);
                        }
                    }
                }
                state.clear_keys();
            }
        }
        let result = self.authenticate(MessageType::MethodCall, peer, true).await;
        if let Err(e) = &result {
            let mut marker = self.control_call(peer, member::EXCHANGE_GUIDS, Vec::new());
            marker.flags |= flags::ENCRYPTED;
            self.listener.security_violation(e, &marker);
        }
        result
    }

    fn record_outcome(&self, peer: &str, outcome: &BusResult<()>) {
        match outcome {
            Ok(()) => {
                metric_inc!(AUTH_ATTEMPTS, &["initiator", "success"]);
                log_peer_event!(info, SUBSYSTEM_PEER_AUTH, "peer authenticated", peer);
            }
            Err(BusError::WouldBlock) => {}
            Err(e) => {
                metric_inc!(AUTH_ATTEMPTS, &["initiator", "failure"]);
                log_peer_event!(warn, SUBSYSTEM_PEER_AUTH, "peer authentication failed", peer, status = e.status_name());
            }
        }
        PEERS_SECURE.set(self.peers.secure_peer_count() as f64);
    }

    /// Secure a peer that turned out to be this node.
    fn secure_self(&self, state: &PeerState) -> BusResult<()> {
        let mut group = self.peers.group_key().ok_or(BusError::AuthFail)?;
        group.set_tag(SELF_KEY_TAG, KeyRole::NoRole);
        state.set_group_key(group);
        state.set_session_key(KeyBlob::random_aes().with_tag(SELF_KEY_TAG, KeyRole::NoRole));
        state.set_local(true);
        state.set_rights(AccessRights::for_conversation(true, false));
        if state.guid().is_none() {
            state.set_guid_and_auth_version(self.key_store.guid(), PREFERRED_AUTH_VERSION);
        }
        log_event!(debug, SUBSYSTEM_PEER_AUTH, "secured local peer", name = %self.local_name);
        Ok(())
    }

    async fn run_authentication(
        &self,
        msg_type: MessageType,
        peer: &str,
        state: &Arc<PeerState>,
        wait: bool,
    ) -> BusResult<()> {
        let (remote, remote_guid, version) = self.exchange_guids(peer).await?;
        let linked = self.peers.link(&remote, peer);
        linked.set_guid_and_auth_version(remote_guid, version);
        if remote == self.local_name {
            return self.secure_self(&linked);
        }
        if linked.is_secure() {
            return Ok(());
        }
        if Arc::ptr_eq(&linked, state) {
            return self.converse_if_allowed(msg_type, &remote, state).await;
        }
        // The unique name already had its own state; the conversation runs there.
        match linked.begin_authentication() {
            AuthClaim::InProgress(rx) if wait => wait_for_outcome(rx).await,
            AuthClaim::InProgress(_) => Err(BusError::WouldBlock),
            AuthClaim::Started(tx) => {
                let outcome = self.converse_if_allowed(msg_type, &remote, &linked).await;
                if outcome.is_err() {
                    linked.clear_keys();
                }
                linked.finish_authentication(&tx, outcome.clone());
                outcome
            }
        }
    }

    /// Only method calls and errors may start a conversation.
    async fn converse_if_allowed(
        &self,
        msg_type: MessageType,
        remote: &str,
        state: &PeerState,
    ) -> BusResult<()> {
        if !matches!(msg_type, MessageType::MethodCall | MessageType::Error) {
            return Err(BusError::DestinationNotAuthenticated);
        }
        self.converse(remote, state).await
    }

    // =========================================================================
    // CONVERSATION
    // =========================================================================

    /// `ExchangeGuids`: returns the replying unique name, the peer GUID and
    /// the agreed version.
    async fn exchange_guids(&self, peer: &str) -> BusResult<(String, Guid128, u32)> {
        let local_guid = self.key_store.guid();
        let call = self.control_call(
            peer,
            member::EXCHANGE_GUIDS,
            vec![MsgArg::Str(local_guid.to_hex()), MsgArg::U32(PREFERRED_AUTH_VERSION)],
        );
        let reply = self.round_trip(&call, self.config.default_timeout).await?;
        if reply.msg_type == MessageType::Error {
            let status = if reply.error_name == SERVICE_UNKNOWN {
                BusError::NoSuchObject
            } else {
                match reply.reply_status() {
                    Some(BusError::ReplyIsErrorMessage(_)) | None => BusError::AuthFail,
                    Some(status) => status,
                }
            };
            log_peer_event!(debug, SUBSYSTEM_PEER_AUTH, "ExchangeGuids failed", peer, status = status.status_name());
            return Err(status);
        }
        let guid = reply
            .arg(0)
            .and_then(MsgArg::as_str)
            .ok_or(BusError::InvalidData)
            .and_then(Guid128::from_hex)?;
        let version = reply.arg(1).and_then(MsgArg::as_u32).ok_or(BusError::InvalidData)?;
        if !is_compatible(version) {
            return Err(BusError::PeerAuthVersionMismatch);
        }
        let version = lower_version(version, PREFERRED_AUTH_VERSION);
        log_peer_event!(
            debug,
            SUBSYSTEM_PEER_AUTH,
            "guids exchanged",
            peer,
            remote = %reply.sender,
            guid = %guid.short(),
            version = version
        );
        Ok((reply.sender, guid, version))
    }

    async fn converse(&self, remote: &str, state: &PeerState) -> BusResult<()> {
        let guid = state.guid().ok_or(BusError::NoPeerGuid)?;
        let version = state.auth_version();
        let use_key_exchanger = uses_key_exchanger(version, self.configured_mask());
        {
            let mut transcript = state.transcript().await;
            transcript.initialize();
            hash_guids(&mut transcript, version, &self.key_store.guid(), &guid, true);
        }

        let mut mechanism = String::new();
        let mut auth_tried = false;
        let mut first_pass = true;
        let mut status = loop {
            let status = self.gen_session_key(remote, state, &guid).await;
            if status.is_ok() || !first_pass {
                break status;
            }
            log_peer_event!(debug, SUBSYSTEM_PEER_AUTH, "no usable master secret", remote, status = ?status);
            auth_tried = true;
            first_pass = false;
            let established = if use_key_exchanger {
                match self.exchange_suites(remote, state).await {
                    Ok(suites) => self.key_exchange(remote, state, &guid, suites).await,
                    Err(e) => Err(e),
                }
            } else {
                self.sasl_exchange(remote, state, &guid).await
            };
            match established {
                Ok(name) => mechanism = name,
                Err(e) => break Err(e),
            }
        };
        state.transcript().await.free();

        if status.is_ok() {
            status = self.exchange_group_keys(remote, state).await;
        }
        if status.is_ok()
            && use_key_exchanger
            && is_membership_capable(state.auth_version())
            && (mechanism == AuthMechanism::EcdheEcdsa.name()
                || (mechanism.is_empty() && state.public_key().is_some()))
        {
            if let Err(e) = self.send_manifest(remote, state).await {
                log_peer_event!(warn, SUBSYSTEM_PEER_AUTH, "manifest exchange failed", remote, error = %e);
            }
            if let Err(e) = self.send_memberships(remote, state).await {
                log_peer_event!(warn, SUBSYSTEM_PEER_AUTH, "membership exchange failed", remote, error = %e);
            }
        }
        if auth_tried {
            self.listener
                .authentication_complete(&mechanism, remote, status.is_ok());
        }
        match status {
            Err(BusError::ReplyIsErrorMessage(_)) => Err(BusError::AuthFail),
            other => other,
        }
    }

    // =========================================================================
    // SESSION KEY
    // =========================================================================

    /// `GenSessionKey` from the stored master secret.
    async fn gen_session_key(&self, remote: &str, state: &PeerState, guid: &Guid128) -> BusResult<()> {
        if !self.key_store.has_key(guid) {
            if !self.key_store.is_shared() {
                return Err(BusError::AuthFail);
            }
            self.key_store.reload()?;
            if !self.key_store.has_key(guid) {
                return Err(BusError::AuthFail);
            }
        }
        let nonce = rand_hex(NONCE_LEN);
        let call = self.control_call(
            remote,
            member::GEN_SESSION_KEY,
            vec![
                MsgArg::Str(self.key_store.guid().to_hex()),
                MsgArg::Str(guid.to_hex()),
                MsgArg::Str(nonce.clone()),
            ],
        );
        let reply = self.round_trip(&call, self.config.default_timeout).await?;
        {
            let mut transcript = state.transcript().await;
            transcript.update_message(&call);
            transcript.update_message(&reply);
        }
        if let Some(status) = reply.reply_status() {
            return Err(status);
        }
        let remote_nonce = reply.arg(0).and_then(MsgArg::as_str).ok_or(BusError::InvalidData)?;
        let remote_verifier = reply.arg(1).and_then(MsgArg::as_str).ok_or(BusError::InvalidData)?;
        let verifier = self.key_gen(state, &format!("{nonce}{remote_nonce}"), KeyRole::Initiator)?;
        if verifier != remote_verifier {
            log_peer_event!(warn, SUBSYSTEM_PEER_AUTH, "session key verifier mismatch", remote);
            return Err(BusError::AuthFail);
        }
        Ok(())
    }

    /// Derive and install a session key from the stored master secret.
    /// Returns the verifier string both sides compare.
    pub(crate) fn key_gen(&self, state: &PeerState, seed: &str, role: KeyRole) -> BusResult<String> {
        let guid = state.guid().ok_or(BusError::NoPeerGuid)?;
        let result = self.derive_session_key(state, &guid, seed, role);
        if let Err(e) = self.key_store.store() {
            log_event!(warn, SUBSYSTEM_PEER_AUTH, "key store write failed", error = %e);
        }
        result
    }

    fn derive_session_key(&self, state: &PeerState, guid: &Guid128, seed: &str, role: KeyRole) -> BusResult<String> {
        let (blob, rights) = match self.key_store.get_key(guid) {
            Ok(found) => found,
            Err(BusError::KeyUnavailable) if self.key_store.is_shared() => {
                self.key_store.reload()?;
                self.key_store.get_key(guid)?
            }
            Err(e) => return Err(e),
        };
        state.set_rights(rights);
        if blob.has_expired() {
            return Err(BusError::KeyExpired);
        }
        if blob.tag() == AuthMechanism::EcdheNull.name() {
            // ECDHE_NULL secrets are good for one session key only.
            self.key_store.set_key_expiration(guid, now_ms())?;
        }
        let record = PeerSecretRecord::from_blob(&blob)?;
        if record.public_key.is_some() {
            state.set_identity(record.public_key.clone(), record.issuer_keys.clone());
        }
        if keygen_version(state.auth_version()) != 0 {
            return Err(BusError::CryptoIllegalParameters);
        }
        let keymatter = zeroize::Zeroizing::new(prf(
            &record.master_secret,
            "session key",
            seed.as_bytes(),
            SESSION_KEY_LEN + VERIFIER_LEN,
        ));
        let mut session_key = KeyBlob::new(KeyKind::Aes, keymatter[..SESSION_KEY_LEN].to_vec());
        session_key.set_tag(blob.tag(), role);
        session_key.set_expiration_secs(SESSION_KEY_EXPIRATION_SECS);
        state.set_session_key(session_key);
        Ok(hex::encode_upper(&keymatter[SESSION_KEY_LEN..]))
    }

    // =========================================================================
    // SUITES
    // =========================================================================

    /// `ExchangeSuites`: offer the configured suites, return the peer's answer.
    async fn exchange_suites(&self, remote: &str, state: &PeerState) -> BusResult<Vec<u32>> {
        let mut offer = self.configured_suites();
        if auth_version(state.auth_version()) <= NON_ECDSA_X509_VERSION {
            offer.retain(|s| *s != AUTH_SUITE_ECDHE_ECDSA);
        }
        if offer.is_empty() {
            return Err(BusError::AuthFail);
        }
        let call = self.control_call(
            remote,
            member::EXCHANGE_SUITES,
            vec![MsgArg::Array(offer.into_iter().map(MsgArg::U32).collect())],
        );
        let reply = self.round_trip(&call, self.config.default_timeout).await?;
        if let Some(status) = reply.reply_status() {
            return Err(status);
        }
        {
            let mut transcript = state.transcript().await;
            transcript.update_message(&call);
            transcript.update_message(&reply);
        }
        parse_suites(reply.arg(0))
    }

    // =========================================================================
    // GROUP KEYS, MANIFEST, MEMBERSHIPS
    // =========================================================================

    /// `ExchangeGroupKeys`, encrypted with the new session key.
    async fn exchange_group_keys(&self, remote: &str, state: &PeerState) -> BusResult<()> {
        let version = state.auth_version();
        let send_blob = auth_version(version) <= 1 && keygen_version(version) == 0;
        let group = self.peers.group_key().ok_or(BusError::AuthFail)?;
        let payload = if send_blob { group.store()? } else { group.data().to_vec() };
        let mut call = self.control_call(remote, member::EXCHANGE_GROUP_KEYS, vec![MsgArg::Bytes(payload)]);
        call.flags |= flags::ENCRYPTED;
        self.encrypt(&mut call)?;
        let mut reply = self.round_trip(&call, self.config.default_timeout).await?;
        if let Some(status) = reply.reply_status() {
            return Err(status);
        }
        if reply.is_encrypted() {
            self.decrypt(&mut reply)?;
        }
        let bytes = reply.arg(0).and_then(MsgArg::as_bytes).ok_or(BusError::InvalidData)?;
        let mut key = if send_blob {
            KeyBlob::load(bytes)?
        } else {
            KeyBlob::new(KeyKind::Aes, bytes.to_vec())
        };
        // Group keys are directional; no role so senders can open their own broadcasts.
        key.set_tag(reply.auth_mechanism.clone(), KeyRole::NoRole);
        state.set_group_key(key);
        Ok(())
    }

    async fn send_manifest(&self, remote: &str, state: &PeerState) -> BusResult<()> {
        let manifest = self.manifest.read().clone();
        let call = self.control_call(remote, member::SEND_MANIFEST, vec![MsgArg::Bytes(manifest)]);
        let reply = self.round_trip(&call, self.config.default_timeout).await?;
        if let Some(status) = reply.reply_status() {
            return Err(status);
        }
        let manifest = reply.arg(0).and_then(MsgArg::as_bytes).ok_or(BusError::InvalidData)?;
        state.set_manifest(manifest.to_vec());
        Ok(())
    }

    /// `SendMemberships`: one certificate per call in each direction until
    /// both sides have sent their last.
    async fn send_memberships(&self, remote: &str, state: &PeerState) -> BusResult<()> {
        let mine = self.memberships.read().clone();
        let mut next = 0;
        let mut received = Vec::new();
        let mut local_done = false;
        let mut remote_done = false;
        for _ in 0..MAX_MEMBERSHIP_ROUNDS {
            if local_done && remote_done {
                break;
            }
            let (flag, certs) = next_membership(&mine, &mut next);
            local_done = flag != membership::MORE;
            let call = self.control_call(remote, member::SEND_MEMBERSHIPS, membership_args(flag, certs));
            let reply = self.round_trip(&call, self.config.default_timeout).await?;
            if let Some(status) = reply.reply_status() {
                return Err(status);
            }
            let (remote_flag, certs) = parse_membership_args(&reply)?;
            received.extend(certs);
            remote_done = remote_flag != membership::MORE;
        }
        if !(local_done && remote_done) {
            return Err(BusError::InvalidData);
        }
        state.set_memberships(received);
        Ok(())
    }
}

/// Next certificate to send and its flag, advancing `next`.
pub(crate) fn next_membership(mine: &[Vec<u8>], next: &mut usize) -> (u8, Vec<Vec<u8>>) {
    match mine.get(*next) {
        Some(cert) => {
            *next += 1;
            let flag = if *next == mine.len() { membership::LAST } else { membership::MORE };
            (flag, vec![cert.clone()])
        }
        None => (membership::NONE, Vec::new()),
    }
}

pub(crate) fn membership_args(flag: u8, certs: Vec<Vec<u8>>) -> Vec<MsgArg> {
    vec![
        MsgArg::Byte(flag),
        MsgArg::Array(certs.into_iter().map(MsgArg::Bytes).collect()),
    ]
}

pub(crate) fn parse_membership_args(msg: &Message) -> BusResult<(u8, Vec<Vec<u8>>)> {
    let flag = msg.arg(0).and_then(MsgArg::as_byte).ok_or(BusError::InvalidData)?;
    if flag > membership::LAST {
        return Err(BusError::InvalidData);
    }
    let certs = msg
        .arg(1)
        .and_then(MsgArg::as_array)
        .ok_or(BusError::InvalidData)?
        .iter()
        .map(|c| c.as_bytes().map(<[u8]>::to_vec).ok_or(BusError::InvalidData))
        .collect::<BusResult<Vec<_>>>()?;
    Ok((flag, certs))
}

/// Decode an `au` suite list.
pub(crate) fn parse_suites(arg: Option<&MsgArg>) -> BusResult<Vec<u32>> {
    arg.and_then(MsgArg::as_array)
        .ok_or(BusError::InvalidData)?
        .iter()
        .map(|s| s.as_u32().ok_or(BusError::InvalidData))
        .collect()
}
