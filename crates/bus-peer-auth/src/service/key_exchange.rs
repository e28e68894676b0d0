//! ECDHE key exchange over `KeyExchange` and `KeyAuthentication`.
//!
//! Both sides absorb the same byte strings into the transcript in the same
//! order. Pre-v4 peers hash individual fields (`update_v1`); v4 peers hash
//! whole messages (`update_message`).
//!
//! | Step                    | Initiator hashes                          |
//! |-------------------------|-------------------------------------------|
//! | KeyExchange sent        | mask, curve, own key                      |
//! | KeyExchange answered    | call, reply, peer mask, curve, peer key   |
//! | KeyAuthentication sent  | PSK name/value, own verifier, call        |
//! | KeyAuthentication reply | reply                                     |

use bus_crypto::ECC_CURVE_ID;
use bus_telemetry::{log_peer_event, metric_inc, AUTH_ATTEMPTS, SUBSYSTEM_PEER_AUTH};
use bus_types::{BusError, BusResult, Guid128, Message, MsgArg};

use super::core::PeerAuthEngine;
use crate::domain::key_exchanger::{ChainCheck, SignedVerifier};
use crate::domain::version::{auth_version, CONVERSATION_V4};
use crate::domain::{AccessRights, AuthMechanism, Credentials, KeyExchanger, PeerState};
use crate::ports::member;

/// Mechanism for the first suite in `candidates` this node runs as a key exchanger.
fn pick_mechanism(candidates: &[u32], configured: &[AuthMechanism]) -> Option<AuthMechanism> {
    candidates.iter().find_map(|suite| {
        AuthMechanism::from_suite(*suite).filter(|m| m.is_ecdhe() && configured.contains(m))
    })
}

impl PeerAuthEngine {
    // =========================================================================
    // INITIATOR
    // =========================================================================

    /// Try the negotiated suites strongest first. Returns the mechanism name
    /// that established a new master secret.
    pub(crate) async fn key_exchange(
        &self,
        remote: &str,
        state: &PeerState,
        guid: &Guid128,
        mut candidates: Vec<u32>,
    ) -> BusResult<String> {
        loop {
            let mechanism =
                pick_mechanism(&candidates, &self.config.mechanisms).ok_or(BusError::AuthFail)?;
            let suite = mechanism.suite();
            let mut kx = KeyExchanger::new(
                mechanism,
                true,
                auth_version(state.auth_version()),
                self.trust_anchors.read().clone(),
            )?;
            let mut remote_mask = 0;
            let result = self
                .run_key_exchange(remote, state, &mut kx, &mut remote_mask)
                .await
                .and_then(|()| {
                    let rights = AccessRights::for_conversation(true, false);
                    state.set_rights(rights);
                    self.key_store.add_key(guid, kx.master_secret_blob()?, rights)
                });
            match result {
                Ok(()) => {
                    if let Some(identity) = kx.peer_identity() {
                        state.set_identity(
                            Some(identity.public_key.as_bytes().to_vec()),
                            identity.issuer_keys.iter().map(|k| k.as_bytes().to_vec()).collect(),
                        );
                    }
                    return Ok(mechanism.name().to_string());
                }
                Err(e) => {
                    log_peer_event!(
                        debug,
                        SUBSYSTEM_PEER_AUTH,
                        "key exchange failed",
                        remote,
                        mechanism = mechanism.name(),
                        status = e.status_name()
                    );
                    if remote_mask == 0 || candidates.len() == 1 {
                        return Err(BusError::AuthFail);
                    }
                    candidates.retain(|c| c & suite != suite);
                    if auth_version(state.auth_version()) < CONVERSATION_V4 {
                        state.transcript().await.initialize();
                    }
                }
            }
        }
    }

    async fn run_key_exchange(
        &self,
        remote: &str,
        state: &PeerState,
        kx: &mut KeyExchanger,
        remote_mask: &mut u32,
    ) -> BusResult<()> {
        let suite = kx.suite();
        let public = kx.generate_ecdhe();
        {
            let mut transcript = state.transcript().await;
            transcript.update_v1(&suite.to_be_bytes());
            transcript.update_v1(&[ECC_CURVE_ID]);
            transcript.update_v1(&public);
        }
        let call = self.control_call(
            remote,
            member::KEY_EXCHANGE,
            vec![MsgArg::U32(suite), MsgArg::variant(KeyExchanger::key_arg(&public))],
        );
        let reply = self.round_trip(&call, self.config.auth_timeout).await?;
        {
            let mut transcript = state.transcript().await;
            transcript.update_message(&call);
            transcript.update_message(&reply);
        }
        if let Some(status) = reply.reply_status() {
            return Err(status);
        }
        *remote_mask = reply.arg(0).and_then(MsgArg::as_u32).ok_or(BusError::InvalidData)?;
        let (curve, peer_key) = kx.read_peer_key(reply.arg(1).ok_or(BusError::InvalidData)?)?;
        {
            let mut transcript = state.transcript().await;
            transcript.update_v1(&remote_mask.to_be_bytes());
            transcript.update_v1(&[curve]);
            transcript.update_v1(&peer_key);
        }
        if *remote_mask != suite {
            return Err(BusError::AuthFail);
        }
        self.key_authentication(remote, state, kx).await
    }

    async fn key_authentication(&self, remote: &str, state: &PeerState, kx: &mut KeyExchanger) -> BusResult<()> {
        kx.generate_master_secret()?;
        let creds = self.request_kx_credentials(kx, remote).await;
        kx.accept_credentials(creds)?;

        let arg = {
            let mut transcript = state.transcript().await;
            if let Some((name, value)) = kx.psk() {
                transcript.update_v1(name);
                transcript.update_v1(value);
            }
            let verifier = kx.local_verifier(&transcript.digest());
            if kx.is_ecdsa() {
                let (arg, signed) = kx.signed_verifier_arg(&verifier)?;
                for part in signed.transcript_parts() {
                    transcript.update_v1(&part);
                }
                arg
            } else {
                transcript.update_v1(&verifier);
                kx.plain_verifier_arg(&verifier)
            }
        };

        let call = self.control_call(remote, member::KEY_AUTHENTICATION, vec![MsgArg::variant(arg)]);
        let reply = self.round_trip(&call, self.config.auth_timeout).await?;
        state.transcript().await.update_message(&call);
        if let Some(status) = reply.reply_status() {
            state.transcript().await.update_message(&reply);
            return Err(status);
        }
        let authorized = self.check_responder_verifier(remote, state, kx, &reply).await;
        state.transcript().await.update_message(&reply);
        if authorized? {
            Ok(())
        } else {
            Err(BusError::AuthFail)
        }
    }

    /// Validate the verifier the responder answered with.
    async fn check_responder_verifier(
        &self,
        remote: &str,
        state: &PeerState,
        kx: &mut KeyExchanger,
        reply: &Message,
    ) -> BusResult<bool> {
        let arg = reply.arg(0).ok_or(BusError::InvalidData)?;
        if kx.is_ecdsa() {
            let signed = KeyExchanger::parse_signed_verifier(arg)?;
            return self.check_signed(remote, state, kx, &signed).await;
        }
        let (peer_name, verifier) = kx.parse_plain_verifier(arg)?;
        let digest = state.transcript().await.digest();
        Ok(kx.matches_remote(&verifier, &digest, peer_name.as_deref()))
    }

    /// Signature, chain and listener checks for an ECDSA verifier. The
    /// expected verifier is taken before the signature parts are hashed.
    async fn check_signed(
        &self,
        remote: &str,
        state: &PeerState,
        kx: &mut KeyExchanger,
        signed: &SignedVerifier,
    ) -> BusResult<bool> {
        let expected = {
            let mut transcript = state.transcript().await;
            let expected = kx.remote_verifier(&transcript.digest(), None);
            for part in signed.transcript_parts() {
                transcript.update_v1(&part);
            }
            expected
        };
        let chain = match KeyExchanger::check_signed_verifier(signed, &expected)? {
            ChainCheck::Rejected => return Ok(false),
            ChainCheck::Candidate(chain) => chain,
        };
        let presented = Credentials::default().with_cert_chain(chain.clone());
        let accepted = self
            .listener
            .verify_credentials(kx.mechanism().name(), remote, &presented)
            .await;
        Ok(kx.accept_peer_chain(&chain, accepted))
    }

    async fn request_kx_credentials(&self, kx: &KeyExchanger, peer: &str) -> Option<Credentials> {
        let (mask, user) = kx.credential_request();
        self.listener
            .request_credentials(kx.mechanism().name(), peer, 1, &user, mask)
            .await
    }

    // =========================================================================
    // RESPONDER
    // =========================================================================

    /// `KeyExchange` handler; runs on the dispatcher.
    pub(crate) async fn respond_key_exchange(&self, call: &Message) -> Message {
        let sender = call.sender.as_str();
        let Some(mask) = call.arg(0).and_then(MsgArg::as_u32) else {
            return self.error(call, &BusError::InvalidData);
        };
        let supported = self.configured_suites().iter().any(|s| mask & s == mask);
        let mechanism = AuthMechanism::from_suite(mask).filter(|m| m.is_ecdhe());
        let (Some(mechanism), true) = (mechanism, supported) else {
            return self.error(call, &BusError::AuthFail);
        };
        let Some(state) = self.peers.get(sender) else {
            return self.error(call, &BusError::AuthFail);
        };
        let peer_version = auth_version(state.auth_version());
        let anchors = self.trust_anchors.read().clone();
        let mut kx = match KeyExchanger::new(mechanism, false, peer_version, anchors) {
            Ok(kx) => kx,
            Err(e) => {
                let reply = self.error(call, &e);
                state.transcript().await.update_message(&reply);
                return reply;
            }
        };

        let mut transcript = state.transcript().await;
        if peer_version < CONVERSATION_V4 {
            // Older peers start the transcript at KeyExchange.
            transcript.initialize();
        }
        transcript.update_v1(&mask.to_be_bytes());
        transcript.update_message(call);
        let result = call
            .arg(1)
            .ok_or(BusError::InvalidData)
            .and_then(|arg| kx.read_peer_key(arg).map_err(|_| BusError::InvalidData))
            .and_then(|(curve, peer_key)| {
                transcript.update_v1(&[curve]);
                transcript.update_v1(&peer_key);
                let public = kx.generate_ecdhe();
                kx.generate_master_secret()?;
                transcript.update_v1(&mask.to_be_bytes());
                transcript.update_v1(&[ECC_CURVE_ID]);
                transcript.update_v1(&public);
                Ok(public)
            });
        let reply = match result {
            Ok(public) => self.reply(
                call,
                vec![MsgArg::U32(mask), MsgArg::variant(KeyExchanger::key_arg(&public))],
            ),
            Err(e) => self.error(call, &e),
        };
        transcript.update_message(&reply);
        drop(transcript);
        if reply.reply_status().is_none() {
            self.key_ex_conversations.lock().insert(sender.to_string(), kx);
        }
        reply
    }

    /// `KeyAuthentication` handler; runs on the dispatcher.
    pub(crate) async fn respond_key_authentication(&self, call: &Message) -> Message {
        let sender = call.sender.as_str();
        let Some(state) = self.peers.get(sender) else {
            return self.error(call, &BusError::AuthFail);
        };
        let kx = self.key_ex_conversations.lock().remove(sender);
        let Some(mut kx) = kx else {
            self.listener.authentication_complete("Unknown", sender, false);
            let reply = self.error(call, &BusError::AuthFail);
            state.transcript().await.update_message(&reply);
            return reply;
        };
        let mechanism = kx.mechanism().name();

        let authorized = self.check_initiator_verifier(sender, &state, &mut kx, call).await;
        state.transcript().await.update_message(call);

        let stored = match authorized {
            Ok(true) => {
                let rights = AccessRights::for_conversation(true, true);
                state.set_rights(rights);
                state.guid().ok_or(BusError::NoPeerGuid).and_then(|guid| {
                    self.key_store.add_key(&guid, kx.master_secret_blob()?, rights)
                })
            }
            Ok(false) => Err(BusError::AuthFail),
            Err(e) => Err(e),
        };

        if stored.is_ok() {
            let mut transcript = state.transcript().await;
            let verifier = kx.local_verifier(&transcript.digest());
            let arg = if kx.is_ecdsa() {
                kx.signed_verifier_arg(&verifier).map(|(arg, _)| arg)
            } else {
                Ok(kx.plain_verifier_arg(&verifier))
            };
            if let Ok(arg) = arg {
                if let Some(identity) = kx.peer_identity() {
                    state.set_identity(
                        Some(identity.public_key.as_bytes().to_vec()),
                        identity.issuer_keys.iter().map(|k| k.as_bytes().to_vec()).collect(),
                    );
                }
                self.listener.authentication_complete(mechanism, sender, true);
                metric_inc!(AUTH_ATTEMPTS, &["responder", "success"]);
                let reply = self.reply(call, vec![MsgArg::variant(arg)]);
                transcript.update_message(&reply);
                return reply;
            }
        }

        log_peer_event!(warn, SUBSYSTEM_PEER_AUTH, "key authentication rejected", sender, mechanism = mechanism);
        self.listener.authentication_complete(mechanism, sender, false);
        metric_inc!(AUTH_ATTEMPTS, &["responder", "failure"]);
        let reply = self.error(call, &BusError::AuthFail);
        state.transcript().await.update_message(&reply);
        reply
    }

    /// Validate the initiator's verifier. Credentials are requested first so
    /// the PSK and the signing key are known.
    async fn check_initiator_verifier(
        &self,
        sender: &str,
        state: &PeerState,
        kx: &mut KeyExchanger,
        call: &Message,
    ) -> BusResult<bool> {
        let arg = call.arg(0).ok_or(BusError::InvalidData)?;
        if kx.is_ecdsa() {
            let signed = KeyExchanger::parse_signed_verifier(arg)?;
            let creds = self.request_kx_credentials(kx, sender).await;
            kx.accept_credentials(creds)?;
            return self.check_signed(sender, state, kx, &signed).await;
        }
        let (peer_name, verifier) = kx.parse_plain_verifier(arg)?;
        if let Some(name) = &peer_name {
            kx.set_psk_name(name);
        }
        let creds = self.request_kx_credentials(kx, sender).await;
        kx.accept_credentials(creds)?;
        let mut transcript = state.transcript().await;
        if let Some((name, value)) = kx.psk() {
            transcript.update_v1(name);
            transcript.update_v1(value);
        }
        let matches = kx.matches_remote(&verifier, &transcript.digest(), peer_name.as_deref());
        transcript.update_v1(&verifier);
        Ok(matches)
    }
}
