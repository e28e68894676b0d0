//! SASL conversations carried one line per `AuthChallenge` call.
//!
//! The initiator retries up to `max_auth_attempts` times; each attempt asks
//! the listener for fresh credentials. The responder keeps one
//! [`SaslResponder`] per sender between calls.

use bus_telemetry::{log_peer_event, metric_inc, AUTH_ATTEMPTS, SUBSYSTEM_PEER_AUTH};
use bus_types::{BusError, BusResult, Guid128, Message, MsgArg};

use super::core::PeerAuthEngine;
use crate::domain::sasl::is_sasl;
use crate::domain::{
    AccessRights, AuthMechanism, InitiatorStep, KeyRole, PeerSecretRecord, PeerState, ResponderStep,
    SaslCommand, SaslInitiator, SaslResponder,
};
use crate::ports::member;

/// How one initiator attempt ended.
enum SaslAttempt {
    Complete(SaslInitiator),
    /// The peer refused the mechanism and listed the ones it accepts.
    Rejected(Vec<String>),
}

impl PeerAuthEngine {
    /// Configured SASL mechanisms, heaviest first.
    fn sasl_mechanisms(&self) -> Vec<AuthMechanism> {
        let mut mechanisms: Vec<_> = self.config.mechanisms.iter().copied().filter(|m| is_sasl(*m)).collect();
        mechanisms.sort_by_key(|m| std::cmp::Reverse(m.weight()));
        mechanisms
    }

    /// Record a SASL master secret for `guid`.
    fn record_sasl_secret(
        &self,
        guid: &Guid128,
        mechanism: AuthMechanism,
        master: &[u8],
        expiration: u32,
        role: KeyRole,
        rights: AccessRights,
    ) -> BusResult<()> {
        let mut blob = PeerSecretRecord::bare(master.to_vec()).into_blob()?;
        blob.set_expiration_secs(expiration);
        blob.set_tag(mechanism.name(), role);
        self.key_store.add_key(guid, blob, rights)
    }

    // =========================================================================
    // INITIATOR
    // =========================================================================

    /// Run a SASL conversation with `remote`. Returns the mechanism name.
    ///
    /// A `REJECTED` reply moves on to the next configured mechanism the peer
    /// listed without spending a credential attempt.
    pub(crate) async fn sasl_exchange(&self, remote: &str, state: &PeerState, guid: &Guid128) -> BusResult<String> {
        let mut candidates = self.sasl_mechanisms();
        if candidates.is_empty() {
            return Err(BusError::AuthFail);
        }
        let mut mechanism = candidates.remove(0);
        let mut status = BusError::AuthFail;
        let mut attempt = 1;
        while attempt <= self.config.max_auth_attempts {
            match self.sasl_attempt(remote, mechanism, attempt).await {
                Ok(SaslAttempt::Complete(sasl)) => {
                    let rights = AccessRights::for_conversation(sasl.is_mutual(), false);
                    state.set_rights(rights);
                    self.record_sasl_secret(
                        guid,
                        mechanism,
                        sasl.master_secret(),
                        sasl.expiration(),
                        KeyRole::Initiator,
                        rights,
                    )?;
                    return Ok(mechanism.name().to_string());
                }
                Ok(SaslAttempt::Rejected(offered)) => {
                    log_peer_event!(
                        debug,
                        SUBSYSTEM_PEER_AUTH,
                        "sasl mechanism rejected",
                        remote,
                        mechanism = mechanism.name(),
                        offered = %offered.join(" ")
                    );
                    candidates.retain(|m| offered.iter().any(|name| name == m.name()));
                    if candidates.is_empty() {
                        return Err(BusError::AuthFail);
                    }
                    mechanism = candidates.remove(0);
                }
                Err(e) => {
                    log_peer_event!(
                        debug,
                        SUBSYSTEM_PEER_AUTH,
                        "sasl attempt failed",
                        remote,
                        mechanism = mechanism.name(),
                        attempt = attempt,
                        status = e.status_name()
                    );
                    // Declined credentials and dead transports end the conversation.
                    if matches!(e, BusError::AuthUserReject | BusError::Timeout | BusError::NoSuchObject) {
                        return Err(e);
                    }
                    status = e;
                    attempt += 1;
                }
            }
        }
        Err(status)
    }

    async fn sasl_attempt(&self, remote: &str, mechanism: AuthMechanism, attempt: u16) -> BusResult<SaslAttempt> {
        let mut sasl = SaslInitiator::new(mechanism)?;
        let creds = match sasl.credential_request() {
            Some(mask) => {
                self.listener
                    .request_credentials(mechanism.name(), remote, attempt, "", mask)
                    .await
            }
            None => None,
        };
        let mut line = sasl.initial(creds)?;
        loop {
            let call = self.control_call(remote, member::AUTH_CHALLENGE, vec![MsgArg::Str(line.to_string())]);
            let reply = self.round_trip(&call, self.config.auth_timeout).await?;
            if let Some(status) = reply.reply_status() {
                return Err(status);
            }
            let text = reply.arg(0).and_then(MsgArg::as_str).ok_or(BusError::InvalidData)?;
            match SaslCommand::parse(text)? {
                SaslCommand::Rejected(offered) => return Ok(SaslAttempt::Rejected(offered)),
                command => match sasl.advance(command)? {
                    InitiatorStep::Send(next) => line = next,
                    InitiatorStep::Complete => return Ok(SaslAttempt::Complete(sasl)),
                },
            }
        }
    }

    // =========================================================================
    // RESPONDER
    // =========================================================================

    /// `AuthChallenge` handler; runs on the dispatcher.
    pub(crate) async fn respond_auth_challenge(&self, call: &Message) -> Message {
        let sender = call.sender.as_str();
        let command = match call.arg(0).and_then(MsgArg::as_str).map(SaslCommand::parse) {
            Some(Ok(command)) => command,
            _ => return self.error(call, &BusError::InvalidData),
        };
        let Some(state) = self.peers.get(sender) else {
            return self.error(call, &BusError::AuthFail);
        };

        if let SaslCommand::Auth { mechanism, data } = command {
            let offered = AuthMechanism::from_name(&mechanism).filter(|m| self.sasl_mechanisms().contains(m));
            let Some(mechanism) = offered else {
                let names = self.sasl_mechanisms().iter().map(|m| m.name().to_string()).collect();
                return self.reply(call, vec![MsgArg::Str(SaslCommand::Rejected(names).to_string())]);
            };
            return match self.sasl_challenge(sender, mechanism, &data).await {
                Ok((responder, line)) => {
                    self.sasl_conversations.lock().insert(sender.to_string(), responder);
                    self.reply(call, vec![MsgArg::Str(line.to_string())])
                }
                Err(e) => self.sasl_failed(call, mechanism, &e),
            };
        }

        let responder = self.sasl_conversations.lock().remove(sender);
        let Some(mut responder) = responder else {
            return self.error(call, &BusError::AuthFail);
        };
        let mechanism = responder.mechanism();
        match responder.advance(command, &self.key_store.guid()) {
            Ok(ResponderStep::Reply(line)) => {
                self.sasl_conversations.lock().insert(sender.to_string(), responder);
                self.reply(call, vec![MsgArg::Str(line.to_string())])
            }
            Ok(ResponderStep::Complete(line)) => {
                let rights = AccessRights::for_conversation(responder.is_mutual(), true);
                state.set_rights(rights);
                let recorded = state.guid().ok_or(BusError::NoPeerGuid).and_then(|guid| {
                    self.record_sasl_secret(
                        &guid,
                        mechanism,
                        responder.master_secret(),
                        responder.expiration(),
                        KeyRole::Responder,
                        rights,
                    )
                });
                match recorded {
                    Ok(()) => {
                        self.listener.authentication_complete(mechanism.name(), sender, true);
                        metric_inc!(AUTH_ATTEMPTS, &["responder", "success"]);
                        self.reply(call, vec![MsgArg::Str(line.to_string())])
                    }
                    Err(e) => self.sasl_failed(call, mechanism, &e),
                }
            }
            Err(e) => self.sasl_failed(call, mechanism, &e),
        }
    }

    async fn sasl_challenge(
        &self,
        sender: &str,
        mechanism: AuthMechanism,
        data: &str,
    ) -> BusResult<(SaslResponder, SaslCommand)> {
        let mut responder = SaslResponder::new(mechanism, data)?;
        let creds = match responder.credential_request() {
            Some(mask) => {
                self.listener
                    .request_credentials(mechanism.name(), sender, 1, responder.user_name(), mask)
                    .await
            }
            None => None,
        };
        let line = responder.challenge(creds)?;
        Ok((responder, line))
    }

    fn sasl_failed(&self, call: &Message, mechanism: AuthMechanism, status: &BusError) -> Message {
        log_peer_event!(
            warn,
            SUBSYSTEM_PEER_AUTH,
            "sasl conversation rejected",
            &call.sender,
            mechanism = mechanism.name(),
            status = status.status_name()
        );
        self.listener.authentication_complete(mechanism.name(), &call.sender, false);
        metric_inc!(AUTH_ATTEMPTS, &["responder", "failure"]);
        self.error(call, status)
    }
}
