//! # SASL Engine
//!
//! Challenge/response conversations carried as text lines in
//! `AuthChallenge` calls, used with peers that predate suite negotiation
//! and for the SASL family of mechanisms.
//!
//! | Line                      | Sent by   | Meaning                              |
//! |---------------------------|-----------|--------------------------------------|
//! | `AUTH <mech> <data>`      | initiator | start a conversation                 |
//! | `DATA <data>`             | both      | next step of the mechanism           |
//! | `BEGIN`                   | initiator | responder proof accepted             |
//! | `OK <guid>`               | responder | conversation complete                |
//! | `REJECTED <mech...>`      | responder | mechanism or proof refused           |
//! | `ERROR [text]`            | both      | abort                                |
//!
//! `<data>` is a list of hex fields joined by `:`.
//!
//! ## Mechanism Steps
//!
//! | Mechanism        | AUTH data          | responder DATA      | initiator DATA |
//! |------------------|--------------------|---------------------|----------------|
//! | ANONYMOUS        | nonce              | nonce               | (none)         |
//! | EXTERNAL         | nonce              | nonce               | (none)         |
//! | ALLJOYN_SRP_KEYX | nonce              | salt, B, nonce      | A, proof       |
//! | ALLJOYN_SRP_LOGON| user, nonce        | salt, B, nonce      | A, proof       |
//!
//! SRP conversations end with a second responder `DATA` carrying its proof.
//! Every successful conversation yields a 48 byte master secret.

use std::fmt;

use bus_crypto::{
    constant_time_eq, prf, random_bytes, srp_verifier, SrpClient, SrpServer, MASTER_SECRET_LEN,
    SRP_SALT_LEN,
};
use bus_types::{BusError, BusResult, Guid128};
use zeroize::Zeroizing;

use super::credentials::{cred, Credentials};
use super::key_blob::NEVER_EXPIRES;
use super::suites::AuthMechanism;

const NONCE_LEN: usize = 28;
const PROOF_LEN: usize = 12;

/// Mechanisms the SASL engine runs.
pub const SASL_MECHANISMS: [AuthMechanism; 4] = [
    AuthMechanism::Anonymous,
    AuthMechanism::External,
    AuthMechanism::SrpKeyx,
    AuthMechanism::SrpLogon,
];

#[must_use]
pub fn is_sasl(mechanism: AuthMechanism) -> bool {
    SASL_MECHANISMS.contains(&mechanism)
}

// =============================================================================
// WIRE LINES
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SaslCommand {
    Auth { mechanism: String, data: String },
    Data(String),
    Begin,
    Ok(String),
    Rejected(Vec<String>),
    Error(String),
}

impl SaslCommand {
    /// # Errors
    ///
    /// Returns `BusError::InvalidData` for an unknown or malformed line.
    pub fn parse(line: &str) -> BusResult<Self> {
        let line = line.trim();
        let (verb, rest) = line.split_once(' ').unwrap_or((line, ""));
        let rest = rest.trim();
        match verb {
            "AUTH" => {
                let (mechanism, data) = rest.split_once(' ').unwrap_or((rest, ""));
                if mechanism.is_empty() {
                    return Err(BusError::InvalidData);
                }
                Ok(Self::Auth {
                    mechanism: mechanism.to_string(),
                    data: data.trim().to_string(),
                })
            }
            "DATA" => Ok(Self::Data(rest.to_string())),
            "BEGIN" => Ok(Self::Begin),
            "OK" => Ok(Self::Ok(rest.to_string())),
            "REJECTED" => Ok(Self::Rejected(rest.split_whitespace().map(str::to_string).collect())),
            "ERROR" => Ok(Self::Error(rest.to_string())),
            _ => Err(BusError::InvalidData),
        }
    }
}

impl fmt::Display for SaslCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Auth { mechanism, data } if data.is_empty() => write!(f, "AUTH {mechanism}"),
            Self::Auth { mechanism, data } => write!(f, "AUTH {mechanism} {data}"),
            Self::Data(data) => write!(f, "DATA {data}"),
            Self::Begin => f.write_str("BEGIN"),
            Self::Ok(guid) => write!(f, "OK {guid}"),
            Self::Rejected(mechs) => write!(f, "REJECTED {}", mechs.join(" ")),
            Self::Error(text) => write!(f, "ERROR {text}"),
        }
    }
}

/// Hex encode `fields` and join them with `:`.
#[must_use]
pub fn join_fields(fields: &[&[u8]]) -> String {
    fields.iter().map(hex::encode).collect::<Vec<_>>().join(":")
}

/// Split `data` into exactly `count` hex fields.
///
/// # Errors
///
/// Returns `BusError::InvalidData` on a wrong count or bad hex.
pub fn split_fields(data: &str, count: usize) -> BusResult<Vec<Vec<u8>>> {
    let fields = data
        .split(':')
        .map(|f| hex::decode(f).map_err(|_| BusError::InvalidData))
        .collect::<BusResult<Vec<_>>>()?;
    if fields.len() != count {
        return Err(BusError::InvalidData);
    }
    Ok(fields)
}

fn derive_master(premaster: &[u8], nonce_i: &[u8], nonce_r: &[u8]) -> Zeroizing<Vec<u8>> {
    let mut seed = nonce_i.to_vec();
    seed.extend_from_slice(nonce_r);
    Zeroizing::new(prf(premaster, "master secret", &seed, MASTER_SECRET_LEN))
}

fn proof(master: &[u8], label: &str, a: &[u8], b: &[u8]) -> Vec<u8> {
    let mut seed = a.to_vec();
    seed.extend_from_slice(b);
    prf(master, label, &seed, PROOF_LEN)
}

fn is_srp(mechanism: AuthMechanism) -> bool {
    matches!(mechanism, AuthMechanism::SrpKeyx | AuthMechanism::SrpLogon)
}

// =============================================================================
// INITIATOR
// =============================================================================

/// What the initiator does after a responder line.
#[derive(Debug, PartialEq, Eq)]
pub enum InitiatorStep {
    Send(SaslCommand),
    /// Responder confirmed; the master secret is ready.
    Complete,
}

enum InitiatorState {
    Start,
    AwaitChallenge,
    AwaitProof { expected: Vec<u8> },
    AwaitOk,
    Done,
}

/// Client half of one SASL conversation.
pub struct SaslInitiator {
    mechanism: AuthMechanism,
    state: InitiatorState,
    nonce: Vec<u8>,
    user: String,
    password: Zeroizing<String>,
    client: Option<SrpClient>,
    master: Zeroizing<Vec<u8>>,
    expiration: u32,
}

impl SaslInitiator {
    /// # Errors
    ///
    /// Returns `BusError::AuthFail` for mechanisms the engine does not run.
    pub fn new(mechanism: AuthMechanism) -> BusResult<Self> {
        if !is_sasl(mechanism) {
            return Err(BusError::AuthFail);
        }
        Ok(Self {
            mechanism,
            state: InitiatorState::Start,
            nonce: random_bytes(NONCE_LEN),
            user: String::new(),
            password: Zeroizing::new(String::new()),
            client: None,
            master: Zeroizing::new(Vec::new()),
            expiration: NEVER_EXPIRES,
        })
    }

    #[must_use]
    pub fn mechanism(&self) -> AuthMechanism {
        self.mechanism
    }

    /// Mask for the credential request, `None` when no credentials are used.
    #[must_use]
    pub fn credential_request(&self) -> Option<u16> {
        match self.mechanism {
            AuthMechanism::SrpKeyx => Some(cred::PASSWORD),
            AuthMechanism::SrpLogon => Some(cred::USER_NAME | cred::PASSWORD),
            _ => None,
        }
    }

    /// Opening `AUTH` line.
    ///
    /// # Errors
    ///
    /// `AuthUserReject` when SRP credentials were declined, `AuthFail` when
    /// a password or user name is missing.
    pub fn initial(&mut self, creds: Option<Credentials>) -> BusResult<SaslCommand> {
        if is_srp(self.mechanism) {
            let creds = creds.ok_or(BusError::AuthUserReject)?;
            self.password = Zeroizing::new(creds.password().ok_or(BusError::AuthFail)?.to_string());
            if self.mechanism == AuthMechanism::SrpLogon {
                self.user = creds.user_name.clone().ok_or(BusError::AuthFail)?;
            }
            if let Some(expiration) = creds.expiration {
                self.expiration = expiration;
            }
            self.client = Some(SrpClient::new());
        }
        self.state = InitiatorState::AwaitChallenge;
        let data = if self.mechanism == AuthMechanism::SrpLogon {
            join_fields(&[self.user.as_bytes(), &self.nonce])
        } else {
            join_fields(&[&self.nonce])
        };
        Ok(SaslCommand::Auth {
            mechanism: self.mechanism.name().to_string(),
            data,
        })
    }

    /// Consume a responder line.
    ///
    /// # Errors
    ///
    /// `AuthFail` on `REJECTED`, `ERROR`, a proof mismatch or a line out of
    /// sequence; `InvalidData` for malformed data.
    pub fn advance(&mut self, reply: SaslCommand) -> BusResult<InitiatorStep> {
        let state = std::mem::replace(&mut self.state, InitiatorState::Done);
        match (state, reply) {
            (InitiatorState::AwaitChallenge, SaslCommand::Data(data)) if is_srp(self.mechanism) => {
                let fields = split_fields(&data, 3)?;
                let (salt, server_public, nonce_r) = (&fields[0], &fields[1], &fields[2]);
                let client = self.client.as_ref().ok_or(BusError::AuthFail)?;
                let premaster = Zeroizing::new(
                    client.premaster_secret(&self.user, &self.password, salt, server_public)?,
                );
                self.master = derive_master(&premaster, &self.nonce, nonce_r);
                let client_public = client.public_bytes();
                let local = proof(&self.master, "client finished", &client_public, server_public);
                let expected = proof(&self.master, "server finished", server_public, &client_public);
                self.state = InitiatorState::AwaitProof { expected };
                Ok(InitiatorStep::Send(SaslCommand::Data(join_fields(&[&client_public, &local]))))
            }
            (InitiatorState::AwaitChallenge, SaslCommand::Data(data)) => {
                let fields = split_fields(&data, 1)?;
                self.master = derive_master(self.mechanism.name().as_bytes(), &self.nonce, &fields[0]);
                self.state = InitiatorState::AwaitOk;
                Ok(InitiatorStep::Send(SaslCommand::Begin))
            }
            (InitiatorState::AwaitProof { expected }, SaslCommand::Data(data)) => {
                let fields = split_fields(&data, 1)?;
                if !constant_time_eq(&fields[0], &expected) {
                    return Err(BusError::AuthFail);
                }
                self.state = InitiatorState::AwaitOk;
                Ok(InitiatorStep::Send(SaslCommand::Begin))
            }
            (InitiatorState::AwaitOk, SaslCommand::Ok(_)) => Ok(InitiatorStep::Complete),
            _ => Err(BusError::AuthFail),
        }
    }

    #[must_use]
    pub fn master_secret(&self) -> &[u8] {
        &self.master
    }

    /// Lifetime in seconds of the master secret.
    #[must_use]
    pub fn expiration(&self) -> u32 {
        self.expiration
    }

    /// Whether both sides proved knowledge of the secret.
    #[must_use]
    pub fn is_mutual(&self) -> bool {
        is_srp(self.mechanism)
    }
}

// =============================================================================
// RESPONDER
// =============================================================================

/// What the responder answers to an initiator line.
#[derive(Debug, PartialEq, Eq)]
pub enum ResponderStep {
    Reply(SaslCommand),
    /// Conversation succeeded; reply with this line and store the secret.
    Complete(SaslCommand),
}

enum ResponderState {
    AwaitCredentials,
    AwaitResponse { server: Option<SrpServer>, server_public: Vec<u8> },
    AwaitBegin,
    Done,
}

/// Server half of one SASL conversation, created from the `AUTH` line.
pub struct SaslResponder {
    mechanism: AuthMechanism,
    state: ResponderState,
    peer_nonce: Vec<u8>,
    nonce: Vec<u8>,
    user: String,
    master: Zeroizing<Vec<u8>>,
    expiration: u32,
}

impl SaslResponder {
    /// # Errors
    ///
    /// `AuthFail` for mechanisms the engine does not run, `InvalidData` for
    /// malformed `AUTH` data.
    pub fn new(mechanism: AuthMechanism, auth_data: &str) -> BusResult<Self> {
        if !is_sasl(mechanism) {
            return Err(BusError::AuthFail);
        }
        let (user, peer_nonce) = if mechanism == AuthMechanism::SrpLogon {
            let mut fields = split_fields(auth_data, 2)?;
            let nonce = fields.pop().unwrap_or_default();
            let user = String::from_utf8(fields.pop().unwrap_or_default()).map_err(|_| BusError::InvalidData)?;
            (user, nonce)
        } else {
            (String::new(), split_fields(auth_data, 1)?.remove(0))
        };
        Ok(Self {
            mechanism,
            state: ResponderState::AwaitCredentials,
            peer_nonce,
            nonce: random_bytes(NONCE_LEN),
            user,
            master: Zeroizing::new(Vec::new()),
            expiration: NEVER_EXPIRES,
        })
    }

    #[must_use]
    pub fn mechanism(&self) -> AuthMechanism {
        self.mechanism
    }

    /// User name the initiator presented (SRP_LOGON).
    #[must_use]
    pub fn user_name(&self) -> &str {
        &self.user
    }

    /// Mask for the credential request, `None` when no credentials are used.
    #[must_use]
    pub fn credential_request(&self) -> Option<u16> {
        match self.mechanism {
            AuthMechanism::SrpKeyx => Some(cred::PASSWORD),
            AuthMechanism::SrpLogon => Some(cred::PASSWORD | cred::LOGON_ENTRY),
            _ => None,
        }
    }

    /// Answer to the `AUTH` line.
    ///
    /// # Errors
    ///
    /// `AuthUserReject` when SRP credentials were declined, `AuthFail` when
    /// they carry neither a password nor a usable logon entry.
    pub fn challenge(&mut self, creds: Option<Credentials>) -> BusResult<SaslCommand> {
        if !is_srp(self.mechanism) {
            self.master = derive_master(self.mechanism.name().as_bytes(), &self.peer_nonce, &self.nonce);
            self.state = ResponderState::AwaitBegin;
            return Ok(SaslCommand::Data(join_fields(&[&self.nonce])));
        }
        let creds = creds.ok_or(BusError::AuthUserReject)?;
        if let Some(expiration) = creds.expiration {
            self.expiration = expiration;
        }
        let (salt, server) = match (creds.password(), creds.logon_entry.as_deref()) {
            (Some(password), _) => {
                let salt = random_bytes(SRP_SALT_LEN);
                let verifier = srp_verifier(&self.user, password, &salt);
                (salt, SrpServer::from_verifier(&verifier)?)
            }
            (None, Some(entry)) => {
                let fields = split_fields(entry, 2).map_err(|_| BusError::AuthFail)?;
                (fields[0].clone(), SrpServer::from_verifier(&fields[1])?)
            }
            (None, None) => return Err(BusError::AuthFail),
        };
        let server_public = server.public_bytes();
        let reply = SaslCommand::Data(join_fields(&[&salt, &server_public, &self.nonce]));
        self.state = ResponderState::AwaitResponse {
            server: Some(server),
            server_public,
        };
        Ok(reply)
    }

    /// Consume the next initiator line.
    ///
    /// # Errors
    ///
    /// `AuthFail` on a proof mismatch, `ERROR` or a line out of sequence;
    /// `InvalidData` for malformed data.
    pub fn advance(&mut self, line: SaslCommand, local_guid: &Guid128) -> BusResult<ResponderStep> {
        let state = std::mem::replace(&mut self.state, ResponderState::Done);
        match (state, line) {
            (ResponderState::AwaitResponse { server, server_public }, SaslCommand::Data(data)) => {
                let fields = split_fields(&data, 2)?;
                let (client_public, received) = (&fields[0], &fields[1]);
                let server = server.ok_or(BusError::AuthFail)?;
                let premaster = Zeroizing::new(server.premaster_secret(client_public)?);
                self.master = derive_master(&premaster, &self.peer_nonce, &self.nonce);
                let expected = proof(&self.master, "client finished", client_public, &server_public);
                if !constant_time_eq(received, &expected) {
                    return Err(BusError::AuthFail);
                }
                let local = proof(&self.master, "server finished", &server_public, client_public);
                self.state = ResponderState::AwaitBegin;
                Ok(ResponderStep::Reply(SaslCommand::Data(join_fields(&[&local]))))
            }
            (ResponderState::AwaitBegin, SaslCommand::Begin) => {
                Ok(ResponderStep::Complete(SaslCommand::Ok(local_guid.to_hex())))
            }
            _ => Err(BusError::AuthFail),
        }
    }

    #[must_use]
    pub fn master_secret(&self) -> &[u8] {
        &self.master
    }

    /// Lifetime in seconds of the master secret.
    #[must_use]
    pub fn expiration(&self) -> u32 {
        self.expiration
    }

    #[must_use]
    pub fn is_mutual(&self) -> bool {
        is_srp(self.mechanism)
    }
}
