//! # Driving Ports (Inbound API)
//!
//! What the node and remote peers call on the authentication engine.

use async_trait::async_trait;
use bus_types::{BusError, BusResult, Message, MessageType};

/// Interface of the peer-to-peer control object.
pub const PEER_INTERFACE: &str = "org.alljoyn.Bus.Peer.Authentication";

/// Object path of the peer-to-peer control object.
pub const PEER_OBJECT_PATH: &str = "/org/alljoyn/Bus/Peer";

/// Members of [`PEER_INTERFACE`].
pub mod member {
    pub const EXCHANGE_GUIDS: &str = "ExchangeGuids";
    pub const EXCHANGE_SUITES: &str = "ExchangeSuites";
    pub const KEY_EXCHANGE: &str = "KeyExchange";
    pub const KEY_AUTHENTICATION: &str = "KeyAuthentication";
    pub const GEN_SESSION_KEY: &str = "GenSessionKey";
    pub const EXCHANGE_GROUP_KEYS: &str = "ExchangeGroupKeys";
    pub const AUTH_CHALLENGE: &str = "AuthChallenge";
    pub const SEND_MANIFEST: &str = "SendManifest";
    pub const SEND_MEMBERSHIPS: &str = "SendMemberships";
}

/// Handler side of the control interface, called for every method call a
/// remote peer addresses to [`PEER_OBJECT_PATH`].
#[async_trait]
pub trait PeerControlInbound: Send + Sync {
    /// Answer `call` with a method return or an error reply.
    async fn handle_control_call(&self, call: Message) -> Message;
}

/// Security API used by the node.
#[async_trait]
pub trait PeerSecurity: Send + Sync {
    /// Authenticate with `peer` unless already secure.
    ///
    /// With `wait` false a conversation already in flight yields
    /// `WouldBlock` instead of waiting for it.
    ///
    /// # Errors
    ///
    /// The conversation's failure status.
    async fn authenticate_peer(&self, msg_type: MessageType, peer: &str, wait: bool) -> BusResult<()>;

    /// Authenticate synchronously; `force` discards existing keys first.
    ///
    /// # Errors
    ///
    /// The conversation's failure status.
    async fn secure_connection(&self, peer: &str, force: bool) -> BusResult<()>;

    /// Queue `msg` until its destination is authenticated.
    fn request_authentication(&self, msg: Message);

    /// Seal the body of a message flagged for encryption.
    ///
    /// # Errors
    ///
    /// `WouldBlock` when the message was queued pending authentication,
    /// `PermissionDenied` when rights forbid sending it.
    fn encrypt_message(&self, msg: &mut Message) -> BusResult<()>;

    /// Open the body of an encrypted message.
    ///
    /// # Errors
    ///
    /// `MessageDecryptionFailed`, `PermissionDenied` or `InvalidData` for a
    /// replayed serial.
    fn decrypt_message(&self, msg: &mut Message) -> BusResult<()>;

    fn handle_security_violation(&self, msg: &Message, status: &BusError);

    fn name_owner_changed(&self, name: &str, old_owner: Option<&str>, new_owner: Option<&str>);
}
