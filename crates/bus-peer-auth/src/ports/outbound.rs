//! # Driven Ports (Outbound SPI)
//!
//! Collaborators the authentication engine depends on.
//!
//! | Port            | Sync  | Supplied by                           |
//! |-----------------|-------|---------------------------------------|
//! | `KeyStore`      | yes   | `MemoryKeyStore`, `FileKeyStore`      |
//! | `PeerTransport` | async | the node (`LoopbackBus` in tests)     |
//! | `AuthListener`  | async | the application                       |
//! | `DeliveryPort`  | yes   | the node's router                     |

use std::time::Duration;

use async_trait::async_trait;
use bus_types::{BusError, BusResult, Guid128, Message};

use crate::domain::{AccessRights, Credentials, KeyBlob};

/// Persistent master secrets keyed by peer GUID.
///
/// Implementations synchronize internally; every method may be called from
/// many tasks at once.
pub trait KeyStore: Send + Sync {
    /// GUID of this node, stable across restarts of a persistent store.
    fn guid(&self) -> Guid128;

    /// # Errors
    ///
    /// Returns `BusError::KeyUnavailable` when no key is stored for `guid`.
    fn get_key(&self, guid: &Guid128) -> BusResult<(KeyBlob, AccessRights)>;

    fn has_key(&self, guid: &Guid128) -> bool;

    /// # Errors
    ///
    /// Returns `BusError::KeyStore` if the store cannot accept the key.
    fn add_key(&self, guid: &Guid128, blob: KeyBlob, rights: AccessRights) -> BusResult<()>;

    /// # Errors
    ///
    /// Returns `BusError::KeyUnavailable` when no key is stored for `guid`.
    fn del_key(&self, guid: &Guid128) -> BusResult<()>;

    /// # Errors
    ///
    /// Returns `BusError::KeyUnavailable` when no key is stored for `guid`.
    fn set_key_expiration(&self, guid: &Guid128, expires_at_ms: u64) -> BusResult<()>;

    /// Pick up changes written by other users of a shared store.
    ///
    /// # Errors
    ///
    /// Returns `BusError::KeyStore` if the backing storage cannot be read.
    fn reload(&self) -> BusResult<()>;

    /// True when other processes may write the same store.
    fn is_shared(&self) -> bool;

    /// Persist pending changes.
    ///
    /// # Errors
    ///
    /// Returns `BusError::KeyStore` if the backing storage cannot be written.
    fn store(&self) -> BusResult<()>;

    fn clear(&self);
}

/// Error name a transport returns for calls to names nobody owns.
pub const SERVICE_UNKNOWN: &str = "org.freedesktop.DBus.Error.ServiceUnknown";

/// Method calls to remote peers.
#[async_trait]
pub trait PeerTransport: Send + Sync {
    /// Send `call` and wait up to `timeout` for the reply.
    ///
    /// Error replies are returned as `Ok`; callers inspect
    /// [`Message::reply_status`].
    ///
    /// # Errors
    ///
    /// `Timeout` when no reply arrives in time, or a delivery status when the
    /// call could not be sent at all.
    async fn method_call(&self, call: Message, timeout: Duration) -> BusResult<Message>;
}

/// Application callbacks.
///
/// Credential requests may take arbitrarily long (interactive prompts); the
/// engine only ever awaits them on its dispatcher workers.
#[async_trait]
pub trait AuthListener: Send + Sync {
    /// Supply credentials for `mechanism` with `peer`. `None` declines.
    ///
    /// `attempt` counts from 1. `mask` is a set of [`cred`](crate::domain::cred) bits.
    async fn request_credentials(
        &self,
        mechanism: &str,
        peer: &str,
        attempt: u16,
        user_name: &str,
        mask: u16,
    ) -> Option<Credentials>;

    /// Accept or reject credentials the peer presented.
    async fn verify_credentials(&self, mechanism: &str, peer: &str, credentials: &Credentials) -> bool {
        let _ = (mechanism, peer, credentials);
        false
    }

    /// A message failed a security check.
    fn security_violation(&self, status: &BusError, msg: &Message) {
        let _ = (status, msg);
    }

    fn authentication_complete(&self, mechanism: &str, peer: &str, success: bool) {
        let _ = (mechanism, peer, success);
    }
}

/// Hands messages back to the routing layer.
pub trait DeliveryPort: Send + Sync {
    /// Route a message (replayed or synthesized) through the router.
    ///
    /// # Errors
    ///
    /// Any routing status.
    fn route(&self, msg: &Message) -> BusResult<()>;

    /// Deliver to this node's own endpoint.
    fn deliver_local(&self, msg: &Message);
}
