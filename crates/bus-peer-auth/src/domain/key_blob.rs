//! Tagged key material.
//!
//! A [`KeyBlob`] carries the bytes of a key together with the mechanism
//! that produced it, the role its holder played in that conversation and an
//! optional expiration. Master secrets, session keys and group keys all
//! travel as key blobs.

use std::time::{SystemTime, UNIX_EPOCH};

use bus_types::{BusError, BusResult};
use serde::{Deserialize, Serialize};
use zeroize::Zeroize;

use bus_crypto::MASTER_SECRET_LEN;

/// Tag carried by the process-wide group key.
pub const GROUP_KEY_TAG: &str = "GroupKey";

/// Tag carried by keys minted for a node talking to itself.
pub const SELF_KEY_TAG: &str = "SELF";

/// Expiration value meaning "never".
pub const NEVER_EXPIRES: u32 = u32::MAX;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum KeyKind {
    /// Symmetric AES key.
    Aes,
    /// Raw secret bytes.
    Generic,
    /// Master secret bundled with the peer's identity (ECDSA suite).
    PeerRecord,
}

/// Role of the key holder in the conversation that produced the key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum KeyRole {
    NoRole,
    Initiator,
    Responder,
}

impl KeyRole {
    /// The role of the other party.
    #[must_use]
    pub const fn anti_role(self) -> Self {
        match self {
            Self::NoRole => Self::NoRole,
            Self::Initiator => Self::Responder,
            Self::Responder => Self::Initiator,
        }
    }

    /// Byte mixed into message nonces.
    #[must_use]
    pub const fn as_byte(self) -> u8 {
        match self {
            Self::NoRole => 0,
            Self::Initiator => 1,
            Self::Responder => 2,
        }
    }
}

/// Milliseconds since the Unix epoch.
#[must_use]
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
        .unwrap_or(0)
}

#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyBlob {
    kind: KeyKind,
    data: Vec<u8>,
    tag: String,
    role: KeyRole,
    /// Expiration in epoch milliseconds; `None` never expires.
    expires_at_ms: Option<u64>,
}

impl KeyBlob {
    #[must_use]
    pub fn new(kind: KeyKind, data: Vec<u8>) -> Self {
        Self {
            kind,
            data,
            tag: String::new(),
            role: KeyRole::NoRole,
            expires_at_ms: None,
        }
    }

    /// Fresh random AES-128 key.
    #[must_use]
    pub fn random_aes() -> Self {
        Self::new(KeyKind::Aes, bus_crypto::random_bytes(bus_crypto::SESSION_KEY_LEN))
    }

    #[must_use]
    pub fn with_tag(mut self, tag: impl Into<String>, role: KeyRole) -> Self {
        self.set_tag(tag, role);
        self
    }

    pub fn set_tag(&mut self, tag: impl Into<String>, role: KeyRole) {
        self.tag = tag.into();
        self.role = role;
    }

    /// Expire `seconds` from now. [`NEVER_EXPIRES`] clears the expiration.
    pub fn set_expiration_secs(&mut self, seconds: u32) {
        self.expires_at_ms = if seconds == NEVER_EXPIRES {
            None
        } else {
            Some(now_ms().saturating_add(u64::from(seconds) * 1000))
        };
    }

    pub fn set_expiration_at(&mut self, epoch_ms: u64) {
        self.expires_at_ms = Some(epoch_ms);
    }

    #[must_use]
    pub fn has_expired(&self) -> bool {
        self.expires_at_ms.is_some_and(|at| now_ms() >= at)
    }

    #[must_use]
    pub fn expires_at_ms(&self) -> Option<u64> {
        self.expires_at_ms
    }

    #[must_use]
    pub fn kind(&self) -> KeyKind {
        self.kind
    }

    #[must_use]
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    #[must_use]
    pub fn tag(&self) -> &str {
        &self.tag
    }

    #[must_use]
    pub fn role(&self) -> KeyRole {
        self.role
    }

    /// Serialized form used by keyblob-exchanging peers and key stores.
    ///
    /// # Errors
    ///
    /// Returns `BusError::Marshal` if encoding fails.
    pub fn store(&self) -> BusResult<Vec<u8>> {
        bincode::serialize(self).map_err(|e| BusError::Marshal(e.to_string()))
    }

    /// # Errors
    ///
    /// Returns `BusError::CorruptKeyblob` for undecodable input.
    pub fn load(bytes: &[u8]) -> BusResult<Self> {
        bincode::deserialize(bytes).map_err(|_| BusError::CorruptKeyblob)
    }
}

impl Drop for KeyBlob {
    fn drop(&mut self) {
        self.data.zeroize();
    }
}

impl std::fmt::Debug for KeyBlob {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyBlob")
            .field("kind", &self.kind)
            .field("len", &self.data.len())
            .field("tag", &self.tag)
            .field("role", &self.role)
            .field("expires_at_ms", &self.expires_at_ms)
            .finish()
    }
}

// =============================================================================
// PEER SECRET RECORD
// =============================================================================

/// Master secret as stored per peer GUID, optionally with the identity the
/// peer proved when it was established.
#[derive(Clone, Serialize, Deserialize)]
pub struct PeerSecretRecord {
    pub master_secret: Vec<u8>,
    pub public_key: Option<Vec<u8>>,
    pub manifest_digest: Option<[u8; 32]>,
    pub issuer_keys: Vec<Vec<u8>>,
}

impl PeerSecretRecord {
    /// A record holding only a master secret.
    #[must_use]
    pub fn bare(master_secret: Vec<u8>) -> Self {
        Self {
            master_secret,
            public_key: None,
            manifest_digest: None,
            issuer_keys: Vec::new(),
        }
    }

    /// Bundle the record into a key blob. A record without identity is
    /// stored as the bare master secret.
    ///
    /// # Errors
    ///
    /// Returns `BusError::Marshal` if encoding fails.
    pub fn into_blob(self) -> BusResult<KeyBlob> {
        if self.public_key.is_none() {
            return Ok(KeyBlob::new(KeyKind::Generic, self.master_secret.clone()));
        }
        let bytes = bincode::serialize(&self).map_err(|e| BusError::Marshal(e.to_string()))?;
        Ok(KeyBlob::new(KeyKind::PeerRecord, bytes))
    }

    /// Split a stored blob back into its parts.
    ///
    /// # Errors
    ///
    /// Returns `BusError::InvalidData` for blobs of the wrong shape.
    pub fn from_blob(blob: &KeyBlob) -> BusResult<Self> {
        match blob.kind() {
            KeyKind::PeerRecord => {
                let record: Self =
                    bincode::deserialize(blob.data()).map_err(|_| BusError::InvalidData)?;
                if record.master_secret.len() != MASTER_SECRET_LEN {
                    return Err(BusError::InvalidData);
                }
                Ok(record)
            }
            _ if blob.data().is_empty() => Err(BusError::InvalidData),
            _ => Ok(Self::bare(blob.data().to_vec())),
        }
    }

    /// The master secret as a blob carrying `source`'s tag, role and
    /// expiration.
    #[must_use]
    pub fn master_blob(&self, source: &KeyBlob) -> KeyBlob {
        let mut blob = KeyBlob::new(KeyKind::Generic, self.master_secret.clone());
        blob.set_tag(source.tag(), source.role());
        blob.expires_at_ms = source.expires_at_ms();
        blob
    }
}

impl Drop for PeerSecretRecord {
    fn drop(&mut self) {
        self.master_secret.zeroize();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_anti_role() {
        assert_eq!(KeyRole::Initiator.anti_role(), KeyRole::Responder);
        assert_eq!(KeyRole::Responder.anti_role(), KeyRole::Initiator);
        assert_eq!(KeyRole::NoRole.anti_role(), KeyRole::NoRole);
    }

    #[test]
    fn test_expiration() {
        let mut blob = KeyBlob::random_aes();
        assert!(!blob.has_expired());
        blob.set_expiration_at(now_ms());
        assert!(blob.has_expired());
        blob.set_expiration_secs(NEVER_EXPIRES);
        assert!(!blob.has_expired());
        blob.set_expiration_secs(3600);
        assert!(!blob.has_expired());
    }

    #[test]
    fn test_store_and_load_keep_tag() {
        let blob = KeyBlob::random_aes().with_tag(GROUP_KEY_TAG, KeyRole::NoRole);
        let loaded = KeyBlob::load(&blob.store().unwrap()).unwrap();
        assert_eq!(loaded, blob);
        assert!(matches!(KeyBlob::load(&[0xFF]), Err(BusError::CorruptKeyblob)));
    }

    #[test]
    fn test_bare_master_secret_record() {
        let record = PeerSecretRecord::bare(vec![7; MASTER_SECRET_LEN]);
        let blob = record.into_blob().unwrap();
        assert_eq!(blob.kind(), KeyKind::Generic);
        let parsed = PeerSecretRecord::from_blob(&blob).unwrap();
        assert!(parsed.public_key.is_none());
        assert_eq!(parsed.master_secret, vec![7; MASTER_SECRET_LEN]);
    }

    #[test]
    fn test_identity_record_keeps_public_key() {
        let record = PeerSecretRecord {
            master_secret: vec![1; MASTER_SECRET_LEN],
            public_key: Some(vec![2; 33]),
            manifest_digest: Some([3; 32]),
            issuer_keys: vec![vec![4; 33]],
        };
        let blob = record.into_blob().unwrap();
        assert_eq!(blob.kind(), KeyKind::PeerRecord);
        let parsed = PeerSecretRecord::from_blob(&blob).unwrap();
        assert_eq!(parsed.public_key, Some(vec![2; 33]));
        assert_eq!(parsed.issuer_keys.len(), 1);
    }
}
