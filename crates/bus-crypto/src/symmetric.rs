//! # Message Encryption (AES-128-GCM)
//!
//! Session keys protect message bodies between authenticated peers.
//!
//! ## Nonce Layout
//!
//! | Bytes | Content                          |
//! |-------|----------------------------------|
//! | 0     | Role of the encrypting side      |
//! | 1..5  | Message serial, big-endian       |
//! | 5..12 | Random extension                 |
//!
//! The random extension is appended to the ciphertext so the receiver can
//! rebuild the nonce. The receiver uses the sender's role, the opposite of
//! its own.

use aes_gcm::aead::{Aead, KeyInit, Payload};
use aes_gcm::{Aes128Gcm, Nonce};
use zeroize::Zeroizing;

use crate::random::random_bytes;
use crate::CryptoError;

/// AES-128 key length.
pub const SESSION_KEY_LEN: usize = 16;

/// Full GCM nonce length.
pub const NONCE_LEN: usize = 12;

/// Random nonce suffix appended to each ciphertext.
pub const NONCE_EXTENSION_LEN: usize = 7;

/// GCM authentication tag length.
pub const TAG_LEN: usize = 16;

/// Symmetric session key.
#[derive(Clone)]
pub struct SessionKey {
    key: Zeroizing<[u8; SESSION_KEY_LEN]>,
}

impl SessionKey {
    /// Wrap raw key material.
    ///
    /// # Errors
    ///
    /// Returns `CryptoError::InvalidKeyLength` unless exactly 16 bytes are given.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CryptoError> {
        let key: [u8; SESSION_KEY_LEN] =
            bytes.try_into().map_err(|_| CryptoError::InvalidKeyLength {
                expected: SESSION_KEY_LEN,
                actual: bytes.len(),
            })?;
        Ok(Self {
            key: Zeroizing::new(key),
        })
    }

    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.key[..]
    }

    /// Encrypt `plaintext` bound to `aad`.
    ///
    /// # Errors
    ///
    /// Returns `CryptoError::EncryptionFailed` if the cipher rejects the input.
    pub fn seal(
        &self,
        role: u8,
        serial: u32,
        aad: &[u8],
        plaintext: &[u8],
    ) -> Result<Vec<u8>, CryptoError> {
        let extension = random_bytes(NONCE_EXTENSION_LEN);
        let nonce = build_nonce(role, serial, &extension);
        let cipher = self.cipher()?;
        let mut sealed = cipher
            .encrypt(
                Nonce::from_slice(&nonce),
                Payload {
                    msg: plaintext,
                    aad,
                },
            )
            .map_err(|e| CryptoError::EncryptionFailed(e.to_string()))?;
        sealed.extend_from_slice(&extension);
        Ok(sealed)
    }

    /// Decrypt output of [`SessionKey::seal`]; `role` is the sender's role.
    ///
    /// # Errors
    ///
    /// Returns `CryptoError::DecryptionFailed` on truncation or tag mismatch.
    pub fn open(
        &self,
        role: u8,
        serial: u32,
        aad: &[u8],
        sealed: &[u8],
    ) -> Result<Vec<u8>, CryptoError> {
        if sealed.len() < TAG_LEN + NONCE_EXTENSION_LEN {
            return Err(CryptoError::DecryptionFailed);
        }
        let (ciphertext, extension) = sealed.split_at(sealed.len() - NONCE_EXTENSION_LEN);
        let nonce = build_nonce(role, serial, extension);
        self.cipher()?
            .decrypt(
                Nonce::from_slice(&nonce),
                Payload {
                    msg: ciphertext,
                    aad,
                },
            )
            .map_err(|_| CryptoError::DecryptionFailed)
    }

    fn cipher(&self) -> Result<Aes128Gcm, CryptoError> {
        Aes128Gcm::new_from_slice(&self.key[..]).map_err(|_| CryptoError::InvalidKeyLength {
            expected: SESSION_KEY_LEN,
            actual: self.key.len(),
        })
    }
}

impl std::fmt::Debug for SessionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SessionKey([REDACTED])")
    }
}

fn build_nonce(role: u8, serial: u32, extension: &[u8]) -> [u8; NONCE_LEN] {
    let mut nonce = [0u8; NONCE_LEN];
    nonce[0] = role;
    nonce[1..5].copy_from_slice(&serial.to_be_bytes());
    nonce[5..].copy_from_slice(&extension[..NONCE_EXTENSION_LEN]);
    nonce
}
