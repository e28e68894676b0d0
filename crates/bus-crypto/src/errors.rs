//! Crypto error types.

use bus_types::BusError;
use thiserror::Error;

/// Cryptographic operation errors.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CryptoError {
    /// Encryption failed
    #[error("Encryption failed: {0}")]
    EncryptionFailed(String),

    /// Decryption failed
    #[error("Decryption failed")]
    DecryptionFailed,

    /// Invalid key length
    #[error("Invalid key length: expected {expected}, got {actual}")]
    InvalidKeyLength {
        /// Expected key length in bytes
        expected: usize,
        /// Actual key length in bytes
        actual: usize,
    },

    /// Public key is not a point on the curve or has the wrong encoding
    #[error("Invalid public key")]
    InvalidPublicKey,

    /// Invalid private key
    #[error("Invalid private key")]
    InvalidPrivateKey,

    /// Invalid signature encoding
    #[error("Invalid signature")]
    InvalidSignature,

    /// Signature verification failed
    #[error("Signature verification failed")]
    SignatureVerificationFailed,

    /// SRP parameter out of range (A or B congruent to zero, u == 0)
    #[error("Illegal SRP parameter: {0}")]
    IllegalSrpParameter(&'static str),
}

impl From<CryptoError> for BusError {
    fn from(err: CryptoError) -> Self {
        match err {
            CryptoError::DecryptionFailed => BusError::MessageDecryptionFailed,
            CryptoError::InvalidPublicKey | CryptoError::InvalidSignature => BusError::InvalidData,
            other => BusError::Crypto(other.to_string()),
        }
    }
}
