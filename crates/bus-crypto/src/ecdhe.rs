//! # ECDHE Key Agreement
//!
//! Ephemeral Diffie-Hellman over secp256k1. Public keys travel as 65-byte
//! uncompressed SEC1 points tagged with [`ECC_CURVE_ID`].
//!
//! ## Master Secret
//!
//! ```text
//! pms    = SHA-256(shared x-coordinate)
//! master = PRF(pms, "master secret", "", 48)
//! ```

use k256::ecdh::EphemeralSecret;
use k256::elliptic_curve::sec1::ToEncodedPoint;
use k256::PublicKey;

use crate::hashing::sha256;
use crate::prf::prf;
use crate::CryptoError;

/// Curve identifier carried next to exchanged public keys.
pub const ECC_CURVE_ID: u8 = 1;

/// Uncompressed SEC1 public key length.
pub const PUBLIC_KEY_LEN: usize = 65;

/// Master secret length in bytes.
pub const MASTER_SECRET_LEN: usize = 48;

/// Ephemeral key pair for one key exchange.
pub struct EcdheKeyPair {
    secret: EphemeralSecret,
    public: PublicKey,
}

impl EcdheKeyPair {
    /// Generate a fresh ephemeral key pair.
    #[must_use]
    pub fn generate() -> Self {
        let secret = EphemeralSecret::random(&mut rand::thread_rng());
        let public = secret.public_key();
        Self { secret, public }
    }

    /// Uncompressed SEC1 encoding of the public key.
    #[must_use]
    pub fn public_key_bytes(&self) -> Vec<u8> {
        self.public.to_encoded_point(false).as_bytes().to_vec()
    }

    /// Derive the 48-byte master secret shared with `peer_public`.
    ///
    /// # Errors
    ///
    /// Returns `CryptoError::InvalidPublicKey` if the peer key has the wrong
    /// size or is not on the curve.
    pub fn master_secret(&self, peer_public: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let peer = parse_public_key(peer_public)?;
        let shared = self.secret.diffie_hellman(&peer);
        let pms = sha256(shared.raw_secret_bytes());
        Ok(prf(&pms, "master secret", b"", MASTER_SECRET_LEN))
    }
}

/// Validate and decode an uncompressed SEC1 public key.
///
/// # Errors
///
/// Returns `CryptoError::InvalidPublicKey` on a size mismatch or an invalid point.
pub fn parse_public_key(bytes: &[u8]) -> Result<PublicKey, CryptoError> {
    if bytes.len() != PUBLIC_KEY_LEN {
        return Err(CryptoError::InvalidPublicKey);
    }
    PublicKey::from_sec1_bytes(bytes).map_err(|_| CryptoError::InvalidPublicKey)
}
