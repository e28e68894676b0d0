//! # ECDSA Signatures (secp256k1)
//!
//! Identity signatures used by the ECDSA authentication suite and by
//! certificate issuers.
//!
//! ## Security Properties
//!
//! - RFC 6979 deterministic nonces (no RNG dependency for signing)
//! - Secret key bytes are zeroized when the key pair is dropped

use k256::ecdsa::{
    signature::{Signer, Verifier},
    Signature, SigningKey, VerifyingKey,
};
use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

use crate::hashing::sha256;
use crate::CryptoError;

/// Coordinate size of a signature component.
pub const ECC_COORDINATE_SZ: usize = 32;

/// Compressed secp256k1 public key (33 bytes).
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EcdsaPublicKey(Vec<u8>);

impl EcdsaPublicKey {
    /// Create from SEC1 bytes (compressed or uncompressed).
    ///
    /// # Errors
    ///
    /// Returns `CryptoError::InvalidPublicKey` if the bytes are not a curve point.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CryptoError> {
        let key = VerifyingKey::from_sec1_bytes(bytes).map_err(|_| CryptoError::InvalidPublicKey)?;
        Ok(Self(key.to_encoded_point(true).as_bytes().to_vec()))
    }

    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Key identifier (truncated SHA-256 of the encoded key).
    #[must_use]
    pub fn key_id(&self) -> Vec<u8> {
        sha256(&self.0)[..20].to_vec()
    }

    /// Verify a signature over `message`.
    ///
    /// # Errors
    ///
    /// Returns `CryptoError::SignatureVerificationFailed` on mismatch.
    pub fn verify(&self, message: &[u8], signature: &EcdsaSignature) -> Result<(), CryptoError> {
        let verifying_key =
            VerifyingKey::from_sec1_bytes(&self.0).map_err(|_| CryptoError::InvalidPublicKey)?;
        let sig = Signature::from_slice(&signature.to_bytes())
            .map_err(|_| CryptoError::InvalidSignature)?;
        verifying_key
            .verify(message, &sig)
            .map_err(|_| CryptoError::SignatureVerificationFailed)
    }
}

/// ECDSA signature split into its coordinates.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EcdsaSignature {
    pub r: [u8; ECC_COORDINATE_SZ],
    pub s: [u8; ECC_COORDINATE_SZ],
}

impl EcdsaSignature {
    /// Rebuild from separately transmitted coordinates.
    ///
    /// # Errors
    ///
    /// Returns `CryptoError::InvalidSignature` if either coordinate is not 32 bytes.
    pub fn from_parts(r: &[u8], s: &[u8]) -> Result<Self, CryptoError> {
        let r: [u8; ECC_COORDINATE_SZ] = r.try_into().map_err(|_| CryptoError::InvalidSignature)?;
        let s: [u8; ECC_COORDINATE_SZ] = s.try_into().map_err(|_| CryptoError::InvalidSignature)?;
        Ok(Self { r, s })
    }

    /// `r || s`.
    #[must_use]
    pub fn to_bytes(&self) -> [u8; 64] {
        let mut out = [0u8; 64];
        out[..32].copy_from_slice(&self.r);
        out[32..].copy_from_slice(&self.s);
        out
    }
}

/// secp256k1 signing key pair.
#[derive(Clone)]
pub struct EcdsaKeyPair {
    signing_key: SigningKey,
}

impl EcdsaKeyPair {
    /// Generate random keypair.
    #[must_use]
    pub fn generate() -> Self {
        Self {
            signing_key: SigningKey::random(&mut rand::thread_rng()),
        }
    }

    /// Create from secret key bytes (32 bytes).
    ///
    /// # Errors
    ///
    /// Returns `CryptoError::InvalidPrivateKey` for out-of-range scalars.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CryptoError> {
        let signing_key =
            SigningKey::from_slice(bytes).map_err(|_| CryptoError::InvalidPrivateKey)?;
        Ok(Self { signing_key })
    }

    /// Secret key bytes, zeroized on drop.
    #[must_use]
    pub fn to_bytes(&self) -> Zeroizing<Vec<u8>> {
        Zeroizing::new(self.signing_key.to_bytes().to_vec())
    }

    #[must_use]
    pub fn public_key(&self) -> EcdsaPublicKey {
        let point = self.signing_key.verifying_key().to_encoded_point(true);
        EcdsaPublicKey(point.as_bytes().to_vec())
    }

    /// Sign a message (deterministic RFC 6979).
    #[must_use]
    pub fn sign(&self, message: &[u8]) -> EcdsaSignature {
        let sig: Signature = self.signing_key.sign(message);
        let (r, s) = sig.split_bytes();
        let mut out = EcdsaSignature {
            r: [0u8; ECC_COORDINATE_SZ],
            s: [0u8; ECC_COORDINATE_SZ],
        };
        out.r.copy_from_slice(&r);
        out.s.copy_from_slice(&s);
        out
    }
}

impl std::fmt::Debug for EcdsaKeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EcdsaKeyPair")
            .field("public_key", &hex::encode(self.public_key().as_bytes()))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sign_verify() {
        let keypair = EcdsaKeyPair::generate();
        let signature = keypair.sign(b"verifier");
        assert!(keypair.public_key().verify(b"verifier", &signature).is_ok());
    }

    #[test]
    fn test_wrong_message_fails() {
        let keypair = EcdsaKeyPair::generate();
        let signature = keypair.sign(b"verifier");
        assert_eq!(
            keypair.public_key().verify(b"other", &signature),
            Err(CryptoError::SignatureVerificationFailed)
        );
    }

    #[test]
    fn test_secret_round_trip() {
        let keypair = EcdsaKeyPair::generate();
        let restored = EcdsaKeyPair::from_bytes(&keypair.to_bytes()).unwrap();
        assert_eq!(restored.public_key(), keypair.public_key());
    }

    #[test]
    fn test_signature_parts_round_trip() {
        let sig = EcdsaKeyPair::generate().sign(b"m");
        let rebuilt = EcdsaSignature::from_parts(&sig.r, &sig.s).unwrap();
        assert_eq!(rebuilt, sig);
        assert!(EcdsaSignature::from_parts(&sig.r[..31], &sig.s).is_err());
    }
}
