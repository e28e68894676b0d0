//! # Identity Certificates
//!
//! Compact signed certificates used by the ECDHE_ECDSA suite.
//!
//! A certificate binds a subject public key to a validity window and a
//! type, signed by an issuer key. Chains are sent leaf first; every
//! following certificate must be a CA that issued the one before it.

use bus_crypto::{EcdsaKeyPair, EcdsaPublicKey, EcdsaSignature};
use bus_types::{BusError, BusResult};
use serde::{Deserialize, Serialize};

use super::key_blob::now_ms;

/// Encoding tag for bincode encoded compact certificates.
pub const CERT_ENCODING_COMPACT: u8 = 0;

/// Signature algorithm tag: ECDSA with SHA-256.
pub const SIG_ALGORITHM_ECDSA_SHA256: u8 = 0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CertificateType {
    Unrestricted,
    Identity,
    Membership,
    Invalid,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Certificate {
    pub serial: Vec<u8>,
    pub issuer_key_id: Vec<u8>,
    pub subject_public_key: EcdsaPublicKey,
    /// Validity window in epoch seconds.
    pub valid_from: u64,
    pub valid_to: u64,
    pub is_ca: bool,
    pub cert_type: CertificateType,
    pub manifest_digest: Option<[u8; 32]>,
    /// `r || s`, empty until signed.
    pub signature: Vec<u8>,
}

impl Certificate {
    /// Unsigned certificate for `subject`, valid for `lifetime_secs` from now.
    #[must_use]
    pub fn new(subject: EcdsaPublicKey, cert_type: CertificateType, lifetime_secs: u64) -> Self {
        let now = now_ms() / 1000;
        Self {
            serial: bus_crypto::random_bytes(8),
            issuer_key_id: Vec::new(),
            subject_public_key: subject,
            valid_from: now,
            valid_to: now.saturating_add(lifetime_secs),
            is_ca: false,
            cert_type,
            manifest_digest: None,
            signature: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_ca(mut self, is_ca: bool) -> Self {
        self.is_ca = is_ca;
        self
    }

    #[must_use]
    pub fn with_manifest_digest(mut self, digest: [u8; 32]) -> Self {
        self.manifest_digest = Some(digest);
        self
    }

    #[must_use]
    pub fn with_validity(mut self, valid_from: u64, valid_to: u64) -> Self {
        self.valid_from = valid_from;
        self.valid_to = valid_to;
        self
    }

    fn to_be_signed(&self) -> BusResult<Vec<u8>> {
        bincode::serialize(&(
            &self.serial,
            &self.issuer_key_id,
            &self.subject_public_key,
            self.valid_from,
            self.valid_to,
            self.is_ca,
            self.cert_type,
            &self.manifest_digest,
        ))
        .map_err(|e| BusError::Marshal(e.to_string()))
    }

    /// Sign with `issuer`, recording its key id.
    ///
    /// # Errors
    ///
    /// Returns `BusError::Marshal` if the body cannot be encoded.
    pub fn sign(&mut self, issuer: &EcdsaKeyPair) -> BusResult<()> {
        self.issuer_key_id = issuer.public_key().key_id();
        let body = self.to_be_signed()?;
        self.signature = issuer.sign(&body).to_bytes().to_vec();
        Ok(())
    }

    /// Check the signature against `issuer_key`.
    ///
    /// # Errors
    ///
    /// Returns `BusError::InvalidData` for a missing or malformed signature
    /// and the crypto status for a mismatch.
    pub fn verify(&self, issuer_key: &EcdsaPublicKey) -> BusResult<()> {
        if self.signature.len() != 64 {
            return Err(BusError::InvalidData);
        }
        let sig = EcdsaSignature::from_parts(&self.signature[..32], &self.signature[32..])?;
        issuer_key.verify(&self.to_be_signed()?, &sig)?;
        Ok(())
    }

    #[must_use]
    pub fn is_valid_now(&self) -> bool {
        let now = now_ms() / 1000;
        self.valid_from <= now && now <= self.valid_to
    }

    /// True when this certificate's subject signed `child`.
    #[must_use]
    pub fn is_issuer_of(&self, child: &Certificate) -> bool {
        child.issuer_key_id == self.subject_public_key.key_id()
            && child.verify(&self.subject_public_key).is_ok()
    }

    /// # Errors
    ///
    /// Returns `BusError::Marshal` if encoding fails.
    pub fn encode(&self) -> BusResult<Vec<u8>> {
        bincode::serialize(self).map_err(|e| BusError::Marshal(e.to_string()))
    }

    /// # Errors
    ///
    /// Returns `BusError::InvalidData` for undecodable input.
    pub fn decode(bytes: &[u8]) -> BusResult<Self> {
        bincode::deserialize(bytes).map_err(|_| BusError::InvalidData)
    }
}

/// Structural chain check: dates, leaf type, and CA/issuer links.
#[must_use]
pub fn is_chain_structure_valid(chain: &[Certificate]) -> bool {
    let Some(leaf) = chain.first() else {
        return false;
    };
    if !chain.iter().all(Certificate::is_valid_now) {
        return false;
    }
    if !matches!(
        leaf.cert_type,
        CertificateType::Identity | CertificateType::Membership | CertificateType::Unrestricted
    ) {
        return false;
    }
    chain
        .windows(2)
        .all(|pair| pair[1].is_ca && pair[1].is_issuer_of(&pair[0]))
}

/// Issuer keys behind the leaf: every CA in the chain, or for a lone leaf
/// the trust anchor that signed it.
#[must_use]
pub fn issuer_public_keys(chain: &[Certificate], trust_anchors: &[EcdsaPublicKey]) -> Vec<EcdsaPublicKey> {
    let mut keys = Vec::new();
    if let [leaf] = chain {
        if !leaf.issuer_key_id.is_empty() {
            keys.extend(
                trust_anchors
                    .iter()
                    .filter(|anchor| anchor.key_id() == leaf.issuer_key_id && leaf.verify(anchor).is_ok())
                    .cloned(),
            );
        }
    }
    keys.extend(chain.iter().skip(1).map(|c| c.subject_public_key.clone()));
    keys
}

/// Clamp a secret lifetime so it cannot outlast `leaf`.
#[must_use]
pub fn clamp_expiration(leaf: &Certificate, expiration_secs: u32) -> u32 {
    let now = now_ms() / 1000;
    if leaf.valid_to < now {
        return 0;
    }
    let remaining = leaf.valid_to - now;
    if remaining < u64::from(expiration_secs) {
        u32::try_from(remaining).unwrap_or(expiration_secs)
    } else {
        expiration_secs
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn issued_chain() -> (EcdsaKeyPair, Vec<Certificate>) {
        let ca_key = EcdsaKeyPair::generate();
        let leaf_key = EcdsaKeyPair::generate();
        let mut ca = Certificate::new(ca_key.public_key(), CertificateType::Unrestricted, 3600).with_ca(true);
        ca.sign(&ca_key).unwrap();
        let mut leaf = Certificate::new(leaf_key.public_key(), CertificateType::Identity, 3600);
        leaf.sign(&ca_key).unwrap();
        (ca_key, vec![leaf, ca])
    }

    #[test]
    fn test_valid_chain() {
        let (_, chain) = issued_chain();
        assert!(is_chain_structure_valid(&chain));
        assert!(chain[1].is_issuer_of(&chain[0]));
    }

    #[test]
    fn test_empty_chain_is_invalid() {
        assert!(!is_chain_structure_valid(&[]));
    }

    #[test]
    fn test_non_ca_issuer_is_invalid() {
        let (_, mut chain) = issued_chain();
        chain[1].is_ca = false;
        assert!(!is_chain_structure_valid(&chain));
    }

    #[test]
    fn test_expired_certificate_is_invalid() {
        let key = EcdsaKeyPair::generate();
        let mut cert = Certificate::new(key.public_key(), CertificateType::Identity, 0).with_validity(1, 2);
        cert.sign(&key).unwrap();
        assert!(!is_chain_structure_valid(&[cert]));
    }

    #[test]
    fn test_tampered_certificate_fails_verification() {
        let (ca_key, mut chain) = issued_chain();
        chain[0].valid_to += 1;
        assert!(chain[0].verify(&ca_key.public_key()).is_err());
    }

    #[test]
    fn test_issuer_keys_from_trust_anchor() {
        let (ca_key, chain) = issued_chain();
        let lone = vec![chain[0].clone()];
        let keys = issuer_public_keys(&lone, &[ca_key.public_key()]);
        assert_eq!(keys, vec![ca_key.public_key()]);
        assert_eq!(issuer_public_keys(&chain, &[]), vec![ca_key.public_key()]);
    }

    #[test]
    fn test_expiration_is_clamped_to_leaf() {
        let (_, chain) = issued_chain();
        assert!(clamp_expiration(&chain[0], u32::MAX) <= 3600);
        assert_eq!(clamp_expiration(&chain[0], 10), 10);
    }

    #[test]
    fn test_encode_decode() {
        let (_, chain) = issued_chain();
        let decoded = Certificate::decode(&chain[0].encode().unwrap()).unwrap();
        assert_eq!(decoded, chain[0]);
    }
}
