//! # Key Exchangers
//!
//! The ECDHE family of authentication suites. Every variant runs the same
//! ephemeral Diffie-Hellman exchange and differs only in how the resulting
//! master secret is authenticated:
//!
//! | Variant | Authenticated by                         | Default lifetime |
//! |---------|------------------------------------------|------------------|
//! | `Null`  | nothing                                  | 1 second         |
//! | `Psk`   | a pre-shared key mixed into the verifier | 1 day            |
//! | `Ecdsa` | a signature over the verifier + a chain  | never expires    |
//!
//! This module holds the pure part of each exchange. Transcript hashing,
//! round trips and listener callbacks are sequenced by the service layer.

use bus_crypto::{
    constant_time_eq, prf, EcdheKeyPair, EcdsaKeyPair, EcdsaPublicKey, EcdsaSignature,
    ECC_CURVE_ID, PUBLIC_KEY_LEN,
};
use bus_types::{BusError, BusResult, MsgArg};
use zeroize::Zeroizing;

use super::certificate::{
    clamp_expiration, is_chain_structure_valid, issuer_public_keys, Certificate,
    CERT_ENCODING_COMPACT, SIG_ALGORITHM_ECDSA_SHA256,
};
use super::credentials::{cred, Credentials};
use super::key_blob::{KeyBlob, KeyRole, PeerSecretRecord};
use super::suites::AuthMechanism;
use super::version::CONVERSATION_V4;

/// Length of the key authentication verifier.
pub const AUTH_VERIFIER_LEN: usize = 32;

/// PSK name used when the listener supplies none.
pub const ANONYMOUS_PSK_NAME: &str = "<anonymous>";

const CLIENT_FINISHED: &str = "client finished";
const SERVER_FINISHED: &str = "server finished";

const NULL_EXPIRATION_SECS: u32 = 1;
const PSK_EXPIRATION_SECS: u32 = 86_400;
const ECDSA_EXPIRATION_SECS: u32 = u32::MAX;

/// Identity an ECDSA peer proved during key authentication.
#[derive(Debug, Clone)]
pub struct PeerIdentity {
    pub public_key: EcdsaPublicKey,
    pub manifest_digest: Option<[u8; 32]>,
    pub issuer_keys: Vec<EcdsaPublicKey>,
}

struct EcdsaMaterial {
    signing_key: Option<EcdsaKeyPair>,
    chain: Vec<Certificate>,
    trust_anchors: Vec<EcdsaPublicKey>,
    peer: Option<PeerIdentity>,
}

enum Variant {
    Null,
    Psk {
        name: String,
        value: Zeroizing<Vec<u8>>,
    },
    Ecdsa(Box<EcdsaMaterial>),
}

/// Signed verifier as received from an ECDSA peer.
pub struct SignedVerifier {
    pub r: Vec<u8>,
    pub s: Vec<u8>,
    pub encoding: u8,
    pub certs: Vec<Vec<u8>>,
}

impl SignedVerifier {
    /// Byte strings a pre-v4 transcript absorbs for this verifier, in order.
    #[must_use]
    pub fn transcript_parts(&self) -> Vec<Vec<u8>> {
        let mut parts = vec![self.r.clone(), self.s.clone(), vec![self.encoding]];
        parts.extend(self.certs.iter().cloned());
        parts
    }
}

/// Result of checking a peer's certificate chain before the listener is asked.
pub enum ChainCheck {
    Rejected,
    /// Signature and structure check out; the listener decides.
    Candidate(Vec<Certificate>),
}

/// State of one ECDHE conversation, on either side.
pub struct KeyExchanger {
    mechanism: AuthMechanism,
    initiator: bool,
    /// Negotiated auth version (major part) of the peer.
    peer_auth_version: u16,
    ecdhe: Option<EcdheKeyPair>,
    peer_public: Vec<u8>,
    master_secret: Zeroizing<Vec<u8>>,
    expiration: u32,
    variant: Variant,
}

impl KeyExchanger {
    /// # Errors
    ///
    /// Returns `BusError::AuthFail` for a mechanism outside the ECDHE family.
    pub fn new(
        mechanism: AuthMechanism,
        initiator: bool,
        peer_auth_version: u16,
        trust_anchors: Vec<EcdsaPublicKey>,
    ) -> BusResult<Self> {
        let variant = match mechanism {
            AuthMechanism::EcdheNull => Variant::Null,
            AuthMechanism::EcdhePsk => Variant::Psk {
                name: ANONYMOUS_PSK_NAME.to_string(),
                value: Zeroizing::new(Vec::new()),
            },
            AuthMechanism::EcdheEcdsa => Variant::Ecdsa(Box::new(EcdsaMaterial {
                signing_key: None,
                chain: Vec::new(),
                trust_anchors,
                peer: None,
            })),
            _ => return Err(BusError::AuthFail),
        };
        Ok(Self {
            mechanism,
            initiator,
            peer_auth_version,
            ecdhe: None,
            peer_public: Vec::new(),
            master_secret: Zeroizing::new(Vec::new()),
            expiration: 0,
            variant,
        })
    }

    #[must_use]
    pub fn mechanism(&self) -> AuthMechanism {
        self.mechanism
    }

    #[must_use]
    pub fn suite(&self) -> u32 {
        self.mechanism.suite()
    }

    #[must_use]
    pub fn is_initiator(&self) -> bool {
        self.initiator
    }

    #[must_use]
    pub fn is_ecdsa(&self) -> bool {
        matches!(self.variant, Variant::Ecdsa(_))
    }

    /// Lifetime of the master secret in seconds.
    #[must_use]
    pub fn expiration(&self) -> u32 {
        self.expiration
    }

    // =========================================================================
    // ECDHE
    // =========================================================================

    /// Fresh ephemeral key pair; returns the public key.
    pub fn generate_ecdhe(&mut self) -> Vec<u8> {
        let pair = EcdheKeyPair::generate();
        let public = pair.public_key_bytes();
        self.ecdhe = Some(pair);
        public
    }

    /// Wire form of a public key: `(curve, key)`.
    #[must_use]
    pub fn key_arg(public: &[u8]) -> MsgArg {
        MsgArg::Struct(vec![MsgArg::Byte(ECC_CURVE_ID), MsgArg::Bytes(public.to_vec())])
    }

    /// Read the peer's `(curve, key)` and remember the key.
    ///
    /// # Errors
    ///
    /// Returns `BusError::InvalidData` for a wrong shape, curve or length.
    pub fn read_peer_key(&mut self, arg: &MsgArg) -> BusResult<(u8, Vec<u8>)> {
        let inner = arg.as_variant().unwrap_or(arg);
        let fields = inner.as_struct().ok_or(BusError::InvalidData)?;
        let (curve, key) = match fields {
            [curve, key] => (
                curve.as_byte().ok_or(BusError::InvalidData)?,
                key.as_bytes().ok_or(BusError::InvalidData)?,
            ),
            _ => return Err(BusError::InvalidData),
        };
        if curve != ECC_CURVE_ID || key.len() != PUBLIC_KEY_LEN {
            return Err(BusError::InvalidData);
        }
        self.peer_public = key.to_vec();
        Ok((curve, key.to_vec()))
    }

    /// Derive the master secret from the ephemeral pair and the peer's key.
    ///
    /// # Errors
    ///
    /// `AuthFail` before both keys are known, `InvalidData` for a bad point.
    pub fn generate_master_secret(&mut self) -> BusResult<()> {
        let pair = self.ecdhe.as_ref().ok_or(BusError::AuthFail)?;
        if self.peer_public.is_empty() {
            return Err(BusError::AuthFail);
        }
        self.master_secret = Zeroizing::new(pair.master_secret(&self.peer_public)?);
        Ok(())
    }

    // =========================================================================
    // CREDENTIALS
    // =========================================================================

    /// Mask and user name for the credential request.
    #[must_use]
    pub fn credential_request(&self) -> (u16, String) {
        match &self.variant {
            Variant::Null => (cred::EXPIRATION, String::new()),
            Variant::Psk { name, .. } => {
                if name == ANONYMOUS_PSK_NAME {
                    (cred::PASSWORD, String::new())
                } else {
                    (cred::PASSWORD | cred::USER_NAME, name.clone())
                }
            }
            Variant::Ecdsa(_) => (
                cred::PRIVATE_KEY | cred::CERT_CHAIN | cred::EXPIRATION,
                String::new(),
            ),
        }
    }

    /// Take what the listener returned.
    ///
    /// # Errors
    ///
    /// `AuthUserReject` when a PSK request is declined, `AuthFail` for any
    /// other refusal or missing material.
    pub fn accept_credentials(&mut self, creds: Option<Credentials>) -> BusResult<()> {
        match &mut self.variant {
            Variant::Null => {
                let creds = creds.ok_or(BusError::AuthFail)?;
                self.expiration = creds.expiration.unwrap_or(NULL_EXPIRATION_SECS);
            }
            Variant::Psk { name, value } => {
                let creds = creds.ok_or(BusError::AuthUserReject)?;
                self.expiration = creds.expiration.unwrap_or(PSK_EXPIRATION_SECS);
                if let Some(user) = &creds.user_name {
                    name.clone_from(user);
                }
                let password = creds.password().ok_or(BusError::AuthFail)?;
                *value = Zeroizing::new(password.as_bytes().to_vec());
            }
            Variant::Ecdsa(material) => {
                let creds = creds.ok_or(BusError::AuthFail)?;
                let key = creds.private_key.as_ref().ok_or(BusError::AuthFail)?;
                let chain = creds.cert_chain.clone().unwrap_or_default();
                if chain.is_empty() {
                    return Err(BusError::AuthFail);
                }
                material.signing_key = Some(EcdsaKeyPair::from_bytes(key)?);
                material.chain = chain;
                self.expiration = creds.expiration.unwrap_or(ECDSA_EXPIRATION_SECS);
            }
        }
        Ok(())
    }

    /// Adopt the PSK name the peer sent (responder side).
    pub fn set_psk_name(&mut self, peer_name: &[u8]) {
        if let Variant::Psk { name, .. } = &mut self.variant {
            *name = String::from_utf8_lossy(peer_name).into_owned();
        }
    }

    /// `(name, value)` of the pre-shared key, for the PSK variant.
    #[must_use]
    pub fn psk(&self) -> Option<(&[u8], &[u8])> {
        match &self.variant {
            Variant::Psk { name, value } => Some((name.as_bytes(), value.as_slice())),
            _ => None,
        }
    }

    // =========================================================================
    // VERIFIERS
    // =========================================================================

    fn verifier(&self, label: &str, digest: &[u8; 32], psk_name: Option<&[u8]>) -> Vec<u8> {
        match (&self.variant, psk_name) {
            (Variant::Psk { value, .. }, Some(name)) if self.peer_auth_version >= CONVERSATION_V4 => {
                let mut seed = Zeroizing::new(digest.to_vec());
                seed.extend_from_slice(name);
                seed.extend_from_slice(value);
                prf(&self.master_secret, label, &seed, AUTH_VERIFIER_LEN)
            }
            _ => prf(&self.master_secret, label, digest, AUTH_VERIFIER_LEN),
        }
    }

    /// Verifier this side sends.
    #[must_use]
    pub fn local_verifier(&self, digest: &[u8; 32]) -> Vec<u8> {
        let label = if self.initiator { CLIENT_FINISHED } else { SERVER_FINISHED };
        let name = self.psk().map(|(name, _)| name.to_vec());
        self.verifier(label, digest, name.as_deref())
    }

    /// Verifier the peer is expected to send.
    #[must_use]
    pub fn remote_verifier(&self, digest: &[u8; 32], peer_psk_name: Option<&[u8]>) -> Vec<u8> {
        let label = if self.initiator { SERVER_FINISHED } else { CLIENT_FINISHED };
        self.verifier(label, digest, peer_psk_name)
    }

    /// Constant time comparison against the expected remote verifier.
    #[must_use]
    pub fn matches_remote(&self, received: &[u8], digest: &[u8; 32], peer_psk_name: Option<&[u8]>) -> bool {
        received.len() == AUTH_VERIFIER_LEN
            && constant_time_eq(received, &self.remote_verifier(digest, peer_psk_name))
    }

    /// Wire form of a plain verifier: bytes for NULL, `(name, verifier)` for PSK.
    #[must_use]
    pub fn plain_verifier_arg(&self, verifier: &[u8]) -> MsgArg {
        match self.psk() {
            Some((name, _)) => MsgArg::Struct(vec![
                MsgArg::Bytes(name.to_vec()),
                MsgArg::Bytes(verifier.to_vec()),
            ]),
            None => MsgArg::Bytes(verifier.to_vec()),
        }
    }

    /// Split a received plain verifier into `(psk name, verifier)`.
    ///
    /// # Errors
    ///
    /// Returns `BusError::InvalidData` for a wrong shape or length.
    pub fn parse_plain_verifier(&self, arg: &MsgArg) -> BusResult<(Option<Vec<u8>>, Vec<u8>)> {
        let inner = arg.as_variant().unwrap_or(arg);
        let (name, verifier) = match (&self.variant, inner) {
            (Variant::Psk { .. }, MsgArg::Struct(fields)) => match fields.as_slice() {
                [MsgArg::Bytes(name), MsgArg::Bytes(verifier)] => (Some(name.clone()), verifier.clone()),
                _ => return Err(BusError::InvalidData),
            },
            (Variant::Null, MsgArg::Bytes(verifier)) => (None, verifier.clone()),
            _ => return Err(BusError::InvalidData),
        };
        if verifier.len() != AUTH_VERIFIER_LEN {
            return Err(BusError::InvalidData);
        }
        Ok((name, verifier))
    }

    // =========================================================================
    // ECDSA
    // =========================================================================

    fn ecdsa(&self) -> BusResult<&EcdsaMaterial> {
        match &self.variant {
            Variant::Ecdsa(material) => Ok(material),
            _ => Err(BusError::AuthFail),
        }
    }

    /// Sign `verifier` and wrap it with the local chain.
    ///
    /// Returns the argument and the byte strings a pre-v4 transcript absorbs.
    ///
    /// # Errors
    ///
    /// `AuthFail` without a signing key, `Marshal` if a certificate fails
    /// to encode.
    pub fn signed_verifier_arg(&self, verifier: &[u8]) -> BusResult<(MsgArg, SignedVerifier)> {
        let material = self.ecdsa()?;
        let key = material.signing_key.as_ref().ok_or(BusError::AuthFail)?;
        let signature = key.sign(verifier);
        let certs = material
            .chain
            .iter()
            .map(Certificate::encode)
            .collect::<BusResult<Vec<_>>>()?;
        let signed = SignedVerifier {
            r: signature.r.to_vec(),
            s: signature.s.to_vec(),
            encoding: CERT_ENCODING_COMPACT,
            certs,
        };
        let sig_info = MsgArg::Struct(vec![
            MsgArg::Byte(SIG_ALGORITHM_ECDSA_SHA256),
            MsgArg::variant(MsgArg::Struct(vec![
                MsgArg::Bytes(signed.r.clone()),
                MsgArg::Bytes(signed.s.clone()),
            ])),
        ]);
        let chain = MsgArg::Array(
            signed
                .certs
                .iter()
                .map(|c| MsgArg::Struct(vec![MsgArg::Bytes(c.clone())]))
                .collect(),
        );
        let arg = MsgArg::Struct(vec![
            MsgArg::variant(sig_info),
            MsgArg::Byte(signed.encoding),
            MsgArg::variant(chain),
        ]);
        Ok((arg, signed))
    }

    /// Parse a signed verifier.
    ///
    /// # Errors
    ///
    /// Returns `BusError::InvalidData` for a wrong shape, algorithm,
    /// encoding or coordinate size.
    pub fn parse_signed_verifier(arg: &MsgArg) -> BusResult<SignedVerifier> {
        let inner = arg.as_variant().unwrap_or(arg);
        let [sig_info, encoding, chain] = inner.as_struct().ok_or(BusError::InvalidData)? else {
            return Err(BusError::InvalidData);
        };
        let encoding = encoding.as_byte().ok_or(BusError::InvalidData)?;
        if encoding != CERT_ENCODING_COMPACT {
            return Err(BusError::InvalidData);
        }
        let sig_info = sig_info.as_variant().unwrap_or(sig_info);
        let [algorithm, coords] = sig_info.as_struct().ok_or(BusError::InvalidData)? else {
            return Err(BusError::InvalidData);
        };
        if algorithm.as_byte() != Some(SIG_ALGORITHM_ECDSA_SHA256) {
            return Err(BusError::InvalidData);
        }
        let coords = coords.as_variant().unwrap_or(coords);
        let [r, s] = coords.as_struct().ok_or(BusError::InvalidData)? else {
            return Err(BusError::InvalidData);
        };
        let r = r.as_bytes().ok_or(BusError::InvalidData)?;
        let s = s.as_bytes().ok_or(BusError::InvalidData)?;
        if r.len() != bus_crypto::ecdsa::ECC_COORDINATE_SZ || s.len() != bus_crypto::ecdsa::ECC_COORDINATE_SZ {
            return Err(BusError::InvalidData);
        }
        let chain = chain.as_variant().unwrap_or(chain);
        let certs = chain
            .as_array()
            .ok_or(BusError::InvalidData)?
            .iter()
            .map(|entry| match entry.as_struct() {
                Some([MsgArg::Bytes(cert)]) => Ok(cert.clone()),
                _ => Err(BusError::InvalidData),
            })
            .collect::<BusResult<Vec<_>>>()?;
        Ok(SignedVerifier {
            r: r.to_vec(),
            s: s.to_vec(),
            encoding,
            certs,
        })
    }

    /// Check the signature over `expected_verifier` and the chain structure.
    ///
    /// # Errors
    ///
    /// Returns `BusError::InvalidData` when a certificate cannot be decoded.
    pub fn check_signed_verifier(signed: &SignedVerifier, expected_verifier: &[u8]) -> BusResult<ChainCheck> {
        if signed.certs.is_empty() {
            return Ok(ChainCheck::Rejected);
        }
        let chain = signed
            .certs
            .iter()
            .map(|c| Certificate::decode(c))
            .collect::<BusResult<Vec<_>>>()?;
        let signature = EcdsaSignature::from_parts(&signed.r, &signed.s)?;
        if chain[0].subject_public_key.verify(expected_verifier, &signature).is_err() {
            return Ok(ChainCheck::Rejected);
        }
        if !is_chain_structure_valid(&chain) {
            return Ok(ChainCheck::Rejected);
        }
        Ok(ChainCheck::Candidate(chain))
    }

    /// Final decision on a chain that passed [`KeyExchanger::check_signed_verifier`].
    ///
    /// A chain the listener declined is still accepted when its leaf key is
    /// a trust anchor.
    pub fn accept_peer_chain(&mut self, chain: &[Certificate], listener_accepted: bool) -> bool {
        let Variant::Ecdsa(material) = &mut self.variant else {
            return false;
        };
        let Some(leaf) = chain.first() else {
            return false;
        };
        if !listener_accepted && !material.trust_anchors.contains(&leaf.subject_public_key) {
            return false;
        }
        material.peer = Some(PeerIdentity {
            public_key: leaf.subject_public_key.clone(),
            manifest_digest: leaf.manifest_digest,
            issuer_keys: issuer_public_keys(chain, &material.trust_anchors),
        });
        self.expiration = clamp_expiration(leaf, self.expiration);
        true
    }

    #[must_use]
    pub fn peer_identity(&self) -> Option<&PeerIdentity> {
        match &self.variant {
            Variant::Ecdsa(material) => material.peer.as_ref(),
            _ => None,
        }
    }

    // =========================================================================
    // STORAGE
    // =========================================================================

    /// Master secret as a key blob ready for the key store: tagged with the
    /// mechanism and this side's role, expiring after the negotiated lifetime.
    ///
    /// # Errors
    ///
    /// Returns `BusError::Marshal` if the peer record cannot be encoded.
    pub fn master_secret_blob(&self) -> BusResult<KeyBlob> {
        let mut record = PeerSecretRecord::bare(self.master_secret.to_vec());
        if let Some(peer) = self.peer_identity() {
            record.public_key = Some(peer.public_key.as_bytes().to_vec());
            record.manifest_digest = peer.manifest_digest;
            record.issuer_keys = peer.issuer_keys.iter().map(|k| k.as_bytes().to_vec()).collect();
        }
        let mut blob = record.into_blob()?;
        blob.set_expiration_secs(self.expiration);
        let role = if self.initiator { KeyRole::Initiator } else { KeyRole::Responder };
        blob.set_tag(self.mechanism.name(), role);
        Ok(blob)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::certificate::CertificateType;
    use crate::domain::key_blob::KeyKind;

    fn pair(mechanism: AuthMechanism) -> (KeyExchanger, KeyExchanger) {
        let mut initiator = KeyExchanger::new(mechanism, true, 4, Vec::new()).unwrap();
        let mut responder = KeyExchanger::new(mechanism, false, 4, Vec::new()).unwrap();
        let a = initiator.generate_ecdhe();
        let b = responder.generate_ecdhe();
        initiator.read_peer_key(&KeyExchanger::key_arg(&b)).unwrap();
        responder.read_peer_key(&KeyExchanger::key_arg(&a)).unwrap();
        initiator.generate_master_secret().unwrap();
        responder.generate_master_secret().unwrap();
        (initiator, responder)
    }

    fn identity(ca: &EcdsaKeyPair) -> (EcdsaKeyPair, Vec<Certificate>) {
        let leaf_key = EcdsaKeyPair::generate();
        let mut leaf = Certificate::new(leaf_key.public_key(), CertificateType::Identity, 3600)
            .with_manifest_digest([9; 32]);
        leaf.sign(ca).unwrap();
        let mut root = Certificate::new(ca.public_key(), CertificateType::Unrestricted, 7200).with_ca(true);
        root.sign(ca).unwrap();
        (leaf_key, vec![leaf, root])
    }

    #[test]
    fn test_non_ecdhe_mechanism_is_rejected() {
        assert!(matches!(
            KeyExchanger::new(AuthMechanism::SrpKeyx, true, 4, Vec::new()),
            Err(BusError::AuthFail)
        ));
    }

    #[test]
    fn test_null_verifiers_cross_match() {
        let (initiator, responder) = pair(AuthMechanism::EcdheNull);
        let digest = [5; 32];
        let sent = initiator.local_verifier(&digest);
        assert!(responder.matches_remote(&sent, &digest, None));
        let reply = responder.local_verifier(&digest);
        assert!(initiator.matches_remote(&reply, &digest, None));
        assert!(!initiator.matches_remote(&reply, &[6; 32], None));
    }

    #[test]
    fn test_psk_mismatch_fails_verification() {
        let (mut initiator, mut responder) = pair(AuthMechanism::EcdhePsk);
        initiator
            .accept_credentials(Some(Credentials::default().with_password("right")))
            .unwrap();
        responder
            .accept_credentials(Some(Credentials::default().with_password("wrong")))
            .unwrap();
        let digest = [1; 32];
        let sent = initiator.local_verifier(&digest);
        let (name, _) = initiator.psk().unwrap();
        assert!(!responder.matches_remote(&sent, &digest, Some(name)));
    }

    #[test]
    fn test_psk_match_verifies() {
        let (mut initiator, mut responder) = pair(AuthMechanism::EcdhePsk);
        for side in [&mut initiator, &mut responder] {
            side.accept_credentials(Some(Credentials::default().with_password("secret")))
                .unwrap();
        }
        let digest = [1; 32];
        let arg = initiator.plain_verifier_arg(&initiator.local_verifier(&digest));
        let (name, verifier) = responder.parse_plain_verifier(&arg).unwrap();
        assert!(responder.matches_remote(&verifier, &digest, name.as_deref()));
    }

    #[test]
    fn test_credential_rules() {
        let mut null = KeyExchanger::new(AuthMechanism::EcdheNull, true, 4, Vec::new()).unwrap();
        assert!(matches!(null.accept_credentials(None), Err(BusError::AuthFail)));
        null.accept_credentials(Some(Credentials::default())).unwrap();
        assert_eq!(null.expiration(), 1);

        let mut psk = KeyExchanger::new(AuthMechanism::EcdhePsk, true, 4, Vec::new()).unwrap();
        assert!(matches!(psk.accept_credentials(None), Err(BusError::AuthUserReject)));
        assert!(matches!(
            psk.accept_credentials(Some(Credentials::default())),
            Err(BusError::AuthFail)
        ));

        let mut ecdsa = KeyExchanger::new(AuthMechanism::EcdheEcdsa, true, 4, Vec::new()).unwrap();
        let key = EcdsaKeyPair::generate();
        assert!(matches!(
            ecdsa.accept_credentials(Some(Credentials::default().with_private_key(key.to_bytes().to_vec()))),
            Err(BusError::AuthFail)
        ));
    }

    #[test]
    fn test_named_psk_requests_user_name() {
        let mut psk = KeyExchanger::new(AuthMechanism::EcdhePsk, false, 4, Vec::new()).unwrap();
        assert_eq!(psk.credential_request().0, cred::PASSWORD);
        psk.set_psk_name(b"kitchen");
        let (mask, user) = psk.credential_request();
        assert_eq!(mask, cred::PASSWORD | cred::USER_NAME);
        assert_eq!(user, "kitchen");
    }

    #[test]
    fn test_signed_verifier_round_trip() {
        let ca = EcdsaKeyPair::generate();
        let (leaf_key, chain) = identity(&ca);
        let (mut initiator, mut responder) = pair(AuthMechanism::EcdheEcdsa);
        initiator
            .accept_credentials(Some(
                Credentials::default()
                    .with_private_key(leaf_key.to_bytes().to_vec())
                    .with_cert_chain(chain),
            ))
            .unwrap();
        let digest = [3; 32];
        let verifier = initiator.local_verifier(&digest);
        let (arg, sent) = initiator.signed_verifier_arg(&verifier).unwrap();
        assert_eq!(sent.transcript_parts().len(), 5);

        let parsed = KeyExchanger::parse_signed_verifier(&arg).unwrap();
        let expected = responder.remote_verifier(&digest, None);
        let ChainCheck::Candidate(chain) = KeyExchanger::check_signed_verifier(&parsed, &expected).unwrap() else {
            panic!("valid chain rejected");
        };
        assert!(!responder.accept_peer_chain(&chain, false));
        assert!(responder.accept_peer_chain(&chain, true));
        let peer = responder.peer_identity().unwrap();
        assert_eq!(peer.public_key, leaf_key.public_key());
        assert_eq!(peer.manifest_digest, Some([9; 32]));
        assert_eq!(peer.issuer_keys, vec![ca.public_key()]);
    }

    #[test]
    fn test_wrong_signer_is_rejected() {
        let ca = EcdsaKeyPair::generate();
        let (_, chain) = identity(&ca);
        let (mut initiator, responder) = pair(AuthMechanism::EcdheEcdsa);
        let impostor = EcdsaKeyPair::generate();
        initiator
            .accept_credentials(Some(
                Credentials::default()
                    .with_private_key(impostor.to_bytes().to_vec())
                    .with_cert_chain(chain),
            ))
            .unwrap();
        let digest = [3; 32];
        let (arg, _) = initiator.signed_verifier_arg(&initiator.local_verifier(&digest)).unwrap();
        let parsed = KeyExchanger::parse_signed_verifier(&arg).unwrap();
        let expected = responder.remote_verifier(&digest, None);
        assert!(matches!(
            KeyExchanger::check_signed_verifier(&parsed, &expected).unwrap(),
            ChainCheck::Rejected
        ));
    }

    #[test]
    fn test_trust_anchor_overrides_listener() {
        let ca = EcdsaKeyPair::generate();
        let (leaf_key, chain) = identity(&ca);
        let mut responder =
            KeyExchanger::new(AuthMechanism::EcdheEcdsa, false, 4, vec![leaf_key.public_key()]).unwrap();
        assert!(responder.accept_peer_chain(&chain, false));
    }

    #[test]
    fn test_master_secret_blob_is_tagged() {
        let (mut initiator, _) = pair(AuthMechanism::EcdheNull);
        initiator.accept_credentials(Some(Credentials::default().with_expiration(60))).unwrap();
        let blob = initiator.master_secret_blob().unwrap();
        assert_eq!(blob.tag(), "ALLJOYN_ECDHE_NULL");
        assert_eq!(blob.role(), KeyRole::Initiator);
        assert_eq!(blob.kind(), KeyKind::Generic);
        assert_eq!(blob.data().len(), bus_crypto::MASTER_SECRET_LEN);
        assert!(blob.expires_at_ms().is_some());
    }

    #[test]
    fn test_bad_peer_key_is_invalid_data() {
        let mut ex = KeyExchanger::new(AuthMechanism::EcdheNull, true, 4, Vec::new()).unwrap();
        let bad = MsgArg::Struct(vec![MsgArg::Byte(9), MsgArg::Bytes(vec![0; PUBLIC_KEY_LEN])]);
        assert!(matches!(ex.read_peer_key(&bad), Err(BusError::InvalidData)));
    }
}
