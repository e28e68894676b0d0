//! # SRP-6a (RFC 5054, 1024-bit group)
//!
//! Password-authenticated key agreement used by the `SRP_KEYX` and
//! `SRP_LOGON` SASL mechanisms. Both sides end with the same premaster
//! secret without the password crossing the wire.
//!
//! ```text
//! k = H(N | PAD(g))          x = H(s | H(I ":" P))       v = g^x
//! A = g^a                    B = k*v + g^b
//! u = H(PAD(A) | PAD(B))
//! client S = (B - k*g^x)^(a + u*x)
//! server S = (A * v^u)^b
//! ```
//!
//! `H` is SHA-256. All values are big-endian, padded to the group size.

#![allow(clippy::assign_op_pattern, clippy::ptr_offset_with_cast, clippy::manual_range_contains)]

use sha2::{Digest, Sha256};

use crate::random::random_bytes;
use crate::CryptoError;

uint::construct_uint! {
    /// Fixed-width integer wide enough for products of two group elements.
    pub struct U2048(32);
}

/// Group element size in bytes.
pub const SRP_GROUP_LEN: usize = 128;

/// Salt length used for fresh verifiers.
pub const SRP_SALT_LEN: usize = 16;

const PRIVATE_EXPONENT_LEN: usize = 32;

const GROUP_N_HEX: &str = "EEAF0AB9ADB38DD69C33F80AFA8FC5E86072618775FF3C0B9EA2314C9C256576\
D674DF7496EA81D3383B4813D692C6E0E0D5D8E250B98BE48E495C1D6089DAD1\
5DC7D7B46154D6B6CE8EF4AD69B15D4982559B297BCF1885C529F566660E57EC\
68EDBC3C05726CC02FD4CBF4976EAA9AFD5138FE8376435B9FC61D2FC0EB06E3";

const GROUP_G: u64 = 2;

// =============================================================================
// GROUP ARITHMETIC
// =============================================================================

fn group_n() -> U2048 {
    // The constant is valid hex; an empty decode would only yield zero.
    let bytes = hex::decode(GROUP_N_HEX).unwrap_or_default();
    U2048::from_big_endian(&bytes)
}

fn group_g() -> U2048 {
    U2048::from(GROUP_G)
}

fn mod_pow(base: U2048, exp: U2048, modulus: U2048) -> U2048 {
    let base = base % modulus;
    let mut result = U2048::one();
    for i in (0..exp.bits()).rev() {
        result = (result * result) % modulus;
        if exp.bit(i) {
            result = (result * base) % modulus;
        }
    }
    result % modulus
}

fn pad(value: U2048) -> [u8; SRP_GROUP_LEN] {
    let mut wide = [0u8; 256];
    value.to_big_endian(&mut wide);
    let mut out = [0u8; SRP_GROUP_LEN];
    out.copy_from_slice(&wide[256 - SRP_GROUP_LEN..]);
    out
}

fn hash_to_int(parts: &[&[u8]]) -> U2048 {
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update(part);
    }
    U2048::from_big_endian(&hasher.finalize())
}

fn parse_element(bytes: &[u8], what: &'static str) -> Result<U2048, CryptoError> {
    if bytes.is_empty() || bytes.len() > SRP_GROUP_LEN {
        return Err(CryptoError::IllegalSrpParameter(what));
    }
    let n = group_n();
    let value = U2048::from_big_endian(bytes);
    if (value % n).is_zero() {
        return Err(CryptoError::IllegalSrpParameter(what));
    }
    Ok(value % n)
}

fn multiplier() -> U2048 {
    hash_to_int(&[&pad(group_n())[..], &pad(group_g())[..]])
}

fn private_key_x(user: &str, password: &str, salt: &[u8]) -> U2048 {
    let inner = Sha256::new()
        .chain_update(user.as_bytes())
        .chain_update(b":")
        .chain_update(password.as_bytes())
        .finalize();
    hash_to_int(&[salt, &inner[..]])
}

fn scrambler(a_pub: U2048, b_pub: U2048) -> Result<U2048, CryptoError> {
    let u = hash_to_int(&[&pad(a_pub)[..], &pad(b_pub)[..]]);
    if u.is_zero() {
        return Err(CryptoError::IllegalSrpParameter("u"));
    }
    Ok(u)
}

fn random_exponent() -> U2048 {
    U2048::from_big_endian(&random_bytes(PRIVATE_EXPONENT_LEN))
}

/// Password verifier `v = g^x`, padded to the group size.
#[must_use]
pub fn srp_verifier(user: &str, password: &str, salt: &[u8]) -> Vec<u8> {
    let x = private_key_x(user, password, salt);
    pad(mod_pow(group_g(), x, group_n())).to_vec()
}

// =============================================================================
// CLIENT
// =============================================================================

/// Client half of an SRP exchange.
pub struct SrpClient {
    a: U2048,
    a_pub: U2048,
}

impl SrpClient {
    /// Pick a fresh private exponent.
    #[must_use]
    pub fn new() -> Self {
        let a = random_exponent();
        let a_pub = mod_pow(group_g(), a, group_n());
        Self { a, a_pub }
    }

    /// `A`, padded to the group size.
    #[must_use]
    pub fn public_bytes(&self) -> Vec<u8> {
        pad(self.a_pub).to_vec()
    }

    /// Derive the premaster secret from the server's salt and `B`.
    ///
    /// # Errors
    ///
    /// Returns `CryptoError::IllegalSrpParameter` if `B` is zero mod N,
    /// oversized, or yields `u == 0`.
    pub fn premaster_secret(
        &self,
        user: &str,
        password: &str,
        salt: &[u8],
        server_public: &[u8],
    ) -> Result<Vec<u8>, CryptoError> {
        let n = group_n();
        let b_pub = parse_element(server_public, "B")?;
        let u = scrambler(self.a_pub, b_pub)?;
        let x = private_key_x(user, password, salt);
        let kgx = (multiplier() * mod_pow(group_g(), x, n)) % n;
        let base = (b_pub + n - kgx) % n;
        let exp = self.a + u * x;
        Ok(pad(mod_pow(base, exp, n)).to_vec())
    }
}

impl Default for SrpClient {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// SERVER
// =============================================================================

/// Server half of an SRP exchange, holding the password verifier.
pub struct SrpServer {
    b: U2048,
    b_pub: U2048,
    verifier: U2048,
}

impl SrpServer {
    /// Start from a stored verifier.
    ///
    /// # Errors
    ///
    /// Returns `CryptoError::IllegalSrpParameter` if the verifier is not a group element.
    pub fn from_verifier(verifier: &[u8]) -> Result<Self, CryptoError> {
        let n = group_n();
        let v = parse_element(verifier, "v")?;
        let b = random_exponent();
        let b_pub = (multiplier() * v + mod_pow(group_g(), b, n)) % n;
        Ok(Self {
            b,
            b_pub,
            verifier: v,
        })
    }

    /// Start from a cleartext password.
    ///
    /// # Errors
    ///
    /// See [`SrpServer::from_verifier`].
    pub fn from_password(user: &str, password: &str, salt: &[u8]) -> Result<Self, CryptoError> {
        Self::from_verifier(&srp_verifier(user, password, salt))
    }

    /// `B`, padded to the group size.
    #[must_use]
    pub fn public_bytes(&self) -> Vec<u8> {
        pad(self.b_pub).to_vec()
    }

    /// Derive the premaster secret from the client's `A`.
    ///
    /// # Errors
    ///
    /// Returns `CryptoError::IllegalSrpParameter` if `A` is zero mod N or oversized.
    pub fn premaster_secret(&self, client_public: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let n = group_n();
        let a_pub = parse_element(client_public, "A")?;
        let u = scrambler(a_pub, self.b_pub)?;
        let base = (a_pub * mod_pow(self.verifier, u, n)) % n;
        Ok(pad(mod_pow(base, self.b, n)).to_vec())
    }
}
