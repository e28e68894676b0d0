//! Randomness and constant-time helpers.

use rand::RngCore;
use subtle::ConstantTimeEq;

/// Fill a fresh buffer with `len` random bytes.
#[must_use]
pub fn random_bytes(len: usize) -> Vec<u8> {
    let mut buf = vec![0u8; len];
    rand::thread_rng().fill_bytes(&mut buf);
    buf
}

/// Random uppercase hex string of `len` characters.
#[must_use]
pub fn rand_hex(len: usize) -> String {
    let mut s = hex::encode_upper(random_bytes(len.div_ceil(2)));
    s.truncate(len);
    s
}

/// Constant-time equality. Slices of different length compare unequal.
#[must_use]
pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    a.len() == b.len() && bool::from(a.ct_eq(b))
}
