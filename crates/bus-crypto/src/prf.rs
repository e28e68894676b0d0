//! # Pseudorandom Function
//!
//! TLS-style expansion built on HMAC-SHA256:
//!
//! ```text
//! D(1) = HMAC(secret, label || seed)
//! D(i) = HMAC(secret, D(i-1) || label || seed)
//! out  = D(1) || D(2) || ... truncated to the requested length
//! ```
//!
//! Used for master secrets, verifiers and session keys.

use hmac::{Hmac, Mac};
use sha2::Sha256;
use zeroize::Zeroize;

type HmacSha256 = Hmac<Sha256>;

/// SHA-256 digest size.
pub const DIGEST_SIZE: usize = 32;

/// Expand `secret` into `out_len` pseudorandom bytes bound to `label` and `seed`.
#[must_use]
pub fn prf(secret: &[u8], label: &str, seed: &[u8], out_len: usize) -> Vec<u8> {
    let mut out = Vec::with_capacity(out_len);
    let mut digest = [0u8; DIGEST_SIZE];
    let mut first = true;

    while out.len() < out_len {
        // HMAC accepts keys of any length.
        let mut mac = match <HmacSha256 as Mac>::new_from_slice(secret) {
            Ok(mac) => mac,
            Err(_) => break,
        };
        if !first {
            mac.update(&digest);
        }
        mac.update(label.as_bytes());
        mac.update(seed);
        digest.copy_from_slice(&mac.finalize().into_bytes());
        first = false;

        let take = DIGEST_SIZE.min(out_len - out.len());
        out.extend_from_slice(&digest[..take]);
    }
    digest.zeroize();
    out
}
