//! # Bus Crypto - Authentication and Session Primitives
//!
//! ## Components
//!
//! | Module | Algorithm | Use Case |
//! |--------|-----------|----------|
//! | `ecdhe` | ECDH over secp256k1 | Key exchange master secret |
//! | `ecdsa` | ECDSA over secp256k1 | Identity verifiers, certificate signing |
//! | `prf` | HMAC-SHA256 expansion | Master secret, verifiers, session keys |
//! | `hashing` | SHA-256 | Conversation transcript |
//! | `srp` | SRP-6a, 1024-bit group | Password mechanisms |
//! | `symmetric` | AES-128-GCM | Message body encryption |
//!
//! ## Security Properties
//!
//! - **ECDSA**: RFC 6979 deterministic nonces
//! - **Verifier comparison**: constant time (`subtle`)
//! - **Key material**: session and signing keys are zeroized on drop

#![warn(clippy::all)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

pub mod ecdhe;
pub mod ecdsa;
pub mod errors;
pub mod hashing;
pub mod prf;
pub mod random;
pub mod srp;
pub mod symmetric;

// Re-exports
pub use ecdhe::{EcdheKeyPair, ECC_CURVE_ID, MASTER_SECRET_LEN, PUBLIC_KEY_LEN};
pub use ecdsa::{EcdsaKeyPair, EcdsaPublicKey, EcdsaSignature};
pub use errors::CryptoError;
pub use hashing::{sha256, ConversationHash};
pub use prf::prf;
pub use random::{constant_time_eq, rand_hex, random_bytes};
pub use srp::{srp_verifier, SrpClient, SrpServer, SRP_SALT_LEN};
pub use symmetric::{SessionKey, SESSION_KEY_LEN};
