//! # Conversation Hashing
//!
//! Running SHA-256 over an authentication conversation. The digest can be
//! read at any point without ending the conversation.

use sha2::{Digest, Sha256};

/// Stateful SHA-256 accumulator.
#[derive(Clone, Default)]
pub struct ConversationHash {
    inner: Sha256,
}

impl ConversationHash {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Absorb raw bytes.
    pub fn update(&mut self, data: &[u8]) -> &mut Self {
        self.inner.update(data);
        self
    }

    /// Absorb bytes preceded by their little-endian `u32` length.
    pub fn update_length_prefixed(&mut self, data: &[u8]) -> &mut Self {
        let len = u32::try_from(data.len()).unwrap_or(u32::MAX);
        self.inner.update(len.to_le_bytes());
        self.inner.update(data);
        self
    }

    /// Current digest; the accumulator keeps running.
    #[must_use]
    pub fn digest(&self) -> [u8; 32] {
        self.inner.clone().finalize().into()
    }
}

/// One-shot SHA-256.
#[must_use]
pub fn sha256(data: &[u8]) -> [u8; 32] {
    Sha256::digest(data).into()
}
