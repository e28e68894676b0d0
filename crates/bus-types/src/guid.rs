//! 128-bit peer GUIDs.

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::errors::BusError;

/// Globally unique peer identifier, distinct from the transient unique bus name.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Guid128([u8; 16]);

impl Guid128 {
    /// Size of a GUID in bytes.
    pub const SIZE: usize = 16;

    /// Generate a fresh random GUID.
    #[must_use]
    pub fn generate() -> Self {
        Self(Uuid::new_v4().into_bytes())
    }

    #[must_use]
    pub const fn from_bytes(bytes: [u8; 16]) -> Self {
        Self(bytes)
    }

    /// Parse a GUID from a byte slice.
    ///
    /// # Errors
    ///
    /// Returns `BusError::InvalidData` if the slice is not 16 bytes long.
    pub fn from_slice(bytes: &[u8]) -> Result<Self, BusError> {
        let arr: [u8; 16] = bytes.try_into().map_err(|_| BusError::InvalidData)?;
        Ok(Self(arr))
    }

    /// Parse the 32-character hex form.
    ///
    /// # Errors
    ///
    /// Returns `BusError::InvalidData` on malformed input.
    pub fn from_hex(s: &str) -> Result<Self, BusError> {
        let bytes = hex::decode(s).map_err(|_| BusError::InvalidData)?;
        Self::from_slice(&bytes)
    }

    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; 16] {
        &self.0
    }

    /// Lowercase hex form.
    #[must_use]
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Short form used in logs (first 8 hex characters).
    #[must_use]
    pub fn short(&self) -> String {
        hex::encode(&self.0[..4])
    }
}

impl fmt::Display for Guid128 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for Guid128 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Guid128({})", self.short())
    }
}
