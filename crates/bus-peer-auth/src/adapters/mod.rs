//! # Adapters
//!
//! Key stores and the in-process transport.

pub mod file_keystore;
pub mod loopback;
pub mod memory_keystore;

pub use file_keystore::FileKeyStore;
pub use loopback::LoopbackBus;
pub use memory_keystore::{MemoryKeyStore, SharedKeyBacking};
