//! # Bus Peer Authentication
//!
//! Mutual authentication between bus peers and protection of the messages
//! they exchange.
//!
//! ## Architecture
//!
//! | Layer      | Contents                                                   |
//! |------------|------------------------------------------------------------|
//! | `domain`   | versions, suites, rights, key blobs, peer state, exchangers |
//! | `ports`    | control interface and security API (inbound), key store, transport, listener, delivery (outbound) |
//! | `service`  | `PeerAuthEngine`                                           |
//! | `adapters` | `MemoryKeyStore`, `FileKeyStore`, `LoopbackBus`            |
//!
//! ## Conversation
//!
//! 1. `ExchangeGuids` agrees on a version
//! 2. `GenSessionKey` reuses a stored master secret when there is one
//! 3. otherwise a new master secret: ECDHE (`ExchangeSuites`,
//!    `KeyExchange`, `KeyAuthentication`) or SASL (`AuthChallenge`)
//! 4. `ExchangeGroupKeys` under the new session key

#![warn(clippy::all)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

pub mod adapters;
pub mod config;
pub mod domain;
pub mod ports;
pub mod service;

pub use adapters::{FileKeyStore, LoopbackBus, MemoryKeyStore, SharedKeyBacking};
pub use config::AuthConfig;
pub use domain::{cred, AuthMechanism, Credentials, KeyBlob, PeerState, PeerStateTable};
pub use ports::{AuthListener, DeliveryPort, KeyStore, PeerControlInbound, PeerSecurity, PeerTransport};
pub use service::PeerAuthEngine;
