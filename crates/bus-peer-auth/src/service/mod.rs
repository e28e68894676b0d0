//! # Peer Authentication Service
//!
//! [`PeerAuthEngine`] implements both driving ports
//! ([`PeerControlInbound`](crate::ports::PeerControlInbound) and
//! [`PeerSecurity`](crate::ports::PeerSecurity)).
//!
//! | File              | Contents                                        |
//! |-------------------|-------------------------------------------------|
//! | `core.rs`         | engine state, helpers, control call routing     |
//! | `initiator.rs`    | conversation driver, session and group keys     |
//! | `key_exchange.rs` | ECDHE `KeyExchange` / `KeyAuthentication`       |
//! | `sasl.rs`         | SASL `AuthChallenge`                            |
//! | `responder.rs`    | fast control call handlers                      |
//! | `security.rs`     | encryption, queued messages, violations         |
//! | `dispatcher.rs`   | worker pool for handlers that reach callbacks   |
//!
//! ## Locking
//!
//! | Lock                         | Kind                | Held across awaits |
//! |------------------------------|---------------------|--------------------|
//! | peer state table             | `parking_lot` RW    | no                 |
//! | per-peer fields              | `parking_lot` mutex | no                 |
//! | per-peer transcript          | `tokio` mutex       | never across a round trip |
//! | conversation maps, pending   | `parking_lot` mutex | no                 |
//!
//! The table lock is always taken before a per-peer lock.

mod core;
mod dispatcher;
mod initiator;
mod key_exchange;
mod responder;
mod sasl;
mod security;

pub use self::core::PeerAuthEngine;

#[cfg(test)]
mod tests;
