//! # Router Service
//!
//! [`DaemonRouter`] implements the [`MessageRouter`](crate::ports::MessageRouter)
//! driving port on top of the name and rule tables.
//!
//! ## Locking
//!
//! One router lock guards the local endpoint, the bus-to-bus set and the
//! self-join set. The name and rule tables carry their own locks. No lock is
//! held while pushing to an endpoint.

mod core;
mod push;

#[cfg(feature = "push-compat")]
mod compat;

pub use self::core::DaemonRouter;
pub use push::{BLOCKED_ERROR_NAME, DAEMON_INTERFACE, DETACH_SESSION_MEMBER};
