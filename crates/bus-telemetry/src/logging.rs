//! Structured logging helpers.
//!
//! Every event carries a `subsystem` field so router, authentication and
//! node output can be filtered apart:
//!
//! | Subsystem   | Emitted by          |
//! |-------------|---------------------|
//! | `router`    | `bus-router`        |
//! | `peer-auth` | `bus-peer-auth`     |
//! | `node`      | `bus-node`          |

/// Subsystem tag for routing events.
pub const SUBSYSTEM_ROUTER: &str = "router";

/// Subsystem tag for authentication events.
pub const SUBSYSTEM_PEER_AUTH: &str = "peer-auth";

/// Subsystem tag for node lifecycle events.
pub const SUBSYSTEM_NODE: &str = "node";

/// Emit a structured event tagged with a subsystem.
///
/// ```rust,ignore
/// log_event!(debug, SUBSYSTEM_ROUTER, "message routed", dest = %name, serial = 7);
/// ```
#[macro_export]
macro_rules! log_event {
    (trace, $subsystem:expr, $msg:expr $(, $($field:tt)*)?) => {
        tracing::trace!(
            subsystem = $subsystem,
            $($($field)*,)?
            $msg
        )
    };

    (debug, $subsystem:expr, $msg:expr $(, $($field:tt)*)?) => {
        tracing::debug!(
            subsystem = $subsystem,
            $($($field)*,)?
            $msg
        )
    };

    (info, $subsystem:expr, $msg:expr $(, $($field:tt)*)?) => {
        tracing::info!(
            subsystem = $subsystem,
            $($($field)*,)?
            $msg
        )
    };

    (warn, $subsystem:expr, $msg:expr $(, $($field:tt)*)?) => {
        tracing::warn!(
            subsystem = $subsystem,
            $($($field)*,)?
            $msg
        )
    };

    (error, $subsystem:expr, $msg:expr $(, $($field:tt)*)?) => {
        tracing::error!(
            subsystem = $subsystem,
            $($($field)*,)?
            $msg
        )
    };
}

/// Log a peer-related event with the peer name attached.
#[macro_export]
macro_rules! log_peer_event {
    ($level:ident, $subsystem:expr, $msg:expr, $peer:expr $(, $($field:tt)*)?) => {
        tracing::$level!(
            subsystem = $subsystem,
            peer = %$peer,
            $($($field)*,)?
            $msg
        )
    };
}
