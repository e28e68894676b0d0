//! # Status Types
//!
//! One status taxonomy shared by every bus component. Routing, authentication,
//! crypto and key store failures all surface as a [`BusError`].
//!
//! Statuses travel between peers inside `org.alljoyn.Bus.ErStatus` error
//! replies, so every variant has a stable wire name (see [`BusError::status_name`]).

use thiserror::Error;

/// Errors produced by the router, the peer authentication engine and their
/// collaborators.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum BusError {
    // =========================================================================
    // ROUTING
    // =========================================================================
    /// No eligible destination for the message.
    #[error("no route to destination")]
    NoRoute,

    /// Policy rules denied delivery.
    #[error("policy violation")]
    PolicyViolation,

    /// Destination endpoint is closing.
    #[error("endpoint closing")]
    EndpointClosing,

    /// The bus is stopping.
    #[error("bus stopping")]
    Stopping,

    /// Permission denied by the access-control layer.
    #[error("permission denied")]
    PermissionDenied,

    /// Match rule was never registered for this endpoint.
    #[error("match rule not found")]
    MatchRuleNotFound,

    /// Match rule text could not be parsed.
    #[error("invalid match rule: {0}")]
    InvalidMatchRule(String),

    /// Endpoint lookup failed.
    #[error("no such endpoint: {0}")]
    NoEndpoint(String),

    // =========================================================================
    // AUTHENTICATION
    // =========================================================================
    /// Authentication failed (verifier mismatch, rejected suite, SASL failure).
    #[error("authentication failed")]
    AuthFail,

    /// The application declined to supply credentials.
    #[error("authentication rejected by user")]
    AuthUserReject,

    /// No authentication mechanism is configured.
    #[error("no authentication mechanism")]
    NoAuthenticationMechanism,

    /// Peer proposed an irreconcilable authentication version.
    #[error("peer authentication version mismatch")]
    PeerAuthVersionMismatch,

    /// Stored master secret has expired.
    #[error("key expired")]
    KeyExpired,

    /// Key store has no key for the peer.
    #[error("key unavailable")]
    KeyUnavailable,

    /// Local or remote GUID is missing or does not match.
    #[error("no peer guid")]
    NoPeerGuid,

    /// Remote peer has no authentication object.
    #[error("no such object")]
    NoSuchObject,

    /// Another authentication attempt is in progress.
    #[error("operation would block")]
    WouldBlock,

    /// Destination has not been authenticated.
    #[error("destination not authenticated")]
    DestinationNotAuthenticated,

    /// Malformed payload received from a peer.
    #[error("invalid data")]
    InvalidData,

    /// A method call was answered with an error reply.
    #[error("reply is error message: {0}")]
    ReplyIsErrorMessage(String),

    /// Round trip exceeded its timeout.
    #[error("timeout")]
    Timeout,

    // =========================================================================
    // CRYPTO / KEY MATERIAL
    // =========================================================================
    /// Unsupported key generation parameters.
    #[error("illegal crypto parameters")]
    CryptoIllegalParameters,

    /// Generic crypto primitive failure.
    #[error("crypto error: {0}")]
    Crypto(String),

    /// Message body could not be decrypted.
    #[error("message decryption failed")]
    MessageDecryptionFailed,

    /// Key blob could not be parsed.
    #[error("corrupt keyblob")]
    CorruptKeyblob,

    /// Key store could not be read or written.
    #[error("key store error: {0}")]
    KeyStore(String),

    /// Message or argument could not be (de)serialized.
    #[error("marshal error: {0}")]
    Marshal(String),

    /// Catch-all failure with a description.
    #[error("{0}")]
    Fail(String),
}

impl BusError {
    /// Stable wire name for this status.
    #[must_use]
    pub fn status_name(&self) -> &'static str {
        match self {
            Self::NoRoute => "ER_BUS_NO_ROUTE",
            Self::PolicyViolation => "ER_BUS_POLICY_VIOLATION",
            Self::EndpointClosing => "ER_BUS_ENDPOINT_CLOSING",
            Self::Stopping => "ER_BUS_STOPPING",
            Self::PermissionDenied => "ER_PERMISSION_DENIED",
            Self::MatchRuleNotFound => "ER_BUS_MATCH_RULE_NOT_FOUND",
            Self::InvalidMatchRule(_) => "ER_BUS_BAD_MATCH_RULE",
            Self::NoEndpoint(_) => "ER_BUS_NO_ENDPOINT",
            Self::AuthFail => "ER_AUTH_FAIL",
            Self::AuthUserReject => "ER_AUTH_USER_REJECT",
            Self::NoAuthenticationMechanism => "ER_BUS_NO_AUTHENTICATION_MECHANISM",
            Self::PeerAuthVersionMismatch => "ER_BUS_PEER_AUTH_VERSION_MISMATCH",
            Self::KeyExpired => "ER_BUS_KEY_EXPIRED",
            Self::KeyUnavailable => "ER_BUS_KEY_UNAVAILABLE",
            Self::NoPeerGuid => "ER_BUS_NO_PEER_GUID",
            Self::NoSuchObject => "ER_BUS_NO_SUCH_OBJECT",
            Self::WouldBlock => "ER_WOULDBLOCK",
            Self::DestinationNotAuthenticated => "ER_BUS_DESTINATION_NOT_AUTHENTICATED",
            Self::InvalidData => "ER_INVALID_DATA",
            Self::ReplyIsErrorMessage(_) => "ER_BUS_REPLY_IS_ERROR_MESSAGE",
            Self::Timeout => "ER_TIMEOUT",
            Self::CryptoIllegalParameters => "ER_CRYPTO_ILLEGAL_PARAMETERS",
            Self::Crypto(_) => "ER_CRYPTO_ERROR",
            Self::MessageDecryptionFailed => "ER_BUS_MESSAGE_DECRYPTION_FAILED",
            Self::CorruptKeyblob => "ER_BUS_CORRUPT_KEYBLOB",
            Self::KeyStore(_) => "ER_BUS_KEYSTORE_ERROR",
            Self::Marshal(_) => "ER_BUS_BAD_VALUE",
            Self::Fail(_) => "ER_FAIL",
        }
    }

    /// Inverse of [`BusError::status_name`] for statuses without payload.
    ///
    /// Statuses that carry a description come back as [`BusError::Fail`]
    /// with the wire name attached.
    #[must_use]
    pub fn from_status_name(name: &str) -> Self {
        match name {
            "ER_BUS_NO_ROUTE" => Self::NoRoute,
            "ER_BUS_POLICY_VIOLATION" => Self::PolicyViolation,
            "ER_BUS_ENDPOINT_CLOSING" => Self::EndpointClosing,
            "ER_BUS_STOPPING" => Self::Stopping,
            "ER_PERMISSION_DENIED" => Self::PermissionDenied,
            "ER_BUS_MATCH_RULE_NOT_FOUND" => Self::MatchRuleNotFound,
            "ER_AUTH_FAIL" => Self::AuthFail,
            "ER_AUTH_USER_REJECT" => Self::AuthUserReject,
            "ER_BUS_NO_AUTHENTICATION_MECHANISM" => Self::NoAuthenticationMechanism,
            "ER_BUS_PEER_AUTH_VERSION_MISMATCH" => Self::PeerAuthVersionMismatch,
            "ER_BUS_KEY_EXPIRED" => Self::KeyExpired,
            "ER_BUS_KEY_UNAVAILABLE" => Self::KeyUnavailable,
            "ER_BUS_NO_PEER_GUID" => Self::NoPeerGuid,
            "ER_BUS_NO_SUCH_OBJECT" => Self::NoSuchObject,
            "ER_WOULDBLOCK" => Self::WouldBlock,
            "ER_BUS_DESTINATION_NOT_AUTHENTICATED" => Self::DestinationNotAuthenticated,
            "ER_INVALID_DATA" => Self::InvalidData,
            "ER_TIMEOUT" => Self::Timeout,
            "ER_CRYPTO_ILLEGAL_PARAMETERS" => Self::CryptoIllegalParameters,
            "ER_BUS_MESSAGE_DECRYPTION_FAILED" => Self::MessageDecryptionFailed,
            "ER_BUS_CORRUPT_KEYBLOB" => Self::CorruptKeyblob,
            other => Self::Fail(other.to_string()),
        }
    }

    /// Transient delivery statuses that are not escalated when other
    /// destinations accepted the message.
    #[must_use]
    pub fn is_transient_delivery(&self) -> bool {
        matches!(self, Self::EndpointClosing | Self::Stopping)
    }
}

/// Convenience alias used across the bus crates.
pub type BusResult<T> = Result<T, BusError>;
