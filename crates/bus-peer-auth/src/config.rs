//! Authentication engine configuration.

use std::env;
use std::time::Duration;

use crate::domain::{parse_mechanisms, AuthMechanism};

/// Settings for [`PeerAuthEngine`](crate::PeerAuthEngine).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthConfig {
    /// Timeout for round trips that may wait on interactive credentials.
    pub auth_timeout: Duration,
    /// Timeout for purely cryptographic round trips.
    pub default_timeout: Duration,
    /// Worker tasks running slow authentication handlers.
    pub dispatcher_workers: usize,
    /// Credential requests per conversation before giving up.
    pub max_auth_attempts: u16,
    /// Enabled mechanisms. Empty disables peer security.
    pub mechanisms: Vec<AuthMechanism>,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            auth_timeout: Duration::from_secs(120),
            default_timeout: Duration::from_secs(10),
            dispatcher_workers: 3,
            max_auth_attempts: 1,
            mechanisms: Vec::new(),
        }
    }
}

impl AuthConfig {
    /// Short timeouts for tests.
    #[must_use]
    pub fn for_testing() -> Self {
        Self {
            auth_timeout: Duration::from_secs(5),
            default_timeout: Duration::from_secs(2),
            dispatcher_workers: 3,
            max_auth_attempts: 3,
            mechanisms: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_mechanisms(mut self, list: &str) -> Self {
        self.mechanisms = parse_mechanisms(list);
        self
    }

    /// Read overrides from the environment.
    ///
    /// # Environment Variables
    ///
    /// - `BUS_AUTH_TIMEOUT_SECS`: interactive round trip timeout (default: 120)
    /// - `BUS_AUTH_DEFAULT_TIMEOUT_SECS`: other round trips (default: 10)
    /// - `BUS_AUTH_WORKERS`: dispatcher workers (default: 3)
    /// - `BUS_AUTH_MAX_ATTEMPTS`: credential attempts (default: 1)
    /// - `BUS_AUTH_MECHANISMS`: space separated mechanism names
    #[must_use]
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let secs = |key: &str, fallback: Duration| {
            env::var(key)
                .ok()
                .and_then(|v| v.parse::<u64>().ok())
                .map_or(fallback, Duration::from_secs)
        };
        Self {
            auth_timeout: secs("BUS_AUTH_TIMEOUT_SECS", defaults.auth_timeout),
            default_timeout: secs("BUS_AUTH_DEFAULT_TIMEOUT_SECS", defaults.default_timeout),
            dispatcher_workers: env::var("BUS_AUTH_WORKERS")
                .ok()
                .and_then(|v| v.parse().ok())
                .filter(|n| *n > 0)
                .unwrap_or(defaults.dispatcher_workers),
            max_auth_attempts: env::var("BUS_AUTH_MAX_ATTEMPTS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.max_auth_attempts),
            mechanisms: env::var("BUS_AUTH_MECHANISMS")
                .map(|v| parse_mechanisms(&v))
                .unwrap_or_default(),
        }
    }
}
