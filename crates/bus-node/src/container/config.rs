//! # Node Configuration
//!
//! Unified configuration for one bus node: its identity, the router, the
//! peer authentication engine and the key store backing.
//!
//! ## Environment Variables
//!
//! | Variable | Default | Description |
//! |----------|---------|-------------|
//! | `BUS_UNIQUE_NAME` | generated | Unique name of the node's local endpoint |
//! | `BUS_NODE_GUID` | key store GUID | 32 hex digit node GUID |
//! | `BUS_KEYSTORE_PATH` | unset | Key store file; unset keeps keys in memory |
//! | `BUS_KEYSTORE_SHARED` | `false` | Other processes write the same key store |
//! | `BUS_ALLOW_REMOTE` | `true` | Local endpoint accepts off-device messages |
//!
//! Router and authentication settings are read by [`RouterConfig::from_env`]
//! and [`AuthConfig::from_env`].

use std::env;
use std::path::PathBuf;

use bus_peer_auth::AuthConfig;
use bus_router::RouterConfig;
use bus_types::Guid128;
use thiserror::Error;

/// Complete node configuration.
#[derive(Debug, Clone)]
pub struct NodeConfig {
    /// Unique name of the local endpoint. `None` lets the router mint one.
    pub unique_name: Option<String>,
    /// Node GUID. `None` uses the key store's GUID.
    pub guid: Option<Guid128>,
    pub router: RouterConfig,
    pub auth: AuthConfig,
    /// Key store file. `None` keeps master secrets in memory only.
    pub keystore_path: Option<PathBuf>,
    /// The key store file is shared with other processes.
    pub keystore_shared: bool,
    /// Local endpoint accepts messages that arrived from other nodes.
    pub allow_remote: bool,
}

/// Configuration errors.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("unique name {0:?} must look like ':<guid>.<n>'")]
    InvalidUniqueName(String),

    #[error("a shared key store needs a key store path")]
    SharedKeyStoreWithoutPath,

    #[error("peer security needs at least one dispatcher worker")]
    NoDispatcherWorkers,

    #[error("max_auth_attempts must be at least 1")]
    NoAuthAttempts,

    #[error("invalid {key}: {value:?}")]
    InvalidValue { key: &'static str, value: String },
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            unique_name: None,
            guid: None,
            router: RouterConfig::default(),
            auth: AuthConfig::default(),
            keystore_path: None,
            keystore_shared: false,
            allow_remote: true,
        }
    }
}

impl NodeConfig {
    /// Settings for tests: short authentication timeouts, in-memory keys.
    #[must_use]
    pub fn for_testing() -> Self {
        Self {
            auth: AuthConfig::for_testing(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_mechanisms(mut self, list: &str) -> Self {
        self.auth = self.auth.with_mechanisms(list);
        self
    }

    /// Read the node configuration from the environment.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidValue` for a malformed GUID.
    pub fn from_env() -> Result<Self, ConfigError> {
        let guid = match env::var("BUS_NODE_GUID") {
            Ok(hex) => Some(Guid128::from_hex(&hex).map_err(|_| ConfigError::InvalidValue {
                key: "BUS_NODE_GUID",
                value: hex.clone(),
            })?),
            Err(_) => None,
        };
        let flag = |key: &str, fallback: bool| {
            env::var(key)
                .map(|v| matches!(v.to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on"))
                .unwrap_or(fallback)
        };
        Ok(Self {
            unique_name: env::var("BUS_UNIQUE_NAME").ok(),
            guid,
            router: RouterConfig::from_env(),
            auth: AuthConfig::from_env(),
            keystore_path: env::var("BUS_KEYSTORE_PATH").ok().map(PathBuf::from),
            keystore_shared: flag("BUS_KEYSTORE_SHARED", false),
            allow_remote: flag("BUS_ALLOW_REMOTE", true),
        })
    }

    /// Check the configuration before anything is built from it.
    ///
    /// # Errors
    ///
    /// The first problem found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if let Some(name) = &self.unique_name {
            let well_formed = name
                .strip_prefix(':')
                .and_then(|rest| rest.split_once('.'))
                .is_some_and(|(guid, n)| !guid.is_empty() && !n.is_empty());
            if !well_formed {
                return Err(ConfigError::InvalidUniqueName(name.clone()));
            }
        }
        if self.keystore_shared && self.keystore_path.is_none() {
            return Err(ConfigError::SharedKeyStoreWithoutPath);
        }
        if !self.auth.mechanisms.is_empty() && self.auth.dispatcher_workers == 0 {
            return Err(ConfigError::NoDispatcherWorkers);
        }
        if self.auth.max_auth_attempts == 0 {
            return Err(ConfigError::NoAuthAttempts);
        }
        Ok(())
    }
}
