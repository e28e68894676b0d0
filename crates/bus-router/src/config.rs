//! Router configuration.

use std::env;

/// Runtime switches for the router.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouterConfig {
    /// Apply the legacy delivery quirks after primary filtering.
    ///
    /// Only takes effect when the crate is built with the `push-compat`
    /// feature.
    pub push_compat: bool,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self { push_compat: true }
    }
}

impl RouterConfig {
    /// Read overrides from the environment.
    ///
    /// # Environment Variables
    ///
    /// - `BUS_ROUTER_PUSH_COMPAT`: `0`/`false` disables the legacy quirks (default: true)
    #[must_use]
    pub fn from_env() -> Self {
        let push_compat = env::var("BUS_ROUTER_PUSH_COMPAT")
            .map(|v| !matches!(v.to_ascii_lowercase().as_str(), "0" | "false" | "off"))
            .unwrap_or(true);
        Self { push_compat }
    }

    /// Strict routing with every legacy quirk disabled.
    #[must_use]
    pub fn strict() -> Self {
        Self { push_compat: false }
    }
}
