//! Telemetry configuration from environment variables.

use std::env;

/// Configuration for logging and metrics.
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    /// Service name attached to log output
    pub service_name: String,

    /// Log level filter (trace, debug, info, warn, error) or full directive
    pub log_level: String,

    /// Whether to write log output to the console
    pub console_output: bool,

    /// Whether to format logs as JSON
    pub json_logs: bool,

    /// Port on which the hosting process exposes `encode_metrics()`
    pub metrics_port: u16,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            service_name: "bus-daemon".to_string(),
            log_level: "info".to_string(),
            console_output: true,
            json_logs: false,
            metrics_port: 9100,
        }
    }
}

impl TelemetryConfig {
    /// Create configuration from environment variables.
    ///
    /// # Environment Variables
    ///
    /// - `BUS_SERVICE_NAME`: Service name (default: bus-daemon)
    /// - `BUS_LOG_LEVEL` or `RUST_LOG`: Log level (default: info)
    /// - `BUS_CONSOLE_OUTPUT`: Enable console output (default: true)
    /// - `BUS_JSON_LOGS`: Enable JSON logs (default: false)
    /// - `BUS_METRICS_PORT`: Prometheus metrics port (default: 9100)
    #[must_use]
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            service_name: env::var("BUS_SERVICE_NAME").unwrap_or(defaults.service_name),

            log_level: env::var("BUS_LOG_LEVEL")
                .or_else(|_| env::var("RUST_LOG"))
                .unwrap_or(defaults.log_level),

            console_output: env::var("BUS_CONSOLE_OUTPUT")
                .map(|v| parse_flag(&v, true))
                .unwrap_or(defaults.console_output),

            json_logs: env::var("BUS_JSON_LOGS")
                .map(|v| parse_flag(&v, false))
                .unwrap_or(defaults.json_logs),

            metrics_port: env::var("BUS_METRICS_PORT")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.metrics_port),
        }
    }

    /// Quiet configuration for unit and integration tests.
    #[must_use]
    pub fn for_testing() -> Self {
        Self {
            service_name: "bus-test".to_string(),
            log_level: "warn".to_string(),
            ..Self::default()
        }
    }
}

fn parse_flag(value: &str, default: bool) -> bool {
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => true,
        "0" | "false" | "no" | "off" => false,
        _ => default,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = TelemetryConfig::default();
        assert_eq!(config.service_name, "bus-daemon");
        assert_eq!(config.log_level, "info");
        assert_eq!(config.metrics_port, 9100);
        assert!(!config.json_logs);
    }

    #[test]
    fn test_parse_flag() {
        assert!(parse_flag("TRUE", false));
        assert!(!parse_flag("0", true));
        assert!(parse_flag("maybe", true));
    }
}
