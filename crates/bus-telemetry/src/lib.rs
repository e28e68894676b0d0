//! # Bus Telemetry
//!
//! Logging and metrics shared by the router, the peer authentication engine
//! and the node runtime.
//!
//! ## Components
//!
//! - **Logs**: `tracing` events with a `subsystem` field (`log_event!`)
//! - **Metrics**: Prometheus collectors, exported with [`encode_metrics`]
//!
//! ## Usage
//!
//! ```rust,ignore
//! use bus_telemetry::{init_telemetry, TelemetryConfig};
//!
//! let _guard = init_telemetry(TelemetryConfig::from_env())?;
//! ```
//!
//! ## Environment Variables
//!
//! | Variable | Default | Description |
//! |----------|---------|-------------|
//! | `BUS_SERVICE_NAME` | `bus-daemon` | Service name in log output |
//! | `BUS_LOG_LEVEL` | `info` | Log level filter (falls back to `RUST_LOG`) |
//! | `BUS_CONSOLE_OUTPUT` | `true` | Write logs to the console |
//! | `BUS_JSON_LOGS` | `false` | JSON formatted logs |
//! | `BUS_METRICS_PORT` | `9100` | Metrics port for the hosting process |

#![cfg_attr(test, allow(clippy::unwrap_used))]

mod config;
pub mod logging;
pub mod metrics;
mod tracing_setup;

pub use config::TelemetryConfig;
pub use tracing_setup::init_subscriber;
pub use logging::{SUBSYSTEM_NODE, SUBSYSTEM_PEER_AUTH, SUBSYSTEM_ROUTER};
pub use metrics::{
    encode_metrics, register_metrics, HistogramTimer, AUTH_ATTEMPTS, AUTH_DURATION,
    MESSAGES_ROUTED, PEERS_SECURE, PUSH_DURATION, ROUTE_FAILURES, SECURITY_VIOLATIONS,
};

use thiserror::Error;

/// Telemetry initialization errors
#[derive(Error, Debug)]
pub enum TelemetryError {
    #[error("Failed to initialize tracing subscriber: {0}")]
    SubscriberInit(String),

    #[error("Failed to initialize Prometheus metrics: {0}")]
    MetricsInit(String),
}

/// Initialize logging and metrics.
///
/// Returns a guard that should be held for the lifetime of the process.
///
/// # Errors
///
/// Fails if a subscriber is already installed or metrics were registered twice.
pub fn init_telemetry(config: TelemetryConfig) -> Result<TelemetryGuard, TelemetryError> {
    register_metrics()?;
    tracing_setup::init_subscriber(&config)?;

    tracing::info!(
        service = %config.service_name,
        json_logs = config.json_logs,
        metrics_port = config.metrics_port,
        "telemetry initialized"
    );

    Ok(TelemetryGuard {
        service_name: config.service_name,
    })
}

/// Guard that keeps telemetry active.
pub struct TelemetryGuard {
    service_name: String,
}

impl Drop for TelemetryGuard {
    fn drop(&mut self) {
        tracing::info!(service = %self.service_name, "shutting down telemetry");
    }
}

/// Convenience macro for recording a metric increment.
#[macro_export]
macro_rules! metric_inc {
    ($metric:expr) => {
        $metric.inc()
    };
    ($metric:expr, $labels:expr) => {
        $metric.with_label_values($labels).inc()
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_for_testing_config_is_quiet() {
        let config = TelemetryConfig::for_testing();
        assert_eq!(config.log_level, "warn");
    }

    #[test]
    fn test_encode_metrics_after_register() {
        let _ = register_metrics();
        MESSAGES_ROUTED.with_label_values(&["broadcast"]).inc();
        let text = encode_metrics().unwrap();
        assert!(text.contains("bus_router_messages_routed_total"));
    }
}
