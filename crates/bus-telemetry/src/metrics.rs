//! Prometheus metrics for routing and peer authentication.
//!
//! All metrics follow the naming convention: `bus_<component>_<metric>_<unit>`
//!
//! ## Metric Types
//!
//! - **Counter**: Monotonically increasing value (e.g., messages_routed_total)
//! - **Gauge**: Value that can go up or down (e.g., peers_secure)
//! - **Histogram**: Distribution of values (e.g., push_duration_seconds)

use lazy_static::lazy_static;
use prometheus::{
    exponential_buckets, CounterVec, Encoder, Gauge, Histogram, HistogramOpts, Opts, Registry,
    TextEncoder,
};

use crate::TelemetryError;

lazy_static! {
    /// Global metrics registry
    pub static ref REGISTRY: Registry = Registry::new();

    // =========================================================================
    // ROUTER METRICS
    // =========================================================================

    /// Messages delivered to at least one destination, by routing kind
    pub static ref MESSAGES_ROUTED: CounterVec = CounterVec::new(
        Opts::new("bus_router_messages_routed_total", "Messages routed by kind"),
        &["kind"]  // unicast, broadcast, sessioncast
    ).expect("metric creation failed");

    /// Failed pushes by resulting status
    pub static ref ROUTE_FAILURES: CounterVec = CounterVec::new(
        Opts::new("bus_router_route_failures_total", "Failed pushes by status"),
        &["status"]
    ).expect("metric creation failed");

    /// Time spent inside push_message
    pub static ref PUSH_DURATION: Histogram = Histogram::with_opts(
        HistogramOpts::new(
            "bus_router_push_duration_seconds",
            "Time spent routing a single message"
        ).buckets(exponential_buckets(0.00001, 2.0, 14).expect("bucket layout"))
    ).expect("metric creation failed");

    // =========================================================================
    // AUTHENTICATION METRICS
    // =========================================================================

    /// Authentication conversations by role and outcome
    pub static ref AUTH_ATTEMPTS: CounterVec = CounterVec::new(
        Opts::new("bus_auth_attempts_total", "Authentication conversations"),
        &["role", "outcome"]  // role: initiator/responder, outcome: success/failure
    ).expect("metric creation failed");

    /// Security violations reported by the message layer
    pub static ref SECURITY_VIOLATIONS: CounterVec = CounterVec::new(
        Opts::new("bus_auth_security_violations_total", "Security violations by status"),
        &["status"]
    ).expect("metric creation failed");

    /// Duration of a full authentication conversation
    pub static ref AUTH_DURATION: Histogram = Histogram::with_opts(
        HistogramOpts::new(
            "bus_auth_duration_seconds",
            "Time spent authenticating a peer"
        ).buckets(exponential_buckets(0.001, 2.0, 15).expect("bucket layout"))
    ).expect("metric creation failed");

    /// Peers currently holding a session key
    pub static ref PEERS_SECURE: Gauge = Gauge::new(
        "bus_auth_peers_secure",
        "Number of peers with an established session key"
    ).expect("metric creation failed");
}

/// Register all metrics with the global registry.
///
/// # Errors
///
/// Returns `TelemetryError::MetricsInit` if a collector is already registered.
pub fn register_metrics() -> Result<(), TelemetryError> {
    let metrics: Vec<Box<dyn prometheus::core::Collector>> = vec![
        // Router
        Box::new(MESSAGES_ROUTED.clone()),
        Box::new(ROUTE_FAILURES.clone()),
        Box::new(PUSH_DURATION.clone()),
        // Authentication
        Box::new(AUTH_ATTEMPTS.clone()),
        Box::new(SECURITY_VIOLATIONS.clone()),
        Box::new(AUTH_DURATION.clone()),
        Box::new(PEERS_SECURE.clone()),
    ];

    for metric in metrics {
        REGISTRY
            .register(metric)
            .map_err(|e| TelemetryError::MetricsInit(e.to_string()))?;
    }
    Ok(())
}

/// Encode all metrics as Prometheus text format.
///
/// # Errors
///
/// Returns `TelemetryError::MetricsInit` if encoding fails.
pub fn encode_metrics() -> Result<String, TelemetryError> {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    encoder
        .encode(&metric_families, &mut buffer)
        .map_err(|e| TelemetryError::MetricsInit(e.to_string()))?;
    String::from_utf8(buffer).map_err(|e| TelemetryError::MetricsInit(e.to_string()))
}

/// Timer guard for automatic histogram observation.
pub struct HistogramTimer {
    histogram: Histogram,
    start: std::time::Instant,
}

impl HistogramTimer {
    /// Start a new timer for the given histogram.
    #[must_use]
    pub fn new(histogram: &Histogram) -> Self {
        Self {
            histogram: histogram.clone(),
            start: std::time::Instant::now(),
        }
    }
}

impl Drop for HistogramTimer {
    fn drop(&mut self) {
        self.histogram.observe(self.start.elapsed().as_secs_f64());
    }
}

/// Start timing for a histogram. Observation happens on drop.
#[macro_export]
macro_rules! time_histogram {
    ($histogram:expr) => {
        $crate::metrics::HistogramTimer::new(&$histogram)
    };
}
