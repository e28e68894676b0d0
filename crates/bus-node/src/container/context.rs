//! # Bus Context
//!
//! Process-wide state shared by every node in the process. The first
//! [`BusContext`] registers the Prometheus collectors (and optionally
//! installs the tracing subscriber); the last one dropped releases the
//! subscriber guard.
//!
//! Nodes hold a context for their whole lifetime, so
//! `BusContext::refs() == 0` means no node is running.

use bus_telemetry::{
    init_subscriber, init_telemetry, log_event, register_metrics, TelemetryConfig, TelemetryError, TelemetryGuard,
    SUBSYSTEM_NODE,
};
use parking_lot::{const_mutex, Mutex};

struct ContextState {
    refs: usize,
    /// Collectors stay in the registry after teardown; register only once.
    metrics_registered: bool,
    /// A global subscriber cannot be removed once installed.
    subscriber_installed: bool,
    telemetry: Option<TelemetryGuard>,
}

static STATE: Mutex<ContextState> = const_mutex(ContextState {
    refs: 0,
    metrics_registered: false,
    subscriber_installed: false,
    telemetry: None,
});

/// Reference to the process-wide bus context.
///
/// Cloning takes another reference; dropping releases it.
#[must_use = "the context is torn down when the last reference is dropped"]
pub struct BusContext {
    _private: (),
}

impl BusContext {
    /// Take a reference, initializing the context on first use.
    pub fn init() -> Self {
        let mut state = STATE.lock();
        Self::acquire(&mut state);
        Self { _private: () }
    }

    /// Like [`BusContext::init`], also installing the tracing subscriber if
    /// no earlier context did.
    ///
    /// # Errors
    ///
    /// Fails if another subscriber is already installed in the process.
    pub fn init_with_telemetry(config: TelemetryConfig) -> Result<Self, TelemetryError> {
        let mut state = STATE.lock();
        if !state.subscriber_installed {
            if state.metrics_registered {
                init_subscriber(&config)?;
            } else {
                state.telemetry = Some(init_telemetry(config)?);
                state.metrics_registered = true;
            }
            state.subscriber_installed = true;
        }
        Self::acquire(&mut state);
        Ok(Self { _private: () })
    }

    fn acquire(state: &mut ContextState) {
        if !state.metrics_registered {
            if let Err(e) = register_metrics() {
                log_event!(warn, SUBSYSTEM_NODE, "metrics not registered", error = %e);
            }
            state.metrics_registered = true;
        }
        state.refs += 1;
        if state.refs == 1 {
            log_event!(debug, SUBSYSTEM_NODE, "bus context initialized");
        }
    }

    /// References currently held in this process.
    #[must_use]
    pub fn refs() -> usize {
        STATE.lock().refs
    }
}

impl Clone for BusContext {
    fn clone(&self) -> Self {
        STATE.lock().refs += 1;
        Self { _private: () }
    }
}

impl Drop for BusContext {
    fn drop(&mut self) {
        let (torn_down, released) = {
            let mut state = STATE.lock();
            state.refs = state.refs.saturating_sub(1);
            if state.refs == 0 {
                (true, state.telemetry.take())
            } else {
                (false, None)
            }
        };
        if torn_down {
            log_event!(debug, SUBSYSTEM_NODE, "bus context torn down");
        }
        // The guard logs on drop; keep that outside the lock.
        drop(released);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bus_telemetry::{encode_metrics, AUTH_ATTEMPTS};

    // Other tests in this binary hold contexts concurrently, so counts are
    // only checked relative to what this test holds.

    #[test]
    fn test_held_context_is_counted() {
        let first = BusContext::init();
        assert!(BusContext::refs() >= 1);
        let second = first.clone();
        assert!(BusContext::refs() >= 2);
        drop(second);
        drop(first);
    }

    #[test]
    fn test_init_registers_metrics() {
        let _context = BusContext::init();
        AUTH_ATTEMPTS.with_label_values(&["initiator", "success"]).inc();
        let text = encode_metrics().unwrap();
        assert!(text.contains("bus_auth_attempts_total"));
    }
}
