//! # Loopback Transport
//!
//! In-process [`PeerTransport`] connecting authentication engines that live
//! in the same process. Each engine registers its control handler under
//! its unique name (and any aliases); calls are delivered by direct async
//! invocation with the caller's timeout applied.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use bus_types::{BusError, BusResult, Message};
use parking_lot::RwLock;

use crate::ports::{PeerControlInbound, PeerTransport, SERVICE_UNKNOWN};

#[derive(Default)]
pub struct LoopbackBus {
    handlers: RwLock<HashMap<String, Weak<dyn PeerControlInbound>>>,
    calls: RwLock<HashMap<String, u64>>,
    total: AtomicU64,
}

impl LoopbackBus {
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Route calls addressed to `name` to `handler`.
    ///
    /// Only a weak reference is kept so that dropping a node unregisters it.
    pub fn register<H>(&self, name: &str, handler: &Arc<H>)
    where
        H: PeerControlInbound + 'static,
    {
        let handler: Arc<dyn PeerControlInbound> = handler.clone();
        self.handlers
            .write()
            .insert(name.to_string(), Arc::downgrade(&handler));
    }

    pub fn unregister(&self, name: &str) {
        self.handlers.write().remove(name);
    }

    /// Calls delivered for `member` so far.
    #[must_use]
    pub fn calls(&self, member: &str) -> u64 {
        self.calls.read().get(member).copied().unwrap_or(0)
    }

    /// Calls delivered for any member so far.
    #[must_use]
    pub fn total_calls(&self) -> u64 {
        self.total.load(Ordering::Relaxed)
    }

    fn handler(&self, name: &str) -> Option<Arc<dyn PeerControlInbound>> {
        self.handlers.read().get(name).and_then(Weak::upgrade)
    }
}

#[async_trait]
impl PeerTransport for LoopbackBus {
    async fn method_call(&self, call: Message, timeout: Duration) -> BusResult<Message> {
        let Some(handler) = self.handler(&call.destination) else {
            tracing::debug!(destination = %call.destination, member = %call.member, "no handler registered");
            return Ok(Message::error_reply(&call, SERVICE_UNKNOWN, &call.destination));
        };
        self.total.fetch_add(1, Ordering::Relaxed);
        *self.calls.write().entry(call.member.clone()).or_insert(0) += 1;
        tokio::time::timeout(timeout, handler.handle_control_call(call))
            .await
            .map_err(|_| BusError::Timeout)
    }
}
