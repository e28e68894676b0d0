use std::collections::HashSet;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use bus_telemetry::{log_event, SUBSYSTEM_ROUTER};
use bus_types::{BusResult, EndpointRef, EndpointType, Message, SessionId};
use parking_lot::Mutex;

use crate::config::RouterConfig;
use crate::domain::{MatchRule, NameTable, RuleTable};
use crate::ports::{BusController, MessagePolicy, MessageRouter, SessionlessDelivery};

/// State guarded by the router's single lock.
#[derive(Default)]
pub(crate) struct RouterState {
    pub(crate) local_endpoint: Option<EndpointRef>,
    /// Bus-to-bus links are not addressable by name, so they live here
    /// rather than in the name table.
    pub(crate) b2b_endpoints: Vec<EndpointRef>,
    pub(crate) self_joins: HashSet<(String, SessionId)>,
}

/// The routing node's message router.
///
/// # Example
///
/// ```rust,ignore
/// let router = DaemonRouter::new(RouterConfig::default(), guid.short())
///     .with_sessionless(sessionless)
///     .with_bus_controller(controller);
/// router.register_endpoint(local_endpoint)?;
/// router.push_message(&msg, &sender)?;
/// ```
pub struct DaemonRouter {
    pub(crate) config: RouterConfig,
    pub(crate) short_guid: String,
    pub(crate) next_unique: AtomicU32,
    pub(crate) name_table: NameTable,
    pub(crate) rule_table: RuleTable,
    pub(crate) state: Mutex<RouterState>,
    pub(crate) sessionless: Option<Arc<dyn SessionlessDelivery>>,
    pub(crate) bus_controller: Option<Arc<dyn BusController>>,
    pub(crate) policy: Option<Arc<dyn MessagePolicy>>,
}

impl DaemonRouter {
    /// Create a router for the node identified by `short_guid`.
    #[must_use]
    pub fn new(config: RouterConfig, short_guid: impl Into<String>) -> Self {
        Self {
            config,
            short_guid: short_guid.into(),
            next_unique: AtomicU32::new(1),
            name_table: NameTable::new(),
            rule_table: RuleTable::new(),
            state: Mutex::new(RouterState::default()),
            sessionless: None,
            bus_controller: None,
            policy: None,
        }
    }

    #[must_use]
    pub fn with_sessionless(mut self, sessionless: Arc<dyn SessionlessDelivery>) -> Self {
        self.sessionless = Some(sessionless);
        self
    }

    #[must_use]
    pub fn with_bus_controller(mut self, controller: Arc<dyn BusController>) -> Self {
        self.bus_controller = Some(controller);
        self
    }

    #[must_use]
    pub fn with_policy(mut self, policy: Arc<dyn MessagePolicy>) -> Self {
        self.policy = Some(policy);
        self
    }

    #[must_use]
    pub fn config(&self) -> &RouterConfig {
        &self.config
    }

    #[must_use]
    pub fn name_table(&self) -> &NameTable {
        &self.name_table
    }

    #[must_use]
    pub fn rule_table(&self) -> &RuleTable {
        &self.rule_table
    }

    #[must_use]
    pub fn local_endpoint(&self) -> Option<EndpointRef> {
        self.state.lock().local_endpoint.clone()
    }

    #[must_use]
    pub fn b2b_endpoints(&self) -> Vec<EndpointRef> {
        self.state.lock().b2b_endpoints.clone()
    }

    /// Every name in the name table, unique names first.
    #[must_use]
    pub fn get_bus_names(&self) -> Vec<String> {
        self.name_table.all_names()
    }

    /// Next unique name of the form `:<short guid>.<n>`.
    #[must_use]
    pub fn generate_unique_name(&self) -> String {
        let n = self.next_unique.fetch_add(1, Ordering::Relaxed);
        format!(":{}.{}", self.short_guid, n)
    }

    /// True for `:<short guid>.<n>` names minted by this node.
    #[must_use]
    pub fn is_valid_local_unique_name(&self, name: &str) -> bool {
        name.strip_prefix(':')
            .and_then(|rest| rest.strip_prefix(self.short_guid.as_str()))
            .and_then(|rest| rest.strip_prefix('.'))
            .is_some_and(|n| !n.is_empty() && n.bytes().all(|b| b.is_ascii_digit()))
    }

    pub(crate) fn is_self_joined(&self, unique_name: &str, session_id: SessionId) -> bool {
        self.state
            .lock()
            .self_joins
            .contains(&(unique_name.to_string(), session_id))
    }
}

impl MessageRouter for DaemonRouter {
    fn push_message(&self, msg: &Message, src: &EndpointRef) -> BusResult<()> {
        self.route_and_record(msg, src)
    }

    fn register_endpoint(&self, endpoint: EndpointRef) -> BusResult<()> {
        let endpoint_type = endpoint.endpoint_type();
        log_event!(
            debug,
            SUBSYSTEM_ROUTER,
            "registering endpoint",
            endpoint = %endpoint.unique_name(),
            endpoint_type = %endpoint_type
        );

        if endpoint_type == EndpointType::Local {
            self.state.lock().local_endpoint = Some(Arc::clone(&endpoint));
        }

        let mut status = Ok(());
        if endpoint_type == EndpointType::Bus2Bus {
            if let Some(controller) = &self.bus_controller {
                status = controller.add_bus_to_bus(&endpoint);
            }
            let mut state = self.state.lock();
            if !state
                .b2b_endpoints
                .iter()
                .any(|ep| Arc::ptr_eq(ep, &endpoint))
            {
                state.b2b_endpoints.push(Arc::clone(&endpoint));
            }
        } else {
            self.name_table.add_unique_name(Arc::clone(&endpoint));
        }

        if endpoint_type == EndpointType::Local {
            endpoint.on_bus_connected();
        }
        status
    }

    fn unregister_endpoint(&self, unique_name: &str) {
        let Some(endpoint) = self.find_endpoint(unique_name) else {
            return;
        };
        log_event!(debug, SUBSYSTEM_ROUTER, "unregistering endpoint", endpoint = %unique_name);

        if endpoint.endpoint_type() == EndpointType::Bus2Bus {
            if let Some(controller) = &self.bus_controller {
                controller.remove_bus_to_bus(&endpoint);
            }
            self.state
                .lock()
                .b2b_endpoints
                .retain(|ep| !Arc::ptr_eq(ep, &endpoint));
        } else {
            self.name_table.remove_unique_name(unique_name);
            self.rule_table.remove_all_rules(unique_name);
        }

        let mut state = self.state.lock();
        let is_local = state
            .local_endpoint
            .as_ref()
            .is_some_and(|local| Arc::ptr_eq(local, &endpoint));
        if is_local {
            endpoint.invalidate();
            state.local_endpoint = None;
        }
    }

    fn find_endpoint(&self, name: &str) -> Option<EndpointRef> {
        self.name_table.find_endpoint(name).or_else(|| {
            self.state
                .lock()
                .b2b_endpoints
                .iter()
                .find(|ep| ep.unique_name() == name)
                .cloned()
        })
    }

    fn add_rule(&self, endpoint: &EndpointRef, rule: MatchRule) -> BusResult<()> {
        self.rule_table.add_rule(endpoint.unique_name(), rule.clone());
        if let Some(sessionless) = &self.sessionless {
            sessionless.add_rule(endpoint.unique_name(), &rule);
        }
        Ok(())
    }

    fn remove_rule(&self, endpoint: &EndpointRef, rule: &MatchRule) -> BusResult<()> {
        self.rule_table.remove_rule(endpoint.unique_name(), rule)?;
        if let Some(sessionless) = &self.sessionless {
            sessionless.remove_rule(endpoint.unique_name(), rule);
        }
        Ok(())
    }

    fn register_self_join(&self, unique_name: &str, session_id: SessionId) {
        self.state
            .lock()
            .self_joins
            .insert((unique_name.to_string(), session_id));
    }

    fn unregister_self_join(&self, unique_name: &str, session_id: SessionId) {
        self.state
            .lock()
            .self_joins
            .remove(&(unique_name.to_string(), session_id));
    }
}
