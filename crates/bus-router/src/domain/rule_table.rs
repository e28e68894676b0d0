//! # Rule Table
//!
//! Per-endpoint match rules consulted for broadcast delivery. Rules for one
//! endpoint are kept in registration order; the first matching rule decides.

use std::collections::HashMap;

use bus_types::{BusError, BusResult, Message};
use parking_lot::Mutex;

use super::match_rule::MatchRule;

/// Endpoint unique name to its registered rules.
#[derive(Default)]
pub struct RuleTable {
    rules: Mutex<HashMap<String, Vec<MatchRule>>>,
}

impl RuleTable {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_rule(&self, endpoint: &str, rule: MatchRule) {
        self.rules
            .lock()
            .entry(endpoint.to_string())
            .or_default()
            .push(rule);
    }

    /// Remove one registration of `rule` for `endpoint`.
    ///
    /// # Errors
    ///
    /// Returns `BusError::MatchRuleNotFound` if the endpoint never added it.
    pub fn remove_rule(&self, endpoint: &str, rule: &MatchRule) -> BusResult<()> {
        let mut rules = self.rules.lock();
        let entries = rules.get_mut(endpoint).ok_or(BusError::MatchRuleNotFound)?;
        let position = entries
            .iter()
            .position(|r| r == rule)
            .ok_or(BusError::MatchRuleNotFound)?;
        entries.remove(position);
        if entries.is_empty() {
            rules.remove(endpoint);
        }
        Ok(())
    }

    pub fn remove_all_rules(&self, endpoint: &str) {
        self.rules.lock().remove(endpoint);
    }

    /// Whether broadcast `msg` should be pushed to `endpoint` directly.
    ///
    /// A first match carrying `sessionless='t'` answers false: those
    /// messages reach the endpoint through the sessionless collaborator.
    #[must_use]
    pub fn ok_to_send(&self, msg: &Message, endpoint: &str) -> bool {
        let rules = self.rules.lock();
        let Some(entries) = rules.get(endpoint) else {
            return false;
        };
        entries
            .iter()
            .find(|rule| rule.is_match(msg))
            .is_some_and(|rule| rule.sessionless != Some(true))
    }

    #[must_use]
    pub fn rule_count(&self, endpoint: &str) -> usize {
        self.rules.lock().get(endpoint).map_or(0, Vec::len)
    }
}
