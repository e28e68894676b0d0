//! # Name Table
//!
//! Maps unique names (`:x.y`) to endpoints and well-known aliases to a FIFO
//! queue of unique owners. The head of an alias queue is its primary owner.
//!
//! Bus-to-bus endpoints never appear here; the router tracks them separately.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use bus_types::{BusError, BusResult, EndpointRef};
use parking_lot::RwLock;

/// Observer of ownership changes.
///
/// Called after the table lock is released, so a listener may query the
/// table again.
pub trait NameListener: Send + Sync {
    fn name_owner_changed(&self, name: &str, old_owner: Option<&str>, new_owner: Option<&str>);
}

/// Result of an alias request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AliasDisposition {
    /// Caller is now the primary owner.
    PrimaryOwner,
    /// Caller was queued behind the current owner.
    InQueue,
    /// Caller already owned or was queued for the name.
    AlreadyOwner,
}

#[derive(Default)]
struct Names {
    unique: HashMap<String, EndpointRef>,
    aliases: HashMap<String, VecDeque<String>>,
}

type OwnerChange = (String, Option<String>, Option<String>);

/// Unique-name and alias registry.
#[derive(Default)]
pub struct NameTable {
    names: RwLock<Names>,
    listeners: RwLock<Vec<Arc<dyn NameListener>>>,
}

impl NameTable {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_listener(&self, listener: Arc<dyn NameListener>) {
        self.listeners.write().push(listener);
    }

    /// Register an endpoint under its unique name.
    pub fn add_unique_name(&self, endpoint: EndpointRef) {
        let name = endpoint.unique_name().to_string();
        let replaced = self.names.write().unique.insert(name.clone(), endpoint);
        if replaced.is_none() {
            self.notify(vec![(name.clone(), None, Some(name))]);
        }
    }

    /// Drop a unique name together with every alias it owns or queues for.
    pub fn remove_unique_name(&self, unique: &str) -> Option<EndpointRef> {
        let mut changes = Vec::new();
        let removed = {
            let mut names = self.names.write();
            let removed = names.unique.remove(unique)?;
            names.aliases.retain(|alias, owners| {
                let was_primary = owners.front().map(String::as_str) == Some(unique);
                owners.retain(|owner| owner != unique);
                if was_primary {
                    changes.push((
                        alias.clone(),
                        Some(unique.to_string()),
                        owners.front().cloned(),
                    ));
                }
                !owners.is_empty()
            });
            removed
        };
        changes.push((unique.to_string(), Some(unique.to_string()), None));
        self.notify(changes);
        Some(removed)
    }

    /// Request a well-known name on behalf of `unique`.
    ///
    /// # Errors
    ///
    /// Returns `BusError::NoEndpoint` if `unique` is not registered.
    pub fn add_alias(&self, alias: &str, unique: &str) -> BusResult<AliasDisposition> {
        let disposition = {
            let mut names = self.names.write();
            if !names.unique.contains_key(unique) {
                return Err(BusError::NoEndpoint(unique.to_string()));
            }
            let owners = names.aliases.entry(alias.to_string()).or_default();
            if owners.iter().any(|owner| owner == unique) {
                AliasDisposition::AlreadyOwner
            } else {
                owners.push_back(unique.to_string());
                if owners.len() == 1 {
                    AliasDisposition::PrimaryOwner
                } else {
                    AliasDisposition::InQueue
                }
            }
        };
        if disposition == AliasDisposition::PrimaryOwner {
            self.notify(vec![(alias.to_string(), None, Some(unique.to_string()))]);
        }
        Ok(disposition)
    }

    /// Release a well-known name. The next queued owner, if any, takes over.
    ///
    /// # Errors
    ///
    /// Returns `BusError::NoEndpoint` if `unique` neither owns nor queues for `alias`.
    pub fn remove_alias(&self, alias: &str, unique: &str) -> BusResult<()> {
        let change = {
            let mut names = self.names.write();
            let owners = names
                .aliases
                .get_mut(alias)
                .ok_or_else(|| BusError::NoEndpoint(alias.to_string()))?;
            let position = owners
                .iter()
                .position(|owner| owner == unique)
                .ok_or_else(|| BusError::NoEndpoint(unique.to_string()))?;
            owners.remove(position);
            let next = owners.front().cloned();
            if owners.is_empty() {
                names.aliases.remove(alias);
            }
            (position == 0).then(|| (alias.to_string(), Some(unique.to_string()), next))
        };
        if let Some(change) = change {
            self.notify(vec![change]);
        }
        Ok(())
    }

    /// Resolve a unique name or an alias's primary owner.
    #[must_use]
    pub fn find_endpoint(&self, name: &str) -> Option<EndpointRef> {
        let names = self.names.read();
        if let Some(endpoint) = names.unique.get(name) {
            return Some(Arc::clone(endpoint));
        }
        let owner = names.aliases.get(name)?.front()?;
        names.unique.get(owner).map(Arc::clone)
    }

    /// True when `name` is `unique` itself or an alias `unique` currently owns.
    #[must_use]
    pub fn is_alias(&self, unique: &str, name: &str) -> bool {
        if unique == name {
            return true;
        }
        self.names
            .read()
            .aliases
            .get(name)
            .and_then(VecDeque::front)
            .is_some_and(|owner| owner == unique)
    }

    /// Primary owner of an alias.
    #[must_use]
    pub fn primary_owner(&self, alias: &str) -> Option<String> {
        self.names.read().aliases.get(alias)?.front().cloned()
    }

    /// Every directly connected endpoint.
    #[must_use]
    pub fn all_endpoints(&self) -> Vec<EndpointRef> {
        self.names.read().unique.values().map(Arc::clone).collect()
    }

    #[must_use]
    pub fn unique_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.names.read().unique.keys().cloned().collect();
        names.sort();
        names
    }

    /// Unique names followed by every alias with an owner.
    #[must_use]
    pub fn all_names(&self) -> Vec<String> {
        let mut all = self.unique_names();
        let mut aliases: Vec<String> = self.names.read().aliases.keys().cloned().collect();
        aliases.sort();
        all.extend(aliases);
        all
    }

    fn notify(&self, changes: Vec<OwnerChange>) {
        let listeners = self.listeners.read().clone();
        for (name, old_owner, new_owner) in &changes {
            for listener in &listeners {
                listener.name_owner_changed(name, old_owner.as_deref(), new_owner.as_deref());
            }
        }
    }
}
