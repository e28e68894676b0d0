//! Cross-crate flows.

#[cfg(test)]
pub mod fixtures;
pub mod node_flows;
pub mod router_auth_flows;
