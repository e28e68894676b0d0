//! # Wiring
//!
//! Joins the router and the peer authentication engine into a [`BusNode`].
//!
//! | Direction          | Port                          | Implemented by   |
//! |--------------------|-------------------------------|------------------|
//! | engine → router    | `DeliveryPort`                | `BusNode`        |
//! | router → engine    | `NameListener`                | `PeerDeparture`  |
//! | engine → engine    | `PeerTransport`               | `LoopbackBus`    |

mod node;

pub use node::BusNode;

#[cfg(test)]
mod tests;
