//! # Adapters
//!
//! Endpoints the node registers with its router.
//!
//! | Endpoint        | Type     | Delivers to                         |
//! |-----------------|----------|-------------------------------------|
//! | `LocalEndpoint` | `Local`  | the application's inbox             |
//! | `PeerLink`      | `Remote` | another node in the same process    |

pub mod local_endpoint;
pub mod peer_link;

pub use local_endpoint::LocalEndpoint;
pub use peer_link::PeerLink;
