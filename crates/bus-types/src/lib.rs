//! # Bus Types
//!
//! Types shared by every bus component.
//!
//! ## Contents
//!
//! | Module | Types |
//! |--------|-------|
//! | `message` | [`Message`], [`MsgArg`], [`MessageType`], header flags |
//! | `endpoint` | [`BusEndpoint`] trait, [`EndpointType`] |
//! | `guid` | [`Guid128`] peer identifiers |
//! | `errors` | [`BusError`] status taxonomy |

#![cfg_attr(test, allow(clippy::unwrap_used))]

pub mod endpoint;
pub mod errors;
pub mod guid;
pub mod message;

pub use endpoint::{same_endpoint, BusEndpoint, EndpointRef, EndpointType};
pub use errors::{BusError, BusResult};
pub use guid::Guid128;
pub use message::{
    decode_args, encode_args, flags, Message, MessageType, MsgArg, SessionId, ERROR_STATUS_NAME,
};
