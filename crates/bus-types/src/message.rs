//! # Bus Messages
//!
//! Parsed message representation consumed by the router and the peer
//! authentication engine. A message is immutable once it has been handed to
//! the router; consumers clone it when they need to keep it.
//!
//! ## Serialization
//!
//! [`Message::to_bytes`] produces the canonical buffer used for conversation
//! hashing. Both peers of a negotiation hash the exact same bytes because the
//! message travels unchanged between them.

use serde::{Deserialize, Serialize};

use crate::errors::{BusError, BusResult};

/// Session identifier. Zero means "no session".
pub type SessionId = u32;

/// Message header flags.
pub mod flags {
    /// The caller does not expect a reply.
    pub const NO_REPLY_EXPECTED: u8 = 0x01;
    /// Start the destination service if needed.
    pub const AUTO_START: u8 = 0x02;
    /// The sender accepts messages from off-device endpoints.
    pub const ALLOW_REMOTE_MSG: u8 = 0x04;
    /// Sessionless signal.
    pub const SESSIONLESS: u8 = 0x10;
    /// Broadcast signal forwarded to other routing nodes.
    pub const GLOBAL_BROADCAST: u8 = 0x20;
    /// Body is encrypted.
    pub const ENCRYPTED: u8 = 0x80;
}

/// Error name used for replies carrying a bus status.
pub const ERROR_STATUS_NAME: &str = "org.alljoyn.Bus.ErStatus";

/// Message type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MessageType {
    /// Method call.
    MethodCall,
    /// Successful method reply.
    MethodReturn,
    /// Error reply.
    Error,
    /// Signal.
    Signal,
}

impl MessageType {
    /// Index into per-type rights tables (call, return, error, signal).
    #[must_use]
    pub const fn index(self) -> usize {
        match self {
            Self::MethodCall => 0,
            Self::MethodReturn => 1,
            Self::Error => 2,
            Self::Signal => 3,
        }
    }
}

/// Typed message argument.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum MsgArg {
    Bool(bool),
    Byte(u8),
    U16(u16),
    U32(u32),
    U64(u64),
    I32(i32),
    Str(String),
    Bytes(Vec<u8>),
    Array(Vec<MsgArg>),
    Struct(Vec<MsgArg>),
    Variant(Box<MsgArg>),
}

impl MsgArg {
    /// Wrap a value in a variant.
    #[must_use]
    pub fn variant(inner: MsgArg) -> Self {
        Self::Variant(Box::new(inner))
    }

    #[must_use]
    pub fn as_u32(&self) -> Option<u32> {
        match self {
            Self::U32(v) => Some(*v),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_u16(&self) -> Option<u16> {
        match self {
            Self::U16(v) => Some(*v),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_byte(&self) -> Option<u8> {
        match self {
            Self::Byte(v) => Some(*v),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(v) => Some(v),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Self::Bytes(v) => Some(v),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_array(&self) -> Option<&[MsgArg]> {
        match self {
            Self::Array(v) => Some(v),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_struct(&self) -> Option<&[MsgArg]> {
        match self {
            Self::Struct(v) => Some(v),
            _ => None,
        }
    }

    /// Contents of a variant.
    #[must_use]
    pub fn as_variant(&self) -> Option<&MsgArg> {
        match self {
            Self::Variant(v) => Some(v),
            _ => None,
        }
    }
}

/// A parsed bus message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub msg_type: MessageType,
    pub flags: u8,
    pub serial: u32,
    /// Serial of the call this message answers (replies only).
    pub reply_serial: u32,
    /// Unique name of the sender.
    pub sender: String,
    /// Destination bus name. Empty for broadcast and sessioncast.
    pub destination: String,
    pub session_id: SessionId,
    pub object_path: String,
    pub interface: String,
    pub member: String,
    /// Error name (error replies only).
    pub error_name: String,
    /// Authentication mechanism the sender negotiated, when relevant.
    pub auth_mechanism: String,
    pub args: Vec<MsgArg>,
}

impl Message {
    fn blank(msg_type: MessageType, sender: &str, destination: &str) -> Self {
        Self {
            msg_type,
            flags: 0,
            serial: 0,
            reply_serial: 0,
            sender: sender.to_string(),
            destination: destination.to_string(),
            session_id: 0,
            object_path: String::new(),
            interface: String::new(),
            member: String::new(),
            error_name: String::new(),
            auth_mechanism: String::new(),
            args: Vec::new(),
        }
    }

    /// Build a method call.
    #[must_use]
    pub fn method_call(
        sender: &str,
        destination: &str,
        object_path: &str,
        interface: &str,
        member: &str,
        args: Vec<MsgArg>,
    ) -> Self {
        let mut msg = Self::blank(MessageType::MethodCall, sender, destination);
        msg.object_path = object_path.to_string();
        msg.interface = interface.to_string();
        msg.member = member.to_string();
        msg.args = args;
        msg
    }

    /// Build a signal. An empty destination makes it a broadcast (or a
    /// sessioncast when a session id is set).
    #[must_use]
    pub fn signal(
        sender: &str,
        destination: &str,
        session_id: SessionId,
        interface: &str,
        member: &str,
        args: Vec<MsgArg>,
    ) -> Self {
        let mut msg = Self::blank(MessageType::Signal, sender, destination);
        msg.session_id = session_id;
        msg.interface = interface.to_string();
        msg.member = member.to_string();
        msg.args = args;
        msg
    }

    /// Build a method return answering `call`.
    #[must_use]
    pub fn method_return(call: &Message, args: Vec<MsgArg>) -> Self {
        let mut msg = Self::blank(MessageType::MethodReturn, &call.destination, &call.sender);
        msg.reply_serial = call.serial;
        msg.session_id = call.session_id;
        msg.args = args;
        msg
    }

    /// Build an error reply answering `call`.
    #[must_use]
    pub fn error_reply(call: &Message, error_name: &str, description: &str) -> Self {
        let mut msg = Self::blank(MessageType::Error, &call.destination, &call.sender);
        msg.reply_serial = call.serial;
        msg.session_id = call.session_id;
        msg.error_name = error_name.to_string();
        msg.args = vec![MsgArg::Str(description.to_string())];
        msg
    }

    /// Build an error reply carrying a bus status.
    #[must_use]
    pub fn error_status(call: &Message, status: &BusError) -> Self {
        let mut msg = Self::error_reply(call, ERROR_STATUS_NAME, &status.to_string());
        msg.args.push(MsgArg::Str(status.status_name().to_string()));
        msg
    }

    /// Status carried by an error reply, if this is one.
    #[must_use]
    pub fn reply_status(&self) -> Option<BusError> {
        if self.msg_type != MessageType::Error {
            return None;
        }
        if self.error_name == ERROR_STATUS_NAME {
            if let Some(name) = self.args.get(1).and_then(MsgArg::as_str) {
                return Some(BusError::from_status_name(name));
            }
        }
        Some(BusError::ReplyIsErrorMessage(self.error_name.clone()))
    }

    #[must_use]
    pub fn arg(&self, index: usize) -> Option<&MsgArg> {
        self.args.get(index)
    }

    #[must_use]
    pub fn reply_expected(&self) -> bool {
        self.msg_type == MessageType::MethodCall && self.flags & flags::NO_REPLY_EXPECTED == 0
    }

    #[must_use]
    pub fn is_sessionless(&self) -> bool {
        self.flags & flags::SESSIONLESS != 0
    }

    #[must_use]
    pub fn is_global_broadcast(&self) -> bool {
        self.flags & flags::GLOBAL_BROADCAST != 0
    }

    #[must_use]
    pub fn is_encrypted(&self) -> bool {
        self.flags & flags::ENCRYPTED != 0
    }

    /// Broadcast signal: no destination, no session.
    #[must_use]
    pub fn is_broadcast_signal(&self) -> bool {
        self.msg_type == MessageType::Signal && self.destination.is_empty()
    }

    /// Canonical byte encoding of the whole message.
    ///
    /// # Errors
    ///
    /// Returns `BusError::Marshal` if serialization fails.
    pub fn to_bytes(&self) -> BusResult<Vec<u8>> {
        bincode::serialize(self).map_err(|e| BusError::Marshal(e.to_string()))
    }

    /// Canonical encoding of the header fields only (everything but the body).
    ///
    /// Used as additional authenticated data when the body is encrypted.
    ///
    /// # Errors
    ///
    /// Returns `BusError::Marshal` if serialization fails.
    pub fn header_bytes(&self) -> BusResult<Vec<u8>> {
        bincode::serialize(&(
            self.msg_type,
            self.flags,
            self.serial,
            self.reply_serial,
            &self.sender,
            &self.destination,
            self.session_id,
            &self.interface,
            &self.member,
        ))
        .map_err(|e| BusError::Marshal(e.to_string()))
    }

    /// Short human readable description used in logs.
    #[must_use]
    pub fn description(&self) -> String {
        match self.msg_type {
            MessageType::MethodCall => format!("METHOD_CALL {}.{}", self.interface, self.member),
            MessageType::Signal => format!("SIGNAL {}.{}", self.interface, self.member),
            MessageType::MethodReturn => format!("METHOD_RET[{}]", self.reply_serial),
            MessageType::Error => format!("ERROR[{}] {}", self.reply_serial, self.error_name),
        }
    }
}

/// Serialize an argument list (used for encrypted bodies).
///
/// # Errors
///
/// Returns `BusError::Marshal` if serialization fails.
pub fn encode_args(args: &[MsgArg]) -> BusResult<Vec<u8>> {
    bincode::serialize(args).map_err(|e| BusError::Marshal(e.to_string()))
}

/// Inverse of [`encode_args`].
///
/// # Errors
///
/// Returns `BusError::Marshal` if the bytes are not a valid argument list.
pub fn decode_args(bytes: &[u8]) -> BusResult<Vec<MsgArg>> {
    bincode::deserialize(bytes).map_err(|e| BusError::Marshal(e.to_string()))
}
