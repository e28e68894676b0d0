//! Per message type authorization rights.
//!
//! One byte per message type (call, return, error, signal), each holding
//! `ALLOW_SECURE_TX` and/or `ALLOW_SECURE_RX`.

use bus_types::MessageType;
use serde::{Deserialize, Serialize};

pub const ALLOW_SECURE_TX: u8 = 0x01;
pub const ALLOW_SECURE_RX: u8 = 0x02;

const TX_RX: u8 = ALLOW_SECURE_TX | ALLOW_SECURE_RX;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessRights(pub [u8; 4]);

impl AccessRights {
    /// Rights after an authentication conversation.
    ///
    /// A mutual conversation allows everything. A one-way conversation
    /// lets the challenger accept calls and answer them, and the other side
    /// make calls and accept answers. Signals flow both ways either way.
    #[must_use]
    pub const fn for_conversation(mutual: bool, challenger: bool) -> Self {
        if mutual {
            return Self([TX_RX; 4]);
        }
        if challenger {
            Self([ALLOW_SECURE_RX, ALLOW_SECURE_TX, ALLOW_SECURE_TX, TX_RX])
        } else {
            Self([ALLOW_SECURE_TX, ALLOW_SECURE_RX, ALLOW_SECURE_RX, TX_RX])
        }
    }

    #[must_use]
    pub const fn none() -> Self {
        Self([0; 4])
    }

    #[must_use]
    pub fn allows_tx(&self, msg_type: MessageType) -> bool {
        self.0[msg_type.index()] & ALLOW_SECURE_TX != 0
    }

    #[must_use]
    pub fn allows_rx(&self, msg_type: MessageType) -> bool {
        self.0[msg_type.index()] & ALLOW_SECURE_RX != 0
    }
}
