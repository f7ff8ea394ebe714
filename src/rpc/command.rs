//! RPC command bytes and the long-command header.
//!
//! Position 0 of every message is the command: either a bare `u8`, or a
//! `u64` whose top byte is a header.
//!
//! ```text
//!  63      56 55                  24 23        8 7        0
//! ┌──────────┬──────────────────────┬───────────┬──────────┐
//! │ header   │ message id (32 bit)  │ reserved  │ command  │
//! └──────────┴──────────────────────┴───────────┴──────────┘
//!   0x80 long │ 0x40 confirm request │ 0x20 confirm reply
//! ```

use super::value::Value;

pub const HELLO: u8 = 0x0C;
pub const WORLD: u8 = 0xC0;
pub const REGISTER: u8 = 0x80;
pub const OTA_START: u8 = 0xAB;
pub const OTA_BLOCK: u8 = 0xAC;
pub const LOG: u8 = 0xFB;
pub const FIND_DEVICE: u8 = 0xAF;
pub const FIND_DEVICE_RESPONSE: u8 = 0xFA;
pub const EXECUTE: u8 = 0xBB;

/// Trailing marker on a LOG reply whose payload is encrypted.
pub const ENCRYPTED_MARKER: u8 = 0x10;

const HEADER_CONFIRM_REQUEST: u64 = 0x40 << 56;
const CONFIRM_REPLY: u64 = 0xA0 << 56;
const MESSAGE_ID_MASK: u64 = 0x00FF_FFFF_FF00_0000;

/// Decoded command slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommandHeader {
    pub command: u8,
    /// Message id bits to echo when the sender asked for confirmation.
    pub confirm_id: Option<u64>,
}

impl CommandHeader {
    /// Parse position 0. Anything other than `u8`/`u64` is not a command.
    pub fn parse(value: &Value<'_>) -> Option<Self> {
        match *value {
            Value::U8(command) => Some(Self {
                command,
                confirm_id: None,
            }),
            Value::U64(raw) => Some(Self {
                command: (raw & 0xFF) as u8,
                confirm_id: (raw & HEADER_CONFIRM_REQUEST != 0).then_some(raw & MESSAGE_ID_MASK),
            }),
            _ => None,
        }
    }

    /// Reply command value: a bare `u8`, or a confirmation `u64`
    /// echoing the message id.
    pub fn reply(&self, command: u8) -> Value<'static> {
        match self.confirm_id {
            Some(id) => Value::U64(u64::from(command) | id | CONFIRM_REPLY),
            None => Value::U8(command),
        }
    }
}
