//! WebSocket frame header codec and payload masking.
//!
//! ```text
//!  byte 0          byte 1           ext. length      mask key   payload
//! ┌─┬───┬────────┬─┬─────────────┬────────────────┬──────────┬─────────┐
//! │F│RSV│ opcode │M│ len (7 bit) │ 0 / 2 / 8 B BE │ 0 / 4 B  │ N bytes │
//! └─┴───┴────────┴─┴─────────────┴────────────────┴──────────┴─────────┘
//!   len 0..=125 inline, 126 → u16 follows, 127 → u64 follows
//! ```

use core::fmt;

/// Largest possible header: 2 base + 8 extended length + 4 mask key.
pub const MAX_HEADER_LEN: usize = 14;

const FIN: u8 = 0x80;
const MASK: u8 = 0x80;
const LEN_U16: u8 = 126;
const LEN_U64: u8 = 127;

/// Control frames carry at most this many payload bytes.
const MAX_CONTROL_PAYLOAD: u64 = 125;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Opcode {
    Continuation = 0x0,
    Text = 0x1,
    Binary = 0x2,
    Close = 0x8,
    Ping = 0x9,
    Pong = 0xA,
}

impl Opcode {
    pub const fn from_u8(b: u8) -> Option<Self> {
        Some(match b {
            0x0 => Self::Continuation,
            0x1 => Self::Text,
            0x2 => Self::Binary,
            0x8 => Self::Close,
            0x9 => Self::Ping,
            0xA => Self::Pong,
            _ => return None,
        })
    }

    pub const fn is_control(self) -> bool {
        (self as u8) & 0x08 != 0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameError {
    UnknownOpcode(u8),
    /// Fragmented or oversized control frame.
    InvalidControl,
    /// Masked frame sent by the server peer.
    UnexpectedMask,
    /// Unmasked frame sent by the client peer.
    MissingMask,
    /// Continuation frame with no message in progress.
    OrphanContinuation,
    /// New data frame while a fragmented message is in progress.
    InterleavedMessage,
    /// Text message that is not UTF-8.
    InvalidUtf8,
}

impl fmt::Display for FrameError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnknownOpcode(op) => write!(f, "unknown opcode 0x{op:x}"),
            Self::InvalidControl => write!(f, "invalid control frame"),
            Self::UnexpectedMask => write!(f, "masked frame from server"),
            Self::MissingMask => write!(f, "unmasked frame from client"),
            Self::OrphanContinuation => write!(f, "continuation without start frame"),
            Self::InterleavedMessage => write!(f, "data frame inside fragmented message"),
            Self::InvalidUtf8 => write!(f, "text frame is not UTF-8"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub fin: bool,
    pub opcode: Opcode,
    pub mask: Option<[u8; 4]>,
    pub payload_len: u64,
}

/// Encode a frame header. `mask` is set only by the client role.
pub fn encode_header(
    fin: bool,
    opcode: Opcode,
    payload_len: usize,
    mask: Option<[u8; 4]>,
) -> heapless::Vec<u8, MAX_HEADER_LEN> {
    let mut out = heapless::Vec::new();
    let b0 = (if fin { FIN } else { 0 }) | opcode as u8;
    let mask_bit = if mask.is_some() { MASK } else { 0 };

    // Capacity is MAX_HEADER_LEN, which covers every branch below.
    let _ = out.push(b0);
    if payload_len <= MAX_CONTROL_PAYLOAD as usize {
        let _ = out.push(mask_bit | payload_len as u8);
    } else if let Ok(len) = u16::try_from(payload_len) {
        let _ = out.push(mask_bit | LEN_U16);
        let _ = out.extend_from_slice(&len.to_be_bytes());
    } else {
        let _ = out.push(mask_bit | LEN_U64);
        let _ = out.extend_from_slice(&(payload_len as u64).to_be_bytes());
    }
    if let Some(key) = mask {
        let _ = out.extend_from_slice(&key);
    }
    out
}

/// Parse a header from the front of `buf`.
///
/// Returns `Ok(None)` until enough bytes are buffered, then the header
/// and its encoded length.
pub fn parse_header(buf: &[u8]) -> Result<Option<(FrameHeader, usize)>, FrameError> {
    if buf.len() < 2 {
        return Ok(None);
    }
    let fin = buf[0] & FIN != 0;
    let opcode = Opcode::from_u8(buf[0] & 0x0F).ok_or(FrameError::UnknownOpcode(buf[0] & 0x0F))?;
    let masked = buf[1] & MASK != 0;

    let mut pos = 2;
    let payload_len = match buf[1] & 0x7F {
        LEN_U16 => {
            let Some(ext) = buf.get(2..4) else {
                return Ok(None);
            };
            pos += 2;
            u64::from(u16::from_be_bytes([ext[0], ext[1]]))
        }
        LEN_U64 => {
            let Some(ext) = buf.get(2..10) else {
                return Ok(None);
            };
            pos += 8;
            let mut b = [0u8; 8];
            b.copy_from_slice(ext);
            u64::from_be_bytes(b)
        }
        n => u64::from(n),
    };

    if opcode.is_control() && (!fin || payload_len > MAX_CONTROL_PAYLOAD) {
        return Err(FrameError::InvalidControl);
    }

    let mask = if masked {
        let Some(key) = buf.get(pos..pos + 4) else {
            return Ok(None);
        };
        pos += 4;
        Some([key[0], key[1], key[2], key[3]])
    } else {
        None
    };

    Ok(Some((
        FrameHeader {
            fin,
            opcode,
            mask,
            payload_len,
        },
        pos,
    )))
}

/// XOR `payload` in place with the repeating 4-byte `key`.
/// Applying the same key twice restores the input.
pub fn apply_mask(payload: &mut [u8], key: [u8; 4]) {
    for (i, b) in payload.iter_mut().enumerate() {
        *b ^= key[i & 3];
    }
}
