//! Binary value codec.
//!
//! Wire format, repeated once per value:
//! ```text
//! ┌─────────┬──────────────────────────────────────────┐
//! │ Tag (1B)│ fixed-width BE payload                   │
//! ├─────────┼──────────────┬───────────────────────────┤
//! │ 0x85/86 │ Length (4B)  │ raw bytes (N B)           │
//! │         │ BE u32       │                           │
//! └─────────┴──────────────┴───────────────────────────┘
//! ```
//!
//! Decoding is all-or-nothing: any truncation drops every value decoded so
//! far and returns an error. A literal `0x00` tag byte is padding and is
//! skipped; every other unknown tag is fatal.

use core::fmt;
use std::borrow::Cow;

use super::value::{Tag, Value, Values};

/// Size of the big-endian length prefix on strings and buffers.
const LEN_PREFIX: usize = 4;

// ── Errors ───────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EncodeError {
    /// Nothing to encode.
    Empty,
    /// An element was [`Value::None`].
    UnsetValue,
    /// A string or buffer longer than `u32::MAX` bytes.
    TooLong,
    /// The output buffer could not be allocated.
    Alloc,
}

impl fmt::Display for EncodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Empty => write!(f, "empty value sequence"),
            Self::UnsetValue => write!(f, "unset value in sequence"),
            Self::TooLong => write!(f, "payload exceeds 32-bit length"),
            Self::Alloc => write!(f, "allocation failed"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeError {
    /// A declared width or length runs past the end of the input.
    Truncated { offset: usize },
    /// A non-zero tag byte outside the known set.
    UnknownTag { tag: u8, offset: usize },
    /// A string payload that is not UTF-8.
    InvalidUtf8 { offset: usize },
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Truncated { offset } => write!(f, "truncated value at offset {offset}"),
            Self::UnknownTag { tag, offset } => {
                write!(f, "unknown tag 0x{tag:02x} at offset {offset}")
            }
            Self::InvalidUtf8 { offset } => write!(f, "invalid UTF-8 string at offset {offset}"),
        }
    }
}

// ── Encode ───────────────────────────────────────────────────

fn encoded_len(value: &Value<'_>) -> Result<usize, EncodeError> {
    let tag = value.tag().ok_or(EncodeError::UnsetValue)?;
    if let Some(width) = tag.fixed_width() {
        return Ok(1 + width);
    }
    let payload = match value {
        Value::Str(s) => s.len(),
        Value::Buf(b) => b.len(),
        _ => 0,
    };
    if u32::try_from(payload).is_err() {
        return Err(EncodeError::TooLong);
    }
    Ok(1 + LEN_PREFIX + payload)
}

fn put_prefixed(out: &mut Vec<u8>, tag: Tag, bytes: &[u8]) {
    out.push(tag as u8);
    out.extend_from_slice(&(bytes.len() as u32).to_be_bytes());
    out.extend_from_slice(bytes);
}

/// Serialise `values` into a freshly allocated buffer.
///
/// The exact output size is computed and reserved up front, so the
/// result is either the complete encoding or an error, never a prefix.
pub fn encode(values: &[Value<'_>]) -> Result<Vec<u8>, EncodeError> {
    if values.is_empty() {
        return Err(EncodeError::Empty);
    }

    let mut total = 0usize;
    for v in values {
        total = total
            .checked_add(encoded_len(v)?)
            .ok_or(EncodeError::TooLong)?;
    }

    let mut out = Vec::new();
    out.try_reserve_exact(total)
        .map_err(|_| EncodeError::Alloc)?;

    for v in values {
        match v {
            Value::None => return Err(EncodeError::UnsetValue),
            Value::U8(x) => {
                out.push(Tag::U8 as u8);
                out.push(*x);
            }
            Value::U16(x) => {
                out.push(Tag::U16 as u8);
                out.extend_from_slice(&x.to_be_bytes());
            }
            Value::U32(x) => {
                out.push(Tag::U32 as u8);
                out.extend_from_slice(&x.to_be_bytes());
            }
            Value::U64(x) => {
                out.push(Tag::U64 as u8);
                out.extend_from_slice(&x.to_be_bytes());
            }
            Value::I8(x) => {
                out.push(Tag::I8 as u8);
                out.extend_from_slice(&x.to_be_bytes());
            }
            Value::I16(x) => {
                out.push(Tag::I16 as u8);
                out.extend_from_slice(&x.to_be_bytes());
            }
            Value::I32(x) => {
                out.push(Tag::I32 as u8);
                out.extend_from_slice(&x.to_be_bytes());
            }
            Value::I64(x) => {
                out.push(Tag::I64 as u8);
                out.extend_from_slice(&x.to_be_bytes());
            }
            Value::F32(x) => {
                out.push(Tag::F32 as u8);
                out.extend_from_slice(&x.to_be_bytes());
            }
            Value::F64(x) => {
                out.push(Tag::F64 as u8);
                out.extend_from_slice(&x.to_be_bytes());
            }
            Value::Str(s) => put_prefixed(&mut out, Tag::String, s.as_bytes()),
            Value::Buf(b) => put_prefixed(&mut out, Tag::Buffer, b),
        }
    }

    debug_assert_eq!(out.len(), total);
    Ok(out)
}

// ── Decode ───────────────────────────────────────────────────

/// Cursor over the input; every read is bounds-checked.
struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn take(&mut self, n: usize) -> Result<&'a [u8], DecodeError> {
        let end = self
            .pos
            .checked_add(n)
            .filter(|&end| end <= self.buf.len())
            .ok_or(DecodeError::Truncated { offset: self.pos })?;
        let bytes = &self.buf[self.pos..end];
        self.pos = end;
        Ok(bytes)
    }

    fn array<const N: usize>(&mut self) -> Result<[u8; N], DecodeError> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    fn prefixed(&mut self) -> Result<&'a [u8], DecodeError> {
        let len = u32::from_be_bytes(self.array()?) as usize;
        self.take(len)
    }
}

/// Decode with zero-copy views: strings and buffers borrow from `buf`.
///
/// The returned values cannot outlive `buf`; call
/// [`Value::into_owned`] (or use [`decode`]) to detach them.
pub fn decode_borrowed(buf: &[u8]) -> Result<Values<'_>, DecodeError> {
    let mut r = Reader { buf, pos: 0 };
    let mut out = Vec::new();

    while r.pos < buf.len() {
        let offset = r.pos;
        let byte = r.array::<1>()?[0];
        if byte == Tag::PADDING {
            continue;
        }
        let tag = Tag::from_u8(byte).ok_or(DecodeError::UnknownTag { tag: byte, offset })?;

        let value = match tag {
            Tag::U8 => Value::U8(r.array::<1>()?[0]),
            Tag::U16 => Value::U16(u16::from_be_bytes(r.array()?)),
            Tag::U32 => Value::U32(u32::from_be_bytes(r.array()?)),
            Tag::U64 => Value::U64(u64::from_be_bytes(r.array()?)),
            Tag::I8 => Value::I8(i8::from_be_bytes(r.array()?)),
            Tag::I16 => Value::I16(i16::from_be_bytes(r.array()?)),
            Tag::I32 => Value::I32(i32::from_be_bytes(r.array()?)),
            Tag::I64 => Value::I64(i64::from_be_bytes(r.array()?)),
            Tag::F32 => Value::F32(f32::from_be_bytes(r.array()?)),
            Tag::F64 => Value::F64(f64::from_be_bytes(r.array()?)),
            Tag::Buffer => Value::Buf(Cow::Borrowed(r.prefixed()?)),
            Tag::String => {
                let bytes = r.prefixed()?;
                let s = core::str::from_utf8(bytes)
                    .map_err(|_| DecodeError::InvalidUtf8 { offset })?;
                Value::Str(Cow::Borrowed(s))
            }
        };
        out.push(value);
    }

    Ok(out)
}

/// Decode into owned values.
pub fn decode(buf: &[u8]) -> Result<Values<'static>, DecodeError> {
    Ok(decode_borrowed(buf)?
        .into_iter()
        .map(Value::into_owned)
        .collect())
}
