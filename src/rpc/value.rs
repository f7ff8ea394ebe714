//! Tagged RPC values.
//!
//! A [`Value`] is exactly one primitive: an integer of 1/2/4/8 bytes,
//! a 32/64-bit float, a UTF-8 string or an opaque byte buffer.
//! Variable-length payloads are held in a [`Cow`], so a value is either
//! owned or a zero-copy view whose lifetime is tied to its source buffer.
//!
//! ```text
//! ┌─────┬───────────────────────────────┐
//! │ tag │ payload                       │
//! │ 1 B │ fixed width, or BE u32 + data │
//! └─────┴───────────────────────────────┘
//! ```

use std::borrow::Cow;

/// Ordered, position-significant list of values forming one message.
pub type Values<'a> = Vec<Value<'a>>;

// ── Wire tags ────────────────────────────────────────────────

/// One-byte type tag preceding every encoded value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Tag {
    U8 = 0x80,
    U16 = 0x81,
    U32 = 0x82,
    U64 = 0x83,
    Buffer = 0x85,
    String = 0x86,
    I8 = 0x88,
    I16 = 0x89,
    I32 = 0x90,
    I64 = 0x91,
    F32 = 0x92,
    F64 = 0x93,
}

impl Tag {
    /// Padding byte skipped by the decoder.
    pub const PADDING: u8 = 0x00;

    pub const fn from_u8(byte: u8) -> Option<Self> {
        Some(match byte {
            0x80 => Self::U8,
            0x81 => Self::U16,
            0x82 => Self::U32,
            0x83 => Self::U64,
            0x85 => Self::Buffer,
            0x86 => Self::String,
            0x88 => Self::I8,
            0x89 => Self::I16,
            0x90 => Self::I32,
            0x91 => Self::I64,
            0x92 => Self::F32,
            0x93 => Self::F64,
            _ => return None,
        })
    }

    /// Payload width for fixed-size tags; `None` for length-prefixed ones.
    pub const fn fixed_width(self) -> Option<usize> {
        match self {
            Self::U8 | Self::I8 => Some(1),
            Self::U16 | Self::I16 => Some(2),
            Self::U32 | Self::I32 | Self::F32 => Some(4),
            Self::U64 | Self::I64 | Self::F64 => Some(8),
            Self::Buffer | Self::String => None,
        }
    }
}

// ── Value ────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub enum Value<'a> {
    /// Placeholder for an unset slot. Never encodable.
    None,
    U8(u8),
    U16(u16),
    U32(u32),
    U64(u64),
    I8(i8),
    I16(i16),
    I32(i32),
    I64(i64),
    F32(f32),
    F64(f64),
    Str(Cow<'a, str>),
    Buf(Cow<'a, [u8]>),
}

impl<'a> Value<'a> {
    /// Owned string value.
    pub fn str(s: impl Into<String>) -> Value<'static> {
        Value::Str(Cow::Owned(s.into()))
    }

    /// Owned buffer value.
    pub fn buf(b: impl Into<Vec<u8>>) -> Value<'static> {
        Value::Buf(Cow::Owned(b.into()))
    }

    /// Zero-copy buffer view over caller-owned bytes.
    pub fn borrowed_buf(b: &'a [u8]) -> Self {
        Value::Buf(Cow::Borrowed(b))
    }

    pub fn tag(&self) -> Option<Tag> {
        Some(match self {
            Self::None => return None,
            Self::U8(_) => Tag::U8,
            Self::U16(_) => Tag::U16,
            Self::U32(_) => Tag::U32,
            Self::U64(_) => Tag::U64,
            Self::I8(_) => Tag::I8,
            Self::I16(_) => Tag::I16,
            Self::I32(_) => Tag::I32,
            Self::I64(_) => Tag::I64,
            Self::F32(_) => Tag::F32,
            Self::F64(_) => Tag::F64,
            Self::Str(_) => Tag::String,
            Self::Buf(_) => Tag::Buffer,
        })
    }

    /// Any unsigned integer widened to `u64`.
    pub fn as_u64(&self) -> Option<u64> {
        match *self {
            Self::U8(v) => Some(v.into()),
            Self::U16(v) => Some(v.into()),
            Self::U32(v) => Some(v.into()),
            Self::U64(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_u8(&self) -> Option<u8> {
        match *self {
            Self::U8(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Self::Buf(b) => Some(b),
            _ => None,
        }
    }

    /// True when the variable-length payload is a view rather than a copy.
    pub fn is_borrowed(&self) -> bool {
        matches!(
            self,
            Self::Str(Cow::Borrowed(_)) | Self::Buf(Cow::Borrowed(_))
        )
    }

    /// Detach from the source buffer by copying any borrowed payload.
    pub fn into_owned(self) -> Value<'static> {
        match self {
            Self::None => Value::None,
            Self::U8(v) => Value::U8(v),
            Self::U16(v) => Value::U16(v),
            Self::U32(v) => Value::U32(v),
            Self::U64(v) => Value::U64(v),
            Self::I8(v) => Value::I8(v),
            Self::I16(v) => Value::I16(v),
            Self::I32(v) => Value::I32(v),
            Self::I64(v) => Value::I64(v),
            Self::F32(v) => Value::F32(v),
            Self::F64(v) => Value::F64(v),
            Self::Str(s) => Value::Str(Cow::Owned(s.into_owned())),
            Self::Buf(b) => Value::Buf(Cow::Owned(b.into_owned())),
        }
    }
}

macro_rules! impl_from_primitive {
    ($($ty:ty => $variant:ident),* $(,)?) => {
        $(
            impl From<$ty> for Value<'static> {
                fn from(v: $ty) -> Self {
                    Value::$variant(v)
                }
            }
        )*
    };
}

impl_from_primitive! {
    u8 => U8,
    u16 => U16,
    u32 => U32,
    u64 => U64,
    i8 => I8,
    i16 => I16,
    i32 => I32,
    i64 => I64,
    f32 => F32,
    f64 => F64,
}

impl<'a> From<&'a str> for Value<'a> {
    fn from(s: &'a str) -> Self {
        Value::Str(Cow::Borrowed(s))
    }
}

impl From<String> for Value<'static> {
    fn from(s: String) -> Self {
        Value::Str(Cow::Owned(s))
    }
}

impl From<Vec<u8>> for Value<'static> {
    fn from(b: Vec<u8>) -> Self {
        Value::Buf(Cow::Owned(b))
    }
}
