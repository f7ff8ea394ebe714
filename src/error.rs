//! Unified error types for the control-plane firmware.
//!
//! Each subsystem keeps its own small `Copy` error enum next to the code
//! that raises it; this module funnels them into one [`Error`] so the
//! boot path and the control loop can use `?` uniformly.

use core::fmt;

use crate::app::ports::{ConfigError, PartitionError, StorageError};
use crate::rpc::codec::{DecodeError, EncodeError};
use crate::rpc::ota::OtaError;
use crate::ws::WsError;

// ---------------------------------------------------------------------------
// Top-level firmware error
// ---------------------------------------------------------------------------

/// Every fallible operation in the firmware funnels into this type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// A value sequence could not be serialized.
    Encode(EncodeError),
    /// An inbound message was malformed.
    Decode(DecodeError),
    /// A WebSocket connection failed.
    Ws(WsError),
    /// A firmware update failed.
    Ota(OtaError),
    /// Key-value storage failed.
    Storage(StorageError),
    /// Firmware partition access failed.
    Partition(PartitionError),
    /// Configuration is invalid or could not be loaded.
    Config(ConfigError),
    /// Encryption or decryption of a provider payload failed.
    Crypto,
    /// Peripheral or service initialisation failed.
    Init(&'static str),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Encode(e) => write!(f, "encode: {e}"),
            Self::Decode(e) => write!(f, "decode: {e}"),
            Self::Ws(e) => write!(f, "websocket: {e}"),
            Self::Ota(e) => write!(f, "ota: {e}"),
            Self::Storage(e) => write!(f, "storage: {e}"),
            Self::Partition(e) => write!(f, "partition: {e}"),
            Self::Config(e) => write!(f, "config: {e}"),
            Self::Crypto => write!(f, "crypto: cipher failure"),
            Self::Init(msg) => write!(f, "init: {msg}"),
        }
    }
}

impl std::error::Error for Error {}

macro_rules! impl_from {
    ($($src:ty => $variant:ident),* $(,)?) => {
        $(
            impl From<$src> for Error {
                fn from(e: $src) -> Self {
                    Self::$variant(e)
                }
            }
        )*
    };
}

impl_from! {
    EncodeError => Encode,
    DecodeError => Decode,
    WsError => Ws,
    OtaError => Ota,
    StorageError => Storage,
    PartitionError => Partition,
    ConfigError => Config,
}

// ---------------------------------------------------------------------------
// Convenience Result alias
// ---------------------------------------------------------------------------

/// Firmware-wide `Result` alias.
pub type Result<T> = core::result::Result<T, Error>;
