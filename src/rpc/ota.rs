//! Chunked, hash-verified firmware download.
//!
//! Flow: begin → N × (fetch block i → verify → write) → empty block → finalize → activate
//!
//! ```text
//!  Idle ─▶ Initializing ─▶ AwaitingChunk(0) ─▶ WritingChunk(0) ─▶ AwaitingChunk(1) ─ …
//!                │                ▲  │ hash mismatch
//!                │ begin fails    └──┘ (same index)
//!                ▼                                         empty block
//!              (no session)      write fails ─▶ Aborted    ─────────▶ Finalizing ─▶ Activated
//! ```
//!
//! Each block response is `[OTA_BLOCK, sha256, data, index]`; the digest
//! is a 32-byte buffer or its 64-character hex string. The session only
//! ever writes at its own cumulative offset, so a replayed or reordered
//! block can never land twice.

use core::fmt;
use log::{debug, info, warn};

use super::boot;
use super::codec::{self, EncodeError};
use super::command::{self, CommandHeader};
use super::value::Value;
use crate::adapters::crypto::{self, SHA256_LEN};
use crate::app::ports::{PartitionError, PartitionPort, StoragePort};

const MAX_FIRMWARE_SIZE: u32 = 4 * 1024 * 1024; // 4 MB

// ── Error type ────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OtaError {
    InvalidSize,
    BeginFailed,
    WriteFailed,
    VerifyFailed,
    BootSetFailed,
    MarkerFailed,
    IncompleteTransfer,
    Overflow,
    Cancelled,
    ConnectionLost,
}

impl fmt::Display for OtaError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidSize => write!(f, "firmware size out of range (max 4 MB)"),
            Self::BeginFailed => write!(f, "OTA begin failed"),
            Self::WriteFailed => write!(f, "OTA write failed"),
            Self::VerifyFailed => write!(f, "OTA verification failed"),
            Self::BootSetFailed => write!(f, "set boot partition failed"),
            Self::MarkerFailed => write!(f, "pending-verify marker not persisted"),
            Self::IncompleteTransfer => write!(f, "stream ended before all bytes arrived"),
            Self::Overflow => write!(f, "block would exceed declared firmware size"),
            Self::Cancelled => write!(f, "update cancelled"),
            Self::ConnectionLost => write!(f, "update connection lost"),
        }
    }
}

impl From<PartitionError> for OtaError {
    fn from(e: PartitionError) -> Self {
        match e {
            PartitionError::BeginFailed => Self::BeginFailed,
            PartitionError::WriteFailed => Self::WriteFailed,
            PartitionError::FinalizeFailed | PartitionError::RollbackFailed => Self::VerifyFailed,
            PartitionError::ActivateFailed => Self::BootSetFailed,
        }
    }
}

// ── State machine ─────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateState {
    Idle,
    Initializing,
    AwaitingChunk(u32),
    WritingChunk(u32),
    Finalizing,
    Activated,
    Aborted,
}

/// What one block response did to the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkOutcome {
    /// Not a block response, or the session is finished.
    Ignored,
    /// Digest mismatch or out-of-order block: fetch this index again.
    Refetch(u32),
    /// An index already written. Nothing was touched.
    Duplicate(u32),
    Written { index: u32, written: u32, total: u32 },
    /// Image finalized, activated and marked pending verification.
    Completed,
    Failed(OtaError),
}

pub struct UpdateSession<P: PartitionPort, S: StoragePort> {
    partition: P,
    storage: S,
    handle: Option<P::Handle>,
    device_id: [u8; 32],
    chunk_len: u32,
    firmware_len: u32,
    next_index: u32,
    written: u32,
    state: UpdateState,
}

impl<P: PartitionPort, S: StoragePort> UpdateSession<P, S> {
    /// Open the inactive partition. A failure leaves no session behind.
    pub fn begin(
        mut partition: P,
        storage: S,
        device_id: [u8; 32],
        chunk_len: u32,
        firmware_len: u32,
    ) -> Result<Self, OtaError> {
        if firmware_len == 0 || firmware_len > MAX_FIRMWARE_SIZE || chunk_len == 0 {
            return Err(OtaError::InvalidSize);
        }
        debug!("OTA: state {:?}", UpdateState::Initializing);
        let handle = partition.begin_write(firmware_len).map_err(|e| {
            warn!("OTA: begin failed: {e}");
            OtaError::BeginFailed
        })?;
        info!("OTA: begin ({firmware_len} bytes, {chunk_len}-byte blocks)");
        Ok(Self {
            partition,
            storage,
            handle: Some(handle),
            device_id,
            chunk_len,
            firmware_len,
            next_index: 0,
            written: 0,
            state: UpdateState::AwaitingChunk(0),
        })
    }

    pub fn state(&self) -> UpdateState {
        self.state
    }

    /// Index of the block the session is waiting for.
    pub fn next_index(&self) -> u32 {
        self.next_index
    }

    pub fn written(&self) -> u32 {
        self.written
    }

    pub fn firmware_len(&self) -> u32 {
        self.firmware_len
    }

    pub fn is_finished(&self) -> bool {
        matches!(self.state, UpdateState::Activated | UpdateState::Aborted)
    }

    /// `[OTA_BLOCK, deviceId, index]` for the awaited block.
    pub fn fetch_request(&self) -> Result<Vec<u8>, EncodeError> {
        block_request(&self.device_id, self.next_index)
    }

    /// Feed one binary message from the update connection.
    pub fn on_message(&mut self, frame: &[u8]) -> ChunkOutcome {
        let UpdateState::AwaitingChunk(expected) = self.state else {
            return ChunkOutcome::Ignored;
        };
        let Ok(values) = codec::decode_borrowed(frame) else {
            debug!("OTA: undecodable message");
            return ChunkOutcome::Ignored;
        };
        let Some(block) = Block::parse(&values) else {
            return ChunkOutcome::Ignored;
        };

        if block.index < expected {
            debug!("OTA: duplicate block {} (expecting {expected})", block.index);
            return ChunkOutcome::Duplicate(block.index);
        }
        if block.index > expected {
            warn!("OTA: block {} out of order, refetching {expected}", block.index);
            return ChunkOutcome::Refetch(expected);
        }
        if block.data.is_empty() {
            return self.finish();
        }
        if block.digest.as_ref().is_none_or(|d| !crypto::ct_eq(d, &crypto::sha256(block.data))) {
            warn!("OTA: block {expected} hash mismatch, refetching");
            return ChunkOutcome::Refetch(expected);
        }
        self.write_block(expected, block.data)
    }

    /// Abandon the session. The partition is never activated.
    pub fn cancel(&mut self) {
        if self.is_finished() {
            return;
        }
        if let Some(handle) = self.handle.take() {
            self.partition.abort(handle);
        }
        self.state = UpdateState::Aborted;
        warn!("OTA: aborted at block {} ({} bytes written)", self.next_index, self.written);
    }

    fn write_block(&mut self, index: u32, data: &[u8]) -> ChunkOutcome {
        let len = data.len() as u32;
        if len > self.chunk_len || self.written.saturating_add(len) > self.firmware_len {
            warn!("OTA: block {index} of {len} bytes overflows the image");
            return self.fail(OtaError::Overflow);
        }
        let Some(handle) = self.handle.as_mut() else {
            return self.fail(OtaError::WriteFailed);
        };

        self.state = UpdateState::WritingChunk(index);
        if let Err(e) = self.partition.write_at(handle, self.written, data) {
            warn!("OTA: write at {} failed: {e}", self.written);
            return self.fail(OtaError::WriteFailed);
        }
        self.written += len;
        self.next_index += 1;
        self.state = UpdateState::AwaitingChunk(self.next_index);
        ChunkOutcome::Written {
            index,
            written: self.written,
            total: self.firmware_len,
        }
    }

    fn finish(&mut self) -> ChunkOutcome {
        if self.written != self.firmware_len {
            warn!("OTA: stream ended at {}/{} bytes", self.written, self.firmware_len);
            return self.fail(OtaError::IncompleteTransfer);
        }
        let Some(handle) = self.handle.take() else {
            return self.fail(OtaError::VerifyFailed);
        };

        self.state = UpdateState::Finalizing;
        let activated = self.activate(handle);
        match activated {
            Ok(()) => {
                self.state = UpdateState::Activated;
                info!("OTA: {} bytes activated, pending verification", self.written);
                ChunkOutcome::Completed
            }
            Err(e) => {
                warn!("OTA: finalize failed: {e}");
                self.state = UpdateState::Aborted;
                ChunkOutcome::Failed(e)
            }
        }
    }

    /// The pending marker lands before the boot partition flips, so an
    /// active image always boots under verification.
    fn activate(&mut self, handle: P::Handle) -> Result<(), OtaError> {
        self.partition.finalize(handle)?;
        boot::mark_pending(&mut self.storage).map_err(|_| OtaError::MarkerFailed)?;
        if let Err(e) = self.partition.set_active() {
            if boot::clear_pending(&mut self.storage).is_err() {
                warn!("OTA: could not clear the pending marker");
            }
            return Err(e.into());
        }
        Ok(())
    }

    fn fail(&mut self, error: OtaError) -> ChunkOutcome {
        self.cancel();
        ChunkOutcome::Failed(error)
    }
}

impl<P: PartitionPort, S: StoragePort> Drop for UpdateSession<P, S> {
    fn drop(&mut self) {
        self.cancel();
    }
}

/// `[OTA_BLOCK, deviceId, index]`
pub fn block_request(device_id: &[u8; 32], index: u32) -> Result<Vec<u8>, EncodeError> {
    codec::encode(&[
        Value::U8(command::OTA_BLOCK),
        Value::borrowed_buf(device_id),
        Value::U32(index),
    ])
}

struct Block<'a> {
    /// `None` when the digest was present but malformed.
    digest: Option<[u8; SHA256_LEN]>,
    data: &'a [u8],
    index: u32,
}

impl<'a> Block<'a> {
    fn parse(values: &'a [Value<'a>]) -> Option<Self> {
        let [cmd, digest, data, index] = values else {
            return None;
        };
        if CommandHeader::parse(cmd)?.command != command::OTA_BLOCK {
            return None;
        }
        let digest = match digest {
            Value::Buf(raw) => <[u8; SHA256_LEN]>::try_from(&**raw).ok(),
            Value::Str(hex) => crypto::from_hex(hex).and_then(|d| <[u8; SHA256_LEN]>::try_from(d).ok()),
            _ => return None,
        };
        Some(Self {
            digest,
            data: data.as_bytes()?,
            index: u32::try_from(index.as_u64()?).ok()?,
        })
    }
}

// ── Tests ─────────────────────────────────────────────────────
