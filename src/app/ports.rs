//! Port traits: the hexagonal boundary between the control plane and the outside world.
//!
//! ```text
//!   Adapter ──▶ Port trait ──▶ ControlPlane / UpdateSession / BootValidator
//! ```
//!
//! Driven adapters (flash partitions, key-value storage, event sinks)
//! implement these traits. The core consumes them via generics, so
//! nothing above `adapters` touches ESP-IDF directly.
//!
//! ## Security notes
//!
//! - **ConfigPort** implementations MUST validate before persisting.
//! - **PartitionPort** implementations MUST NOT activate an image that
//!   was not finalized.
//! - All port errors are typed; callers must handle every variant explicitly.

use crate::config::SystemConfig;

// ───────────────────────────────────────────────────────────────
// Event sink port (driven adapter: core → logging / telemetry)
// ───────────────────────────────────────────────────────────────

/// The core emits structured [`AppEvent`](super::events::AppEvent)s
/// through this port.
pub trait EventSink {
    fn emit(&mut self, event: &super::events::AppEvent);
}

// ───────────────────────────────────────────────────────────────
// Configuration port (driven adapter: core ↔ persistent config)
// ───────────────────────────────────────────────────────────────

/// Loads and persists system configuration.
///
/// # Security
///
/// Implementations MUST call [`SystemConfig::validate`] before
/// persisting and reject with [`ConfigError::ValidationFailed`]. A
/// tampered config must not be able to, for example, lift the payload
/// bound or shrink the replay window to zero.
pub trait ConfigPort {
    /// Returns [`SystemConfig::default()`] if no stored config exists.
    fn load(&self) -> Result<SystemConfig, ConfigError>;

    fn save(&self, config: &SystemConfig) -> Result<(), ConfigError>;
}

// ───────────────────────────────────────────────────────────────
// Storage port (driven adapter: core ↔ NVS / flash)
// ───────────────────────────────────────────────────────────────

/// Persistent key-value storage for boot markers, credentials and config.
///
/// Keys are namespaced to prevent collisions between subsystems. Write
/// operations MUST be atomic: the boot counter is read on every boot and
/// a torn write there would defeat rollback.
pub trait StoragePort {
    /// Read a value.  Returns the number of bytes written to `buf`.
    fn read(&self, namespace: &str, key: &str, buf: &mut [u8]) -> Result<usize, StorageError>;

    /// Write a value atomically.
    fn write(&mut self, namespace: &str, key: &str, data: &[u8]) -> Result<(), StorageError>;

    /// Delete a key.  Returns `Ok(())` even if the key didn't exist.
    fn delete(&mut self, namespace: &str, key: &str) -> Result<(), StorageError>;

    /// Check whether a key exists without reading it.
    fn exists(&self, namespace: &str, key: &str) -> bool;

    /// Read a little-endian `u64`, `None` if absent or malformed.
    fn read_u64(&self, namespace: &str, key: &str) -> Option<u64> {
        let mut buf = [0u8; 8];
        match self.read(namespace, key, &mut buf) {
            Ok(8) => Some(u64::from_le_bytes(buf)),
            _ => None,
        }
    }

    fn write_u64(&mut self, namespace: &str, key: &str, value: u64) -> Result<(), StorageError> {
        self.write(namespace, key, &value.to_le_bytes())
    }
}

// ───────────────────────────────────────────────────────────────
// Partition port (driven adapter: update engine → OTA flash)
// ───────────────────────────────────────────────────────────────

/// The inactive firmware slot and the boot selector.
///
/// A write handle is exclusive: only one may be open at a time, and
/// dropping it without [`finalize`](Self::finalize) abandons the image.
pub trait PartitionPort {
    type Handle;

    /// Open the inactive partition for an image of `size_hint` bytes.
    fn begin_write(&mut self, size_hint: u32) -> Result<Self::Handle, PartitionError>;

    /// Write `data` at byte `offset` of the image.
    fn write_at(&mut self, handle: &mut Self::Handle, offset: u32, data: &[u8]) -> Result<(), PartitionError>;

    /// Verify the written image and stage it for activation.
    fn finalize(&mut self, handle: Self::Handle) -> Result<(), PartitionError>;

    /// Select the last finalized image for the next boot.
    fn set_active(&mut self) -> Result<(), PartitionError>;

    /// Abandon an open image.
    fn abort(&mut self, handle: Self::Handle);

    /// Switch back to the previously running image and reboot.
    fn rollback(&mut self) -> Result<(), PartitionError>;
}

// ───────────────────────────────────────────────────────────────
// Update launcher port (driven adapter: control plane → update task)
// ───────────────────────────────────────────────────────────────

/// Starts an authorized firmware update outside the control loop.
///
/// Implementations open the inactive partition, build the
/// [`UpdateSession`](crate::rpc::ota::UpdateSession) and its dedicated
/// connection, and move both into a task that reports through `mailbox`.
/// An `Err` means nothing was started and no partition is open.
pub trait UpdateLauncher {
    fn launch(
        &mut self,
        device_id: [u8; 32],
        request: &crate::rpc::engine::UpdateRequest,
        mailbox: std::sync::Arc<crate::rpc::channels::UpdateMailbox>,
    ) -> Result<(), crate::rpc::ota::OtaError>;
}

// ───────────────────────────────────────────────────────────────
// Error types
// ───────────────────────────────────────────────────────────────

/// Errors from [`ConfigPort`] operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigError {
    /// No config found in storage (first boot).
    NotFound,
    /// Stored config failed integrity / deserialization check.
    Corrupted,
    /// A config field failed range validation.
    /// The `&'static str` describes which field and why.
    ValidationFailed(&'static str),
    /// Underlying storage is full.
    StorageFull,
    /// Generic I/O error from the storage backend.
    IoError,
}

/// Errors from [`StoragePort`] operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageError {
    /// Requested key does not exist.
    NotFound,
    /// Storage partition is full.
    Full,
    /// Generic I/O error.
    IoError,
    /// Encryption or decryption failed (wrong key, corrupted blob).
    EncryptionError,
}

/// Errors from [`PartitionPort`] operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PartitionError {
    /// No inactive partition, or it could not be opened.
    BeginFailed,
    /// Flash write failed or the offset was not the next byte.
    WriteFailed,
    /// Image verification failed.
    FinalizeFailed,
    /// The boot selector could not be updated.
    ActivateFailed,
    /// No previous image to roll back to.
    RollbackFailed,
}

impl core::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::NotFound => write!(f, "config not found"),
            Self::Corrupted => write!(f, "config corrupted"),
            Self::ValidationFailed(msg) => write!(f, "validation failed: {}", msg),
            Self::StorageFull => write!(f, "storage full"),
            Self::IoError => write!(f, "I/O error"),
        }
    }
}

impl core::fmt::Display for StorageError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::NotFound => write!(f, "key not found"),
            Self::Full => write!(f, "storage full"),
            Self::IoError => write!(f, "I/O error"),
            Self::EncryptionError => write!(f, "encryption error"),
        }
    }
}

impl core::fmt::Display for PartitionError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::BeginFailed => write!(f, "partition begin failed"),
            Self::WriteFailed => write!(f, "partition write failed"),
            Self::FinalizeFailed => write!(f, "image verification failed"),
            Self::ActivateFailed => write!(f, "set boot partition failed"),
            Self::RollbackFailed => write!(f, "rollback failed"),
        }
    }
}
