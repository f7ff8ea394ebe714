//! Boot-time firmware validation and rollback.
//!
//! A freshly activated image boots "pending verification". Every boot
//! in that state bumps a persisted counter; when the counter reaches the
//! threshold before the image is confirmed, the device rolls back to the
//! previous image.
//!
//! ```text
//!            finalize                  confirm (stable uptime)
//!   Stable ───────────▶ Pending(0) ─▶ Pending(1) ─ … ─────────▶ Stable
//!                            │
//!                            └── count >= threshold ──▶ RolledBack
//! ```
//!
//! Markers live in the `ota` namespace as little-endian `u64`s.

use log::{info, warn};

use crate::app::ports::{PartitionPort, StorageError, StoragePort};
use crate::error::Result;

pub const NAMESPACE: &str = "ota";
pub const KEY_PENDING: &str = "pendingOTA";
pub const KEY_BOOT_COUNT: &str = "pendingOTABootCount";
pub const KEY_INVALID: &str = "pendingOTAInvalid";
pub const KEY_LAST_UPDATE: &str = "lastOTATime";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BootOutcome {
    /// No unconfirmed image.
    Stable,
    /// Unconfirmed image; this is boot attempt `n`.
    PendingVerify(u32),
    /// The unconfirmed image was abandoned.
    RolledBack,
}

/// Persisted state of the running image, as reported to operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FirmwareStatus {
    /// No update has ever been recorded.
    Unknown,
    Valid,
    PendingVerify,
    /// A previous image was rolled back at this epoch time.
    RolledBackAt(u64),
}

pub struct BootValidator {
    threshold: u32,
}

impl BootValidator {
    pub fn new(threshold: u32) -> Self {
        Self { threshold }
    }

    /// Runs before any application code.
    ///
    /// On rollback the partition port is expected to reboot; host
    /// adapters return and the caller sees [`BootOutcome::RolledBack`].
    pub fn run(
        &self,
        storage: &mut impl StoragePort,
        partition: &mut impl PartitionPort,
        now_ms: u64,
    ) -> Result<BootOutcome> {
        if !is_pending(storage) {
            return Ok(BootOutcome::Stable);
        }
        let count = storage.read_u64(NAMESPACE, KEY_BOOT_COUNT).unwrap_or(0);

        if count >= u64::from(self.threshold) {
            warn!("BOOT: unconfirmed firmware failed {count} boots, rolling back");
            storage.write_u64(NAMESPACE, KEY_PENDING, 0)?;
            storage.write_u64(NAMESPACE, KEY_INVALID, now_ms)?;
            storage.write_u64(NAMESPACE, KEY_BOOT_COUNT, 0)?;
            partition.rollback()?;
            return Ok(BootOutcome::RolledBack);
        }

        let attempt = count + 1;
        storage.write_u64(NAMESPACE, KEY_BOOT_COUNT, attempt)?;
        info!("BOOT: unconfirmed firmware, attempt {attempt}/{}", self.threshold);
        Ok(BootOutcome::PendingVerify(attempt as u32))
    }
}

pub fn is_pending(storage: &impl StoragePort) -> bool {
    storage.read_u64(NAMESPACE, KEY_PENDING) == Some(1)
}

/// Arm verification for the image about to boot.
pub fn mark_pending(storage: &mut impl StoragePort) -> core::result::Result<(), StorageError> {
    storage.write_u64(NAMESPACE, KEY_PENDING, 1)?;
    storage.write_u64(NAMESPACE, KEY_BOOT_COUNT, 0)?;
    storage.write_u64(NAMESPACE, KEY_INVALID, 0)
}

/// Disarm verification for an image that never became bootable.
pub fn clear_pending(storage: &mut impl StoragePort) -> core::result::Result<(), StorageError> {
    storage.write_u64(NAMESPACE, KEY_PENDING, 0)?;
    storage.write_u64(NAMESPACE, KEY_BOOT_COUNT, 0)
}

/// Confirm the running image.
pub fn mark_firmware_valid(storage: &mut impl StoragePort, now_ms: u64) -> core::result::Result<(), StorageError> {
    storage.write_u64(NAMESPACE, KEY_PENDING, 0)?;
    storage.write_u64(NAMESPACE, KEY_BOOT_COUNT, 0)?;
    storage.write_u64(NAMESPACE, KEY_LAST_UPDATE, now_ms)?;
    info!("BOOT: firmware confirmed valid");
    Ok(())
}

pub fn firmware_status(storage: &impl StoragePort) -> FirmwareStatus {
    match storage.read_u64(NAMESPACE, KEY_INVALID) {
        Some(at) if at > 0 => FirmwareStatus::RolledBackAt(at),
        Some(_) => match storage.read_u64(NAMESPACE, KEY_PENDING) {
            Some(1) => FirmwareStatus::PendingVerify,
            Some(_) => FirmwareStatus::Valid,
            None => FirmwareStatus::Unknown,
        },
        None => FirmwareStatus::Unknown,
    }
}

pub fn last_update_time(storage: &impl StoragePort) -> u64 {
    storage.read_u64(NAMESPACE, KEY_LAST_UPDATE).unwrap_or(0)
}
