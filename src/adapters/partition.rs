//! Firmware partition adapter.
//!
//! Implements [`PartitionPort`] over `esp-ota` on device and over an
//! in-memory slot on the host. Writes must be sequential: `esp-ota`
//! streams into the inactive partition and cannot seek.

use log::{info, warn};

use crate::app::ports::{PartitionError, PartitionPort};

// ── ESP-IDF ───────────────────────────────────────────────────

#[cfg(target_os = "espidf")]
pub struct EspPartition {
    completed: Option<esp_ota::CompletedOtaUpdate>,
}

#[cfg(target_os = "espidf")]
pub struct EspWriteHandle {
    update: esp_ota::OtaUpdate,
    written: u32,
}

#[cfg(target_os = "espidf")]
impl EspPartition {
    pub fn new() -> Self {
        Self { completed: None }
    }

    /// Cancel the bootloader's own rollback for the running image.
    /// Confirmation is tracked by the boot markers instead.
    pub fn mark_running_valid() {
        match esp_ota::mark_app_valid() {
            Ok(()) => info!("OTA: running image marked valid for the bootloader"),
            Err(e) => warn!("OTA: mark_app_valid failed: {:?}", e),
        }
    }

    pub fn restart() -> ! {
        info!("OTA: restarting");
        esp_ota::restart()
    }
}

#[cfg(target_os = "espidf")]
impl Default for EspPartition {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(target_os = "espidf")]
impl PartitionPort for EspPartition {
    type Handle = EspWriteHandle;

    fn begin_write(&mut self, size_hint: u32) -> Result<EspWriteHandle, PartitionError> {
        let update = esp_ota::OtaUpdate::begin().map_err(|e| {
            warn!("esp-ota begin failed: {:?}", e);
            PartitionError::BeginFailed
        })?;
        info!("OTA: inactive partition open for {size_hint} bytes");
        Ok(EspWriteHandle { update, written: 0 })
    }

    fn write_at(&mut self, handle: &mut EspWriteHandle, offset: u32, data: &[u8]) -> Result<(), PartitionError> {
        if offset != handle.written {
            return Err(PartitionError::WriteFailed);
        }
        handle.update.write(data).map_err(|e| {
            warn!("esp-ota write failed: {:?}", e);
            PartitionError::WriteFailed
        })?;
        handle.written += data.len() as u32;
        Ok(())
    }

    fn finalize(&mut self, handle: EspWriteHandle) -> Result<(), PartitionError> {
        let completed = handle.update.finalize().map_err(|e| {
            warn!("esp-ota finalize failed: {:?}", e);
            PartitionError::FinalizeFailed
        })?;
        self.completed = Some(completed);
        Ok(())
    }

    fn set_active(&mut self) -> Result<(), PartitionError> {
        let completed = self.completed.as_mut().ok_or(PartitionError::ActivateFailed)?;
        completed.set_as_boot_partition().map_err(|e| {
            warn!("esp-ota set_as_boot_partition failed: {:?}", e);
            PartitionError::ActivateFailed
        })
    }

    fn abort(&mut self, handle: EspWriteHandle) {
        // esp-ota aborts automatically when OtaUpdate is dropped
        drop(handle);
        warn!("OTA: partition write abandoned");
    }

    fn rollback(&mut self) -> Result<(), PartitionError> {
        match esp_ota::rollback_and_reboot() {
            Err(e) => {
                warn!("esp-ota rollback failed: {:?}", e);
                Err(PartitionError::RollbackFailed)
            }
            Ok(never) => match never {},
        }
    }
}

// ── Simulation ────────────────────────────────────────────────

/// In-memory inactive slot for host builds.
#[cfg(not(target_os = "espidf"))]
#[derive(Debug, Default)]
pub struct SimPartition {
    staged: Option<Vec<u8>>,
    active: Option<Vec<u8>>,
    rollbacks: u32,
}

#[cfg(not(target_os = "espidf"))]
#[derive(Debug)]
pub struct SimWriteHandle {
    image: Vec<u8>,
}

#[cfg(not(target_os = "espidf"))]
impl SimPartition {
    pub fn new() -> Self {
        Self::default()
    }

    /// Image selected for the next boot, if any.
    pub fn active_image(&self) -> Option<&[u8]> {
        self.active.as_deref()
    }

    pub fn rollbacks(&self) -> u32 {
        self.rollbacks
    }
}

#[cfg(not(target_os = "espidf"))]
impl PartitionPort for SimPartition {
    type Handle = SimWriteHandle;

    fn begin_write(&mut self, size_hint: u32) -> Result<SimWriteHandle, PartitionError> {
        info!("OTA: simulated partition open for {size_hint} bytes");
        Ok(SimWriteHandle {
            image: Vec::with_capacity(size_hint as usize),
        })
    }

    fn write_at(&mut self, handle: &mut SimWriteHandle, offset: u32, data: &[u8]) -> Result<(), PartitionError> {
        if offset as usize != handle.image.len() {
            return Err(PartitionError::WriteFailed);
        }
        handle.image.extend_from_slice(data);
        Ok(())
    }

    fn finalize(&mut self, handle: SimWriteHandle) -> Result<(), PartitionError> {
        if handle.image.is_empty() {
            return Err(PartitionError::FinalizeFailed);
        }
        self.staged = Some(handle.image);
        Ok(())
    }

    fn set_active(&mut self) -> Result<(), PartitionError> {
        self.active = Some(self.staged.take().ok_or(PartitionError::ActivateFailed)?);
        Ok(())
    }

    fn abort(&mut self, handle: SimWriteHandle) {
        warn!("OTA: simulated write abandoned at {} bytes", handle.image.len());
    }

    fn rollback(&mut self) -> Result<(), PartitionError> {
        self.rollbacks += 1;
        self.active = None;
        warn!("OTA: simulated rollback (no reboot)");
        Ok(())
    }
}
