//! Log-based event sink adapter.
//!
//! Implements [`EventSink`] by writing structured application events to
//! the ESP-IDF logger (which goes to UART / USB-CDC in production).

use log::{info, warn};

use crate::app::events::AppEvent;
use crate::app::ports::EventSink;

/// Adapter that logs every [`AppEvent`] to the serial console.
#[derive(Debug, Default)]
pub struct LogEventSink;

impl LogEventSink {
    pub fn new() -> Self {
        Self
    }
}

impl EventSink for LogEventSink {
    fn emit(&mut self, event: &AppEvent) {
        match event {
            AppEvent::Boot(outcome) => info!("BOOT  | {:?}", outcome),
            AppEvent::RemoteConnected => info!("LINK  | control server up"),
            AppEvent::RemoteDisconnected => info!("LINK  | control server down"),
            AppEvent::RemoteError(e) => warn!("LINK  | error 0x{:02X}: {}", e.code(), e),
            AppEvent::RemoteUnresponsive(n) => warn!("LINK  | keepalive unanswered ({n})"),
            AppEvent::LocalClientConnected(id) => info!("LOCAL | client {id} connected"),
            AppEvent::LocalClientDisconnected(id) => info!("LOCAL | client {id} disconnected"),
            AppEvent::ProviderInvoked { id } => info!("RPC   | provider {id} invoked"),
            AppEvent::TimeSynced { epoch_ms } => info!("TIME  | synced to {epoch_ms}"),
            AppEvent::UpdateStarted { firmware_len } => info!("OTA   | started ({firmware_len} bytes)"),
            AppEvent::UpdateProgress { written, total } => {
                let pct = if *total == 0 { 0 } else { u64::from(*written) * 100 / u64::from(*total) };
                info!("OTA   | {written}/{total} bytes ({pct}%)");
            }
            AppEvent::UpdateCompleted => info!("OTA   | completed"),
            AppEvent::UpdateFailed(e) => warn!("OTA   | failed: {e}"),
            AppEvent::FirmwareConfirmed => info!("BOOT  | firmware confirmed"),
            AppEvent::AccessPointRequested => warn!("AP    | requested (offline)"),
            AppEvent::AccessPointReleased => info!("AP    | released"),
            AppEvent::RestartScheduled => warn!("SYS   | restart scheduled"),
            AppEvent::RollbackRequested => warn!("SYS   | rollback to previous image requested"),
        }
    }
}
