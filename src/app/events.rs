//! Outbound application events.
//!
//! The [`ControlPlane`](super::service::ControlPlane) emits these through
//! the [`EventSink`](super::ports::EventSink) port. Adapters on the other
//! side decide what to do with them: log to serial, blink a status LED,
//! bring up an access point, etc.

use crate::rpc::boot::BootOutcome;
use crate::rpc::ota::OtaError;
use crate::ws::{ClientId, WsError};

/// Structured events emitted by the control plane.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AppEvent {
    /// Result of boot validation, emitted once at start.
    Boot(BootOutcome),

    /// The control connection completed its handshake.
    RemoteConnected,
    /// The control connection dropped.
    RemoteDisconnected,
    /// The control connection reported an error.
    RemoteError(WsError),
    /// A keepalive went unanswered; carries the consecutive count.
    RemoteUnresponsive(u32),

    /// A local client finished its handshake on slot `n`.
    LocalClientConnected(ClientId),
    LocalClientDisconnected(ClientId),

    /// A provider ran on behalf of an authorized caller.
    ProviderInvoked { id: u16 },

    /// The remote announced the epoch time.
    TimeSynced { epoch_ms: u64 },

    UpdateStarted { firmware_len: u32 },
    UpdateProgress { written: u32, total: u32 },
    /// The new image is active and boots pending verification.
    UpdateCompleted,
    UpdateFailed(OtaError),

    /// The running image was confirmed after a stable connection.
    FirmwareConfirmed,

    /// The device has been offline long enough to want a local access point.
    AccessPointRequested,
    /// The device is back online; a requested access point may close.
    AccessPointReleased,

    /// The device is about to restart.
    RestartScheduled,
    /// An operator asked to boot the previous image.
    RollbackRequested,
}
