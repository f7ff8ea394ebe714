//! Update-task handoff.
//!
//! Uses `embassy-sync` primitives to bridge the update task with the
//! synchronous control loop. The session itself is moved into the task;
//! the loop only keeps an [`UpdateHandle`] to watch progress and to ask
//! for cancellation.
//!
//! ```text
//! ┌──────────────┐  UpdateReport  ┌──────────────┐
//! │ Update Task  │──────────────▶│ Control Loop │
//! │ (owns sess.) │◀──────────────│ (handle)     │
//! └──────────────┘  cancel signal └──────────────┘
//! ```

use std::sync::Arc;

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::channel::Channel;
use embassy_sync::signal::Signal;
use log::warn;

use super::ota::OtaError;

/// Channel depth for progress reports.
const REPORT_DEPTH: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateReport {
    Progress { written: u32, total: u32 },
    Completed,
    Failed(OtaError),
}

impl UpdateReport {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Progress { .. })
    }
}

pub struct UpdateMailbox {
    reports: Channel<CriticalSectionRawMutex, UpdateReport, REPORT_DEPTH>,
    cancel: Signal<CriticalSectionRawMutex, ()>,
}

impl UpdateMailbox {
    /// A fresh mailbox shared by one task and one handle.
    pub fn pair() -> (Arc<Self>, UpdateHandle) {
        let mailbox = Arc::new(Self {
            reports: Channel::new(),
            cancel: Signal::new(),
        });
        let handle = UpdateHandle {
            mailbox: Arc::clone(&mailbox),
            finished: false,
        };
        (mailbox, handle)
    }

    /// Post a report. Progress is dropped when the loop lags behind;
    /// terminal reports wait for room.
    pub fn report(&self, report: UpdateReport) {
        if self.reports.try_send(report).is_ok() {
            return;
        }
        if report.is_terminal() {
            // Make room by discarding the oldest progress report.
            let _ = self.reports.try_receive();
            if self.reports.try_send(report).is_err() {
                warn!("OTA: report channel jammed, {report:?} lost");
            }
        }
    }

    pub fn cancel_requested(&self) -> bool {
        self.cancel.signaled()
    }
}

/// Control-loop side of a running update.
pub struct UpdateHandle {
    mailbox: Arc<UpdateMailbox>,
    finished: bool,
}

impl UpdateHandle {
    pub fn try_report(&mut self) -> Option<UpdateReport> {
        let report = self.mailbox.reports.try_receive().ok()?;
        if report.is_terminal() {
            self.finished = true;
        }
        Some(report)
    }

    pub fn cancel(&self) {
        self.mailbox.cancel.signal(());
    }

    /// A terminal report has been received.
    pub fn is_finished(&self) -> bool {
        self.finished
    }
}
