//! Update I/O task: pumps the dedicated update connection.
//!
//! While a firmware update runs, this task is the only owner of the
//! [`UpdateSession`] and of its WebSocket client. It runs in its own
//! thread using `edge-executor` with an `async-io-mini` timer between
//! steps, and talks to the control loop only through the
//! [`UpdateMailbox`].
//!
//! ```text
//!  ┌──────────────────────────────────────────────────────────┐
//!  │  ota-io thread                                           │
//!  │  edge_executor::LocalExecutor                            │
//!  │   loop {                                                 │
//!  │     cancel? ──▶ abort                                    │
//!  │     WsClient::poll ──▶ Connected   ──▶ fetch(next index) │
//!  │                    ──▶ Binary      ──▶ session ──▶ fetch │
//!  │                    ──▶ Error/Down  ──▶ reconnect budget  │
//!  │     Timer::after(2ms)                                    │
//!  │   }                                                      │
//!  └──────────────────────────────────────────────────────────┘
//! ```
//!
//! After a reconnect the task asks for the session's next expected
//! index, so the download resumes from the last acknowledged block.

use core::time::Duration;
use std::io;
use std::sync::Arc;
use std::thread::JoinHandle;

use log::{info, warn};

use super::channels::{UpdateMailbox, UpdateReport};
use super::ota::{ChunkOutcome, OtaError, UpdateSession};
use crate::adapters::task_pin::{self, Core};
use crate::adapters::time::DeviceClock;
use crate::app::ports::{PartitionPort, StoragePort};
use crate::ws::{Connector, WsClient, WsEvent};

const POLL_INTERVAL_MS: u64 = 2;

pub struct UpdateTask<C: Connector, P: PartitionPort, S: StoragePort> {
    client: WsClient<C>,
    session: UpdateSession<P, S>,
    mailbox: Arc<UpdateMailbox>,
    url: String,
    connection_losses: u32,
    max_reconnects: u32,
}

impl<C: Connector, P: PartitionPort, S: StoragePort> UpdateTask<C, P, S> {
    pub fn new(
        client: WsClient<C>,
        session: UpdateSession<P, S>,
        url: &str,
        mailbox: Arc<UpdateMailbox>,
        max_reconnects: u32,
    ) -> Self {
        Self {
            client,
            session,
            mailbox,
            url: url.to_owned(),
            connection_losses: 0,
            max_reconnects,
        }
    }

    pub fn session(&self) -> &UpdateSession<P, S> {
        &self.session
    }

    /// Open the update connection. Returns a terminal report when the
    /// connection can never be opened (bad URL).
    pub fn start(&mut self, now_ms: u64) -> Option<UpdateReport> {
        match self.client.connect(&self.url, now_ms) {
            Ok(()) => None,
            Err(e) if self.client.retry_at().is_some() => {
                warn!("OTA: update connection failed ({e}), retrying");
                None
            }
            Err(e) => {
                warn!("OTA: update connection impossible: {e}");
                self.session.cancel();
                Some(self.finish(UpdateReport::Failed(OtaError::ConnectionLost)))
            }
        }
    }

    /// Advance by at most one connection event. Returns the terminal
    /// report once the update is over.
    pub fn step(&mut self, now_ms: u64) -> Option<UpdateReport> {
        if self.mailbox.cancel_requested() {
            self.session.cancel();
            return Some(self.finish(UpdateReport::Failed(OtaError::Cancelled)));
        }

        match self.client.poll(now_ms)? {
            WsEvent::Connected => {
                info!("OTA: update channel up, requesting block {}", self.session.next_index());
                self.request_block()
            }
            WsEvent::Binary(data) => match self.session.on_message(&data) {
                ChunkOutcome::Written { written, total, .. } => {
                    self.connection_losses = 0;
                    self.mailbox.report(UpdateReport::Progress { written, total });
                    self.request_block()
                }
                ChunkOutcome::Refetch(_) => self.request_block(),
                ChunkOutcome::Duplicate(_) | ChunkOutcome::Ignored => None,
                ChunkOutcome::Completed => Some(self.finish(UpdateReport::Completed)),
                ChunkOutcome::Failed(e) => Some(self.finish(UpdateReport::Failed(e))),
            },
            WsEvent::Disconnected | WsEvent::Error(_) => {
                self.connection_losses += 1;
                if self.connection_losses > self.max_reconnects {
                    warn!("OTA: update channel lost {} times, giving up", self.connection_losses);
                    self.session.cancel();
                    return Some(self.finish(UpdateReport::Failed(OtaError::ConnectionLost)));
                }
                warn!(
                    "OTA: update channel down ({}/{}), will resume at block {}",
                    self.connection_losses,
                    self.max_reconnects,
                    self.session.next_index()
                );
                None
            }
            _ => None,
        }
    }

    /// Drive the task until the update ends.
    pub async fn run(mut self) {
        let clock = DeviceClock::new();
        if self.start(clock.uptime_ms()).is_some() {
            return;
        }
        while self.step(clock.uptime_ms()).is_none() {
            async_io_mini::Timer::after(Duration::from_millis(POLL_INTERVAL_MS)).await;
        }
    }

    fn request_block(&mut self) -> Option<UpdateReport> {
        let request = match self.session.fetch_request() {
            Ok(request) => request,
            Err(e) => {
                warn!("OTA: block request unencodable: {e}");
                self.session.cancel();
                return Some(self.finish(UpdateReport::Failed(OtaError::WriteFailed)));
            }
        };
        if let Err(e) = self.client.send_binary(&request) {
            // The connection reports the failure on a later poll.
            warn!("OTA: block request not sent: {e}");
        }
        None
    }

    fn finish(&mut self, report: UpdateReport) -> UpdateReport {
        self.client.stop();
        self.mailbox.report(report);
        report
    }
}

/// Spawn the update task in a dedicated thread on the protocol core.
///
/// `build` runs inside the new thread, so the partition handle is
/// created and dropped there and never crosses threads. `None` ends
/// the thread without running anything.
pub fn spawn<C, P, S, B>(build: B) -> io::Result<JoinHandle<()>>
where
    C: Connector,
    P: PartitionPort,
    S: StoragePort,
    B: FnOnce() -> Option<UpdateTask<C, P, S>> + Send + 'static,
{
    task_pin::spawn_on_core(Core::Pro, 10, 16, "ota-io\0", move || {
        let Some(task) = build() else {
            return;
        };
        let executor: edge_executor::LocalExecutor<'_, 4> = edge_executor::LocalExecutor::new();
        futures_lite::future::block_on(executor.run(task.run()));
        info!("OTA: update task finished");
    })
}
