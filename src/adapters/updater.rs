//! Update launcher adapter.
//!
//! Implements [`UpdateLauncher`] by spawning the `ota-io` thread. The
//! partition, storage and [`UpdateSession`] are created inside that
//! thread, so `launch` returns as soon as the thread exists. A failed
//! `begin` arrives through the mailbox like any other terminal report.
//!
//! ```text
//!  ControlPlane ──launch──▶ TaskLauncher ──spawn──▶ ota-io thread
//!       ▲                                             open ports
//!       │                                             UpdateSession::begin
//!       └──────────── UpdateMailbox reports ───────── UpdateTask::run
//! ```

use core::marker::PhantomData;
use std::sync::Arc;
use std::thread::JoinHandle;

use log::{info, warn};

use crate::app::ports::{PartitionPort, StoragePort, UpdateLauncher};
use crate::config::SystemConfig;
use crate::rpc::channels::{UpdateMailbox, UpdateReport};
use crate::rpc::engine::UpdateRequest;
use crate::rpc::io_task::{self, UpdateTask};
use crate::rpc::ota::{OtaError, UpdateSession};
use crate::ws::{Connector, WsClient, WsLimits};

pub struct TaskLauncher<C, P, S, F> {
    connector: C,
    open_ports: F,
    url: String,
    limits: WsLimits,
    backoff_ms: u64,
    max_reconnects: u32,
    task: Option<JoinHandle<()>>,
    _ports: PhantomData<fn() -> (P, S)>,
}

impl<C, P, S, F> TaskLauncher<C, P, S, F>
where
    C: Connector + Clone + Send + 'static,
    P: PartitionPort + 'static,
    S: StoragePort + 'static,
    F: Fn() -> Option<(P, S)> + Clone + Send + 'static,
{
    /// `open_ports` runs on the update thread for every launch.
    pub fn new(connector: C, open_ports: F, config: &SystemConfig) -> Self {
        Self {
            connector,
            open_ports,
            url: config.ws_url.clone(),
            limits: WsLimits::from_config(config),
            backoff_ms: u64::from(config.reconnect_backoff_ms),
            max_reconnects: config.ota_max_reconnects,
            task: None,
            _ports: PhantomData,
        }
    }

    pub fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|t| !t.is_finished())
    }
}

impl<C, P, S, F> UpdateLauncher for TaskLauncher<C, P, S, F>
where
    C: Connector + Clone + Send + 'static,
    P: PartitionPort + 'static,
    S: StoragePort + 'static,
    F: Fn() -> Option<(P, S)> + Clone + Send + 'static,
{
    fn launch(
        &mut self,
        device_id: [u8; 32],
        request: &UpdateRequest,
        mailbox: Arc<UpdateMailbox>,
    ) -> Result<(), OtaError> {
        if self.is_running() {
            warn!("OTA: previous update task still running");
            return Err(OtaError::BeginFailed);
        }

        let connector = self.connector.clone();
        let open_ports = self.open_ports.clone();
        let url = self.url.clone();
        let limits = self.limits;
        let backoff_ms = self.backoff_ms;
        let max_reconnects = self.max_reconnects;
        let (chunk_len, firmware_len) = (request.chunk_len, request.firmware_len);

        let handle = io_task::spawn(move || {
            let begun = open_ports()
                .ok_or(OtaError::BeginFailed)
                .and_then(|(partition, storage)| {
                    UpdateSession::begin(partition, storage, device_id, chunk_len, firmware_len)
                });
            let session = match begun {
                Ok(session) => session,
                Err(e) => {
                    warn!("OTA: update session did not begin: {e}");
                    mailbox.report(UpdateReport::Failed(e));
                    return None;
                }
            };
            let client = WsClient::new(connector, limits, backoff_ms);
            Some(UpdateTask::new(client, session, &url, mailbox, max_reconnects))
        })
        .map_err(|e| {
            warn!("OTA: update task spawn failed: {e}");
            OtaError::BeginFailed
        })?;

        info!("OTA: update task spawned");
        self.task = Some(handle);
        Ok(())
    }
}
