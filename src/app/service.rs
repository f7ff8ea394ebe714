//! Control plane: the cooperative orchestrator.
//!
//! [`ControlPlane`] owns the remote control connection, the local
//! server, the dispatcher and the timers. It exposes a single
//! [`poll`](ControlPlane::poll) that the main loop calls with the current
//! uptime; storage, the update launcher and the event sink are injected
//! at the call site so the whole service runs against mock adapters.
//!
//! ```text
//!  WsClient (remote) ──┐                       ┌──▶ EventSink
//!                      ├──▶ ┌──────────────┐ ──┤
//!  WsServer (local) ───┘    │ ControlPlane │   └──▶ UpdateLauncher ──▶ ota-io task
//!                           │ Dispatcher   │
//!  Scheduler ──────────────▶│ WallClock    │◀── UpdateHandle (reports)
//!                           └──────────────┘
//! ```
//!
//! ## Offline policy
//!
//! Every `offline_probe_interval_ms` a HELLO goes out and the offline
//! counter increments. A WORLD (or a fresh handshake) resets it. Once the
//! counter passes `ap_start_after_offline_probes` an access point is
//! requested; after `ap_close_after_ms` back online it is released.

use log::{debug, info, warn};

use super::events::AppEvent;
use super::ports::{EventSink, StoragePort, UpdateLauncher};
use crate::adapters::time::WallClock;
use crate::config::SystemConfig;
use crate::rpc::boot;
use crate::rpc::builtin::{ActionSlot, DeviceAction};
use crate::rpc::channels::{UpdateHandle, UpdateMailbox, UpdateReport};
use crate::rpc::engine::{Dispatch, DispatchContext, Dispatcher, UpdateRequest};
use crate::rpc::value::Value;
use crate::scheduler::Scheduler;
use crate::ws::{ClientId, Connector, Listener, WsClient, WsEvent, WsLimits, WsServer};

/// Events drained from each endpoint per poll.
const EVENTS_PER_POLL: usize = 8;

const MSG_UPDATE_STARTED: &str = "OTA Update Started";
const MSG_UPDATE_START_FAILED: &str = "ota start failed";
const MSG_UPDATE_BUSY: &str = "ota already running";
const MSG_UPDATE_COMPLETED: &str = "OTA Update Completed";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Timer {
    OfflineProbe,
    ResponseTimeout,
    ConfirmFirmware,
    ReleaseAccessPoint,
    UpdateHardReset,
    Device(DeviceAction),
}

/// Where a message came from. Replies and update status go back there.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    Remote,
    Local(ClientId),
}

/// Answers commands the dispatcher does not route. `None` = no reply.
pub type ExtensionHandler = fn(&[Value<'_>]) -> Option<Vec<u8>>;

struct ActiveUpdate {
    handle: UpdateHandle,
    origin: Origin,
    caller: String,
}

// ───────────────────────────────────────────────────────────────
// ControlPlane
// ───────────────────────────────────────────────────────────────

pub struct ControlPlane<C: Connector, L: Listener> {
    config: SystemConfig,
    remote: WsClient<C>,
    local: WsServer<L>,
    dispatcher: Dispatcher,
    timers: Scheduler<Timer>,
    wall: WallClock,
    update: Option<ActiveUpdate>,
    extension: Option<ExtensionHandler>,
    actions: ActionSlot,
    /// The running image still awaits confirmation.
    firmware_pending: bool,
    offline_probes: u32,
    ap_requested: bool,
    restart_requested: bool,
    rollback_requested: bool,
}

impl<C: Connector, L: Listener> ControlPlane<C, L> {
    /// Build the service. `firmware_pending` comes from boot validation.
    ///
    /// Does **not** connect; call [`start`](Self::start) next.
    pub fn new(
        config: SystemConfig,
        connector: C,
        listener: L,
        dispatcher: Dispatcher,
        firmware_pending: bool,
    ) -> Self {
        let limits = WsLimits::from_config(&config);
        let remote = WsClient::new(connector, limits, u64::from(config.reconnect_backoff_ms));
        let local = WsServer::new(listener, limits, config.max_clients);
        Self {
            config,
            remote,
            local,
            dispatcher,
            timers: Scheduler::new(),
            wall: WallClock::new(),
            update: None,
            extension: None,
            actions: ActionSlot::new(),
            firmware_pending,
            offline_probes: 0,
            ap_requested: false,
            restart_requested: false,
            rollback_requested: false,
        }
    }

    pub fn set_extension(&mut self, handler: ExtensionHandler) {
        self.extension = Some(handler);
    }

    /// Slot the built-in providers post restart and rollback requests to.
    pub fn set_device_actions(&mut self, actions: ActionSlot) {
        self.actions = actions;
    }

    // ── Lifecycle ─────────────────────────────────────────────

    /// Arm the keepalive and open the control connection.
    pub fn start(&mut self, now_ms: u64) {
        self.timers.schedule_every(
            Timer::OfflineProbe,
            now_ms,
            u64::from(self.config.offline_probe_interval_ms),
        );
        if self.config.ws_url.is_empty() {
            warn!("CTRL: no control server provisioned");
            return;
        }
        // A failed first attempt schedules its own retry.
        if let Err(e) = self.remote.connect(&self.config.ws_url, now_ms) {
            warn!("CTRL: control connection failed: {e}");
        }
        info!("CTRL: started (firmware pending: {})", self.firmware_pending);
    }

    /// Run one cooperative cycle: endpoints → update reports → timers.
    pub fn poll(
        &mut self,
        now_ms: u64,
        storage: &mut impl StoragePort,
        launcher: &mut impl UpdateLauncher,
        sink: &mut impl EventSink,
    ) {
        for _ in 0..EVENTS_PER_POLL {
            let Some(event) = self.remote.poll(now_ms) else {
                break;
            };
            self.on_remote_event(event, now_ms, launcher, sink);
        }
        for _ in 0..EVENTS_PER_POLL {
            let Some((id, event)) = self.local.poll(now_ms) else {
                break;
            };
            self.on_local_event(id, event, now_ms, launcher, sink);
        }
        self.poll_update(sink);
        if let Some((action, delay_ms)) = self.actions.take() {
            info!("CTRL: {action:?} in {delay_ms} ms");
            self.timers.cancel_tag(Timer::Device(action));
            self.timers.schedule_once(Timer::Device(action), now_ms, delay_ms);
        }
        for timer in self.timers.poll(now_ms) {
            self.on_timer(timer, now_ms, storage, sink);
        }
    }

    /// Ask a running update to abort. The outcome arrives as a report.
    pub fn cancel_update(&self) {
        if let Some(active) = &self.update {
            info!("CTRL: update cancel requested");
            active.handle.cancel();
        }
    }

    // ── Queries ───────────────────────────────────────────────

    /// The loop should restart the device.
    pub fn restart_requested(&self) -> bool {
        self.restart_requested
    }

    /// The loop should roll back to the previous image. Reported once.
    pub fn take_rollback_request(&mut self) -> bool {
        core::mem::take(&mut self.rollback_requested)
    }

    pub fn is_online(&self) -> bool {
        self.remote.is_connected()
    }

    pub fn offline_probes(&self) -> u32 {
        self.offline_probes
    }

    pub fn access_point_requested(&self) -> bool {
        self.ap_requested
    }

    pub fn update_in_progress(&self) -> bool {
        self.update.is_some()
    }

    pub fn firmware_pending(&self) -> bool {
        self.firmware_pending
    }

    pub fn local_clients(&self) -> usize {
        self.local.client_count()
    }

    /// Epoch milliseconds, `0` before the first time sync.
    pub fn epoch_ms(&self, now_ms: u64) -> u64 {
        self.wall.now_ms(now_ms)
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    pub fn dispatcher_mut(&mut self) -> &mut Dispatcher {
        &mut self.dispatcher
    }

    // ── Endpoint events ───────────────────────────────────────

    fn on_remote_event(
        &mut self,
        event: WsEvent,
        now_ms: u64,
        launcher: &mut impl UpdateLauncher,
        sink: &mut impl EventSink,
    ) {
        match event {
            WsEvent::Connected => {
                info!("CTRL: control server connected");
                sink.emit(&AppEvent::RemoteConnected);
                self.on_online(now_ms);
                match self.dispatcher.register_message(self.firmware_pending) {
                    Ok(msg) => self.send_to(Origin::Remote, &msg),
                    Err(e) => warn!("CTRL: register message unencodable: {e}"),
                }
                if self.firmware_pending {
                    self.timers.cancel_tag(Timer::ConfirmFirmware);
                    self.timers
                        .schedule_once(Timer::ConfirmFirmware, now_ms, self.config.confirm_firmware_after_ms);
                }
            }
            WsEvent::Disconnected => {
                info!("CTRL: control server disconnected");
                self.on_offline();
                sink.emit(&AppEvent::RemoteDisconnected);
            }
            WsEvent::Error(e) => {
                warn!("CTRL: control connection error: {e}");
                self.on_offline();
                sink.emit(&AppEvent::RemoteError(e));
            }
            WsEvent::Binary(frame) => self.on_message(Origin::Remote, &frame, now_ms, launcher, sink),
            _ => {}
        }
    }

    fn on_local_event(
        &mut self,
        id: ClientId,
        event: WsEvent,
        now_ms: u64,
        launcher: &mut impl UpdateLauncher,
        sink: &mut impl EventSink,
    ) {
        match event {
            WsEvent::Connected => sink.emit(&AppEvent::LocalClientConnected(id)),
            WsEvent::Disconnected => sink.emit(&AppEvent::LocalClientDisconnected(id)),
            WsEvent::Error(e) => debug!("CTRL: local client {id} error: {e}"),
            WsEvent::Binary(frame) => self.on_message(Origin::Local(id), &frame, now_ms, launcher, sink),
            _ => {}
        }
    }

    fn on_message(
        &mut self,
        origin: Origin,
        frame: &[u8],
        now_ms: u64,
        launcher: &mut impl UpdateLauncher,
        sink: &mut impl EventSink,
    ) {
        let ctx = DispatchContext {
            now_ms: self.wall.now_ms(now_ms),
            remote_online: self.remote.is_connected(),
            ap_active: self.ap_requested,
        };
        match self.dispatcher.dispatch(frame, &ctx) {
            Dispatch::Ignored => {}
            Dispatch::Reply(reply) => self.send_to(origin, &reply),
            Dispatch::Executed { provider, reply } => {
                self.send_to(origin, &reply);
                sink.emit(&AppEvent::ProviderInvoked { id: provider });
            }
            // Keepalive and time only count when they come from the control server.
            Dispatch::Online if origin == Origin::Remote => self.on_online(now_ms),
            Dispatch::TimeSync(epoch_ms) if origin == Origin::Remote => {
                self.wall.sync(epoch_ms, now_ms);
                info!("CTRL: clock synced to {epoch_ms}");
                sink.emit(&AppEvent::TimeSynced { epoch_ms });
            }
            Dispatch::Online | Dispatch::TimeSync(_) => {
                debug!("CTRL: {origin:?} sent a control-server-only message");
            }
            Dispatch::StartUpdate(request) => self.start_update(origin, request, now_ms, launcher, sink),
            Dispatch::Unhandled(values) => match self.extension.and_then(|handler| handler(&values)) {
                Some(reply) => self.send_to(origin, &reply),
                None => debug!("CTRL: unhandled command {:?}", values.first()),
            },
        }
    }

    // ── Offline policy ────────────────────────────────────────

    fn on_online(&mut self, now_ms: u64) {
        self.offline_probes = 0;
        self.timers.cancel_tag(Timer::ResponseTimeout);
        if self.ap_requested && !self.timers.is_scheduled(Timer::ReleaseAccessPoint) {
            self.timers
                .schedule_once(Timer::ReleaseAccessPoint, now_ms, self.config.ap_close_after_ms);
        }
    }

    fn on_offline(&mut self) {
        // Confirmation needs an uninterrupted connection.
        self.timers.cancel_tag(Timer::ConfirmFirmware);
        self.timers.cancel_tag(Timer::ResponseTimeout);
        self.timers.cancel_tag(Timer::ReleaseAccessPoint);
    }

    fn probe(&mut self, now_ms: u64, sink: &mut impl EventSink) {
        self.offline_probes = self.offline_probes.saturating_add(1);
        if self.remote.is_connected() {
            match self.dispatcher.hello_message() {
                Ok(hello) => self.send_to(Origin::Remote, &hello),
                Err(e) => warn!("CTRL: hello unencodable: {e}"),
            }
            self.timers.cancel_tag(Timer::ResponseTimeout);
            self.timers.schedule_once(
                Timer::ResponseTimeout,
                now_ms,
                u64::from(self.config.server_response_timeout_ms),
            );
        }

        if self.offline_probes > self.config.ap_start_after_offline_probes && !self.ap_requested {
            warn!("CTRL: offline for {} probes, requesting access point", self.offline_probes);
            self.ap_requested = true;
            self.timers.cancel_tag(Timer::ReleaseAccessPoint);
            sink.emit(&AppEvent::AccessPointRequested);
        }
    }

    // ── Timers ────────────────────────────────────────────────

    fn on_timer(&mut self, timer: Timer, now_ms: u64, storage: &mut impl StoragePort, sink: &mut impl EventSink) {
        match timer {
            Timer::OfflineProbe => self.probe(now_ms, sink),
            Timer::ResponseTimeout => {
                warn!("CTRL: no WORLD within {} ms", self.config.server_response_timeout_ms);
                sink.emit(&AppEvent::RemoteUnresponsive(self.offline_probes));
            }
            Timer::ConfirmFirmware => self.confirm_firmware(now_ms, storage, sink),
            Timer::ReleaseAccessPoint => {
                if self.ap_requested && self.remote.is_connected() && self.offline_probes == 0 {
                    info!("CTRL: online again, releasing access point");
                    self.ap_requested = false;
                    sink.emit(&AppEvent::AccessPointReleased);
                }
            }
            Timer::UpdateHardReset => {
                warn!("CTRL: update did not finish within {} ms", self.config.ota_hard_reset_ms);
                if let Some(active) = self.update.take() {
                    active.handle.cancel();
                }
                self.request_restart(sink);
            }
            Timer::Device(DeviceAction::Restart) => self.request_restart(sink),
            Timer::Device(DeviceAction::Rollback) => {
                warn!("CTRL: rolling back to the previous image");
                self.rollback_requested = true;
                sink.emit(&AppEvent::RollbackRequested);
            }
        }
    }

    fn confirm_firmware(&mut self, now_ms: u64, storage: &mut impl StoragePort, sink: &mut impl EventSink) {
        if !self.firmware_pending || !self.remote.is_connected() {
            return;
        }
        match boot::mark_firmware_valid(storage, self.wall.now_ms(now_ms)) {
            Ok(()) => {
                self.firmware_pending = false;
                sink.emit(&AppEvent::FirmwareConfirmed);
            }
            Err(e) => {
                warn!("BOOT: confirmation not persisted ({e}), retrying later");
                self.timers
                    .schedule_once(Timer::ConfirmFirmware, now_ms, self.config.confirm_firmware_after_ms);
            }
        }
    }

    // ── Firmware update ───────────────────────────────────────

    fn start_update(
        &mut self,
        origin: Origin,
        request: UpdateRequest,
        now_ms: u64,
        launcher: &mut impl UpdateLauncher,
        sink: &mut impl EventSink,
    ) {
        if self.update.is_some() {
            warn!("CTRL: update already running, {} refused", request.caller);
            self.send_log(origin, &request.caller, MSG_UPDATE_BUSY);
            return;
        }

        let (mailbox, handle) = UpdateMailbox::pair();
        match launcher.launch(*self.dispatcher.device_id(), &request, mailbox) {
            Ok(()) => {
                info!("CTRL: update of {} bytes launched", request.firmware_len);
                self.timers
                    .schedule_once(Timer::UpdateHardReset, now_ms, self.config.ota_hard_reset_ms);
                self.send_log(origin, &request.caller, MSG_UPDATE_STARTED);
                sink.emit(&AppEvent::UpdateStarted {
                    firmware_len: request.firmware_len,
                });
                self.update = Some(ActiveUpdate {
                    handle,
                    origin,
                    caller: request.caller,
                });
            }
            Err(e) => {
                warn!("CTRL: update launch failed: {e}");
                self.send_log(origin, &request.caller, MSG_UPDATE_START_FAILED);
                sink.emit(&AppEvent::UpdateFailed(e));
            }
        }
    }

    fn poll_update(&mut self, sink: &mut impl EventSink) {
        let mut terminal = None;
        if let Some(active) = self.update.as_mut() {
            while let Some(report) = active.handle.try_report() {
                if let UpdateReport::Progress { written, total } = report {
                    sink.emit(&AppEvent::UpdateProgress { written, total });
                } else {
                    terminal = Some(report);
                    break;
                }
            }
        }
        let Some(report) = terminal else {
            return;
        };
        let Some(active) = self.update.take() else {
            return;
        };
        self.timers.cancel_tag(Timer::UpdateHardReset);

        match report {
            UpdateReport::Completed => {
                info!("CTRL: update completed, restarting into the new image");
                self.send_log(active.origin, &active.caller, MSG_UPDATE_COMPLETED);
                sink.emit(&AppEvent::UpdateCompleted);
                self.request_restart(sink);
            }
            UpdateReport::Failed(e) => {
                warn!("CTRL: update failed: {e}");
                self.send_log(active.origin, &active.caller, &format!("ota failed: {e}"));
                sink.emit(&AppEvent::UpdateFailed(e));
            }
            UpdateReport::Progress { .. } => {}
        }
    }

    fn request_restart(&mut self, sink: &mut impl EventSink) {
        if !self.restart_requested {
            self.restart_requested = true;
            sink.emit(&AppEvent::RestartScheduled);
        }
    }

    // ── Outbound ──────────────────────────────────────────────

    fn send_to(&mut self, origin: Origin, payload: &[u8]) {
        let sent = match origin {
            Origin::Remote => self.remote.send_binary(payload),
            Origin::Local(id) => self.local.send(id, payload),
        };
        if let Err(e) = sent {
            debug!("CTRL: message to {origin:?} not sent: {e}");
        }
    }

    fn send_log(&mut self, origin: Origin, caller: &str, text: &str) {
        match self.dispatcher.log_message(caller, text) {
            Ok(msg) => self.send_to(origin, &msg),
            Err(e) => warn!("CTRL: log message unencodable: {e}"),
        }
    }
}
