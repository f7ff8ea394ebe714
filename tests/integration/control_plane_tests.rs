//! End-to-end control-plane scenarios.
//!
//! The test plays the control server on the far end of the remote pipe
//! and local clients through the pipe listener, while a virtual clock
//! drives [`ControlPlane::poll`].

use ctrlplane::adapters::crypto::HashAlgo;
use ctrlplane::app::events::AppEvent;
use ctrlplane::app::ports::StoragePort;
use ctrlplane::app::service::ControlPlane;
use ctrlplane::config::SystemConfig;
use ctrlplane::adapters::crypto;
use ctrlplane::rpc::auth::{Credential, CredentialStore, ReplayGuard, SharedCredentials};
use ctrlplane::rpc::auth;
use ctrlplane::rpc::boot;
use ctrlplane::rpc::builtin::{ActionSlot, Builtins};
use ctrlplane::rpc::channels::UpdateReport;
use ctrlplane::rpc::codec;
use ctrlplane::rpc::command;
use ctrlplane::rpc::engine::{Dispatcher, UpdateRequest};
use ctrlplane::rpc::ota::OtaError;
use ctrlplane::rpc::provider::{Policy, ProviderRegistry};
use ctrlplane::rpc::value::{Value, Values};
use ctrlplane::ws::{Connection, WsEvent, WsLimits, WsUrl};

use crate::mock_hw::{MemStore, MockLauncher, PipeConnector, PipeListener, PipeStream, RecordingSink};

const DEVICE: [u8; 32] = [0x42; 32];
const EPOCH: u64 = 1_700_000_000_000;

fn admin() -> Credential {
    Credential::from_plain("admin", "s3cret")
}

fn guest() -> Credential {
    Credential::from_plain("guest", "guestpw")
}

fn uptime(_args: &[Value<'_>]) -> Option<Value<'static>> {
    Some(Value::U64(123))
}

fn echo_sum(args: &[Value<'_>]) -> Option<Value<'static>> {
    let sum = args.iter().filter_map(Value::as_u64).sum::<u64>();
    Some(Value::U64(sum))
}

fn secrets(_args: &[Value<'_>]) -> Option<Value<'static>> {
    Some(Value::str("classified"))
}

/// Answers command 0x42 with a single byte.
fn extension(values: &[Value<'_>]) -> Option<Vec<u8>> {
    (values.first() == Some(&Value::U8(0x42))).then(|| codec::encode(&[Value::U8(0x43)]).unwrap_or_default())
}

fn config() -> SystemConfig {
    SystemConfig {
        ws_url: "ws://control.local/ws".into(),
        reconnect_backoff_ms: 500,
        offline_probe_interval_ms: 1_000,
        server_response_timeout_ms: 300,
        confirm_firmware_after_ms: 5_000,
        ota_hard_reset_ms: 10_000,
        ap_start_after_offline_probes: 2,
        ap_close_after_ms: 1_500,
        ..SystemConfig::default()
    }
}

fn dispatcher() -> Dispatcher {
    let mut registry = ProviderRegistry::new();
    registry.register("uptime", Policy::COMMON | Policy::USER_VISIBLE, 0, uptime).unwrap();
    registry.register_with_custom_id("sum", 0xC0FFEE, Policy::COMMON, 2, echo_sum).unwrap();
    registry.register("secrets", Policy::ADMIN_ONLY, 0, secrets).unwrap();

    let mut creds = CredentialStore::new(HashAlgo::Sha256).with_admin(admin());
    creds.add_user(guest());
    Dispatcher::new(DEVICE, "bench", registry, creds, ReplayGuard::new(300, 600_000))
}

fn decode(frame: &[u8]) -> Values<'static> {
    codec::decode(frame).unwrap()
}

// ── Harness ───────────────────────────────────────────────────

struct Harness {
    plane: ControlPlane<PipeConnector, PipeListener>,
    connector: PipeConnector,
    listener: PipeListener,
    store: MemStore,
    launcher: MockLauncher,
    sink: RecordingSink,
    /// Far end of the current control connection.
    server: Option<Connection<PipeStream>>,
    /// Messages the control server received, in order.
    inbox: Vec<Values<'static>>,
    /// Answer every HELLO with a WORLD.
    auto_world: bool,
    now: u64,
}

impl Harness {
    fn new(config: SystemConfig, firmware_pending: bool) -> Self {
        Self::with_dispatcher(config, dispatcher(), MemStore::new(), firmware_pending)
    }

    fn with_dispatcher(config: SystemConfig, dispatcher: Dispatcher, store: MemStore, firmware_pending: bool) -> Self {
        let connector = PipeConnector::new();
        let listener = PipeListener::new();
        let plane = ControlPlane::new(config, connector.clone(), listener.clone(), dispatcher, firmware_pending);
        Self {
            plane,
            connector,
            listener,
            store,
            launcher: MockLauncher::new(),
            sink: RecordingSink::new(),
            server: None,
            inbox: Vec::new(),
            auto_world: false,
            now: 0,
        }
    }

    /// Start the plane and finish the control handshake.
    fn online(config: SystemConfig, firmware_pending: bool) -> Self {
        Self::bring_up(Self::new(config, firmware_pending))
    }

    /// Online device running the built-in providers over the harness
    /// store, with the credentials the dispatcher authorizes against.
    fn with_builtins(config: SystemConfig) -> (Self, SharedCredentials) {
        let store = MemStore::new();
        let creds = SharedCredentials::new(CredentialStore::new(HashAlgo::Sha256).with_admin(admin()));
        let actions = ActionSlot::new();
        let mut registry = ProviderRegistry::new();
        Builtins {
            storage: store.clone(),
            creds: creds.clone(),
            actions: actions.clone(),
        }
        .register(&mut registry)
        .unwrap();
        let dispatcher = Dispatcher::new(DEVICE, "bench", registry, creds.clone(), ReplayGuard::new(300, 600_000));
        let mut h = Self::with_dispatcher(config, dispatcher, store, false);
        h.plane.set_device_actions(actions);
        (Self::bring_up(h), creds)
    }

    fn bring_up(mut h: Self) -> Self {
        h.plane.start(0);
        h.tick(1);
        h.tick(1);
        assert!(h.plane.is_online(), "control connection did not come up");
        h
    }

    fn tick(&mut self, ms: u64) {
        self.now += ms;
        self.plane
            .poll(self.now, &mut self.store, &mut self.launcher, &mut self.sink);
        self.serve();
    }

    /// Advance in `step` increments until `total` has elapsed.
    fn run_for(&mut self, total: u64, step: u64) {
        let end = self.now + total;
        while self.now < end {
            self.tick(step.min(end - self.now));
        }
    }

    fn serve(&mut self) {
        if let Some(stream) = self.connector.take_peer() {
            self.server = Some(Connection::accept(stream, "control".into(), WsLimits::new(), self.now));
        }
        let Some(server) = self.server.as_mut() else {
            return;
        };
        while let Some(event) = server.poll(self.now) {
            if let WsEvent::Binary(frame) = event {
                let values = decode(&frame);
                if self.auto_world && values.first() == Some(&Value::U8(command::HELLO)) {
                    let world = codec::encode(&[Value::U8(command::WORLD)]).unwrap();
                    server.send_binary(&world).unwrap();
                }
                self.inbox.push(values);
            }
        }
    }

    fn server_send(&mut self, values: &[Value<'_>]) {
        let frame = codec::encode(values).unwrap();
        self.server.as_mut().expect("no control connection").send_binary(&frame).unwrap();
    }

    fn drop_server(&mut self) {
        if let Some(mut server) = self.server.take() {
            server.close();
        }
    }

    fn take_inbox(&mut self) -> Vec<Values<'static>> {
        std::mem::take(&mut self.inbox)
    }

    fn logs(&mut self) -> Vec<String> {
        self.take_inbox()
            .into_iter()
            .filter(|v| v.first() == Some(&Value::U8(command::LOG)))
            .filter_map(|v| v.get(3).and_then(Value::as_str).map(str::to_owned))
            .collect()
    }

    fn dial_local(&mut self) -> Connection<PipeStream> {
        let url = WsUrl::parse("ws://device.local/").unwrap();
        let mut client = Connection::client(self.listener.dial(), &url, WsLimits::new(), self.now).unwrap();
        self.tick(1);
        assert_eq!(client.poll(self.now), Some(WsEvent::Connected));
        client
    }
}

fn ota_start(caller: &Credential, name: &str, ts: u64) -> Vec<Value<'static>> {
    vec![
        Value::U8(command::OTA_START),
        Value::str(name),
        Value::U32(40),
        Value::U32(100),
        Value::U64(ts),
        Value::buf(caller.one_time_digest(HashAlgo::Sha256, ts)),
    ]
}

fn execute(caller: &Credential, ts: u64, selector: Value<'static>, args: Option<Vec<u8>>) -> Vec<Value<'static>> {
    let mut values = vec![
        Value::U8(command::EXECUTE),
        Value::buf(DEVICE.to_vec()),
        Value::str("ops"),
        Value::U64(ts),
        Value::buf(caller.one_time_digest(HashAlgo::Sha256, ts)),
        selector,
    ];
    values.extend(args.map(Value::buf));
    values
}

fn find(caller: &Credential, ts: u64) -> Vec<Value<'static>> {
    vec![
        Value::U8(command::FIND_DEVICE),
        Value::str("ops"),
        Value::U8(0),
        Value::U64(ts),
        Value::buf(caller.one_time_digest(HashAlgo::Sha256, ts)),
    ]
}

// ── Connection lifecycle ──────────────────────────────────────

#[test]
fn registers_on_connect() {
    let mut h = Harness::online(config(), true);
    assert!(h.sink.contains(&AppEvent::RemoteConnected));

    let inbox = h.take_inbox();
    let register = inbox.first().expect("REGISTER not sent");
    assert_eq!(register[0], Value::U8(command::REGISTER));
    assert_eq!(register[1], Value::buf(DEVICE.to_vec()));
    assert_eq!(register[2], Value::buf(admin().username.to_vec()));
    assert_eq!(register[3], Value::U8(1));

    let users = decode(register[4].as_bytes().unwrap());
    assert_eq!(users, vec![Value::buf(guest().username.to_vec())]);
}

#[test]
fn keepalive_is_answered_by_world() {
    let mut h = Harness::online(config(), false);
    h.take_inbox();

    h.run_for(998, 1);
    assert_eq!(h.plane.offline_probes(), 1);
    assert_eq!(h.take_inbox(), vec![vec![Value::U8(command::HELLO)]]);

    h.server_send(&[Value::U8(command::WORLD)]);
    h.tick(10);
    assert_eq!(h.plane.offline_probes(), 0);

    h.run_for(400, 100);
    assert_eq!(h.sink.count(|e| matches!(e, AppEvent::RemoteUnresponsive(_))), 0);
}

#[test]
fn unanswered_keepalive_reports_unresponsive() {
    let mut h = Harness::online(config(), false);
    h.run_for(998, 1);
    assert_eq!(h.plane.offline_probes(), 1);

    h.run_for(300, 50);
    assert!(h.sink.contains(&AppEvent::RemoteUnresponsive(1)));
    // Still connected; the server is only slow.
    assert!(h.plane.is_online());
}

#[test]
fn offline_device_requests_access_point_once() {
    let mut h = Harness::new(SystemConfig { ws_url: String::new(), ..config() }, false);
    h.plane.start(0);

    h.run_for(2_000, 100);
    assert_eq!(h.plane.offline_probes(), 2);
    assert!(!h.plane.access_point_requested());

    h.run_for(1_000, 100);
    assert!(h.plane.access_point_requested());
    h.run_for(3_000, 100);
    assert_eq!(h.sink.count(|e| *e == AppEvent::AccessPointRequested), 1);
    assert_eq!(h.connector.attempts(), 0);
}

#[test]
fn access_point_released_after_stable_reconnect() {
    let mut h = Harness::new(config(), false);
    h.auto_world = true;
    h.connector.set_refuse(true);
    h.plane.start(0);

    h.run_for(3_000, 100);
    assert!(h.plane.access_point_requested());
    assert!(h.sink.count(|e| matches!(e, AppEvent::RemoteError(_))) >= 1);

    h.connector.set_refuse(false);
    h.run_for(1_000, 100);
    assert!(h.plane.is_online());
    assert!(h.plane.access_point_requested());

    h.run_for(2_000, 100);
    assert!(!h.plane.access_point_requested());
    assert!(h.sink.contains(&AppEvent::AccessPointReleased));
}

#[test]
fn time_sync_from_control_server() {
    let mut h = Harness::online(config(), false);
    assert_eq!(h.plane.epoch_ms(h.now), 0);

    h.server_send(&[Value::U8(command::REGISTER), Value::U64(EPOCH)]);
    h.tick(1);
    assert!(h.sink.contains(&AppEvent::TimeSynced { epoch_ms: EPOCH }));

    h.tick(250);
    assert_eq!(h.plane.epoch_ms(h.now), EPOCH + 250);
}

// ── Firmware confirmation ─────────────────────────────────────

#[test]
fn pending_firmware_confirmed_after_stable_connection() {
    let mut h = Harness::online(config(), true);
    h.auto_world = true;
    boot::mark_pending(&mut h.store).unwrap();
    h.server_send(&[Value::U8(command::REGISTER), Value::U64(EPOCH)]);

    h.run_for(4_900, 100);
    assert!(h.plane.firmware_pending());
    assert!(boot::is_pending(&h.store));

    h.run_for(200, 100);
    assert!(h.sink.contains(&AppEvent::FirmwareConfirmed));
    assert!(!h.plane.firmware_pending());
    assert!(!boot::is_pending(&h.store));
    assert!(boot::last_update_time(&h.store) >= EPOCH);
}

#[test]
fn disconnect_restarts_confirmation_countdown() {
    let mut h = Harness::online(config(), true);
    h.auto_world = true;
    boot::mark_pending(&mut h.store).unwrap();

    h.run_for(2_000, 100);
    h.drop_server();
    h.tick(100);
    assert!(h.sink.contains(&AppEvent::RemoteDisconnected));

    // The old countdown would have fired at 5 s.
    h.run_for(3_900, 100);
    assert!(h.plane.firmware_pending());
    assert!(h.plane.is_online(), "client should have reconnected");

    h.run_for(2_000, 100);
    assert!(!h.plane.firmware_pending());
    assert!(!boot::is_pending(&h.store));
}

// ── Firmware update ───────────────────────────────────────────

#[test]
fn admin_update_runs_to_restart() {
    let mut h = Harness::online(config(), false);
    h.take_inbox();

    h.server_send(&ota_start(&admin(), "ops", 1_001));
    h.tick(1);
    assert_eq!(
        h.launcher.launches,
        vec![UpdateRequest {
            caller: "ops".into(),
            chunk_len: 40,
            firmware_len: 100,
        }]
    );
    assert!(h.plane.update_in_progress());
    assert!(h.sink.contains(&AppEvent::UpdateStarted { firmware_len: 100 }));
    assert_eq!(h.logs(), vec!["OTA Update Started".to_owned()]);

    h.launcher.report(UpdateReport::Progress { written: 40, total: 100 });
    h.tick(1);
    assert!(h.sink.contains(&AppEvent::UpdateProgress { written: 40, total: 100 }));

    h.launcher.report(UpdateReport::Completed);
    h.tick(1);
    assert!(h.sink.contains(&AppEvent::UpdateCompleted));
    assert!(h.sink.contains(&AppEvent::RestartScheduled));
    assert!(h.plane.restart_requested());
    assert!(!h.plane.update_in_progress());
    assert_eq!(h.logs(), vec!["OTA Update Completed".to_owned()]);
}

#[test]
fn second_update_is_refused_while_one_runs() {
    let mut h = Harness::online(config(), false);
    h.take_inbox();

    h.server_send(&ota_start(&admin(), "ops", 2_001));
    h.tick(1);
    h.server_send(&ota_start(&admin(), "ops", 2_002));
    h.tick(1);

    assert_eq!(h.launcher.launches.len(), 1);
    assert_eq!(
        h.logs(),
        vec!["OTA Update Started".to_owned(), "ota already running".to_owned()]
    );
}

#[test]
fn user_cannot_start_update() {
    let mut h = Harness::online(config(), false);
    h.take_inbox();

    h.server_send(&ota_start(&guest(), "guest", 3_001));
    h.tick(1);
    assert!(h.launcher.launches.is_empty());
    assert!(h.take_inbox().is_empty());
}

#[test]
fn launch_failure_is_reported() {
    let mut h = Harness::online(config(), false);
    h.take_inbox();
    h.launcher.fail_with = Some(OtaError::BeginFailed);

    h.server_send(&ota_start(&admin(), "ops", 4_001));
    h.tick(1);
    assert!(!h.plane.update_in_progress());
    assert!(h.sink.contains(&AppEvent::UpdateFailed(OtaError::BeginFailed)));
    assert_eq!(h.logs(), vec!["ota start failed".to_owned()]);
}

#[test]
fn failed_update_is_logged_to_requester() {
    let mut h = Harness::online(config(), false);
    h.server_send(&ota_start(&admin(), "ops", 5_001));
    h.tick(1);
    h.take_inbox();

    h.launcher.report(UpdateReport::Failed(OtaError::WriteFailed));
    h.tick(1);
    assert!(h.sink.contains(&AppEvent::UpdateFailed(OtaError::WriteFailed)));
    assert!(!h.plane.restart_requested());
    assert_eq!(h.logs(), vec!["ota failed: OTA write failed".to_owned()]);
}

#[test]
fn stuck_update_forces_restart() {
    let mut h = Harness::online(config(), false);
    h.auto_world = true;
    h.server_send(&ota_start(&admin(), "ops", 6_001));
    h.tick(1);
    let mailbox = h.launcher.mailbox.clone().expect("update launched");

    h.run_for(9_900, 100);
    assert!(!h.plane.restart_requested());
    h.run_for(200, 100);
    assert!(h.plane.restart_requested());
    assert!(mailbox.cancel_requested());
    assert!(!h.plane.update_in_progress());
}

#[test]
fn cancel_reaches_the_update_task() {
    let mut h = Harness::online(config(), false);
    h.server_send(&ota_start(&admin(), "ops", 7_001));
    h.tick(1);
    let mailbox = h.launcher.mailbox.clone().expect("update launched");

    h.plane.cancel_update();
    assert!(mailbox.cancel_requested());
}

// ── Provider execution ────────────────────────────────────────

#[test]
fn execute_by_custom_id_with_arguments() {
    let mut h = Harness::online(config(), false);
    h.take_inbox();

    let args = codec::encode(&[Value::U8(2), Value::U32(40)]).unwrap();
    h.server_send(&execute(&guest(), 8_001, Value::U64(0xC0FFEE), Some(args)));
    h.tick(1);

    assert!(h.sink.contains(&AppEvent::ProviderInvoked { id: 1 }));
    let inbox = h.take_inbox();
    let reply = &inbox[0];
    assert_eq!(reply[0], Value::U8(command::LOG));
    assert_eq!(reply[2], Value::str("ops"));
    assert_eq!(decode(reply[3].as_bytes().unwrap()), vec![Value::U64(42)]);
}

#[test]
fn user_cannot_reach_admin_provider() {
    let mut h = Harness::online(config(), false);
    h.take_inbox();

    h.server_send(&execute(&guest(), 8_101, Value::U8(2), None));
    h.tick(1);
    assert_eq!(h.logs(), vec!["unavailable".to_owned()]);
    assert_eq!(h.sink.count(|e| matches!(e, AppEvent::ProviderInvoked { .. })), 0);

    h.server_send(&execute(&admin(), 8_102, Value::U8(2), None));
    h.tick(1);
    assert!(h.sink.contains(&AppEvent::ProviderInvoked { id: 2 }));
}

#[test]
fn timestamp_is_single_use_across_commands() {
    let mut h = Harness::online(config(), false);
    h.take_inbox();

    h.server_send(&find(&admin(), 9_001));
    h.tick(1);
    assert_eq!(h.take_inbox().len(), 1);

    h.server_send(&execute(&admin(), 9_001, Value::U8(0), None));
    h.tick(1);
    assert!(h.take_inbox().is_empty());
    assert_eq!(h.sink.count(|e| matches!(e, AppEvent::ProviderInvoked { .. })), 0);
}

#[test]
fn stale_timestamp_refused_once_clock_is_synced() {
    let mut h = Harness::online(config(), false);
    h.server_send(&[Value::U8(command::REGISTER), Value::U64(EPOCH)]);
    h.tick(1);
    h.take_inbox();

    let stale = EPOCH - 600_001;
    h.server_send(&execute(&admin(), stale, Value::U8(0), None));
    h.tick(1);
    assert!(h.take_inbox().is_empty());

    h.server_send(&execute(&admin(), EPOCH - 1_000, Value::U8(0), None));
    h.tick(1);
    assert_eq!(h.take_inbox().len(), 1);
}

// ── Built-in providers ────────────────────────────────────────

const ROLLBACK: u8 = 4;
const REBOOT: u8 = 5;
const USER: u8 = 6;

/// Key and IV shared with the admin for encrypted providers.
fn admin_cipher() -> ([u8; 32], [u8; 16]) {
    let key = admin().password;
    let mut iv = [0u8; 16];
    iv.copy_from_slice(&key[..16]);
    (key, iv)
}

fn reply_text(reply: &Values<'static>) -> Values<'static> {
    decode(reply[3].as_bytes().unwrap())
}

#[test]
fn admin_adds_user_over_encrypted_channel() {
    let (mut h, creds) = Harness::with_builtins(config());
    h.take_inbox();
    let (key, iv) = admin_cipher();
    let alice = Credential::from_plain("alice", "wonderland");

    let plain = codec::encode(&[Value::str("alice"), Value::str("wonderland")]).unwrap();
    let sealed = crypto::aes256_cbc_encrypt(&key, &iv, &plain).unwrap();
    h.server_send(&execute(&admin(), 11_001, Value::U8(USER), Some(sealed)));
    h.tick(1);

    let inbox = h.take_inbox();
    let reply = &inbox[0];
    assert_eq!(reply[0], Value::U8(command::LOG));
    assert_eq!(reply[4], Value::U8(command::ENCRYPTED_MARKER));
    let opened = crypto::aes256_cbc_decrypt(&key, &iv, reply[3].as_bytes().unwrap()).unwrap();
    assert_eq!(decode(&opened), vec![Value::str("Success")]);

    assert_eq!(creds.get().users, vec![alice.clone()]);
    assert_eq!(CredentialStore::load(&h.store).users, vec![alice.clone()]);

    // The new user is recognised straight away.
    h.server_send(&execute(&alice, 11_002, Value::U8(0), None));
    h.tick(1);
    assert!(h.sink.contains(&AppEvent::ProviderInvoked { id: 0 }));
}

#[test]
fn plaintext_user_arguments_are_refused() {
    let (mut h, creds) = Harness::with_builtins(config());
    h.take_inbox();

    let mut plain = codec::encode(&[Value::str("mallory"), Value::str("pw")]).unwrap();
    // Ragged, so it can never pass for ciphertext.
    if plain.len() % 16 == 0 {
        plain.push(0);
    }
    h.server_send(&execute(&admin(), 11_101, Value::U8(USER), Some(plain)));
    h.tick(1);
    assert_eq!(h.logs(), vec!["execution failed".to_owned()]);
    assert!(creds.get().users.is_empty());
    assert!(!h.store.exists(auth::NAMESPACE, auth::KEY_CREDENTIALS));
}

#[test]
fn rollback_provider_answers_then_requests_rollback() {
    let (mut h, _) = Harness::with_builtins(config());
    h.take_inbox();

    h.server_send(&execute(&admin(), 12_001, Value::U8(ROLLBACK), None));
    h.tick(1);
    let inbox = h.take_inbox();
    assert_eq!(reply_text(&inbox[0]), vec![Value::str("Will rollback firmware in 3 seconds")]);
    assert!(!h.plane.take_rollback_request());

    h.run_for(2_990, 10);
    assert!(!h.plane.take_rollback_request());
    assert!(!h.sink.contains(&AppEvent::RollbackRequested));

    h.run_for(20, 10);
    assert!(h.sink.contains(&AppEvent::RollbackRequested));
    assert!(h.plane.take_rollback_request());
    assert!(!h.plane.take_rollback_request());
    assert!(!h.plane.restart_requested());
}

#[test]
fn user_cannot_trigger_rollback() {
    let (mut h, creds) = Harness::with_builtins(config());
    creds.update(|store| store.add_user(guest()));
    h.take_inbox();

    h.server_send(&execute(&guest(), 12_101, Value::U8(ROLLBACK), None));
    h.tick(1);
    assert_eq!(h.logs(), vec!["unavailable".to_owned()]);
    h.run_for(4_000, 100);
    assert!(!h.plane.take_rollback_request());
}

#[test]
fn reboot_provider_restarts_after_requested_delay() {
    let (mut h, _) = Harness::with_builtins(config());
    h.take_inbox();

    let args = codec::encode(&[Value::U8(1)]).unwrap();
    h.server_send(&execute(&admin(), 13_001, Value::U8(REBOOT), Some(args)));
    h.tick(1);
    assert_eq!(reply_text(&h.take_inbox()[0]), vec![Value::str("Will reboot in 1 seconds")]);

    h.run_for(990, 10);
    assert!(!h.plane.restart_requested());
    h.run_for(20, 10);
    assert!(h.plane.restart_requested());
    assert!(h.sink.contains(&AppEvent::RestartScheduled));
}

// ── Local clients ─────────────────────────────────────────────

#[test]
fn local_client_gets_its_own_replies() {
    let mut h = Harness::online(config(), false);
    h.take_inbox();
    let mut local = h.dial_local();
    assert!(h.sink.contains(&AppEvent::LocalClientConnected(0)));
    assert_eq!(h.plane.local_clients(), 1);

    local.send_binary(&codec::encode(&[Value::U8(command::HELLO)]).unwrap()).unwrap();
    h.tick(1);
    let Some(WsEvent::Binary(reply)) = local.poll(h.now) else {
        panic!("no reply on the local connection");
    };
    assert_eq!(decode(&reply), vec![Value::U8(command::WORLD)]);
    assert!(h.take_inbox().is_empty());

    local.close();
    h.tick(1);
    assert!(h.sink.contains(&AppEvent::LocalClientDisconnected(0)));
}

#[test]
fn local_find_reports_device_state() {
    let mut h = Harness::new(SystemConfig { ws_url: String::new(), ..config() }, false);
    h.plane.start(0);
    let mut local = h.dial_local();

    let frame = codec::encode(&find(&guest(), 10_001)).unwrap();
    local.send_binary(&frame).unwrap();
    h.tick(1);
    let Some(WsEvent::Binary(reply)) = local.poll(h.now) else {
        panic!("no FIND reply");
    };
    let reply = decode(&reply);
    assert_eq!(reply[0], Value::U8(command::FIND_DEVICE_RESPONSE));
    assert_eq!(reply[1], Value::str("ops"));
    // Offline, no access point, not admin.
    assert_eq!(reply[2], Value::U8(0));
    assert_eq!(reply[4], Value::str("bench"));

    // Only the two providers a user may call are listed.
    let catalogue = decode(reply[7].as_bytes().unwrap());
    assert_eq!(catalogue.len(), 2);
}

#[test]
fn local_keepalive_and_time_do_not_count() {
    let mut h = Harness::new(SystemConfig { ws_url: String::new(), ..config() }, false);
    h.plane.start(0);
    let mut local = h.dial_local();
    h.run_for(1_000, 100);
    assert_eq!(h.plane.offline_probes(), 1);

    local.send_binary(&codec::encode(&[Value::U8(command::WORLD)]).unwrap()).unwrap();
    local
        .send_binary(&codec::encode(&[Value::U8(command::REGISTER), Value::U64(EPOCH)]).unwrap())
        .unwrap();
    h.tick(1);
    assert_eq!(h.plane.offline_probes(), 1);
    assert_eq!(h.plane.epoch_ms(h.now), 0);
}

#[test]
fn local_update_status_goes_back_to_local_client() {
    let mut h = Harness::online(config(), false);
    h.take_inbox();
    let mut local = h.dial_local();

    local.send_binary(&codec::encode(&ota_start(&admin(), "bench-tool", 11_001)).unwrap()).unwrap();
    h.tick(1);
    let Some(WsEvent::Binary(reply)) = local.poll(h.now) else {
        panic!("no update status on the local connection");
    };
    let reply = decode(&reply);
    assert_eq!(reply[2], Value::str("bench-tool"));
    assert_eq!(reply[3], Value::str("OTA Update Started"));
    assert!(h.take_inbox().is_empty());
}

#[test]
fn extension_answers_unknown_commands() {
    let mut h = Harness::online(config(), false);
    h.take_inbox();
    h.plane.set_extension(extension);

    h.server_send(&[Value::U8(0x42), Value::U8(7)]);
    h.tick(1);
    assert_eq!(h.take_inbox(), vec![vec![Value::U8(0x43)]]);

    h.server_send(&[Value::U8(0x44)]);
    h.tick(1);
    assert!(h.take_inbox().is_empty());
}
