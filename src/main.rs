//! ctrlplane firmware main entry point.
//!
//! Hexagonal layout with a single cooperative control loop and one
//! dedicated update task.
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────────┐
//! │                      Adapters (outer ring)                     │
//! │                                                                │
//! │  NvsAdapter        EspPartition     TcpConnector / Acceptor    │
//! │  (Config+Storage)  (PartitionPort)  (Connector / Listener)     │
//! │  LogEventSink      TaskLauncher     DeviceClock                │
//! │  (EventSink)       (UpdateLauncher) (uptime)                   │
//! │                                                                │
//! │  ──────────────── Port Trait Boundary ───────────────────      │
//! │                                                                │
//! │  ┌────────────────────────────────────────────────────────┐    │
//! │  │           ControlPlane (pure logic)                    │    │
//! │  │  WsClient · WsServer · Dispatcher · Scheduler          │    │
//! │  └────────────────────────────────────────────────────────┘    │
//! │                                                                │
//! │  BootValidator runs first · ota-io task owns updates           │
//! └────────────────────────────────────────────────────────────────┘
//! ```
#![deny(unused_must_use)]

use std::time::Duration;

use anyhow::Result;
use log::{info, warn};

use ctrlplane::adapters::device_id;
use ctrlplane::adapters::log_sink::LogEventSink;
use ctrlplane::adapters::nvs::NvsAdapter;
use ctrlplane::adapters::partition::EspPartition;
use ctrlplane::adapters::tcp::{TcpAcceptor, TcpConnector};
use ctrlplane::adapters::time::DeviceClock;
use ctrlplane::adapters::updater::TaskLauncher;
use ctrlplane::app::events::AppEvent;
use ctrlplane::app::ports::{ConfigPort, EventSink, PartitionPort};
use ctrlplane::app::service::ControlPlane;
use ctrlplane::config::SystemConfig;
use ctrlplane::error::Error;
use ctrlplane::rpc::auth::{ReplayGuard, SharedCredentials};
use ctrlplane::rpc::boot::{BootOutcome, BootValidator};
use ctrlplane::rpc::builtin::{ActionSlot, Builtins};
use ctrlplane::rpc::engine::Dispatcher;
use ctrlplane::rpc::provider::ProviderRegistry;

/// Local (access-point side) WebSocket server port.
const LOCAL_SERVER_PORT: u16 = 80;
const LOOP_IDLE_MS: u64 = 5;

// ── Main ──────────────────────────────────────────────────────

fn main() -> Result<()> {
    // ── 1. ESP-IDF bootstrap ──────────────────────────────────
    esp_idf_svc::sys::link_patches();
    esp_idf_logger::init()?;

    info!("╔══════════════════════════════════════╗");
    info!("║  ctrlplane v{}                       ║", env!("CARGO_PKG_VERSION"));
    info!("╚══════════════════════════════════════╝");

    let clock = DeviceClock::new();
    let mut log_sink = LogEventSink::new();

    // ── 2. Storage + config ───────────────────────────────────
    let mut nvs = NvsAdapter::new().map_err(|_| Error::Init("nvs flash init failed"))?;
    let config = match nvs.load() {
        Ok(cfg) => {
            info!("Config loaded from NVS");
            cfg
        }
        Err(e) => {
            warn!("NVS config load failed ({}), using defaults", e);
            SystemConfig::default()
        }
    };

    // ── 3. Boot validation (before any application code) ─────
    let mut partition = EspPartition::new();
    // No wall clock this early; any non-zero stamp records the rollback.
    let stamp = clock.uptime_ms().max(1);
    let outcome = BootValidator::new(config.boot_attempt_threshold).run(&mut nvs, &mut partition, stamp)?;
    log_sink.emit(&AppEvent::Boot(outcome));
    if outcome == BootOutcome::RolledBack {
        // Rollback normally reboots inside the partition adapter.
        EspPartition::restart();
    }
    EspPartition::mark_running_valid();
    let firmware_pending = matches!(outcome, BootOutcome::PendingVerify(_));

    // ── 4. Identity + dispatcher ──────────────────────────────
    let mac = device_id::read_mac();
    let dev_id = device_id::device_id(&mac);
    let nickname = if config.device_nickname.is_empty() {
        device_id::default_nickname(&mac).as_str().to_owned()
    } else {
        config.device_nickname.clone()
    };
    info!("Device: {} ({} bytes id)", nickname, dev_id.len());

    let creds = SharedCredentials::new(nvs.load_credentials());
    if !creds.get().is_configured() {
        warn!("AUTH: no admin credential provisioned, authenticated commands disabled");
    }
    let actions = ActionSlot::new();
    let mut registry = ProviderRegistry::new();
    Builtins {
        storage: nvs.clone(),
        creds: creds.clone(),
        actions: actions.clone(),
    }
    .register(&mut registry)
    .map_err(|_| Error::Init("provider registry full"))?;
    let guard = ReplayGuard::new(config.replay_capacity as usize, config.replay_window_ms);
    let dispatcher = Dispatcher::new(dev_id, &nickname, registry, creds, guard);

    // ── 5. Control plane ──────────────────────────────────────
    let listener = TcpAcceptor::bind(LOCAL_SERVER_PORT).map_err(|_| Error::Init("local server bind failed"))?;
    let mut launcher = TaskLauncher::new(
        TcpConnector,
        || Some((EspPartition::new(), NvsAdapter::new().ok()?)),
        &config,
    );
    let mut plane = ControlPlane::new(config, TcpConnector, listener, dispatcher, firmware_pending);
    plane.set_device_actions(actions);
    plane.start(clock.uptime_ms());

    info!("System ready. Entering control loop.");

    // ── 6. Control loop ───────────────────────────────────────
    loop {
        plane.poll(clock.uptime_ms(), &mut nvs, &mut launcher, &mut log_sink);
        if plane.take_rollback_request() {
            // Reboots on success.
            if let Err(e) = partition.rollback() {
                warn!("BOOT: rollback refused: {e}");
            }
        }
        if plane.restart_requested() {
            // Give the last log frames a moment to leave the socket.
            std::thread::sleep(Duration::from_millis(200));
            EspPartition::restart();
        }
        std::thread::sleep(Duration::from_millis(LOOP_IDLE_MS));
    }
}
