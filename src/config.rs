//! System configuration parameters
//!
//! All tunable parameters of the control plane. Values can be
//! overridden via NVS (postcard blob) or a JSON provisioning dump.

use serde::{Deserialize, Serialize};

/// Upper bound accepted for `max_payload`.
const MAX_PAYLOAD_CEILING: u32 = 1024 * 1024;

/// Core system configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SystemConfig {
    // --- Remote endpoint ---
    /// `ws://host[:port][/path]` of the control server; empty = not provisioned
    pub ws_url: String,
    /// Name reported in FIND_DEVICE responses
    pub device_nickname: String,

    // --- Transport ---
    /// Largest accepted WebSocket message (bytes)
    pub max_payload: u32,
    /// Largest accepted handshake header block (bytes)
    pub max_header: u32,
    /// Local server connection pool size
    pub max_clients: u8,
    /// Partial reads tolerated while one frame completes
    pub read_max_times: u32,
    /// Delay before a dropped client connection retries (milliseconds)
    pub reconnect_backoff_ms: u32,
    /// Handshake deadline (milliseconds)
    pub handshake_timeout_ms: u32,

    // --- Authentication ---
    /// Replay window (milliseconds of epoch time)
    pub replay_window_ms: u64,
    /// Replay map ceiling; beyond it every authorization is refused
    pub replay_capacity: u32,

    // --- Firmware update ---
    /// Unconfirmed boots tolerated before rollback
    pub boot_attempt_threshold: u32,
    /// Connected uptime after which new firmware is confirmed (milliseconds)
    pub confirm_firmware_after_ms: u64,
    /// Restart if an update has not finished by then (milliseconds)
    pub ota_hard_reset_ms: u64,
    /// Update-channel losses tolerated before the session aborts
    pub ota_max_reconnects: u32,

    // --- Offline policy ---
    /// HELLO keepalive period (milliseconds)
    pub offline_probe_interval_ms: u32,
    /// Time a HELLO may go unanswered (milliseconds)
    pub server_response_timeout_ms: u32,
    /// Unanswered probes before the access point is requested
    pub ap_start_after_offline_probes: u32,
    /// Online time after which a requested access point may close (milliseconds)
    pub ap_close_after_ms: u64,
}

impl Default for SystemConfig {
    fn default() -> Self {
        Self {
            // Remote endpoint
            ws_url: String::new(),
            device_nickname: String::from("ctrlplane"),

            // Transport
            max_payload: 102_400, // 100 KiB
            max_header: 1_024,
            max_clients: 10,
            read_max_times: 100,
            reconnect_backoff_ms: 5_000,
            handshake_timeout_ms: 3_000,

            // Authentication
            replay_window_ms: 600_000, // 10 min
            replay_capacity: 300,

            // Firmware update
            boot_attempt_threshold: 3,
            confirm_firmware_after_ms: 600_000, // 10 min
            ota_hard_reset_ms: 300_000,         // 5 min
            ota_max_reconnects: 5,

            // Offline policy
            offline_probe_interval_ms: 10_000,
            server_response_timeout_ms: 3_000,
            ap_start_after_offline_probes: 5,
            ap_close_after_ms: 60_000,
        }
    }
}

impl SystemConfig {
    /// Range-check every field. The message names the offending field.
    pub fn validate(&self) -> Result<(), &'static str> {
        if !self.ws_url.is_empty() && crate::ws::WsUrl::parse(&self.ws_url).is_err() {
            return Err("ws_url: expected ws://host[:port][/path]");
        }
        if self.device_nickname.is_empty() || self.device_nickname.len() > 64 {
            return Err("device_nickname: 1..=64 bytes");
        }
        if self.max_payload < 1_024 || self.max_payload > MAX_PAYLOAD_CEILING {
            return Err("max_payload: 1 KiB..=1 MiB");
        }
        if self.max_header < 256 || self.max_header > 16_384 {
            return Err("max_header: 256..=16384");
        }
        if self.max_clients == 0 || self.max_clients > 16 {
            return Err("max_clients: 1..=16");
        }
        if self.read_max_times == 0 {
            return Err("read_max_times: must be non-zero");
        }
        if self.reconnect_backoff_ms < 100 {
            return Err("reconnect_backoff_ms: at least 100");
        }
        if self.handshake_timeout_ms < 100 || self.handshake_timeout_ms > 60_000 {
            return Err("handshake_timeout_ms: 100..=60000");
        }
        if self.replay_window_ms < 1_000 {
            return Err("replay_window_ms: at least 1000");
        }
        if self.replay_capacity == 0 || self.replay_capacity > 10_000 {
            return Err("replay_capacity: 1..=10000");
        }
        if self.boot_attempt_threshold == 0 || self.boot_attempt_threshold > 20 {
            return Err("boot_attempt_threshold: 1..=20");
        }
        if self.confirm_firmware_after_ms == 0 {
            return Err("confirm_firmware_after_ms: must be non-zero");
        }
        if self.ota_hard_reset_ms < 10_000 {
            return Err("ota_hard_reset_ms: at least 10000");
        }
        if self.offline_probe_interval_ms < 1_000 {
            return Err("offline_probe_interval_ms: at least 1000");
        }
        if self.server_response_timeout_ms == 0
            || self.server_response_timeout_ms >= self.offline_probe_interval_ms
        {
            return Err("server_response_timeout_ms: below the probe interval");
        }
        if self.ap_start_after_offline_probes == 0 {
            return Err("ap_start_after_offline_probes: must be non-zero");
        }
        Ok(())
    }

    pub fn from_json(text: &str) -> Result<Self, &'static str> {
        let config: Self = serde_json::from_str(text).map_err(|_| "config: malformed JSON")?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_json(&self) -> Result<String, &'static str> {
        serde_json::to_string(self).map_err(|_| "config: not serializable")
    }
}
