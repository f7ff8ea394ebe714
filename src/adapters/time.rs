//! Time adapters.
//!
//! - [`DeviceClock`]: monotonic uptime. `esp_timer_get_time()` on device,
//!   `std::time::Instant` on the host.
//! - [`WallClock`]: epoch milliseconds, available once the control
//!   channel has pushed a time sync. Until then [`WallClock::now_ms`]
//!   reports `0`, which the replay guard treats as "clock unknown".

use core::time::Duration;

/// Monotonic uptime source.
pub struct DeviceClock {
    #[cfg(not(target_os = "espidf"))]
    start: std::time::Instant,
}

impl Default for DeviceClock {
    fn default() -> Self {
        Self::new()
    }
}

impl DeviceClock {
    pub fn new() -> Self {
        Self {
            #[cfg(not(target_os = "espidf"))]
            start: std::time::Instant::now(),
        }
    }

    /// Microseconds since boot.
    #[cfg(target_os = "espidf")]
    pub fn uptime_us(&self) -> u64 {
        (unsafe { esp_idf_svc::sys::esp_timer_get_time() }) as u64
    }

    /// Microseconds since construction.
    #[cfg(not(target_os = "espidf"))]
    pub fn uptime_us(&self) -> u64 {
        self.start.elapsed().as_micros() as u64
    }

    pub fn uptime_ms(&self) -> u64 {
        self.uptime_us() / 1_000
    }
}

/// Process-wide monotonic time, shaped for `burster` time providers.
#[cfg(target_os = "espidf")]
pub fn monotonic() -> Duration {
    let us = unsafe { esp_idf_sys::esp_timer_get_time() };
    Duration::from_micros(us as u64)
}

#[cfg(not(target_os = "espidf"))]
pub fn monotonic() -> Duration {
    use std::time::Instant;
    static START: std::sync::OnceLock<Instant> = std::sync::OnceLock::new();
    START.get_or_init(Instant::now).elapsed()
}

/// Epoch clock anchored to uptime at the last sync.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WallClock {
    /// `(epoch_ms, uptime_ms)` at the moment of the last sync.
    anchor: Option<(u64, u64)>,
}

impl WallClock {
    pub const fn new() -> Self {
        Self { anchor: None }
    }

    pub fn sync(&mut self, epoch_ms: u64, uptime_ms: u64) {
        self.anchor = Some((epoch_ms, uptime_ms));
    }

    pub fn is_synced(&self) -> bool {
        self.anchor.is_some()
    }

    /// Epoch milliseconds, or `0` before the first sync.
    pub fn now_ms(&self, uptime_ms: u64) -> u64 {
        match self.anchor {
            Some((epoch, at)) => epoch.saturating_add(uptime_ms.saturating_sub(at)),
            None => 0,
        }
    }
}
