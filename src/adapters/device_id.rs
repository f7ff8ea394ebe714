//! Device identity derived from the ESP32 factory MAC address.
//!
//! The 32-byte device ID is the SHA-256 of the 6-byte MAC. It is:
//! - Deterministic across reboots (factory-burned eFuse MAC)
//! - Sent raw in REGISTER, LOG and OTA_BLOCK messages
//! - Reported as lowercase hex in FIND_DEVICE responses

use crate::adapters::crypto::{self, SHA256_LEN};

/// Full 6-byte MAC address.
pub type MacAddress = [u8; 6];

pub type DeviceId = [u8; SHA256_LEN];

/// Read the factory MAC address from eFuse.
#[cfg(target_os = "espidf")]
pub fn read_mac() -> MacAddress {
    let mut mac: MacAddress = [0u8; 6];
    // SAFETY: `mac` is a valid 6-byte buffer, the size the call writes.
    unsafe {
        esp_idf_svc::sys::esp_efuse_mac_get_default(mac.as_mut_ptr());
    }
    mac
}

/// Simulation: returns a deterministic fake MAC.
#[cfg(not(target_os = "espidf"))]
pub fn read_mac() -> MacAddress {
    [0xDE, 0xAD, 0xBE, 0xEF, 0xCA, 0xFE]
}

pub fn device_id(mac: &MacAddress) -> DeviceId {
    crypto::sha256(mac)
}

/// Default nickname from the last 3 MAC bytes, e.g. `ctrlplane-efcafe`.
pub fn default_nickname(mac: &MacAddress) -> heapless::String<24> {
    let mut name = heapless::String::<24>::new();
    use core::fmt::Write;
    let _ = write!(name, "ctrlplane-{:02x}{:02x}{:02x}", mac[3], mac[4], mac[5]);
    name
}
