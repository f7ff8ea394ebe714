//! Built-in device management providers.
//!
//! Registered ahead of application providers so their ids stay stable
//! across firmware versions. Providers never restart or roll back
//! inline: they answer first and post a [`DeviceAction`] that the
//! control plane carries out after [`ACTION_DELAY_MS`], once the reply
//! has left the socket.
//!
//! | id | name            | policy                        | args              |
//! |----|-----------------|-------------------------------|-------------------|
//! | 0  | uptime          | common, user                  | -                 |
//! | 1  | version         | common, user                  | -                 |
//! | 2  | firmware status | admin                         | -                 |
//! | 3  | last update     | admin                         | -                 |
//! | 4  | rollback        | admin, common, confirm        | -                 |
//! | 5  | reboot          | admin, common, confirm        | delay seconds?    |
//! | 6  | user            | admin, common, encrypted      | name, password    |

use std::cell::Cell;
use std::rc::Rc;

use log::{info, warn};

use super::auth::{Credential, SharedCredentials};
use super::boot::{self, FirmwareStatus};
use super::provider::{Policy, ProviderRegistry, RegistryFull};
use super::value::Value;
use crate::adapters::{crypto, time};
use crate::app::ports::StoragePort;

/// Delay between a provider's answer and the action it requested.
pub const ACTION_DELAY_MS: u64 = 3_000;
const MAX_REBOOT_DELAY_S: u64 = 3_600;

const MSG_SUCCESS: &str = "Success";
const MSG_USER_REMOVED: &str = "User removed";
const MSG_NO_SUCH_USER: &str = "No such user";
const MSG_INVALID_ARGUMENTS: &str = "Invalid arguments";
const MSG_NOT_SAVED: &str = "Credentials not saved";
const MSG_ROLLBACK: &str = "Will rollback firmware in 3 seconds";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceAction {
    Restart,
    Rollback,
}

/// Single-slot mailbox from providers to the control plane. A newer
/// action replaces one not yet picked up.
#[derive(Debug, Clone, Default)]
pub struct ActionSlot(Rc<Cell<Option<(DeviceAction, u64)>>>);

impl ActionSlot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn post(&self, action: DeviceAction, delay_ms: u64) {
        self.0.set(Some((action, delay_ms)));
    }

    /// The pending action and its delay, clearing the slot.
    pub fn take(&self) -> Option<(DeviceAction, u64)> {
        self.0.take()
    }
}

/// Pins a closure to the provider signature.
fn provider<F>(f: F) -> F
where
    F: Fn(&[Value<'_>]) -> Option<Value<'static>>,
{
    f
}

/// Wire code for [`FirmwareStatus`].
pub fn status_code(status: FirmwareStatus) -> u8 {
    match status {
        FirmwareStatus::Unknown => 0,
        FirmwareStatus::Valid => 1,
        FirmwareStatus::PendingVerify => 2,
        FirmwareStatus::RolledBackAt(_) => 3,
    }
}

pub struct Builtins<S> {
    /// Shared handle; each provider keeps a clone.
    pub storage: S,
    pub creds: SharedCredentials,
    pub actions: ActionSlot,
}

impl<S: StoragePort + Clone + 'static> Builtins<S> {
    pub fn register(self, registry: &mut ProviderRegistry) -> Result<(), RegistryFull> {
        let Self {
            storage,
            creds,
            actions,
        } = self;
        let visible = Policy::COMMON | Policy::USER_VISIBLE;
        let confirm = Policy::ADMIN_ONLY | Policy::COMMON | Policy::CONFIRM;

        registry.register(
            "uptime",
            visible,
            0,
            provider(|_| Some(Value::U64(time::monotonic().as_millis() as u64))),
        )?;
        registry.register(
            "version",
            visible,
            0,
            provider(|_| Some(Value::from(env!("CARGO_PKG_VERSION")).into_owned())),
        )?;

        let nvs = storage.clone();
        registry.register(
            "firmware status",
            Policy::ADMIN_ONLY,
            0,
            provider(move |_| Some(Value::U8(status_code(boot::firmware_status(&nvs))))),
        )?;
        let nvs = storage.clone();
        registry.register(
            "last update",
            Policy::ADMIN_ONLY,
            0,
            provider(move |_| Some(Value::U64(boot::last_update_time(&nvs)))),
        )?;

        let slot = actions.clone();
        registry.register(
            "rollback",
            confirm,
            0,
            provider(move |_| {
                warn!("RPC: firmware rollback requested");
                slot.post(DeviceAction::Rollback, ACTION_DELAY_MS);
                Some(Value::from(MSG_ROLLBACK).into_owned())
            }),
        )?;
        registry.register(
            "reboot",
            confirm,
            1,
            provider(move |args| {
                let seconds = match args.first().and_then(Value::as_u64) {
                    Some(s) if s > 0 => s.min(MAX_REBOOT_DELAY_S),
                    _ => ACTION_DELAY_MS / 1_000,
                };
                info!("RPC: reboot requested in {seconds} s");
                actions.post(DeviceAction::Restart, seconds * 1_000);
                Some(Value::str(format!("Will reboot in {seconds} seconds")))
            }),
        )?;

        registry.register(
            "user",
            Policy::ADMIN_ONLY | Policy::COMMON | Policy::ENCRYPTED,
            2,
            provider(move |args| Some(Value::from(edit_user(&creds, &storage, args)).into_owned())),
        )?;
        Ok(())
    }
}

/// `[name, password]` adds or updates a user; an empty password removes
/// it. The shared store only changes once the new set is persisted.
fn edit_user<S: StoragePort + Clone>(creds: &SharedCredentials, storage: &S, args: &[Value<'_>]) -> &'static str {
    let (Some(name), Some(password)) = (
        args.first().and_then(Value::as_str),
        args.get(1).and_then(Value::as_str),
    ) else {
        return MSG_INVALID_ARGUMENTS;
    };
    if name.is_empty() {
        return MSG_INVALID_ARGUMENTS;
    }

    let mut next = creds.get().clone();
    let reply = if password.is_empty() {
        if !next.remove_user(&crypto::sha256(name.as_bytes())) {
            return MSG_NO_SUCH_USER;
        }
        MSG_USER_REMOVED
    } else {
        if next.upsert_user(Credential::from_plain(name, password)).is_err() {
            return MSG_NOT_SAVED;
        }
        MSG_SUCCESS
    };

    if let Err(e) = next.save(&mut storage.clone()) {
        warn!("AUTH: user change not persisted ({e})");
        return MSG_NOT_SAVED;
    }
    creds.replace(next);
    info!("AUTH: user table updated ({reply})");
    reply
}
