//! RPC engine: dispatches decoded command messages.
//!
//! **Transport-decoupled**: the engine does not own a connection. Callers
//! feed one complete binary message via [`Dispatcher::dispatch`] and get
//! back a [`Dispatch`] telling them what to send or do next.
//!
//! ```text
//!  frame ──decode──▶ [cmd, …] ──┬── HELLO / WORLD / REGISTER   (no auth)
//!                               ├── FIND_DEVICE ─┐
//!                               ├── EXECUTE ─────┼── authorize ──▶ reply
//!                               ├── OTA_START ───┘    (admin only)
//!                               └── other ──▶ Unhandled
//! ```
//!
//! Authentication failures produce [`Dispatch::Ignored`]: the caller gets
//! no reply and learns nothing about why.

use log::{debug, info, warn};

use std::cell::Ref;

use super::auth::{CredentialStore, ReplayGuard, Role, SharedCredentials};
use super::codec::{self, EncodeError};
use super::command::{self, CommandHeader};
use super::provider::{Policy, ProviderEntry, ProviderRegistry, Selector};
use super::value::{Value, Values};
use crate::adapters::crypto;

/// Layout version reported in FIND_DEVICE responses.
pub const PROTOCOL_VERSION: u8 = 1;

const UNAVAILABLE: &str = "unavailable";
const EXECUTION_FAILED: &str = "execution failed";

const FLAG_REMOTE_ONLINE: u8 = 0x80;
const FLAG_AP_ACTIVE: u8 = 0x40;
const FLAG_ADMIN: u8 = 0x20;

/// Device state the dispatcher reads but does not own.
#[derive(Debug, Clone, Copy, Default)]
pub struct DispatchContext {
    /// Epoch milliseconds, `0` while the clock is unsynced.
    pub now_ms: u64,
    pub remote_online: bool,
    pub ap_active: bool,
}

/// Authorized firmware update request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateRequest {
    pub caller: String,
    pub chunk_len: u32,
    pub firmware_len: u32,
}

#[derive(Debug, PartialEq)]
pub enum Dispatch {
    /// Malformed, unauthorized or intentionally silent.
    Ignored,
    /// Send these bytes back on the same connection.
    Reply(Vec<u8>),
    /// A provider ran; `reply` carries its LOG response.
    Executed { provider: u16, reply: Vec<u8> },
    /// The remote answered a keepalive.
    Online,
    /// The remote announced the current epoch time.
    TimeSync(u64),
    /// An admin asked for a firmware update.
    StartUpdate(UpdateRequest),
    /// A well-formed message with a command this engine does not route.
    Unhandled(Values<'static>),
}

pub struct Dispatcher {
    device_id: [u8; 32],
    device_hex: String,
    nickname: String,
    registry: ProviderRegistry,
    creds: SharedCredentials,
    guard: ReplayGuard,
}

impl Dispatcher {
    pub fn new(
        device_id: [u8; 32],
        nickname: &str,
        registry: ProviderRegistry,
        creds: impl Into<SharedCredentials>,
        guard: ReplayGuard,
    ) -> Self {
        Self {
            device_id,
            device_hex: crypto::to_hex(&device_id),
            nickname: nickname.to_owned(),
            registry,
            creds: creds.into(),
            guard,
        }
    }

    pub fn device_id(&self) -> &[u8; 32] {
        &self.device_id
    }

    pub fn registry(&self) -> &ProviderRegistry {
        &self.registry
    }

    pub fn credentials(&self) -> Ref<'_, CredentialStore> {
        self.creds.get()
    }

    /// Replace credentials after provisioning. Seen timestamps stay.
    pub fn set_credentials(&mut self, creds: CredentialStore) {
        self.creds.replace(creds);
    }

    /// Dispatch one complete binary message.
    pub fn dispatch(&mut self, frame: &[u8], ctx: &DispatchContext) -> Dispatch {
        let values = match codec::decode_borrowed(frame) {
            Ok(values) => values,
            Err(e) => {
                debug!("RPC: undecodable message ({e})");
                return Dispatch::Ignored;
            }
        };
        let Some(header) = values.first().and_then(CommandHeader::parse) else {
            debug!("RPC: message without command");
            return Dispatch::Ignored;
        };

        let outcome = match header.command {
            command::HELLO => self.reply(&[header.reply(command::WORLD)]),
            command::WORLD => Ok(Dispatch::Online),
            command::REGISTER => Ok(Self::on_register(&values)),
            command::FIND_DEVICE => self.on_find_device(header, &values, ctx),
            command::EXECUTE => self.on_execute(header, &values, ctx),
            command::OTA_START => Ok(self.on_ota_start(&values, ctx)),
            _ => Ok(Dispatch::Unhandled(
                values.into_iter().map(Value::into_owned).collect(),
            )),
        };

        outcome.unwrap_or_else(|e| {
            warn!("RPC: reply encoding failed: {e}");
            Dispatch::Ignored
        })
    }

    // ── Outbound messages ────────────────────────────────────

    pub fn hello_message(&self) -> Result<Vec<u8>, EncodeError> {
        codec::encode(&[Value::U8(command::HELLO)])
    }

    /// `[REGISTER, deviceId, adminName, newFirmware, users | 0]`
    pub fn register_message(&self, new_firmware: bool) -> Result<Vec<u8>, EncodeError> {
        let creds = self.creds.get();
        let admin_name = creds
            .admin
            .as_ref()
            .map(|a| a.username.to_vec())
            .unwrap_or_default();

        let users = if creds.users.is_empty() {
            Value::U8(0)
        } else {
            let names: Vec<Value<'_>> = creds
                .users
                .iter()
                .map(|u| Value::borrowed_buf(&u.username))
                .collect();
            Value::buf(codec::encode(&names)?)
        };

        codec::encode(&[
            Value::U8(command::REGISTER),
            Value::borrowed_buf(&self.device_id),
            Value::buf(admin_name),
            Value::U8(u8::from(new_firmware)),
            users,
        ])
    }

    /// `[LOG, deviceId, caller, text]`
    pub fn log_message(&self, caller: &str, text: &str) -> Result<Vec<u8>, EncodeError> {
        codec::encode(&[
            Value::U8(command::LOG),
            Value::borrowed_buf(&self.device_id),
            Value::from(caller),
            Value::from(text),
        ])
    }

    // ── Handlers ─────────────────────────────────────────────

    fn on_register(values: &[Value<'_>]) -> Dispatch {
        match values {
            [_, Value::U64(epoch_ms)] => Dispatch::TimeSync(*epoch_ms),
            _ => Dispatch::Ignored,
        }
    }

    /// `[FIND, caller, _, ts, digest]`
    fn on_find_device(
        &mut self,
        header: CommandHeader,
        values: &[Value<'_>],
        ctx: &DispatchContext,
    ) -> Result<Dispatch, EncodeError> {
        let [_, caller, _, ts, digest] = values else {
            return Ok(Dispatch::Ignored);
        };
        let Some(caller) = caller.as_str() else {
            return Ok(Dispatch::Ignored);
        };
        let Some(role) = self.authorize(digest, ts, ctx) else {
            return Ok(Dispatch::Ignored);
        };
        let is_admin = role == Role::Admin;

        let mut flags = 0;
        if ctx.remote_online {
            flags |= FLAG_REMOTE_ONLINE;
        }
        if ctx.ap_active {
            flags |= FLAG_AP_ACTIVE;
        }
        if is_admin {
            flags |= FLAG_ADMIN;
        }

        let catalogue = self.registry.catalogue(is_admin)?;
        self.reply(&[
            header.reply(command::FIND_DEVICE_RESPONSE),
            Value::from(caller),
            Value::U8(flags),
            Value::U64(ctx.now_ms),
            Value::from(self.nickname.as_str()),
            Value::from(self.device_hex.as_str()),
            Value::U8(PROTOCOL_VERSION),
            Value::buf(catalogue),
        ])
    }

    /// `[EXECUTE, deviceId, caller, ts, digest, selector, args?]`
    fn on_execute(
        &mut self,
        header: CommandHeader,
        values: &[Value<'_>],
        ctx: &DispatchContext,
    ) -> Result<Dispatch, EncodeError> {
        if !(6..=7).contains(&values.len()) {
            return Ok(Dispatch::Ignored);
        }
        let Some(caller) = values[2].as_str() else {
            return Ok(Dispatch::Ignored);
        };
        let Some(role) = self.authorize(&values[4], &values[3], ctx) else {
            return Ok(Dispatch::Ignored);
        };

        let entry = Selector::from_value(&values[5]).and_then(|s| self.registry.resolve(s));
        let Some(entry) = entry else {
            debug!("RPC: no provider for {:?}", values[5]);
            return self.log_reply(header, caller, Value::from(UNAVAILABLE), false);
        };
        if entry.policy.contains(Policy::ADMIN_ONLY) && role != Role::Admin {
            warn!("RPC: provider {} is admin only, caller {caller} refused", entry.id);
            return self.log_reply(header, caller, Value::from(UNAVAILABLE), false);
        }

        let provider = entry.id;
        let reply = match self.invoke(entry, values.get(6))? {
            Invocation::Result { payload, encrypted } => {
                info!("RPC: provider {provider} ({}) executed for {caller}", entry.name);
                self.log_reply(header, caller, Value::buf(payload), encrypted)?
            }
            Invocation::NoResult => self.log_reply(header, caller, Value::from(UNAVAILABLE), false)?,
            Invocation::Failed => self.log_reply(header, caller, Value::from(EXECUTION_FAILED), false)?,
        };
        Ok(match reply {
            Dispatch::Reply(reply) => Dispatch::Executed { provider, reply },
            other => other,
        })
    }

    /// `[OTA_START, caller, chunkLen, firmwareLen, ts, digest]`
    fn on_ota_start(&mut self, values: &[Value<'_>], ctx: &DispatchContext) -> Dispatch {
        let [_, caller, chunk_len, firmware_len, ts, digest] = values else {
            return Dispatch::Ignored;
        };
        let Some(caller) = caller.as_str() else {
            return Dispatch::Ignored;
        };
        if self.authorize(digest, ts, ctx) != Some(Role::Admin) {
            return Dispatch::Ignored;
        }
        let lengths = chunk_len
            .as_u64()
            .and_then(|c| u32::try_from(c).ok())
            .zip(firmware_len.as_u64().and_then(|f| u32::try_from(f).ok()));
        let Some((chunk_len, firmware_len)) = lengths.filter(|(c, f)| *c > 0 && *f > 0) else {
            warn!("RPC: OTA start with invalid lengths");
            return Dispatch::Ignored;
        };

        info!("RPC: OTA start by {caller}: {firmware_len} bytes in {chunk_len}-byte chunks");
        Dispatch::StartUpdate(UpdateRequest {
            caller: caller.to_owned(),
            chunk_len,
            firmware_len,
        })
    }

    // ── Helpers ──────────────────────────────────────────────

    fn authorize(&mut self, digest: &Value<'_>, ts: &Value<'_>, ctx: &DispatchContext) -> Option<Role> {
        let digest = digest.as_bytes()?;
        let ts = ts.as_u64()?;
        self.guard.authorize(&self.creds.get(), digest, ts, ctx.now_ms)
    }

    /// Key and IV for encrypted providers: the admin password digest and
    /// its first 16 bytes.
    fn cipher(&self) -> Option<([u8; 32], [u8; 16])> {
        let key = self.creds.get().admin.as_ref()?.password;
        let mut iv = [0u8; 16];
        iv.copy_from_slice(&key[..16]);
        Some((key, iv))
    }

    fn invoke(&self, entry: &ProviderEntry, args: Option<&Value<'_>>) -> Result<Invocation, EncodeError> {
        let encrypted = entry.policy.contains(Policy::ENCRYPTED);
        let cipher = if encrypted {
            match self.cipher() {
                Some(cipher) => Some(cipher),
                None => return Ok(Invocation::Failed),
            }
        } else {
            None
        };

        let plain_args;
        let raw = match args {
            None => None,
            Some(Value::Buf(raw)) => match &cipher {
                Some((key, iv)) => {
                    let Some(plain) = crypto::aes256_cbc_decrypt(key, iv, raw) else {
                        warn!("RPC: provider {} argument decryption failed", entry.id);
                        return Ok(Invocation::Failed);
                    };
                    plain_args = plain;
                    Some(plain_args.as_slice())
                }
                None => Some(&**raw),
            },
            Some(_) => return Ok(Invocation::Failed),
        };

        let decoded = match raw {
            None | Some([]) => Vec::new(),
            Some(bytes) => match codec::decode_borrowed(bytes) {
                Ok(values) => values,
                Err(e) => {
                    debug!("RPC: provider {} arguments undecodable ({e})", entry.id);
                    return Ok(Invocation::Failed);
                }
            },
        };

        let Some(result) = entry.invoke(&decoded) else {
            return Ok(Invocation::NoResult);
        };
        let payload = match codec::encode(&[result]) {
            Ok(payload) => payload,
            Err(EncodeError::Alloc) => return Err(EncodeError::Alloc),
            Err(e) => {
                warn!("RPC: provider {} result unencodable ({e})", entry.id);
                return Ok(Invocation::Failed);
            }
        };
        match cipher {
            Some((key, iv)) => Ok(crypto::aes256_cbc_encrypt(&key, &iv, &payload)
                .map_or(Invocation::Failed, |payload| Invocation::Result {
                    payload,
                    encrypted: true,
                })),
            None => Ok(Invocation::Result {
                payload,
                encrypted: false,
            }),
        }
    }

    fn log_reply(
        &self,
        header: CommandHeader,
        caller: &str,
        payload: Value<'_>,
        encrypted: bool,
    ) -> Result<Dispatch, EncodeError> {
        let mut reply = vec![
            header.reply(command::LOG),
            Value::borrowed_buf(&self.device_id),
            Value::from(caller),
            payload,
        ];
        if encrypted {
            reply.push(Value::U8(command::ENCRYPTED_MARKER));
        }
        self.reply(&reply)
    }

    fn reply(&self, values: &[Value<'_>]) -> Result<Dispatch, EncodeError> {
        codec::encode(values).map(Dispatch::Reply)
    }
}

enum Invocation {
    Result { payload: Vec<u8>, encrypted: bool },
    NoResult,
    Failed,
}
