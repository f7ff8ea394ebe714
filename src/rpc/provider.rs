//! Provider registry: the remote-invokable device functions.
//!
//! Providers are registered once at startup and are immutable
//! afterwards. Each gets a sequential id; an optional custom id gives
//! external callers a stable address that survives reordering.

use core::fmt;
use core::ops::BitOr;

use super::codec::{self, EncodeError};
use super::value::Value;

// ── Policy ───────────────────────────────────────────────────

/// Visibility and invocation policy bits.
#[derive(Clone, Copy, PartialEq, Eq, Default)]
pub struct Policy(u8);

impl Policy {
    pub const NONE: Self = Self(0);
    pub const COMMON: Self = Self(0x80);
    pub const CONFIRM: Self = Self(0x40);
    pub const ADMIN_ONLY: Self = Self(0x20);
    pub const USER_VISIBLE: Self = Self(0x10);
    pub const ENCRYPTED: Self = Self(0x08);

    pub const fn bits(self) -> u8 {
        self.0
    }

    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }
}

impl BitOr for Policy {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl fmt::Debug for Policy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Policy(0x{:02x})", self.0)
    }
}

// ── Provider trait ───────────────────────────────────────────

/// A device function callable over RPC.
///
/// Returns at most one result value.
pub trait Provider {
    fn invoke(&self, args: &[Value<'_>]) -> Option<Value<'static>>;
}

impl<F> Provider for F
where
    F: Fn(&[Value<'_>]) -> Option<Value<'static>>,
{
    fn invoke(&self, args: &[Value<'_>]) -> Option<Value<'static>> {
        self(args)
    }
}

pub struct ProviderEntry {
    pub id: u16,
    pub custom_id: Option<u64>,
    pub name: String,
    pub policy: Policy,
    /// UI hint only; never enforced.
    pub arg_count: u8,
    handler: Box<dyn Provider>,
}

impl ProviderEntry {
    pub fn settings(&self) -> u8 {
        self.policy.bits() | (self.arg_count & 0x07)
    }

    pub fn invoke(&self, args: &[Value<'_>]) -> Option<Value<'static>> {
        self.handler.invoke(args)
    }

    /// `[id u16, settings u8, name str, custom id u64]`
    fn descriptor(&self) -> Result<Vec<u8>, EncodeError> {
        codec::encode(&[
            Value::U16(self.id),
            Value::U8(self.settings()),
            Value::from(self.name.as_str()),
            Value::U64(self.custom_id.unwrap_or(0)),
        ])
    }
}

impl fmt::Debug for ProviderEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderEntry")
            .field("id", &self.id)
            .field("custom_id", &self.custom_id)
            .field("name", &self.name)
            .field("policy", &self.policy)
            .field("arg_count", &self.arg_count)
            .finish_non_exhaustive()
    }
}

/// How a request addresses a provider. The value's width decides:
/// `u64` is a custom id, `u8`/`u16` a sequential id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Selector {
    Id(u16),
    Custom(u64),
}

impl Selector {
    pub fn from_value(value: &Value<'_>) -> Option<Self> {
        match *value {
            Value::U64(custom) => Some(Self::Custom(custom)),
            Value::U16(id) => Some(Self::Id(id)),
            Value::U8(id) => Some(Self::Id(id.into())),
            _ => None,
        }
    }
}

// ── Registry ─────────────────────────────────────────────────

/// Sequential ids are `u16`; the registry cannot grow past that.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegistryFull;

impl fmt::Display for RegistryFull {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "provider registry full")
    }
}

#[derive(Default)]
pub struct ProviderRegistry {
    entries: Vec<ProviderEntry>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a provider and return its sequential id.
    pub fn register(
        &mut self,
        name: &str,
        policy: Policy,
        arg_count: u8,
        handler: impl Provider + 'static,
    ) -> Result<u16, RegistryFull> {
        self.insert(name, None, policy, arg_count, Box::new(handler))
    }

    pub fn register_with_custom_id(
        &mut self,
        name: &str,
        custom_id: u64,
        policy: Policy,
        arg_count: u8,
        handler: impl Provider + 'static,
    ) -> Result<u16, RegistryFull> {
        self.insert(name, Some(custom_id), policy, arg_count, Box::new(handler))
    }

    fn insert(
        &mut self,
        name: &str,
        custom_id: Option<u64>,
        policy: Policy,
        arg_count: u8,
        handler: Box<dyn Provider>,
    ) -> Result<u16, RegistryFull> {
        let id = u16::try_from(self.entries.len()).map_err(|_| RegistryFull)?;
        self.entries.push(ProviderEntry {
            id,
            custom_id,
            name: name.to_owned(),
            policy,
            arg_count,
            handler,
        });
        Ok(id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn resolve(&self, selector: Selector) -> Option<&ProviderEntry> {
        match selector {
            Selector::Id(id) => self.entries.get(id as usize),
            Selector::Custom(custom) => self.entries.iter().find(|e| e.custom_id == Some(custom)),
        }
    }

    /// Encoded list of provider descriptors, one buffer per provider.
    /// Admin-only providers are listed for admins only.
    pub fn catalogue(&self, include_admin: bool) -> Result<Vec<u8>, EncodeError> {
        let mut items = Vec::with_capacity(self.entries.len());
        for entry in &self.entries {
            if !include_admin && entry.policy.contains(Policy::ADMIN_ONLY) {
                continue;
            }
            items.push(Value::buf(entry.descriptor()?));
        }
        if items.is_empty() {
            return Ok(Vec::new());
        }
        codec::encode(&items)
    }
}
