//! One-time authorization with a replay window.
//!
//! A caller proves possession of a credential by sending
//! `(timestamp, digest)` where
//!
//! ```text
//! digest = H( hex(sha256(username)) ‖ hex(sha256(password)) ‖ decimal(timestamp) )
//! ```
//!
//! and `H` is the deployment's [`HashAlgo`]. Every accepted pair is kept
//! in a map keyed by timestamp so it can never be accepted again. The
//! map doubles as a flood guard: once it reaches capacity with a synced
//! clock, new authorizations are refused until stale entries age out.
//!
//! Rejections carry no reason. Callers only learn accepted/refused.

use std::cell::{Ref, RefCell};
use std::collections::BTreeMap;
use std::rc::Rc;

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

use crate::adapters::crypto::{self, HashAlgo, SHA256_LEN};
use crate::app::ports::{StorageError, StoragePort};

pub const NAMESPACE: &str = "auth";
pub const KEY_CREDENTIALS: &str = "creds";

pub const MAX_USERS: usize = 16;
/// Admin plus [`MAX_USERS`] postcard-encoded digest pairs, with headroom.
const MAX_CREDENTIAL_BLOB: usize = 2048;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Admin,
    User,
}

/// Stored identity: SHA-256 digests of the username and password.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credential {
    pub username: [u8; SHA256_LEN],
    pub password: [u8; SHA256_LEN],
}

impl Credential {
    pub fn from_plain(username: &str, password: &str) -> Self {
        Self {
            username: crypto::sha256(username.as_bytes()),
            password: crypto::sha256(password.as_bytes()),
        }
    }

    /// Digest a caller must present for `timestamp`.
    pub fn one_time_digest(&self, algo: HashAlgo, timestamp: u64) -> Vec<u8> {
        let mut input = crypto::to_hex(&self.username);
        input.push_str(&crypto::to_hex(&self.password));
        input.push_str(&timestamp.to_string());
        algo.digest(input.as_bytes())
    }
}

/// Admin plus named users, loaded from storage at boot.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialStore {
    pub algo: HashAlgo,
    pub admin: Option<Credential>,
    pub users: Vec<Credential>,
}

impl CredentialStore {
    pub fn new(algo: HashAlgo) -> Self {
        Self {
            algo,
            admin: None,
            users: Vec::new(),
        }
    }

    pub fn with_admin(mut self, admin: Credential) -> Self {
        self.admin = Some(admin);
        self
    }

    pub fn add_user(&mut self, user: Credential) {
        self.users.push(user);
    }

    /// Add `user`, or replace the password of the user with the same name.
    pub fn upsert_user(&mut self, user: Credential) -> Result<(), StorageError> {
        if let Some(existing) = self.users.iter_mut().find(|u| u.username == user.username) {
            existing.password = user.password;
            return Ok(());
        }
        if self.users.len() >= MAX_USERS {
            return Err(StorageError::Full);
        }
        self.users.push(user);
        Ok(())
    }

    /// Remove the user whose name hashes to `username`.
    pub fn remove_user(&mut self, username: &[u8; SHA256_LEN]) -> bool {
        let before = self.users.len();
        self.users.retain(|u| &u.username != username);
        self.users.len() != before
    }

    /// Load from the "auth" namespace.
    ///
    /// A missing or corrupted blob yields an empty store: the device is
    /// then unprovisioned and every authorization fails.
    pub fn load(storage: &impl StoragePort) -> Self {
        let mut blob = vec![0u8; MAX_CREDENTIAL_BLOB];
        let creds = match storage.read(NAMESPACE, KEY_CREDENTIALS, &mut blob) {
            Ok(len) => postcard::from_bytes(&blob[..len]).unwrap_or_else(|_| {
                warn!("AUTH: credential blob corrupted, ignoring");
                Self::default()
            }),
            Err(_) => Self::default(),
        };
        info!(
            "AUTH: credentials loaded (admin: {}, users: {})",
            creds.admin.is_some(),
            creds.users.len()
        );
        creds
    }

    /// Persist into the "auth" namespace, replacing what was there.
    pub fn save(&self, storage: &mut impl StoragePort) -> Result<(), StorageError> {
        if self.users.len() > MAX_USERS {
            return Err(StorageError::Full);
        }
        let blob = postcard::to_allocvec(self).map_err(|_| StorageError::IoError)?;
        if blob.len() > MAX_CREDENTIAL_BLOB {
            return Err(StorageError::Full);
        }
        storage.write(NAMESPACE, KEY_CREDENTIALS, &blob)
    }

    pub fn is_configured(&self) -> bool {
        self.admin.is_some()
    }

    /// Role whose credential produced `digest` for `timestamp`.
    /// Admin is checked first.
    fn match_role(&self, digest: &[u8], timestamp: u64) -> Option<Role> {
        let admin = self.admin.as_ref()?;
        if crypto::ct_eq(&admin.one_time_digest(self.algo, timestamp), digest) {
            return Some(Role::Admin);
        }
        self.users
            .iter()
            .any(|u| crypto::ct_eq(&u.one_time_digest(self.algo, timestamp), digest))
            .then_some(Role::User)
    }
}

/// One credential store shared by the dispatcher and the account
/// providers, so an edit takes effect on the next request.
#[derive(Debug, Clone, Default)]
pub struct SharedCredentials(Rc<RefCell<CredentialStore>>);

impl SharedCredentials {
    pub fn new(store: CredentialStore) -> Self {
        Self(Rc::new(RefCell::new(store)))
    }

    pub fn get(&self) -> Ref<'_, CredentialStore> {
        self.0.borrow()
    }

    pub fn replace(&self, store: CredentialStore) {
        *self.0.borrow_mut() = store;
    }

    pub fn update<R>(&self, f: impl FnOnce(&mut CredentialStore) -> R) -> R {
        f(&mut self.0.borrow_mut())
    }
}

impl From<CredentialStore> for SharedCredentials {
    fn from(store: CredentialStore) -> Self {
        Self::new(store)
    }
}

// ── Replay guard ─────────────────────────────────────────────

pub struct ReplayGuard {
    seen: BTreeMap<u64, Vec<u8>>,
    capacity: usize,
    window_ms: u64,
    /// Highest timestamp ever evicted. Nothing at or below it is accepted,
    /// so dropping an entry never reopens it for replay.
    floor: u64,
}

impl ReplayGuard {
    pub fn new(capacity: usize, window_ms: u64) -> Self {
        Self {
            seen: BTreeMap::new(),
            capacity,
            window_ms,
            floor: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }

    /// Validate a one-time digest.
    ///
    /// `now_ms` is the device's epoch clock, `0` while unsynced. With a
    /// synced clock, timestamps older than the window are refused and
    /// a full window refuses everything until an entry goes stale. An
    /// unsynced clock cannot age entries, so a full window makes room
    /// by dropping its oldest entry on the next valid request.
    pub fn authorize(
        &mut self,
        creds: &CredentialStore,
        digest: &[u8],
        timestamp: u64,
        now_ms: u64,
    ) -> Option<Role> {
        if timestamp == 0 || timestamp <= self.floor || self.seen.contains_key(&timestamp) {
            debug!("AUTH: timestamp {timestamp} rejected");
            return None;
        }
        self.evict_oldest_stale(now_ms);

        let synced = now_ms > 0;
        if synced && self.seen.len() >= self.capacity {
            warn!("AUTH: replay window full ({}), refusing", self.capacity);
            return None;
        }
        if !creds.is_configured() || digest.len() != creds.algo.digest_len() {
            return None;
        }
        if synced && timestamp.saturating_add(self.window_ms) < now_ms {
            debug!("AUTH: stale timestamp {timestamp}");
            return None;
        }

        let role = creds.match_role(digest, timestamp)?;
        if self.seen.len() >= self.capacity {
            self.evict_oldest();
        }
        self.seen.insert(timestamp, digest.to_vec());
        Some(role)
    }

    /// Drop at most one entry: the oldest, if it has left the window.
    fn evict_oldest_stale(&mut self, now_ms: u64) {
        let stale = self
            .seen
            .first_key_value()
            .is_some_and(|(&ts, _)| ts.saturating_add(self.window_ms) < now_ms);
        if stale {
            self.evict_oldest();
        }
    }

    fn evict_oldest(&mut self) {
        if let Some((ts, _)) = self.seen.pop_first() {
            self.floor = self.floor.max(ts);
        }
    }
}
