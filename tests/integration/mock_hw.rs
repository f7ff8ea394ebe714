//! Mock adapters for integration tests.
//!
//! Everything here records what the crate did to it so tests can assert
//! on the full history without flash, NVS or sockets.

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use ctrlplane::app::events::AppEvent;
use ctrlplane::app::ports::{EventSink, PartitionError, PartitionPort, StorageError, StoragePort, UpdateLauncher};
use ctrlplane::rpc::channels::{UpdateMailbox, UpdateReport};
use ctrlplane::rpc::engine::UpdateRequest;
use ctrlplane::rpc::ota::OtaError;
use ctrlplane::ws::{Connector, Listener, Stream, StreamError};

// ── MemStore ──────────────────────────────────────────────────

/// In-memory [`StoragePort`]. Clones share the same map.
#[derive(Clone, Default)]
pub struct MemStore {
    map: Arc<Mutex<HashMap<(String, String), Vec<u8>>>>,
    fail_writes: Arc<AtomicBool>,
}

impl MemStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    pub fn get_u64(&self, namespace: &str, key: &str) -> Option<u64> {
        self.read_u64(namespace, key)
    }
}

impl StoragePort for MemStore {
    fn read(&self, namespace: &str, key: &str, buf: &mut [u8]) -> Result<usize, StorageError> {
        let map = self.map.lock().unwrap();
        let data = map
            .get(&(namespace.to_owned(), key.to_owned()))
            .ok_or(StorageError::NotFound)?;
        let n = data.len().min(buf.len());
        buf[..n].copy_from_slice(&data[..n]);
        Ok(n)
    }

    fn write(&mut self, namespace: &str, key: &str, data: &[u8]) -> Result<(), StorageError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StorageError::IoError);
        }
        self.map
            .lock()
            .unwrap()
            .insert((namespace.to_owned(), key.to_owned()), data.to_vec());
        Ok(())
    }

    fn delete(&mut self, namespace: &str, key: &str) -> Result<(), StorageError> {
        self.map.lock().unwrap().remove(&(namespace.to_owned(), key.to_owned()));
        Ok(())
    }

    fn exists(&self, namespace: &str, key: &str) -> bool {
        self.map
            .lock()
            .unwrap()
            .contains_key(&(namespace.to_owned(), key.to_owned()))
    }
}

// ── MockPartition ─────────────────────────────────────────────

#[derive(Debug, Default)]
pub struct FlashState {
    pub image: Vec<u8>,
    /// `(offset, len)` of every successful write.
    pub writes: Vec<(u32, usize)>,
    pub finalized: bool,
    pub active: bool,
    pub aborted: bool,
    pub rollbacks: u32,
    pub fail_begin: bool,
    /// Fail the write with this zero-based sequence number.
    pub fail_write_at: Option<usize>,
    pub fail_finalize: bool,
    pub fail_activate: bool,
}

/// [`PartitionPort`] whose state stays observable after the session
/// that owns it is gone.
#[derive(Clone, Default)]
pub struct MockPartition {
    pub state: Arc<Mutex<FlashState>>,
}

pub struct MockHandle;

impl MockPartition {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot<R>(&self, f: impl FnOnce(&FlashState) -> R) -> R {
        f(&self.state.lock().unwrap())
    }

    pub fn configure(&self, f: impl FnOnce(&mut FlashState)) {
        f(&mut self.state.lock().unwrap());
    }
}

impl PartitionPort for MockPartition {
    type Handle = MockHandle;

    fn begin_write(&mut self, _size_hint: u32) -> Result<MockHandle, PartitionError> {
        let mut s = self.state.lock().unwrap();
        if s.fail_begin {
            return Err(PartitionError::BeginFailed);
        }
        s.image.clear();
        s.writes.clear();
        s.finalized = false;
        s.aborted = false;
        Ok(MockHandle)
    }

    fn write_at(&mut self, _handle: &mut MockHandle, offset: u32, data: &[u8]) -> Result<(), PartitionError> {
        let mut s = self.state.lock().unwrap();
        if s.fail_write_at == Some(s.writes.len()) {
            return Err(PartitionError::WriteFailed);
        }
        let end = offset as usize + data.len();
        if s.image.len() < end {
            s.image.resize(end, 0xFF);
        }
        s.image[offset as usize..end].copy_from_slice(data);
        s.writes.push((offset, data.len()));
        Ok(())
    }

    fn finalize(&mut self, _handle: MockHandle) -> Result<(), PartitionError> {
        let mut s = self.state.lock().unwrap();
        if s.fail_finalize {
            return Err(PartitionError::FinalizeFailed);
        }
        s.finalized = true;
        Ok(())
    }

    fn set_active(&mut self) -> Result<(), PartitionError> {
        let mut s = self.state.lock().unwrap();
        if !s.finalized || s.fail_activate {
            return Err(PartitionError::ActivateFailed);
        }
        s.active = true;
        Ok(())
    }

    fn abort(&mut self, _handle: MockHandle) {
        self.state.lock().unwrap().aborted = true;
    }

    fn rollback(&mut self) -> Result<(), PartitionError> {
        self.state.lock().unwrap().rollbacks += 1;
        Ok(())
    }
}

// ── PipeStream ────────────────────────────────────────────────

/// One end of an in-memory duplex byte stream. Clones share the end,
/// which lets a test inject raw bytes behind a connection's back.
#[derive(Clone)]
pub struct PipeStream {
    inbox: Arc<Mutex<VecDeque<u8>>>,
    outbox: Arc<Mutex<VecDeque<u8>>>,
    closed: Arc<AtomicBool>,
}

pub fn pipe_pair() -> (PipeStream, PipeStream) {
    let a = Arc::new(Mutex::new(VecDeque::new()));
    let b = Arc::new(Mutex::new(VecDeque::new()));
    let closed = Arc::new(AtomicBool::new(false));
    (
        PipeStream {
            inbox: Arc::clone(&a),
            outbox: Arc::clone(&b),
            closed: Arc::clone(&closed),
        },
        PipeStream {
            inbox: b,
            outbox: a,
            closed,
        },
    )
}

impl PipeStream {
    /// Write bytes as if the other end had sent them.
    pub fn inject(&self, bytes: &[u8]) {
        self.inbox.lock().unwrap().extend(bytes);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

impl Stream for PipeStream {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, StreamError> {
        let mut inbox = self.inbox.lock().unwrap();
        if inbox.is_empty() {
            return if self.is_closed() { Err(StreamError::Closed) } else { Ok(0) };
        }
        let n = buf.len().min(inbox.len());
        for (dst, src) in buf.iter_mut().zip(inbox.drain(..n)) {
            *dst = src;
        }
        Ok(n)
    }

    fn write(&mut self, data: &[u8]) -> Result<usize, StreamError> {
        if self.is_closed() {
            return Err(StreamError::Closed);
        }
        self.outbox.lock().unwrap().extend(data);
        Ok(data.len())
    }

    fn flush(&mut self) -> Result<(), StreamError> {
        Ok(())
    }

    fn close(&mut self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

// ── PipeConnector / PipeListener ──────────────────────────────

/// [`Connector`] handing out pipes. The far end of every connection
/// waits in `peers` for the test to play the server.
#[derive(Clone, Default)]
pub struct PipeConnector {
    peers: Arc<Mutex<VecDeque<PipeStream>>>,
    refuse: Arc<AtomicBool>,
    pub attempts: Arc<Mutex<u32>>,
}

impl PipeConnector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn take_peer(&self) -> Option<PipeStream> {
        self.peers.lock().unwrap().pop_front()
    }

    pub fn set_refuse(&self, refuse: bool) {
        self.refuse.store(refuse, Ordering::SeqCst);
    }

    pub fn attempts(&self) -> u32 {
        *self.attempts.lock().unwrap()
    }
}

impl Connector for PipeConnector {
    type Stream = PipeStream;

    fn connect(&mut self, _host: &str, _port: u16, _timeout_ms: u32) -> Result<PipeStream, StreamError> {
        *self.attempts.lock().unwrap() += 1;
        if self.refuse.load(Ordering::SeqCst) {
            return Err(StreamError::Unreachable);
        }
        let (near, far) = pipe_pair();
        self.peers.lock().unwrap().push_back(far);
        Ok(near)
    }
}

/// [`Listener`] fed by [`PipeListener::dial`].
#[derive(Clone, Default)]
pub struct PipeListener {
    pending: Arc<Mutex<VecDeque<PipeStream>>>,
}

impl PipeListener {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue an inbound connection and return the dialling end.
    pub fn dial(&self) -> PipeStream {
        let (server_end, client_end) = pipe_pair();
        self.pending.lock().unwrap().push_back(server_end);
        client_end
    }
}

impl Listener for PipeListener {
    type Stream = PipeStream;

    fn accept(&mut self) -> Result<Option<PipeStream>, StreamError> {
        Ok(self.pending.lock().unwrap().pop_front())
    }
}

// ── MockLauncher ──────────────────────────────────────────────

/// [`UpdateLauncher`] that starts nothing and lets the test post reports.
#[derive(Default)]
pub struct MockLauncher {
    pub launches: Vec<UpdateRequest>,
    pub fail_with: Option<OtaError>,
    pub mailbox: Option<Arc<UpdateMailbox>>,
}

impl MockLauncher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn report(&self, report: UpdateReport) {
        if let Some(mailbox) = &self.mailbox {
            mailbox.report(report);
        }
    }
}

impl UpdateLauncher for MockLauncher {
    fn launch(
        &mut self,
        _device_id: [u8; 32],
        request: &UpdateRequest,
        mailbox: Arc<UpdateMailbox>,
    ) -> Result<(), OtaError> {
        self.launches.push(request.clone());
        if let Some(e) = self.fail_with {
            return Err(e);
        }
        self.mailbox = Some(mailbox);
        Ok(())
    }
}

// ── RecordingSink ─────────────────────────────────────────────

#[derive(Default)]
pub struct RecordingSink {
    pub events: Vec<AppEvent>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, event: &AppEvent) -> bool {
        self.events.contains(event)
    }

    pub fn count(&self, pred: impl Fn(&AppEvent) -> bool) -> usize {
        self.events.iter().filter(|e| pred(e)).count()
    }
}

impl EventSink for RecordingSink {
    fn emit(&mut self, event: &AppEvent) {
        self.events.push(event.clone());
    }
}
