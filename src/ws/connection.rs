//! One WebSocket endpoint over a non-blocking [`Stream`].
//!
//! ```text
//!  Disconnected ──connect──▶ HandshakeSent ──101 ok──▶ Established
//!                 accept ──▶ TcpConnected  ──GET ok──▶ Established
//!                                 │                        │
//!                                 └──── bad / timeout ─────┴──▶ Error
//!                                       close / EOF ──────────▶ Disconnected
//! ```
//!
//! [`Connection::poll`] never blocks: it reads whatever the stream has,
//! advances the state machine and yields at most one [`WsEvent`] per
//! call. Frames are delivered strictly in arrival order. A failure is
//! reported exactly once as [`WsEvent::Error`] and the stream is closed.

use core::fmt;
use std::collections::VecDeque;

use log::{debug, info, warn};

use super::frame::{self, FrameError, FrameHeader, Opcode};
use super::handshake::{self, HandshakeError};
use super::stream::{Stream, StreamError};
use super::url::WsUrl;
use crate::adapters::crypto;
use crate::config::SystemConfig;

/// Bytes requested from the stream per read.
const READ_CHUNK: usize = 2048;

/// Reads attempted per `poll` before yielding back to the loop.
const READS_PER_POLL: usize = 8;

// ── Types ────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Client,
    Server,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Disconnected,
    /// Server role: stream accepted, waiting for the upgrade request.
    TcpConnected,
    /// Client role: upgrade request written, waiting for `101`.
    HandshakeSent,
    Established,
    Error,
}

/// Resource bounds applied to every connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WsLimits {
    /// Largest accepted message payload, fragments included.
    pub max_payload: usize,
    /// Largest accepted handshake header block.
    pub max_header: usize,
    /// Non-empty reads one frame may span before the peer is dropped.
    pub read_max_times: u32,
    pub handshake_timeout_ms: u64,
}

impl WsLimits {
    pub const fn new() -> Self {
        Self {
            max_payload: 102_400,
            max_header: 1_024,
            read_max_times: 100,
            handshake_timeout_ms: 3_000,
        }
    }

    pub fn from_config(cfg: &SystemConfig) -> Self {
        Self {
            max_payload: cfg.max_payload as usize,
            max_header: cfg.max_header as usize,
            read_max_times: cfg.read_max_times,
            handshake_timeout_ms: u64::from(cfg.handshake_timeout_ms),
        }
    }
}

impl Default for WsLimits {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WsError {
    TcpTimeout,
    TcpFailed,
    TcpError,
    Handshake(HandshakeError),
    HandshakeTimeout,
    MaxPayloadExceeded,
    AllocFailed,
    MaxHeaderExceeded,
    ReachMaxReadTimes,
    Protocol(FrameError),
    InvalidUrl(super::url::UrlError),
    NotConnected,
}

impl WsError {
    /// Numeric event code shared with existing peers and log tooling.
    pub const fn code(self) -> u8 {
        match self {
            Self::TcpTimeout => 0xFD,
            Self::TcpFailed | Self::InvalidUrl(_) => 0xFC,
            Self::TcpError | Self::Protocol(_) => 0xF8,
            Self::Handshake(_) | Self::HandshakeTimeout => 0xF7,
            Self::MaxPayloadExceeded => 0xF6,
            Self::AllocFailed => 0xF5,
            Self::MaxHeaderExceeded => 0xF4,
            Self::ReachMaxReadTimes => 0xAE,
            Self::NotConnected => 0xA8,
        }
    }
}

impl fmt::Display for WsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TcpTimeout => write!(f, "TCP connect timeout"),
            Self::TcpFailed => write!(f, "TCP connect failed"),
            Self::TcpError => write!(f, "TCP error"),
            Self::Handshake(e) => write!(f, "handshake: {e}"),
            Self::HandshakeTimeout => write!(f, "handshake timeout"),
            Self::MaxPayloadExceeded => write!(f, "payload exceeds limit"),
            Self::AllocFailed => write!(f, "buffer allocation failed"),
            Self::MaxHeaderExceeded => write!(f, "handshake header exceeds limit"),
            Self::ReachMaxReadTimes => write!(f, "frame spans too many reads"),
            Self::Protocol(e) => write!(f, "protocol: {e}"),
            Self::InvalidUrl(e) => write!(f, "url: {e}"),
            Self::NotConnected => write!(f, "not connected"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WsEvent {
    TcpConnected,
    Connected,
    Disconnected,
    Text(String),
    Binary(Vec<u8>),
    Ping(Vec<u8>),
    Pong(Vec<u8>),
    Error(WsError),
}

impl WsEvent {
    /// Event code for lifecycle events; `None` for messages.
    pub fn code(&self) -> Option<u8> {
        match self {
            Self::TcpConnected => Some(0xFE),
            Self::Connected => Some(0xFB),
            Self::Disconnected => Some(0xA8),
            Self::Error(e) => Some(e.code()),
            _ => None,
        }
    }
}

struct Fragment {
    opcode: Opcode,
    data: Vec<u8>,
}

// ── Connection ───────────────────────────────────────────────

pub struct Connection<S: Stream> {
    stream: S,
    role: Role,
    status: Status,
    limits: WsLimits,
    label: String,
    rx: Vec<u8>,
    fragment: Option<Fragment>,
    frame_reads: u32,
    key: String,
    deadline_ms: u64,
    events: VecDeque<WsEvent>,
}

impl<S: Stream> Connection<S> {
    /// Client role: write the upgrade request on a freshly opened stream.
    pub fn client(mut stream: S, url: &WsUrl, limits: WsLimits, now_ms: u64) -> Result<Self, WsError> {
        let key = handshake::generate_key();
        let request = handshake::client_request(&url.host, url.port, &url.path, &key);
        if stream.write_all(request.as_bytes()).is_err() {
            stream.close();
            return Err(WsError::TcpError);
        }
        debug!("WS[client]: upgrade request sent to {url}");
        Ok(Self::with_state(stream, Role::Client, Status::HandshakeSent, limits, "WS[client]".into(), key, now_ms))
    }

    /// Server role: wrap an accepted stream and wait for its upgrade request.
    pub fn accept(stream: S, label: String, limits: WsLimits, now_ms: u64) -> Self {
        Self::with_state(stream, Role::Server, Status::TcpConnected, limits, label, String::new(), now_ms)
    }

    fn with_state(
        stream: S,
        role: Role,
        status: Status,
        limits: WsLimits,
        label: String,
        key: String,
        now_ms: u64,
    ) -> Self {
        Self {
            stream,
            role,
            status,
            limits,
            label,
            rx: Vec::new(),
            fragment: None,
            frame_reads: 0,
            key,
            deadline_ms: now_ms.saturating_add(limits.handshake_timeout_ms),
            events: VecDeque::new(),
        }
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn status(&self) -> Status {
        self.status
    }

    pub fn is_established(&self) -> bool {
        self.status == Status::Established
    }

    /// Terminal states produce no further events.
    pub fn is_finished(&self) -> bool {
        matches!(self.status, Status::Disconnected | Status::Error) && self.events.is_empty()
    }

    /// Advance the connection and return the next event, if any.
    pub fn poll(&mut self, now_ms: u64) -> Option<WsEvent> {
        if self.events.is_empty() {
            match self.status {
                Status::TcpConnected | Status::HandshakeSent => self.poll_handshake(now_ms),
                Status::Established => self.poll_frames(),
                Status::Disconnected | Status::Error => {}
            }
        }
        self.events.pop_front()
    }

    pub fn send(&mut self, opcode: Opcode, payload: &[u8]) -> Result<(), WsError> {
        if self.status != Status::Established {
            return Err(WsError::NotConnected);
        }
        self.write_frame(opcode, payload).inspect_err(|&e| self.fail(e))
    }

    pub fn send_binary(&mut self, payload: &[u8]) -> Result<(), WsError> {
        self.send(Opcode::Binary, payload)
    }

    pub fn send_text(&mut self, text: &str) -> Result<(), WsError> {
        self.send(Opcode::Text, text.as_bytes())
    }

    pub fn ping(&mut self, payload: &[u8]) -> Result<(), WsError> {
        self.send(Opcode::Ping, payload)
    }

    /// Locally initiated close. No event is queued.
    pub fn close(&mut self) {
        if self.status == Status::Established {
            let _ = self.write_frame(Opcode::Close, &[]);
        }
        self.stream.close();
        self.reset(Status::Disconnected);
    }

    // ── Handshake ────────────────────────────────────────────

    fn poll_handshake(&mut self, now_ms: u64) {
        if now_ms > self.deadline_ms {
            self.fail(WsError::HandshakeTimeout);
            return;
        }

        let mut end = handshake::find_header_end(&self.rx);
        for _ in 0..READS_PER_POLL {
            if end.is_some() {
                break;
            }
            match self.read_some() {
                Some(0) | None => break,
                Some(_) => end = handshake::find_header_end(&self.rx),
            }
        }
        if !matches!(self.status, Status::TcpConnected | Status::HandshakeSent) {
            return;
        }

        let Some(end) = end else {
            if self.rx.len() > self.limits.max_header {
                self.fail(WsError::MaxHeaderExceeded);
            }
            return;
        };
        if end > self.limits.max_header {
            self.fail(WsError::MaxHeaderExceeded);
            return;
        }

        let outcome = match self.role {
            Role::Client => handshake::validate_server_response(&self.rx[..end], &self.key).map(|()| None),
            Role::Server => handshake::parse_client_request(&self.rx[..end]).map(Some),
        };
        // Bytes after the header block already belong to the frame stream.
        self.rx.drain(..end);

        match outcome {
            Ok(None) => {}
            Ok(Some(request)) => {
                let response = handshake::server_response(&handshake::accept_key(&request.key));
                if self.stream.write_all(response.as_bytes()).is_err() {
                    self.fail(WsError::TcpError);
                    return;
                }
                debug!("{}: upgrade accepted for {}", self.label, request.path);
            }
            Err(e) => {
                self.fail(WsError::Handshake(e));
                return;
            }
        }

        info!("{}: connected", self.label);
        self.status = Status::Established;
        self.events.push_back(WsEvent::Connected);
    }

    // ── Frames ───────────────────────────────────────────────

    fn poll_frames(&mut self) {
        let mut reads = 0;
        loop {
            self.process_buffered();
            if !self.events.is_empty() || self.status != Status::Established || reads == READS_PER_POLL {
                return;
            }
            let partial = !self.rx.is_empty();
            match self.read_some() {
                Some(0) | None => return,
                Some(_) => reads += 1,
            }
            if partial {
                self.frame_reads += 1;
                if self.frame_reads > self.limits.read_max_times {
                    self.fail(WsError::ReachMaxReadTimes);
                    return;
                }
            }
        }
    }

    fn process_buffered(&mut self) {
        while self.status == Status::Established && self.events.is_empty() {
            let (header, header_len) = match frame::parse_header(&self.rx) {
                Ok(Some(parsed)) => parsed,
                Ok(None) => return,
                Err(e) => {
                    self.fail(WsError::Protocol(e));
                    return;
                }
            };

            // Bound check before any payload-sized allocation.
            if header.payload_len > self.limits.max_payload as u64 {
                self.fail(WsError::MaxPayloadExceeded);
                return;
            }
            let total = header_len + header.payload_len as usize;
            if self.rx.len() < total {
                if self.rx.try_reserve(total - self.rx.len()).is_err() {
                    self.fail(WsError::AllocFailed);
                }
                return;
            }

            let mut payload = Vec::new();
            if payload.try_reserve_exact(total - header_len).is_err() {
                self.fail(WsError::AllocFailed);
                return;
            }
            payload.extend_from_slice(&self.rx[header_len..total]);
            self.rx.drain(..total);
            self.frame_reads = 0;

            match (self.role, header.mask) {
                (Role::Client, Some(_)) => {
                    self.fail(WsError::Protocol(FrameError::UnexpectedMask));
                    return;
                }
                (Role::Server, None) => {
                    self.fail(WsError::Protocol(FrameError::MissingMask));
                    return;
                }
                (Role::Server, Some(key)) => frame::apply_mask(&mut payload, key),
                (Role::Client, None) => {}
            }

            self.on_frame(header, payload);
        }
    }

    fn on_frame(&mut self, header: FrameHeader, payload: Vec<u8>) {
        match header.opcode {
            Opcode::Ping => {
                if let Err(e) = self.write_frame(Opcode::Pong, &payload) {
                    self.fail(e);
                    return;
                }
                self.events.push_back(WsEvent::Ping(payload));
            }
            Opcode::Pong => self.events.push_back(WsEvent::Pong(payload)),
            Opcode::Close => {
                info!("{}: close frame received", self.label);
                let _ = self.write_frame(Opcode::Close, &[]);
                self.stream.close();
                self.reset(Status::Disconnected);
                self.events.push_back(WsEvent::Disconnected);
            }
            Opcode::Continuation => {
                let Some(mut frag) = self.fragment.take() else {
                    self.fail(WsError::Protocol(FrameError::OrphanContinuation));
                    return;
                };
                if frag.data.len() + payload.len() > self.limits.max_payload {
                    self.fail(WsError::MaxPayloadExceeded);
                    return;
                }
                if frag.data.try_reserve(payload.len()).is_err() {
                    self.fail(WsError::AllocFailed);
                    return;
                }
                frag.data.extend_from_slice(&payload);
                if header.fin {
                    self.deliver(frag.opcode, frag.data);
                } else {
                    self.fragment = Some(frag);
                }
            }
            Opcode::Text | Opcode::Binary => {
                if self.fragment.is_some() {
                    self.fail(WsError::Protocol(FrameError::InterleavedMessage));
                } else if header.fin {
                    self.deliver(header.opcode, payload);
                } else {
                    self.fragment = Some(Fragment {
                        opcode: header.opcode,
                        data: payload,
                    });
                }
            }
        }
    }

    fn deliver(&mut self, opcode: Opcode, data: Vec<u8>) {
        let event = if opcode == Opcode::Text {
            match String::from_utf8(data) {
                Ok(text) => WsEvent::Text(text),
                Err(_) => {
                    self.fail(WsError::Protocol(FrameError::InvalidUtf8));
                    return;
                }
            }
        } else {
            WsEvent::Binary(data)
        };
        self.events.push_back(event);
    }

    fn write_frame(&mut self, opcode: Opcode, payload: &[u8]) -> Result<(), WsError> {
        let mask = match self.role {
            Role::Client => {
                let mut key = [0u8; 4];
                crypto::fill_random(&mut key);
                Some(key)
            }
            Role::Server => None,
        };
        let header = frame::encode_header(true, opcode, payload.len(), mask);

        let mut out = Vec::new();
        out.try_reserve_exact(header.len() + payload.len())
            .map_err(|_| WsError::AllocFailed)?;
        out.extend_from_slice(&header);
        out.extend_from_slice(payload);
        if let Some(key) = mask {
            frame::apply_mask(&mut out[header.len()..], key);
        }
        self.stream.write_all(&out).map_err(|_| WsError::TcpError)
    }

    // ── I/O helpers ──────────────────────────────────────────

    /// One read into `rx`. `None` means the connection just ended.
    fn read_some(&mut self) -> Option<usize> {
        let mut chunk = [0u8; READ_CHUNK];
        match self.stream.read(&mut chunk) {
            Ok(0) => Some(0),
            Ok(n) => {
                if self.rx.try_reserve(n).is_err() {
                    self.fail(WsError::AllocFailed);
                    return None;
                }
                self.rx.extend_from_slice(&chunk[..n]);
                Some(n)
            }
            Err(StreamError::Closed) => {
                info!("{}: peer closed the stream", self.label);
                self.stream.close();
                self.reset(Status::Disconnected);
                self.events.push_back(WsEvent::Disconnected);
                None
            }
            Err(e) => {
                debug!("{}: read failed: {e}", self.label);
                self.fail(WsError::TcpError);
                None
            }
        }
    }

    fn fail(&mut self, error: WsError) {
        warn!("{}: {error} (0x{:02x})", self.label, error.code());
        self.stream.close();
        self.reset(Status::Error);
        self.events.push_back(WsEvent::Error(error));
    }

    fn reset(&mut self, status: Status) {
        self.status = status;
        self.rx = Vec::new();
        self.fragment = None;
        self.frame_reads = 0;
    }
}
