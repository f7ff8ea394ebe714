//! TCP socket adapter.
//!
//! Implements the WebSocket layer's [`Connector`], [`Listener`] and
//! [`Stream`] traits over `std::net`. ESP-IDF's std support maps these
//! onto lwIP sockets, so the same code runs on device and on the host.
//!
//! ## Connection model
//!
//! 1. `TcpConnector::connect()` resolves and connects with a timeout,
//!    then switches the socket to non-blocking mode.
//! 2. `TcpAcceptor::bind()` opens a non-blocking listener; `accept()`
//!    returns `Ok(None)` when nobody is waiting.
//! 3. Reads are non-blocking: `read()` returns `Ok(0)` when no data
//!    is available and `Err(Closed)` on EOF.

use std::io::{ErrorKind, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpListener, TcpStream, ToSocketAddrs};
use std::time::Duration;

use log::{debug, info, warn};

use crate::ws::{Connector, Listener, Stream, StreamError};

// ───────────────────────────────────────────────────────────────
// Stream
// ───────────────────────────────────────────────────────────────

pub struct TcpConn {
    stream: TcpStream,
    closed: bool,
}

impl TcpConn {
    fn new(stream: TcpStream) -> Result<Self, StreamError> {
        stream.set_nonblocking(true).map_err(|_| StreamError::Io)?;
        if stream.set_nodelay(true).is_err() {
            debug!("TCP: TCP_NODELAY not supported");
        }
        Ok(Self { stream, closed: false })
    }

    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.stream.peer_addr().ok()
    }
}

impl Stream for TcpConn {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, StreamError> {
        if self.closed {
            return Err(StreamError::Closed);
        }
        match self.stream.read(buf) {
            Ok(0) if !buf.is_empty() => {
                self.closed = true;
                Err(StreamError::Closed)
            }
            Ok(n) => Ok(n),
            Err(ref e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::Interrupted) => Ok(0),
            Err(e) => {
                warn!("TCP: read error: {}", e);
                Err(StreamError::Io)
            }
        }
    }

    fn write(&mut self, data: &[u8]) -> Result<usize, StreamError> {
        if self.closed {
            return Err(StreamError::Closed);
        }
        match self.stream.write(data) {
            Ok(n) => Ok(n),
            Err(ref e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::Interrupted) => Ok(0),
            Err(e) => {
                warn!("TCP: write error: {}", e);
                Err(StreamError::Io)
            }
        }
    }

    fn flush(&mut self) -> Result<(), StreamError> {
        match self.stream.flush() {
            Ok(()) => Ok(()),
            Err(ref e) if e.kind() == ErrorKind::WouldBlock => Ok(()),
            Err(_) => Err(StreamError::Io),
        }
    }

    fn close(&mut self) {
        if !self.closed {
            self.closed = true;
            let _ = self.stream.shutdown(Shutdown::Both);
        }
    }
}

// ───────────────────────────────────────────────────────────────
// Client role
// ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Default)]
pub struct TcpConnector;

impl Connector for TcpConnector {
    type Stream = TcpConn;

    fn connect(&mut self, host: &str, port: u16, timeout_ms: u32) -> Result<TcpConn, StreamError> {
        let addr = (host, port)
            .to_socket_addrs()
            .map_err(|_| StreamError::Unreachable)?
            .next()
            .ok_or(StreamError::Unreachable)?;
        let timeout = Duration::from_millis(u64::from(timeout_ms.max(1)));
        let stream = TcpStream::connect_timeout(&addr, timeout).map_err(|e| match e.kind() {
            ErrorKind::TimedOut | ErrorKind::WouldBlock => StreamError::Timeout,
            _ => StreamError::Unreachable,
        })?;
        debug!("TCP: connected to {}", addr);
        TcpConn::new(stream)
    }
}

// ───────────────────────────────────────────────────────────────
// Server role
// ───────────────────────────────────────────────────────────────

pub struct TcpAcceptor {
    listener: TcpListener,
}

impl TcpAcceptor {
    /// Bind `0.0.0.0:<port>` in non-blocking mode. Port `0` lets the OS pick.
    pub fn bind(port: u16) -> Result<Self, StreamError> {
        let listener = TcpListener::bind(SocketAddr::from(([0, 0, 0, 0], port))).map_err(|_| StreamError::Io)?;
        listener.set_nonblocking(true).map_err(|_| StreamError::Io)?;
        info!("TCP: listening on port {}", port);
        Ok(Self { listener })
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.listener.local_addr().ok()
    }
}

impl Listener for TcpAcceptor {
    type Stream = TcpConn;

    fn accept(&mut self) -> Result<Option<TcpConn>, StreamError> {
        match self.listener.accept() {
            Ok((stream, addr)) => {
                info!("TCP: client connected from {}", addr);
                TcpConn::new(stream).map(Some)
            }
            Err(ref e) if e.kind() == ErrorKind::WouldBlock => Ok(None),
            Err(e) => {
                warn!("TCP: accept error: {}", e);
                Err(StreamError::Io)
            }
        }
    }
}

// ───────────────────────────────────────────────────────────────
// Tests (host only)
// ───────────────────────────────────────────────────────────────
