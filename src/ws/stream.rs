//! Byte-stream abstraction under the WebSocket layer.
//!
//! The connection state machine is generic over [`Stream`], so the same
//! framing code runs over lwIP sockets on device, std sockets on the
//! host and in-memory pipes in tests.

use core::fmt;

/// Consecutive zero-progress writes tolerated by [`Stream::write_all`].
const MAX_WRITE_STALLS: u32 = 1_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamError {
    /// Peer closed the stream (EOF).
    Closed,
    /// Socket-level I/O failure.
    Io,
    /// Operation did not complete in time.
    Timeout,
    /// Host could not be resolved or refused the connection.
    Unreachable,
}

impl fmt::Display for StreamError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Closed => write!(f, "stream closed by peer"),
            Self::Io => write!(f, "stream I/O error"),
            Self::Timeout => write!(f, "stream timeout"),
            Self::Unreachable => write!(f, "host unreachable"),
        }
    }
}

/// Non-blocking, byte-oriented duplex channel.
pub trait Stream {
    /// Read up to `buf.len()` bytes.
    /// Returns `Ok(0)` when no data is available right now.
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, StreamError>;

    /// Write as much of `data` as the channel accepts; may return 0.
    fn write(&mut self, data: &[u8]) -> Result<usize, StreamError>;

    fn flush(&mut self) -> Result<(), StreamError>;

    /// Shut the channel down. Further reads return [`StreamError::Closed`].
    fn close(&mut self);

    /// Write all of `data`, spinning over short writes.
    fn write_all(&mut self, mut data: &[u8]) -> Result<(), StreamError> {
        let mut stalls = 0;
        while !data.is_empty() {
            let n = self.write(data)?;
            if n == 0 {
                stalls += 1;
                if stalls > MAX_WRITE_STALLS {
                    return Err(StreamError::Timeout);
                }
                std::thread::yield_now();
                continue;
            }
            stalls = 0;
            data = &data[n..];
        }
        self.flush()
    }
}

/// Opens outbound streams (client role).
pub trait Connector {
    type Stream: Stream;

    /// Open a stream to `host:port`, giving up after `timeout_ms`.
    fn connect(&mut self, host: &str, port: u16, timeout_ms: u32)
    -> Result<Self::Stream, StreamError>;
}

/// Accepts inbound streams (server role).
pub trait Listener {
    type Stream: Stream;

    /// Poll for a pending connection without blocking.
    fn accept(&mut self) -> Result<Option<Self::Stream>, StreamError>;
}
