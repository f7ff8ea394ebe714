//! Fuzz target: server-side `Connection`
//!
//! Replays arbitrary bytes as everything a peer ever sends: the upgrade
//! request, frames, garbage. The connection must never panic, never hand
//! out a message larger than its limit, and must end up finished once
//! the input runs dry.
//!
//! cargo fuzz run fuzz_ws_connection

#![no_main]

use ctrlplane::ws::{Connection, Stream, StreamError, WsEvent, WsLimits};
use libfuzzer_sys::fuzz_target;

const MAX_PAYLOAD: usize = 4096;

/// Serves the fuzz input in small reads, then reports EOF.
struct Replay<'a> {
    input: &'a [u8],
    closed: bool,
}

impl Stream for Replay<'_> {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, StreamError> {
        if self.closed || self.input.is_empty() {
            return Err(StreamError::Closed);
        }
        let n = buf.len().min(self.input.len()).min(97);
        buf[..n].copy_from_slice(&self.input[..n]);
        self.input = &self.input[n..];
        Ok(n)
    }

    fn write(&mut self, data: &[u8]) -> Result<usize, StreamError> {
        if self.closed {
            return Err(StreamError::Closed);
        }
        Ok(data.len())
    }

    fn flush(&mut self) -> Result<(), StreamError> {
        Ok(())
    }

    fn close(&mut self) {
        self.closed = true;
    }
}

fuzz_target!(|data: &[u8]| {
    let limits = WsLimits {
        max_payload: MAX_PAYLOAD,
        ..WsLimits::new()
    };
    let stream = Replay {
        input: data,
        closed: false,
    };
    let mut conn = Connection::accept(stream, "fuzz".into(), limits, 0);

    for now in 0..(data.len() as u64 + 16) {
        while let Some(event) = conn.poll(now) {
            match event {
                WsEvent::Binary(payload) => assert!(payload.len() <= MAX_PAYLOAD),
                WsEvent::Text(text) => assert!(text.len() <= MAX_PAYLOAD),
                _ => {}
            }
        }
        if conn.is_finished() {
            return;
        }
    }
    panic!("connection still open after its input ran dry");
});
