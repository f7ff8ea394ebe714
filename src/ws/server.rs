//! Server-role endpoint: a small fixed pool of accepted connections.
//!
//! ```text
//!  Listener ──accept──▶ [slot 0] [slot 1] … [slot max_clients-1]
//!                          │
//!                          └─ poll (round-robin) ──▶ (ClientId, WsEvent)
//! ```
//!
//! Each slot carries a token bucket; data messages beyond the budget
//! are dropped before they reach dispatch.

use burster::Limiter;
use core::time::Duration;
use log::{debug, info, warn};

use super::connection::{Connection, WsError, WsEvent, WsLimits};
use super::stream::{Listener, Stream};
use crate::adapters::time::monotonic;

/// Slot index of an accepted client.
pub type ClientId = u8;

struct Slot<S: Stream> {
    conn: Connection<S>,
    limiter: burster::TokenBucket<fn() -> Duration>,
}

pub struct WsServer<L: Listener> {
    listener: L,
    limits: WsLimits,
    slots: Vec<Option<Slot<L::Stream>>>,
    cursor: usize,
}

impl<L: Listener> WsServer<L> {
    pub fn new(listener: L, limits: WsLimits, max_clients: u8) -> Self {
        let mut slots = Vec::with_capacity(max_clients as usize);
        slots.resize_with(max_clients as usize, || None);
        Self {
            listener,
            limits,
            slots,
            cursor: 0,
        }
    }

    pub fn client_count(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }

    pub fn is_connected(&self, id: ClientId) -> bool {
        self.slot(id).is_some_and(|s| s.conn.is_established())
    }

    pub fn send(&mut self, id: ClientId, payload: &[u8]) -> Result<(), WsError> {
        self.slot_mut(id)
            .ok_or(WsError::NotConnected)?
            .conn
            .send_binary(payload)
    }

    pub fn disconnect(&mut self, id: ClientId) {
        if let Some(slot) = self.slots.get_mut(id as usize).and_then(Option::take) {
            let mut conn = slot.conn;
            conn.close();
            info!("WS[server:{id}]: disconnected by host");
        }
    }

    /// Accept at most one pending stream, then poll slots round-robin
    /// until one produces an event.
    pub fn poll(&mut self, now_ms: u64) -> Option<(ClientId, WsEvent)> {
        self.accept_pending(now_ms);

        let n = self.slots.len();
        for step in 0..n {
            let idx = (self.cursor + step) % n;
            let Some(slot) = self.slots[idx].as_mut() else {
                continue;
            };
            let event = slot.conn.poll(now_ms);
            let finished = slot.conn.is_finished();
            let event = match event {
                Some(WsEvent::Binary(_) | WsEvent::Text(_)) if slot.limiter.try_consume(1).is_err() => {
                    warn!("WS[server:{idx}]: rate limited, message dropped");
                    None
                }
                other => other,
            };
            if finished {
                debug!("WS[server:{idx}]: slot released");
                self.slots[idx] = None;
            }
            if let Some(event) = event {
                self.cursor = (idx + 1) % n;
                return Some((idx as ClientId, event));
            }
        }
        None
    }

    fn accept_pending(&mut self, now_ms: u64) {
        let stream = match self.listener.accept() {
            Ok(Some(stream)) => stream,
            Ok(None) => return,
            Err(e) => {
                warn!("WS[server]: accept failed: {e}");
                return;
            }
        };
        let Some(idx) = self.slots.iter().position(Option::is_none) else {
            warn!("WS[server]: pool full ({}), refusing client", self.slots.len());
            let mut stream = stream;
            stream.close();
            return;
        };
        info!("WS[server:{idx}]: client accepted");
        self.slots[idx] = Some(Slot {
            conn: Connection::accept(stream, format!("WS[server:{idx}]"), self.limits, now_ms),
            limiter: burster::TokenBucket::new_with_time_provider(
                10,
                20, // 10 messages per second, burst of 20
                monotonic as fn() -> Duration,
            ),
        });
    }

    fn slot(&self, id: ClientId) -> Option<&Slot<L::Stream>> {
        self.slots.get(id as usize).and_then(Option::as_ref)
    }

    fn slot_mut(&mut self, id: ClientId) -> Option<&mut Slot<L::Stream>> {
        self.slots.get_mut(id as usize).and_then(Option::as_mut)
    }
}
