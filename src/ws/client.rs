//! Client-role endpoint with non-blocking auto-reconnect.
//!
//! After an unexpected disconnect or error the client schedules a new
//! attempt `backoff_ms` later; the attempt itself happens inside
//! [`WsClient::poll`], so the loop is never parked on a sleep.

use std::collections::VecDeque;

use log::{debug, info, warn};

use super::connection::{Connection, Status, WsError, WsEvent, WsLimits};
use super::stream::{Connector, StreamError};
use super::url::WsUrl;

pub struct WsClient<C: Connector> {
    connector: C,
    limits: WsLimits,
    url: Option<WsUrl>,
    conn: Option<Connection<C::Stream>>,
    auto_reconnect: bool,
    backoff_ms: u64,
    retry_at: Option<u64>,
    events: VecDeque<WsEvent>,
}

impl<C: Connector> WsClient<C> {
    pub fn new(connector: C, limits: WsLimits, backoff_ms: u64) -> Self {
        Self {
            connector,
            limits,
            url: None,
            conn: None,
            auto_reconnect: true,
            backoff_ms,
            retry_at: None,
            events: VecDeque::new(),
        }
    }

    pub fn set_auto_reconnect(&mut self, enabled: bool) {
        self.auto_reconnect = enabled;
        if !enabled {
            self.retry_at = None;
        }
    }

    /// Open the stream and send the upgrade request.
    ///
    /// The handshake completes later in [`poll`](Self::poll). On failure
    /// a retry is scheduled when auto-reconnect is enabled.
    pub fn connect(&mut self, url: &str, now_ms: u64) -> Result<(), WsError> {
        let url = WsUrl::parse(url).map_err(WsError::InvalidUrl)?;
        if let Some(mut old) = self.conn.take() {
            old.close();
        }
        self.url = Some(url);
        self.retry_at = None;
        self.open(now_ms).inspect_err(|_| self.schedule_retry(now_ms))
    }

    /// Close the connection and cancel any pending reconnect.
    pub fn stop(&mut self) {
        if let Some(mut conn) = self.conn.take() {
            conn.close();
            info!("WS[client]: stopped");
        }
        self.retry_at = None;
        self.url = None;
        self.events.clear();
    }

    pub fn is_connected(&self) -> bool {
        self.conn.as_ref().is_some_and(Connection::is_established)
    }

    pub fn status(&self) -> Status {
        self.conn.as_ref().map_or(Status::Disconnected, Connection::status)
    }

    /// Uptime at which the next reconnect attempt fires, if one is pending.
    pub fn retry_at(&self) -> Option<u64> {
        self.retry_at
    }

    pub fn send_binary(&mut self, payload: &[u8]) -> Result<(), WsError> {
        self.conn
            .as_mut()
            .ok_or(WsError::NotConnected)?
            .send_binary(payload)
    }

    pub fn poll(&mut self, now_ms: u64) -> Option<WsEvent> {
        if let Some(event) = self.events.pop_front() {
            return Some(event);
        }

        if let Some(conn) = self.conn.as_mut() {
            let event = conn.poll(now_ms);
            if conn.is_finished() {
                self.conn = None;
                self.schedule_retry(now_ms);
            }
            return event;
        }

        match self.retry_at {
            Some(at) if now_ms >= at => {
                self.retry_at = None;
                debug!("WS[client]: reconnecting");
                if let Err(e) = self.open(now_ms) {
                    self.events.push_back(WsEvent::Error(e));
                    self.schedule_retry(now_ms);
                }
                self.events.pop_front()
            }
            _ => None,
        }
    }

    fn open(&mut self, now_ms: u64) -> Result<(), WsError> {
        let Some(url) = &self.url else {
            return Err(WsError::NotConnected);
        };
        let timeout = u32::try_from(self.limits.handshake_timeout_ms).unwrap_or(u32::MAX);
        let stream = self
            .connector
            .connect(&url.host, url.port, timeout)
            .map_err(|e| {
                warn!("WS[client]: connect to {url} failed: {e}");
                match e {
                    StreamError::Timeout => WsError::TcpTimeout,
                    _ => WsError::TcpFailed,
                }
            })?;
        info!("WS[client]: tcp connected to {url}");
        self.conn = Some(Connection::client(stream, url, self.limits, now_ms)?);
        self.events.push_back(WsEvent::TcpConnected);
        Ok(())
    }

    fn schedule_retry(&mut self, now_ms: u64) {
        if self.auto_reconnect && self.url.is_some() {
            self.retry_at = Some(now_ms.saturating_add(self.backoff_ms));
            debug!("WS[client]: retry in {} ms", self.backoff_ms);
        }
    }
}
