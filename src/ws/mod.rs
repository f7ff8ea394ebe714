//! WebSocket-compatible transport over raw byte streams.
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │  WsClient (reconnect)          WsServer (client pool)    │
//! │        └────────────┬──────────────┘                     │
//! │                     ▼                                    │
//! │               Connection<S>  ── handshake / frame        │
//! │                     ▼                                    │
//! │               Stream (trait) ── tcp / pipe               │
//! └──────────────────────────────────────────────────────────┘
//! ```

pub mod client;
pub mod connection;
pub mod frame;
pub mod handshake;
pub mod server;
pub mod stream;
pub mod url;

pub use client::WsClient;
pub use connection::{Connection, Role, Status, WsError, WsEvent, WsLimits};
pub use server::{ClientId, WsServer};
pub use stream::{Connector, Listener, Stream, StreamError};
pub use url::WsUrl;
