//! Transport-agnostic RPC subsystem.
//!
//! Tagged binary value sequences carried in WebSocket binary messages.
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────┐
//! │                      RPC Stack                             │
//! │                                                            │
//! │  ┌──────────┐   ┌──────────┐   ┌───────────────────────┐   │
//! │  │  value   │──▶│  codec   │──▶│  engine (Dispatcher)  │   │
//! │  │ (tagged) │   │ (encode) │   │  auth · provider      │   │
//! │  └──────────┘   └──────────┘   │  builtin providers    │   │
//! │                                └──────────┬────────────┘   │
//! │                                           │ StartUpdate    │
//! │                                           ▼                │
//! │  ┌──────────┐   ┌──────────┐   ┌───────────────────────┐   │
//! │  │  boot    │◀──│   ota    │◀──│  io_task (ota-io)     │   │
//! │  │ markers  │   │ session  │   │  channels (reports)   │   │
//! │  └──────────┘   └──────────┘   └───────────────────────┘   │
//! └────────────────────────────────────────────────────────────┘
//! ```

pub mod auth;
pub mod boot;
pub mod builtin;
pub mod channels;
pub mod codec;
pub mod command;
pub mod engine;
pub mod io_task;
pub mod ota;
pub mod provider;
pub mod value;
