//! Application core: orchestration logic, zero direct I/O.
//!
//! This module holds the control plane that ties transport, dispatch,
//! timers and firmware updates together. All interaction with flash,
//! storage and the update task happens through **port traits** defined
//! in [`ports`], keeping this layer fully testable without real hardware.

pub mod events;
pub mod ports;
pub mod service;
