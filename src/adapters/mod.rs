//! Adapters: concrete implementations of the hexagonal port traits.
//!
//! | Adapter      | Implements              | Connects to               |
//! |--------------|-------------------------|---------------------------|
//! | `crypto`     | hash / cipher contract  | sha1, hmac-sha256, aes    |
//! | `device_id`  | -                       | eFuse MAC                 |
//! | `log_sink`   | EventSink               | Serial log output         |
//! | `nvs`        | ConfigPort, StoragePort | NVS / in-memory store     |
//! | `partition`  | PartitionPort           | esp-ota / in-memory slot  |
//! | `task_pin`   | -                       | pthread core affinity     |
//! | `tcp`        | Connector, Listener     | lwIP / std sockets        |
//! | `time`       | -                       | ESP32 system timer        |
//! | `updater`    | UpdateLauncher          | ota-io task               |

pub mod crypto;
pub mod device_id;
pub mod log_sink;
pub mod nvs;
pub mod partition;
pub mod task_pin;
pub mod tcp;
pub mod time;
pub mod updater;
