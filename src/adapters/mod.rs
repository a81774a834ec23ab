//! Adapters: concrete implementations of the hexagonal port traits.
//!
//! | Adapter        | Implements         | Connects to                 |
//! |----------------|--------------------|-----------------------------|
//! | `ble`          | (GATT events)      | Bluedroid GATT server       |
//! | `device_id`    | -                  | eFuse MACs, key derivation  |
//! | `log_sink`     | EventSink          | Serial log output           |
//! | `mesh_stack`   | MeshStack          | ESP-IDF BLE-Mesh provisioner|
//! | `nvs`          | ConfigPort         | NVS / in-memory store       |
//! |                | StoragePort        |                             |
//! | `system`       | SystemPort         | Clock, OTA hand-off, reset  |
//! | `time`         | DelayNs            | ESP32 system timer          |
//! | `wifi`         | NetworkPort        | ESP-IDF WiFi STA            |
//! |                | CloudPort          | ESP-IDF MQTT client         |

pub mod ble;
pub mod device_id;
pub mod log_sink;
pub mod mesh_stack;
pub mod nvs;
pub mod system;
pub mod time;
pub(crate) mod utils;
pub mod wifi;
