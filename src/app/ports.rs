//! Port traits: the hexagonal boundary between the gateway core and the
//! outside world.
//!
//! ```text
//!   Adapter ──▶ Port trait ──▶ Gateway (domain)
//! ```
//!
//! The mesh stack, the cloud link, the key/blob store and the system
//! services all sit behind these traits.  The
//! [`Gateway`](super::service::Gateway) consumes them via generics, so the
//! provisioning core never touches the radio or flash directly.
//!
//! Ports used from more than one context (mesh callbacks, the cloud
//! receive path, the event loop) take `&self` and are `Send + Sync`.

use crate::config::{MqttConfig, WifiConfig};
use crate::mesh::message::{
    ClientMessage, ConfigRequest, HeartbeatFilter, LocalModel, MessageContext,
    UnprovisionedDevice,
};

// ───────────────────────────────────────────────────────────────
// Mesh stack port (driven adapter: domain → BLE-Mesh stack)
// ───────────────────────────────────────────────────────────────

/// Calls the gateway issues to the BLE-Mesh provisioner stack.
///
/// Every call returns as soon as the stack accepted (or rejected) the
/// request; results arrive later as [`MeshEvent`](crate::mesh::event::MeshEvent)s.
pub trait MeshStack: Send + Sync {
    /// Only report unprovisioned devices whose UUID starts with `prefix`.
    fn set_uuid_match(&self, prefix: &[u8]) -> Result<(), MeshError>;

    fn add_local_net_key(&self, net_key: &[u8; 16], net_idx: u16) -> Result<(), MeshError>;
    fn update_local_net_key(&self, net_key: &[u8; 16], net_idx: u16) -> Result<(), MeshError>;
    fn add_local_app_key(
        &self,
        app_key: &[u8; 16],
        net_idx: u16,
        app_idx: u16,
    ) -> Result<(), MeshError>;
    fn update_local_app_key(
        &self,
        app_key: &[u8; 16],
        net_idx: u16,
        app_idx: u16,
    ) -> Result<(), MeshError>;

    /// Bind `app_idx` to a model on the gateway's own primary element.
    fn bind_local_model(&self, app_idx: u16, model: LocalModel) -> Result<(), MeshError>;

    fn enable_heartbeat_recv(&self) -> Result<(), MeshError>;
    fn set_heartbeat_filter(&self, filter: HeartbeatFilter) -> Result<(), MeshError>;

    /// Start provisioning `device` immediately.
    fn add_unprov_device(&self, device: &UnprovisionedDevice) -> Result<(), MeshError>;

    /// Send a config-client request to the node at `dst`.
    fn config_send(&self, ctx: &MessageContext, request: &ConfigRequest) -> Result<(), MeshError>;

    /// Hand decoded composition data to the stack's node table.
    fn store_composition(&self, addr: u16, data: &[u8]) -> Result<(), MeshError>;

    /// Send a generic / light / vendor client message.
    fn client_send(&self, ctx: &MessageContext, msg: &ClientMessage) -> Result<(), MeshError>;

    /// Remove a node from the stack's node table.
    fn delete_node(&self, addr: u16) -> Result<(), MeshError>;

    /// Primary unicast address of every node in the stack's live table.
    fn provisioned_nodes(&self) -> Vec<u16>;

    /// Wipe the stack's own persisted state (net keys, node table, seq).
    fn erase_settings(&self) -> Result<(), MeshError>;
}

// ───────────────────────────────────────────────────────────────
// Cloud port (driven adapter: domain → MQTT / TCP uplink)
// ───────────────────────────────────────────────────────────────

pub trait CloudPort: Send + Sync {
    fn is_connected(&self) -> bool;

    /// Publish one JSON message upstream.
    fn publish(&self, payload: &str) -> Result<(), CloudError>;
}

// ───────────────────────────────────────────────────────────────
// Network port (driven adapter: domain → WiFi / MQTT bring-up)
// ───────────────────────────────────────────────────────────────

/// Used by the GATT credential channel to try freshly written credentials.
pub trait NetworkPort {
    /// Reconnect the station with `cfg`; `true` once an IP is obtained.
    fn connect_wifi(&mut self, cfg: &WifiConfig) -> bool;

    /// Reconnect the broker client with `cfg`; `true` once connected.
    fn connect_mqtt(&mut self, cfg: &MqttConfig) -> bool;
}

// ───────────────────────────────────────────────────────────────
// System port (driven adapter: domain → clock, OTA, reset)
// ───────────────────────────────────────────────────────────────

pub trait SystemPort: Send + Sync {
    /// Set the wall clock to `unix_secs`.
    fn set_time(&self, unix_secs: u64);

    /// Kick off a firmware download from `url`; `mid` is echoed back in
    /// progress reports.
    fn start_ota(&self, url: &str, mid: &str);

    /// Schedule a full device restart.
    fn request_restart(&self);
}

// ───────────────────────────────────────────────────────────────
// Event sink port (driven adapter: domain → logging / telemetry)
// ───────────────────────────────────────────────────────────────

/// The domain emits structured [`GatewayEvent`](super::events::GatewayEvent)s
/// through this port.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: &super::events::GatewayEvent);
}

// ───────────────────────────────────────────────────────────────
// Configuration port (driven adapter: domain ↔ persistent config)
// ───────────────────────────────────────────────────────────────

/// Loads and persists the network credentials.
///
/// Implementations validate before persisting and return defaults when
/// nothing is stored.
pub trait ConfigPort {
    fn load_wifi(&self) -> Result<WifiConfig, ConfigError>;
    fn save_wifi(&self, cfg: &WifiConfig) -> Result<(), ConfigError>;
    fn load_mqtt(&self) -> Result<MqttConfig, ConfigError>;
    fn save_mqtt(&self, cfg: &MqttConfig) -> Result<(), ConfigError>;

    /// Forget both credential sets (factory network reset).
    fn reset_network(&self) -> Result<(), ConfigError>;
}

// ───────────────────────────────────────────────────────────────
// Storage port (driven adapter: domain ↔ NVS / flash)
// ───────────────────────────────────────────────────────────────

/// Persistent key-blob storage.  Blobs are read whole and written whole.
///
/// Write operations MUST be atomic: no partial writes on power loss.
/// The ESP-IDF NVS API guarantees this natively.
pub trait StoragePort {
    /// Read a value.  Returns the number of bytes written to `buf`.
    fn read(&self, namespace: &str, key: &str, buf: &mut [u8]) -> Result<usize, StorageError>;

    /// Write a value atomically.
    fn write(&mut self, namespace: &str, key: &str, data: &[u8]) -> Result<(), StorageError>;

    /// Delete a key.  Returns `Ok(())` even if the key didn't exist.
    fn delete(&mut self, namespace: &str, key: &str) -> Result<(), StorageError>;

    /// Check whether a key exists without reading it.
    fn exists(&self, namespace: &str, key: &str) -> bool;
}

// ───────────────────────────────────────────────────────────────
// Error types
// ───────────────────────────────────────────────────────────────

/// Errors from [`MeshStack`] calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MeshError {
    /// The stack returned a non-zero `esp_err_t`.
    Rejected(i32),
    /// The addressed node is not in the stack's table.
    UnknownNode(u16),
    /// The stack has not been initialised.
    NotReady,
}

/// Errors from [`CloudPort`] calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloudError {
    Disconnected,
    Transport,
}

/// Errors from [`ConfigPort`] operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigError {
    /// Stored config failed integrity / deserialization check.
    Corrupted,
    /// A config field failed range validation.
    /// The `&'static str` describes which field and why.
    ValidationFailed(&'static str),
    /// Underlying storage is full.
    StorageFull,
    /// Generic I/O error from the storage backend.
    IoError,
}

/// Errors from [`StoragePort`] operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageError {
    /// Requested key does not exist.
    NotFound,
    /// Storage partition is full.
    Full,
    /// Generic I/O error.
    IoError,
    /// The blob does not fit the caller's buffer.
    TooLarge,
}

impl core::fmt::Display for MeshError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::Rejected(code) => write!(f, "stack rejected call (err {})", code),
            Self::UnknownNode(addr) => write!(f, "node 0x{:04x} not in table", addr),
            Self::NotReady => write!(f, "mesh stack not initialised"),
        }
    }
}

impl core::fmt::Display for CloudError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::Disconnected => write!(f, "cloud link down"),
            Self::Transport => write!(f, "publish failed"),
        }
    }
}

impl core::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::Corrupted => write!(f, "config corrupted"),
            Self::ValidationFailed(msg) => write!(f, "validation failed: {}", msg),
            Self::StorageFull => write!(f, "storage full"),
            Self::IoError => write!(f, "I/O error"),
        }
    }
}

impl core::fmt::Display for StorageError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::NotFound => write!(f, "key not found"),
            Self::Full => write!(f, "storage full"),
            Self::IoError => write!(f, "I/O error"),
            Self::TooLarge => write!(f, "blob larger than buffer"),
        }
    }
}
