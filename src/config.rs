//! Gateway configuration parameters
//!
//! Every timeout, capacity, address and heartbeat publication parameter the
//! provisioning core and command router rely on.  Network credentials for
//! the cloud link live in [`WifiConfig`] / [`MqttConfig`], which are
//! persisted separately through the
//! [`ConfigPort`](crate::app::ports::ConfigPort).

use heapless::String;
use serde::{Deserialize, Serialize};

use crate::app::ports::ConfigError;

/// Firmware version reported by the `ver` cloud command.
pub const FIRMWARE_VERSION: &str = "1.0.3";

/// Core gateway configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    // --- Provisioning ---
    /// Wait for provisioning link-open after arming the filter (ms)
    pub link_open_timeout_ms: u32,
    /// Wait for provisioning-complete or link-close (ms)
    pub prov_complete_timeout_ms: u32,
    /// First unicast address handed out to nodes
    pub prov_start_addr: u16,
    /// The gateway's own unicast address
    pub prov_own_addr: u16,

    // --- Command dispatch ---
    /// Acknowledged client message timeout (ms)
    pub msg_timeout_ms: u32,
    /// Default TTL for outbound client messages
    pub msg_ttl: u8,

    // --- Unbind ---
    /// Delay after node-reset before delete (single unbind, ms)
    pub unbind_reset_delay_ms: u32,
    /// Wait for delete confirmation (single unbind, ms)
    pub unbind_delete_timeout_ms: u32,
    /// Delay after node-reset before delete (unbind-all, ms)
    pub unbind_all_reset_delay_ms: u32,
    /// Wait for delete confirmation per node (unbind-all, ms)
    pub unbind_all_delete_timeout_ms: u32,

    // --- Heartbeat ---
    /// Heartbeat aging tick (seconds)
    pub heartbeat_tick_secs: u32,
    /// Group address nodes publish heartbeats to
    pub heartbeat_group_addr: u16,
    /// Publication period exponent: 2^(n-1) seconds
    pub heartbeat_pub_period: u8,
    pub heartbeat_pub_ttl: u8,
    /// 0xFF = publish indefinitely
    pub heartbeat_pub_count: u8,
    pub heartbeat_pub_features: u16,

    // --- Tables ---
    /// Mesh binding table slots
    pub mesh_table_size: usize,
    /// GATT-client binding table slots
    pub gattc_table_size: usize,
    /// Upper bound on tracked heartbeat entries
    pub max_nodes: usize,

    // --- Event loop ---
    /// Minimum quiet time after a binding mutation before it is flushed (ms)
    pub flush_debounce_ms: u32,
    /// Transfer queue receive timeout (ms)
    pub drain_wait_ms: u32,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            // Provisioning
            link_open_timeout_ms: 8000,
            prov_complete_timeout_ms: 8000,
            prov_start_addr: 0x0005,
            prov_own_addr: 0x0001,

            // Command dispatch
            msg_timeout_ms: 1500,
            msg_ttl: 2,

            // Unbind
            unbind_reset_delay_ms: 400,
            unbind_delete_timeout_ms: 2000,
            unbind_all_reset_delay_ms: 500,
            unbind_all_delete_timeout_ms: 3000,

            // Heartbeat
            heartbeat_tick_secs: 20,
            heartbeat_group_addr: 0xC000,
            heartbeat_pub_period: 0x05, // 16 s
            heartbeat_pub_ttl: 2,
            heartbeat_pub_count: 0xFF,
            heartbeat_pub_features: 0x03, // relay | proxy

            // Tables
            mesh_table_size: 20,
            gattc_table_size: 2,
            max_nodes: 20,

            // Event loop
            flush_debounce_ms: 1000,
            drain_wait_ms: 1000,
        }
    }
}

impl GatewayConfig {
    /// Range-check every field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(1000..=60_000).contains(&self.link_open_timeout_ms) {
            return Err(ConfigError::ValidationFailed(
                "link_open_timeout_ms must be 1000–60000",
            ));
        }
        if !(1000..=60_000).contains(&self.prov_complete_timeout_ms) {
            return Err(ConfigError::ValidationFailed(
                "prov_complete_timeout_ms must be 1000–60000",
            ));
        }
        if self.prov_start_addr <= self.prov_own_addr || self.prov_start_addr >= 0x8000 {
            return Err(ConfigError::ValidationFailed(
                "prov_start_addr must be a unicast address above prov_own_addr",
            ));
        }
        if self.prov_own_addr == 0 {
            return Err(ConfigError::ValidationFailed("prov_own_addr must be non-zero"));
        }
        if !(100..=30_000).contains(&self.msg_timeout_ms) {
            return Err(ConfigError::ValidationFailed(
                "msg_timeout_ms must be 100–30000",
            ));
        }
        if self.msg_ttl == 0 || self.msg_ttl > 127 {
            return Err(ConfigError::ValidationFailed("msg_ttl must be 1–127"));
        }
        if !(0xC000..=0xFEFF).contains(&self.heartbeat_group_addr) {
            return Err(ConfigError::ValidationFailed(
                "heartbeat_group_addr must be a group address",
            ));
        }
        if self.heartbeat_pub_period == 0 || self.heartbeat_pub_period > 0x11 {
            return Err(ConfigError::ValidationFailed(
                "heartbeat_pub_period must be 0x01–0x11",
            ));
        }
        if self.heartbeat_tick_secs == 0 {
            return Err(ConfigError::ValidationFailed("heartbeat_tick_secs must be > 0"));
        }
        if self.mesh_table_size == 0 || self.gattc_table_size == 0 || self.max_nodes == 0 {
            return Err(ConfigError::ValidationFailed("table sizes must be > 0"));
        }
        if self.drain_wait_ms == 0 {
            return Err(ConfigError::ValidationFailed("drain_wait_ms must be > 0"));
        }
        Ok(())
    }
}

// ───────────────────────────────────────────────────────────────
// Network credentials
// ───────────────────────────────────────────────────────────────

/// Station credentials for the uplink access point.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WifiConfig {
    pub ssid: String<32>,
    pub password: String<64>,
}

/// Broker parameters for the cloud link.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MqttConfig {
    pub host: String<32>,
    pub port: u16,
    pub username: String<32>,
    pub password: String<16>,
    pub qos: u8,
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            host: String::new(),
            port: 1883,
            username: String::new(),
            password: String::new(),
            qos: 0,
        }
    }
}

impl WifiConfig {
    /// Whether credentials have been provisioned at all.
    pub fn is_configured(&self) -> bool {
        !self.ssid.is_empty()
    }
}

impl MqttConfig {
    pub fn is_configured(&self) -> bool {
        !self.host.is_empty() && self.port != 0
    }
}
