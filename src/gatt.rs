//! BLE GATT credential channel.
//!
//! A phone writes one JSON object to the gateway's provisioning
//! characteristic:
//!
//! | Write                                     | Reply               |
//! |-------------------------------------------|---------------------|
//! | `{"wifi":"<ssid>|<password>"}`            | `{"wifi":"ok"}`     |
//! | `{"mqtt":"<host>|<port>|<user>|<pass>|<qos>"}` | `{"mqtt":"ok"}` |
//!
//! Values that fail validation, and connection attempts that fail, are
//! answered with `"fail"` under the same key.  Writes that are not JSON
//! objects, or carry neither key, get no reply at all.
//!
//! The module is transport-free: the BLE adapter hands in raw write bytes
//! and notifies whatever string comes back.

use core::fmt;

use heapless::String;
use log::{info, warn};
use serde_json::{json, Value};

use crate::adapters::utils::{is_printable_ascii, parse_field};
use crate::app::ports::{ConfigPort, NetworkPort};
use crate::config::{MqttConfig, WifiConfig};

// ───────────────────────────────────────────────────────────────
// Constants
// ───────────────────────────────────────────────────────────────

/// Largest accepted characteristic write.
pub const MAX_WRITE_LEN: usize = 256;

const MAX_SSID_LEN: usize = 32;
const MAX_PASSWORD_LEN: usize = 64;
const MIN_WPA2_PASSWORD_LEN: usize = 8;
const MAX_QOS: u8 = 2;

/// `ESP_GATT_CONN_CONN_CANCEL`: the controller dropped a connection it was
/// still establishing.
pub const CONN_CANCEL_REASON: u16 = 0x0100;

/// Consecutive `CONN_CANCEL` disconnects treated as a radio-stack fault.
pub const CONN_CANCEL_LIMIT: u8 = 3;

// ───────────────────────────────────────────────────────────────
// Error types
// ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProvisioningError {
    DataTooLong,
    InvalidUtf8,
    NotAnObject,
    UnknownKey,
    InvalidSsid,
    InvalidPassword,
    /// An MQTT field is missing, too long or out of range.
    InvalidMqtt(&'static str),
}

impl fmt::Display for ProvisioningError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DataTooLong => write!(f, "GATT write exceeds {MAX_WRITE_LEN} bytes"),
            Self::InvalidUtf8 => write!(f, "GATT write contains invalid UTF-8"),
            Self::NotAnObject => write!(f, "GATT write is not a JSON object"),
            Self::UnknownKey => write!(f, "GATT write has neither 'wifi' nor 'mqtt'"),
            Self::InvalidSsid => write!(f, "SSID invalid (1-32 printable ASCII bytes)"),
            Self::InvalidPassword => write!(f, "password invalid (8-64 bytes for WPA2 or empty)"),
            Self::InvalidMqtt(field) => write!(f, "mqtt field invalid: {field}"),
        }
    }
}

// ───────────────────────────────────────────────────────────────
// Request decoding
// ───────────────────────────────────────────────────────────────

/// A decoded credential write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GattRequest {
    Wifi(WifiConfig),
    Mqtt(MqttConfig),
}

impl GattRequest {
    /// JSON key the reply is sent under.
    pub fn key(&self) -> &'static str {
        match self {
            Self::Wifi(_) => "wifi",
            Self::Mqtt(_) => "mqtt",
        }
    }
}

/// Outcome of [`parse_write`]: either a request, or the key whose value was
/// unusable (answered with `"fail"`).
pub type ParsedWrite = Result<GattRequest, (&'static str, ProvisioningError)>;

fn sanitize_ble_string(raw: &[u8]) -> Result<&str, ProvisioningError> {
    if raw.len() > MAX_WRITE_LEN {
        return Err(ProvisioningError::DataTooLong);
    }
    core::str::from_utf8(raw).map_err(|_| ProvisioningError::InvalidUtf8)
}

fn validate_ssid(ssid: &str) -> Result<(), ProvisioningError> {
    if ssid.is_empty() || ssid.len() > MAX_SSID_LEN || !is_printable_ascii(ssid) {
        return Err(ProvisioningError::InvalidSsid);
    }
    Ok(())
}

fn validate_password(password: &str) -> Result<(), ProvisioningError> {
    if password.is_empty() {
        return Ok(());
    }
    if password.len() < MIN_WPA2_PASSWORD_LEN || password.len() > MAX_PASSWORD_LEN {
        return Err(ProvisioningError::InvalidPassword);
    }
    Ok(())
}

fn fixed<const N: usize>(s: &str, field: &'static str) -> Result<String<N>, ProvisioningError> {
    String::try_from(s).map_err(|_| ProvisioningError::InvalidMqtt(field))
}

/// `"ssid|password"`.  A missing `|` means an open network.
pub fn parse_wifi(value: &str) -> Result<WifiConfig, ProvisioningError> {
    let (ssid, password) = value.split_once('|').unwrap_or((value, ""));
    validate_ssid(ssid)?;
    validate_password(password)?;
    Ok(WifiConfig {
        ssid: String::try_from(ssid).map_err(|_| ProvisioningError::InvalidSsid)?,
        password: String::try_from(password).map_err(|_| ProvisioningError::InvalidPassword)?,
    })
}

/// `"host|port|user|pass|qos"`.
pub fn parse_mqtt(value: &str) -> Result<MqttConfig, ProvisioningError> {
    let mut fields = value.split('|');
    let mut next =
        |name: &'static str| fields.next().ok_or(ProvisioningError::InvalidMqtt(name));

    let host = next("host")?;
    let port = next("port")?;
    let username = next("user")?;
    let password = next("pass")?;
    let qos = next("qos")?;

    if host.is_empty() || !is_printable_ascii(host) {
        return Err(ProvisioningError::InvalidMqtt("host"));
    }
    let port: u16 =
        parse_field(port, |p| *p != 0).ok_or(ProvisioningError::InvalidMqtt("port"))?;
    let qos: u8 =
        parse_field(qos, |q| *q <= MAX_QOS).ok_or(ProvisioningError::InvalidMqtt("qos"))?;

    Ok(MqttConfig {
        host: fixed(host, "host")?,
        port,
        username: fixed(username, "user")?,
        password: fixed(password, "pass")?,
        qos,
    })
}

/// Decode one characteristic write.
///
/// The outer `Err` means "no reply": the bytes are not a JSON object with a
/// known key.  The inner [`ParsedWrite`] error still gets a `"fail"` reply.
pub fn parse_write(raw: &[u8]) -> Result<ParsedWrite, ProvisioningError> {
    let text = sanitize_ble_string(raw)?;
    let Ok(Value::Object(obj)) = serde_json::from_str::<Value>(text) else {
        return Err(ProvisioningError::NotAnObject);
    };

    if let Some(v) = obj.get("wifi") {
        let parsed = v
            .as_str()
            .ok_or(ProvisioningError::InvalidSsid)
            .and_then(parse_wifi);
        return Ok(parsed.map(GattRequest::Wifi).map_err(|e| ("wifi", e)));
    }
    if let Some(v) = obj.get("mqtt") {
        let parsed = v
            .as_str()
            .ok_or(ProvisioningError::InvalidMqtt("value"))
            .and_then(parse_mqtt);
        return Ok(parsed.map(GattRequest::Mqtt).map_err(|e| ("mqtt", e)));
    }
    Err(ProvisioningError::UnknownKey)
}

fn reply(key: &str, ok: bool) -> std::string::String {
    let status = if ok { "ok" } else { "fail" };
    json!({ key: status }).to_string()
}

// ───────────────────────────────────────────────────────────────
// Provisioning channel
// ───────────────────────────────────────────────────────────────

/// Applies credential writes: connect, persist on success, reply.
#[derive(Debug, Default)]
pub struct GattProvisioning {
    /// Credentials of the last successful WiFi connect, stored again
    /// together with the MQTT config.
    wifi: Option<WifiConfig>,
}

impl GattProvisioning {
    pub fn new() -> Self {
        Self::default()
    }

    /// Handle one write and return the notification to send back.
    pub fn handle_write<N, C>(
        &mut self,
        raw: &[u8],
        net: &mut N,
        store: &C,
    ) -> Option<std::string::String>
    where
        N: NetworkPort,
        C: ConfigPort,
    {
        let request = match parse_write(raw) {
            Ok(Ok(request)) => request,
            Ok(Err((key, e))) => {
                warn!("GATT: {} rejected: {}", key, e);
                return Some(reply(key, false));
            }
            Err(e) => {
                warn!("GATT: write dropped ({} bytes): {}", raw.len(), e);
                return None;
            }
        };

        let key = request.key();
        let ok = match request {
            GattRequest::Wifi(wifi) => self.apply_wifi(wifi, net, store),
            GattRequest::Mqtt(mqtt) => self.apply_mqtt(mqtt, net, store),
        };
        Some(reply(key, ok))
    }

    fn apply_wifi<N: NetworkPort, C: ConfigPort>(
        &mut self,
        wifi: WifiConfig,
        net: &mut N,
        store: &C,
    ) -> bool {
        if !net.connect_wifi(&wifi) {
            warn!("GATT: wifi connect to '{}' failed", wifi.ssid);
            return false;
        }
        info!("GATT: wifi '{}' connected", wifi.ssid);
        if let Err(e) = store.save_wifi(&wifi) {
            warn!("GATT: saving wifi config failed: {}", e);
        }
        self.wifi = Some(wifi);
        true
    }

    fn apply_mqtt<N: NetworkPort, C: ConfigPort>(
        &mut self,
        mqtt: MqttConfig,
        net: &mut N,
        store: &C,
    ) -> bool {
        if !net.connect_mqtt(&mqtt) {
            warn!("GATT: mqtt connect to {}:{} failed", mqtt.host, mqtt.port);
            return false;
        }
        info!("GATT: mqtt {}:{} connected (qos {})", mqtt.host, mqtt.port, mqtt.qos);
        if let Err(e) = store.save_mqtt(&mqtt) {
            warn!("GATT: saving mqtt config failed: {}", e);
        }
        let wifi = self.wifi.clone().or_else(|| store.load_wifi().ok());
        if let Some(wifi) = wifi.filter(WifiConfig::is_configured) {
            if let Err(e) = store.save_wifi(&wifi) {
                warn!("GATT: saving wifi config failed: {}", e);
            }
        }
        true
    }
}

// ───────────────────────────────────────────────────────────────
// Disconnect escalation
// ───────────────────────────────────────────────────────────────

/// Counts consecutive `CONN_CANCEL` disconnects.
#[derive(Debug, Default)]
pub struct DisconnectMonitor {
    cancels: u8,
}

impl DisconnectMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one disconnect.  Returns `true` when the device must restart.
    pub fn on_disconnect(&mut self, reason: u16) -> bool {
        if reason != CONN_CANCEL_REASON {
            self.cancels = 0;
            return false;
        }
        self.cancels = self.cancels.saturating_add(1);
        warn!("GATT: conn-cancel disconnect ({}/{})", self.cancels, CONN_CANCEL_LIMIT);
        if self.cancels >= CONN_CANCEL_LIMIT {
            self.cancels = 0;
            return true;
        }
        false
    }
}

// ───────────────────────────────────────────────────────────────
// Tests
// ───────────────────────────────────────────────────────────────
