//! WiFi station + MQTT cloud link adapter.
//!
//! Implements [`NetworkPort`] (bring-up driven by GATT provisioning and
//! boot) and, through the shared [`CloudLink`] handle, [`CloudPort`] (the
//! gateway's publish path).
//!
//! ## cfg gating
//!
//! - **`target_os = "espidf"`**: `esp_idf_svc::wifi::BlockingWifi` and
//!   `esp_idf_svc::mqtt::client::EspMqttClient`.
//! - **all other targets**: simulation backends for host-side tests.
//!
//! ## Topics
//!
//! | Topic                        | Direction |
//! |------------------------------|-----------|
//! | `yiree/<bt-mac-hex>/cloud`   | publish   |
//! | `yiree/<bt-mac-hex>/local`   | subscribe |
//! | `yiree/sntp/local`           | subscribe |
//!
//! Inbound payloads and link transitions are queued as [`CloudInbound`];
//! the main task drains them and calls into the gateway, so the MQTT task
//! never blocks on a mesh operation.

use core::fmt::Write as _;
use core::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::channel::Channel;
use log::{info, warn};

use crate::app::ports::{CloudError, CloudPort, NetworkPort};
use crate::config::{MqttConfig, WifiConfig};
use crate::mesh::MacAddr;

const TOPIC_ROOT: &str = "yiree";
const SNTP_TOPIC: &str = "yiree/sntp/local";
const INBOUND_DEPTH: usize = 4;

#[cfg(target_os = "espidf")]
const MQTT_CONNECT_TIMEOUT_MS: u32 = 8000;

pub type Topic = heapless::String<48>;

/// Something the cloud side wants the gateway to know.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloudInbound {
    Connected,
    Disconnected,
    Message(String),
}

// ───────────────────────────────────────────────────────────────
// Cloud link (shared publish handle)
// ───────────────────────────────────────────────────────────────

struct LinkInner {
    connected: AtomicBool,
    qos: AtomicU8,
    client_id: heapless::String<12>,
    inbound: Channel<CriticalSectionRawMutex, CloudInbound, INBOUND_DEPTH>,
    #[cfg(target_os = "espidf")]
    client: Mutex<Option<esp_idf_svc::mqtt::client::EspMqttClient<'static>>>,
    #[cfg(not(target_os = "espidf"))]
    outbox: Mutex<Vec<(Topic, String)>>,
}

/// Cloneable handle to the MQTT session.
#[derive(Clone)]
pub struct CloudLink {
    inner: Arc<LinkInner>,
}

impl CloudLink {
    /// `bt_mac` names this gateway on the broker.
    pub fn new(bt_mac: &MacAddr) -> Self {
        let mut client_id = heapless::String::new();
        for b in bt_mac {
            let _ = write!(client_id, "{:02x}", b);
        }
        Self {
            inner: Arc::new(LinkInner {
                connected: AtomicBool::new(false),
                qos: AtomicU8::new(0),
                client_id,
                inbound: Channel::new(),
                #[cfg(target_os = "espidf")]
                client: Mutex::new(None),
                #[cfg(not(target_os = "espidf"))]
                outbox: Mutex::new(Vec::new()),
            }),
        }
    }

    fn topic(&self, leaf: &str) -> Topic {
        let mut t = Topic::new();
        let _ = write!(t, "{}/{}/{}", TOPIC_ROOT, self.inner.client_id, leaf);
        t
    }

    pub fn publish_topic(&self) -> Topic {
        self.topic("cloud")
    }

    pub fn subscribe_topic(&self) -> Topic {
        self.topic("local")
    }

    /// The gateway's own command topic plus the shared time broadcast.
    pub fn subscriptions(&self) -> [Topic; 2] {
        let mut sntp = Topic::new();
        let _ = sntp.push_str(SNTP_TOPIC);
        [self.subscribe_topic(), sntp]
    }

    /// Queue a received payload if it came in on one of our subscriptions.
    fn receive(&self, topic: &str, data: &[u8]) -> bool {
        if !self.subscriptions().iter().any(|t| t.as_str() == topic) {
            return false;
        }
        match core::str::from_utf8(data) {
            Ok(text) => {
                self.push_inbound(CloudInbound::Message(text.into()));
                true
            }
            Err(_) => {
                warn!("MQTT: non-UTF-8 payload on {} dropped", topic);
                false
            }
        }
    }

    /// Wait for the next inbound item.
    pub async fn next_inbound(&self) -> CloudInbound {
        self.inner.inbound.receive().await
    }

    pub fn try_next_inbound(&self) -> Option<CloudInbound> {
        self.inner.inbound.try_receive().ok()
    }

    fn push_inbound(&self, item: CloudInbound) {
        if self.inner.inbound.try_send(item).is_err() {
            warn!("MQTT: inbound queue full, dropping");
        }
    }

    fn set_connected(&self, up: bool) {
        let was = self.inner.connected.swap(up, Ordering::AcqRel);
        if was != up {
            self.push_inbound(if up { CloudInbound::Connected } else { CloudInbound::Disconnected });
        }
    }

    /// Simulation: deliver `payload` as if it arrived on the local topic.
    #[cfg(not(target_os = "espidf"))]
    pub fn inject(&self, payload: &str) {
        self.push_inbound(CloudInbound::Message(payload.into()));
    }

    /// Simulation: deliver `payload` on `topic`, filtered like the broker
    /// callback.  Returns whether it was queued.
    #[cfg(not(target_os = "espidf"))]
    pub fn inject_on(&self, topic: &str, payload: &[u8]) -> bool {
        self.receive(topic, payload)
    }

    /// Simulation: everything published so far.
    #[cfg(not(target_os = "espidf"))]
    pub fn take_published(&self) -> Vec<(Topic, String)> {
        core::mem::take(&mut *self.inner.outbox.lock().unwrap_or_else(PoisonError::into_inner))
    }

    /// Simulation: drop the broker connection.
    #[cfg(not(target_os = "espidf"))]
    pub fn sim_disconnect(&self) {
        self.set_connected(false);
    }

    #[cfg(target_os = "espidf")]
    fn platform_connect(&self, cfg: &MqttConfig) -> bool {
        use esp_idf_svc::mqtt::client::{EspMqttClient, EventPayload, MqttClientConfiguration};

        let mut url = heapless::String::<64>::new();
        let _ = write!(url, "mqtt://{}:{}", cfg.host, cfg.port);
        let conf = MqttClientConfiguration {
            client_id: Some(self.inner.client_id.as_str()),
            username: (!cfg.username.is_empty()).then_some(cfg.username.as_str()),
            password: (!cfg.password.is_empty()).then_some(cfg.password.as_str()),
            disable_clean_session: true,
            ..Default::default()
        };

        let link = self.clone();
        let client = EspMqttClient::new_cb(&url, &conf, move |event| match event.payload() {
            EventPayload::Connected(_) => link.set_connected(true),
            EventPayload::Disconnected => link.set_connected(false),
            EventPayload::Received { topic: Some(topic), data, .. } => {
                link.receive(topic, data);
            }
            _ => {}
        });

        let mut client = match client {
            Ok(c) => c,
            Err(e) => {
                warn!("MQTT: client init failed: {}", e);
                return false;
            }
        };

        let mut waited = 0;
        while !self.inner.connected.load(Ordering::Acquire) && waited < MQTT_CONNECT_TIMEOUT_MS {
            esp_idf_hal::delay::FreeRtos::delay_ms(100);
            waited += 100;
        }
        if !self.inner.connected.load(Ordering::Acquire) {
            warn!("MQTT: no CONNACK from {}:{}", cfg.host, cfg.port);
            return false;
        }

        let qos = qos_level(cfg.qos);
        for topic in &self.subscriptions() {
            if let Err(e) = client.subscribe(topic.as_str(), qos) {
                warn!("MQTT: subscribe {} failed: {}", topic, e);
            }
        }
        *self.inner.client.lock().unwrap_or_else(PoisonError::into_inner) = Some(client);
        true
    }

    #[cfg(not(target_os = "espidf"))]
    fn platform_connect(&self, cfg: &MqttConfig) -> bool {
        if !cfg.is_configured() {
            return false;
        }
        info!("MQTT(sim): connected to {}:{} as {}", cfg.host, cfg.port, self.inner.client_id);
        self.set_connected(true);
        true
    }
}

#[cfg(target_os = "espidf")]
fn qos_level(qos: u8) -> esp_idf_svc::mqtt::client::QoS {
    use esp_idf_svc::mqtt::client::QoS;
    match qos {
        0 => QoS::AtMostOnce,
        1 => QoS::AtLeastOnce,
        _ => QoS::ExactlyOnce,
    }
}

impl CloudPort for CloudLink {
    fn is_connected(&self) -> bool {
        self.inner.connected.load(Ordering::Acquire)
    }

    #[cfg(target_os = "espidf")]
    fn publish(&self, payload: &str) -> Result<(), CloudError> {
        if !self.is_connected() {
            return Err(CloudError::Disconnected);
        }
        let topic = self.publish_topic();
        let qos = qos_level(self.inner.qos.load(Ordering::Relaxed));
        let mut guard = self.inner.client.lock().unwrap_or_else(PoisonError::into_inner);
        let client = guard.as_mut().ok_or(CloudError::Disconnected)?;
        client
            .enqueue(&topic, qos, false, payload.as_bytes())
            .map(|_| ())
            .map_err(|_| CloudError::Transport)
    }

    #[cfg(not(target_os = "espidf"))]
    fn publish(&self, payload: &str) -> Result<(), CloudError> {
        if !self.is_connected() {
            return Err(CloudError::Disconnected);
        }
        info!("MQTT(sim): -> {}", payload);
        self.inner
            .outbox
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((self.publish_topic(), payload.into()));
        Ok(())
    }
}

// ───────────────────────────────────────────────────────────────
// WiFi station adapter
// ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WifiState {
    Disconnected,
    Connected,
    Failed,
}

pub struct WifiAdapter {
    state: WifiState,
    cloud: CloudLink,
    #[cfg(target_os = "espidf")]
    wifi: esp_idf_svc::wifi::BlockingWifi<esp_idf_svc::wifi::EspWifi<'static>>,
}

impl WifiAdapter {
    #[cfg(target_os = "espidf")]
    pub fn new(
        wifi: esp_idf_svc::wifi::BlockingWifi<esp_idf_svc::wifi::EspWifi<'static>>,
        cloud: CloudLink,
    ) -> Self {
        Self { state: WifiState::Disconnected, cloud, wifi }
    }

    #[cfg(not(target_os = "espidf"))]
    pub fn new(cloud: CloudLink) -> Self {
        Self { state: WifiState::Disconnected, cloud }
    }

    pub fn state(&self) -> WifiState {
        self.state
    }

    // ── Platform-specific ─────────────────────────────────────

    #[cfg(target_os = "espidf")]
    fn platform_connect(&mut self, cfg: &WifiConfig) -> Result<(), esp_idf_svc::sys::EspError> {
        use esp_idf_svc::wifi::{AuthMethod, ClientConfiguration, Configuration};

        let client = ClientConfiguration {
            ssid: cfg.ssid.as_str().try_into().unwrap_or_default(),
            password: cfg.password.as_str().try_into().unwrap_or_default(),
            auth_method: if cfg.password.is_empty() {
                AuthMethod::None
            } else {
                AuthMethod::WPA2Personal
            },
            ..Default::default()
        };
        if self.wifi.is_connected().unwrap_or(false) {
            let _ = self.wifi.disconnect();
        }
        self.wifi.set_configuration(&Configuration::Client(client))?;
        if !self.wifi.is_started()? {
            self.wifi.start()?;
        }
        self.wifi.connect()?;
        self.wifi.wait_netif_up()
    }

    #[cfg(not(target_os = "espidf"))]
    fn platform_connect(&mut self, cfg: &WifiConfig) -> Result<(), &'static str> {
        if cfg.ssid.is_empty() {
            return Err("empty ssid");
        }
        info!("WiFi(sim): associated with '{}'", cfg.ssid);
        Ok(())
    }
}

impl NetworkPort for WifiAdapter {
    fn connect_wifi(&mut self, cfg: &WifiConfig) -> bool {
        info!("WiFi: connecting to '{}'", cfg.ssid);
        match self.platform_connect(cfg) {
            Ok(()) => {
                self.state = WifiState::Connected;
                info!("WiFi: connected");
                true
            }
            Err(e) => {
                warn!("WiFi: connection to '{}' failed: {:?}", cfg.ssid, e);
                self.state = WifiState::Failed;
                false
            }
        }
    }

    fn connect_mqtt(&mut self, cfg: &MqttConfig) -> bool {
        if self.state != WifiState::Connected {
            warn!("MQTT: no WiFi, not connecting to {}", cfg.host);
            return false;
        }
        self.cloud.inner.qos.store(cfg.qos, Ordering::Relaxed);
        self.cloud.platform_connect(cfg)
    }
}

// ───────────────────────────────────────────────────────────────
// Tests
// ───────────────────────────────────────────────────────────────
