//! BLE-Mesh gateway firmware: main entry point.
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────────┐
//! │                      Adapters (outer ring)                     │
//! │                                                                │
//! │  MeshStackAdapter  NvsAdapter     CloudLink     SystemAdapter  │
//! │  (MeshStack)       (Config+NVS)   (CloudPort)   (SystemPort)   │
//! │  WifiAdapter       BleAdapter     LogEventSink  Esp32Time      │
//! │  (NetworkPort)     (GATT creds)   (EventSink)   (DelayNs)      │
//! │                                                                │
//! │  ──────────────── Port Trait Boundary ───────────────────      │
//! │                                                                │
//! │  ┌────────────────────────────────────────────────────────┐    │
//! │  │                Gateway (pure logic)                    │    │
//! │  │  provisioning · bindings · router · heartbeat          │    │
//! │  └────────────────────────────────────────────────────────┘    │
//! │                                                                │
//! │  event loop (core 0): transfer drain · heartbeat ticker        │
//! │  main task: cloud inbound · GATT credential writes             │
//! └────────────────────────────────────────────────────────────────┘
//! ```
#![deny(unused_must_use)]

use std::sync::Arc;

use anyhow::{Result, anyhow};
use esp_idf_svc::eventloop::EspSystemEventLoop;
use esp_idf_svc::hal::peripherals::Peripherals;
use esp_idf_svc::wifi::{BlockingWifi, EspWifi};
use futures_lite::future;
use log::{info, warn};

use meshgate::adapters::ble::{self, BleAdapter, GattEvent};
use meshgate::adapters::device_id;
use meshgate::adapters::log_sink::LogEventSink;
use meshgate::adapters::mesh_stack::{self, MeshStackAdapter};
use meshgate::adapters::nvs::NvsAdapter;
use meshgate::adapters::system::SystemAdapter;
use meshgate::adapters::time::Esp32TimeAdapter;
use meshgate::adapters::wifi::{CloudInbound, CloudLink, WifiAdapter};
use meshgate::app::ports::{ConfigPort, NetworkPort};
use meshgate::app::service::Gateway;
use meshgate::config::{FIRMWARE_VERSION, GatewayConfig};
use meshgate::error::Error;
use meshgate::event_loop;

enum Input {
    Cloud(CloudInbound),
    Gatt(GattEvent),
}

fn main() -> Result<()> {
    // ── 1. ESP-IDF bootstrap ──────────────────────────────────
    esp_idf_svc::sys::link_patches();
    esp_idf_logger::init()?;

    info!("╔══════════════════════════════════════╗");
    info!("║  meshgate v{}                     ║", FIRMWARE_VERSION);
    info!("╚══════════════════════════════════════╝");

    // ── 2. Identity, config, storage ──────────────────────────
    let cfg = GatewayConfig::default();
    cfg.validate().map_err(Error::from)?;
    let keys = device_id::provisioner_keys();
    let nvs = NvsAdapter::new().map_err(Error::from)?;

    // ── 3. Bluetooth + mesh stack ─────────────────────────────
    ble::bluetooth_init()?;
    let mesh = MeshStackAdapter::init(&keys, cfg.prov_own_addr, cfg.prov_start_addr)
        .map_err(Error::from)?;

    // ── 4. Network ────────────────────────────────────────────
    let peripherals = Peripherals::take()?;
    let sysloop = EspSystemEventLoop::take()?;
    let esp_wifi = EspWifi::new(peripherals.modem, sysloop.clone(), None)?;
    let cloud = CloudLink::new(&device_id::read_bt_mac());
    let mut wifi = WifiAdapter::new(BlockingWifi::wrap(esp_wifi, sysloop)?, cloud.clone());

    // ── 5. Gateway core ───────────────────────────────────────
    let gateway = Arc::new(Gateway::new(
        cfg,
        keys.clone(),
        mesh,
        nvs,
        cloud.clone(),
        SystemAdapter::new(),
        Esp32TimeAdapter::new(),
        LogEventSink::new(),
    ));
    {
        let gw = Arc::clone(&gateway);
        if !mesh_stack::set_event_handler(move |event| gw.on_mesh_event(event)) {
            return Err(anyhow!("mesh event handler already installed"));
        }
    }
    gateway.start()?;
    event_loop::spawn(Arc::clone(&gateway))?;

    // ── 6. GATT credential channel ────────────────────────────
    let mut gatt = BleAdapter::new(keys.root_name());
    gatt.start();
    let system = SystemAdapter::new();

    // ── 7. Restore the uplink from stored credentials ─────────
    let (stored_wifi, stored_mqtt) = gateway.with_storage(|s| (s.load_wifi(), s.load_mqtt()));
    match (stored_wifi, stored_mqtt) {
        (Ok(w), Ok(m)) if w.is_configured() && m.is_configured() => {
            if wifi.connect_wifi(&w) && !wifi.connect_mqtt(&m) {
                warn!("boot: broker {}:{} unreachable", m.host, m.port);
            }
        }
        _ => info!("boot: no uplink configured, waiting for GATT provisioning"),
    }

    // ── 8. Main task ──────────────────────────────────────────
    loop {
        let input = future::block_on(future::or(
            async { Input::Cloud(cloud.next_inbound().await) },
            async { Input::Gatt(ble::next_event().await) },
        ));
        match input {
            Input::Cloud(CloudInbound::Connected) => gateway.on_cloud_connection(true),
            Input::Cloud(CloudInbound::Disconnected) => gateway.on_cloud_connection(false),
            Input::Cloud(CloudInbound::Message(text)) => gateway.handle_cloud_message(&text),
            Input::Gatt(event) => {
                gateway.with_storage(|store| {
                    gatt.handle_event(event, &mut wifi, &*store, &system);
                });
            }
        }
    }
}
