//! GATT credential channel driven through the BLE adapter's event queue.
//!
//! The event queue is process-wide, so these tests take a lock.

use std::sync::{Mutex, MutexGuard, PoisonError};

use heapless::String;

use meshgate::adapters::ble::{self, BleAdapter, BleState};
use meshgate::adapters::nvs::NvsAdapter;
use meshgate::adapters::system::SystemAdapter;
use meshgate::adapters::wifi::{CloudLink, WifiAdapter, WifiState};
use meshgate::app::ports::{CloudPort, ConfigPort};
use meshgate::gatt::CONN_CANCEL_REASON;

use crate::mock_mesh::GATEWAY_MAC;

static SERIAL: Mutex<()> = Mutex::new(());

struct Phone {
    _serial: MutexGuard<'static, ()>,
    ble: BleAdapter,
    wifi: WifiAdapter,
    cloud: CloudLink,
    store: NvsAdapter,
    system: SystemAdapter,
}

impl Phone {
    fn new() -> Self {
        let serial = SERIAL.lock().unwrap_or_else(PoisonError::into_inner);
        while ble::try_next_event().is_some() {}

        let cloud = CloudLink::new(&GATEWAY_MAC);
        let mut ble = BleAdapter::new(String::try_from("Yiree-58cf").unwrap());
        ble.start();
        Self {
            _serial: serial,
            ble,
            wifi: WifiAdapter::new(cloud.clone()),
            cloud,
            store: NvsAdapter::new().unwrap(),
            system: SystemAdapter::new(),
        }
    }

    /// Handle everything queued so far; returns the notifications sent.
    fn pump(&mut self) -> Vec<std::string::String> {
        while let Some(event) = ble::try_next_event() {
            self.ble
                .handle_event(event, &mut self.wifi, &self.store, &self.system);
        }
        self.ble.take_notifications()
    }
}

#[test]
fn credentials_bring_the_uplink_up_and_persist() {
    let mut phone = Phone::new();
    assert_eq!(phone.ble.state(), BleState::Advertising);

    BleAdapter::sim_connect();
    assert!(BleAdapter::sim_write(br#"{"wifi":"HomeWiFi|password123"}"#));
    assert_eq!(phone.pump(), vec![r#"{"wifi":"ok"}"#]);
    assert_eq!(phone.ble.state(), BleState::Connected);
    assert_eq!(phone.wifi.state(), WifiState::Connected);

    assert!(BleAdapter::sim_write(br#"{"mqtt":"broker.local|1883|gw|secret|1"}"#));
    assert_eq!(phone.pump(), vec![r#"{"mqtt":"ok"}"#]);
    assert!(phone.cloud.is_connected());

    let wifi = phone.store.load_wifi().unwrap();
    assert_eq!(wifi.ssid.as_str(), "HomeWiFi");
    assert_eq!(wifi.password.as_str(), "password123");
    let mqtt = phone.store.load_mqtt().unwrap();
    assert_eq!(mqtt.host.as_str(), "broker.local");
    assert_eq!(mqtt.username.as_str(), "gw");
    assert_eq!(mqtt.qos, 1);
}

#[test]
fn bad_values_fail_and_garbage_is_silent() {
    let mut phone = Phone::new();
    BleAdapter::sim_connect();

    assert!(BleAdapter::sim_write(br#"{"wifi":"HomeWiFi|short"}"#));
    assert!(BleAdapter::sim_write(br#"{"mqtt":"broker.local|0|u|p|0"}"#));
    assert!(BleAdapter::sim_write(b"hello"));
    assert_eq!(phone.pump(), vec![r#"{"wifi":"fail"}"#, r#"{"mqtt":"fail"}"#]);

    assert!(!BleAdapter::sim_write(&[b'a'; 300]));
    assert!(!phone.store.load_wifi().unwrap().is_configured());
}

#[test]
fn mqtt_before_wifi_fails() {
    let mut phone = Phone::new();
    assert!(BleAdapter::sim_write(br#"{"mqtt":"broker.local|1883|||0"}"#));
    assert_eq!(phone.pump(), vec![r#"{"mqtt":"fail"}"#]);
    assert!(!phone.cloud.is_connected());
}

#[test]
fn repeated_connection_cancels_restart_the_device() {
    let mut phone = Phone::new();
    for _ in 0..2 {
        BleAdapter::sim_disconnect(CONN_CANCEL_REASON);
        phone.pump();
    }
    assert!(!phone.system.restart_requested());

    BleAdapter::sim_disconnect(CONN_CANCEL_REASON);
    phone.pump();
    assert!(phone.system.restart_requested());
    assert_eq!(phone.ble.state(), BleState::Advertising);
}
