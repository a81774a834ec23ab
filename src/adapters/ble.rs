//! BLE GATT server adapter for credential provisioning.
//!
//! Hosts the single provisioning service a phone app talks to and feeds its
//! writes through [`GattProvisioning`]; connection drops go through the
//! [`DisconnectMonitor`].
//!
//! ## cfg gating
//!
//! - **`target_os = "espidf"`**: Bluedroid GATT server over raw
//!   `esp_idf_svc::sys` FFI.
//! - **all other targets**: simulation hooks for host-side tests.
//!
//! ## GATT Service Layout
//!
//! | Attribute        | UUID     | Perms        |
//! |------------------|----------|--------------|
//! | Service          | `0xFFA0` | primary      |
//! | Command          | `0xFFA1` | Write        |
//! | Reply            | `0xFFA2` | Read+Notify  |
//! | Reply CCCD       | `0x2902` | Read+Write   |

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::channel::Channel;
use log::{info, warn};

use crate::app::ports::{ConfigPort, NetworkPort, SystemPort};
use crate::error::Error;
use crate::gatt::{DisconnectMonitor, GattProvisioning, MAX_WRITE_LEN};

// ───────────────────────────────────────────────────────────────
// Constants
// ───────────────────────────────────────────────────────────────

pub const SERVICE_UUID: u16 = 0xFFA0;
pub const CHAR_COMMAND: u16 = 0xFFA1;
pub const CHAR_REPLY: u16 = 0xFFA2;

const EVENT_DEPTH: usize = 4;

pub type WriteBuf = heapless::Vec<u8, MAX_WRITE_LEN>;

// ───────────────────────────────────────────────────────────────
// Events
// ───────────────────────────────────────────────────────────────

/// Something happened on the GATT link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GattEvent {
    Connected,
    Write(WriteBuf),
    Disconnected { reason: u16 },
}

// Bluedroid callbacks are C function pointers; this queue bridges them to
// the task that owns the adapter.
static GATT_EVENTS: Channel<CriticalSectionRawMutex, GattEvent, EVENT_DEPTH> = Channel::new();

fn push_event(event: GattEvent) {
    if GATT_EVENTS.try_send(event).is_err() {
        warn!("BLE: event queue full, dropping");
    }
}

/// Wait for the next GATT event.
pub async fn next_event() -> GattEvent {
    GATT_EVENTS.receive().await
}

pub fn try_next_event() -> Option<GattEvent> {
    GATT_EVENTS.try_receive().ok()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BleState {
    Idle,
    Advertising,
    Connected,
    Failed,
}

// ── ESP-IDF BLE static state ──────────────────────────────────

#[cfg(target_os = "espidf")]
use core::sync::atomic::{AtomicU32, Ordering as AtomicOrdering};

#[cfg(target_os = "espidf")]
static BLE_GATTS_IF: AtomicU32 = AtomicU32::new(0);
#[cfg(target_os = "espidf")]
static BLE_CONN_ID: AtomicU32 = AtomicU32::new(u32::MAX);
#[cfg(target_os = "espidf")]
static BLE_SVC_HANDLE: AtomicU32 = AtomicU32::new(0);
#[cfg(target_os = "espidf")]
static BLE_COMMAND_HANDLE: AtomicU32 = AtomicU32::new(0);
#[cfg(target_os = "espidf")]
static BLE_REPLY_HANDLE: AtomicU32 = AtomicU32::new(0);
#[cfg(target_os = "espidf")]
static BLE_CHAR_STEP: AtomicU32 = AtomicU32::new(0);

#[cfg(target_os = "espidf")]
fn uuid16_to_esp(uuid: u16) -> esp_idf_svc::sys::esp_bt_uuid_t {
    let mut t: esp_idf_svc::sys::esp_bt_uuid_t = unsafe { core::mem::zeroed() };
    t.len = 2;
    t.uuid.uuid16 = uuid;
    t
}

#[cfg(target_os = "espidf")]
fn adv_params() -> esp_idf_svc::sys::esp_ble_adv_params_t {
    use esp_idf_svc::sys::*;
    esp_ble_adv_params_t {
        adv_int_min: 0x20,
        adv_int_max: 0x40,
        adv_type: esp_ble_adv_type_t_ADV_TYPE_IND,
        own_addr_type: esp_ble_addr_type_t_BLE_ADDR_TYPE_PUBLIC,
        channel_map: esp_ble_adv_channel_t_ADV_CHNL_ALL,
        adv_filter_policy: esp_ble_adv_filter_t_ADV_FILTER_ALLOW_SCAN_ANY_CON_ANY,
        ..unsafe { core::mem::zeroed() }
    }
}

#[cfg(target_os = "espidf")]
unsafe fn add_gatt_char(svc_handle: u16, uuid: u16, perm: u32, prop: u32) {
    use esp_idf_svc::sys::*;
    let mut char_uuid = uuid16_to_esp(uuid);
    unsafe {
        esp_ble_gatts_add_char(
            svc_handle,
            &mut char_uuid,
            perm as esp_gatt_perm_t,
            prop as esp_gatt_char_prop_t,
            core::ptr::null_mut(),
            core::ptr::null_mut(),
        );
    }
}

#[cfg(target_os = "espidf")]
unsafe extern "C" fn ble_gap_event_handler(
    event: esp_idf_svc::sys::esp_gap_ble_cb_event_t,
    _param: *mut esp_idf_svc::sys::esp_ble_gap_cb_param_t,
) {
    use esp_idf_svc::sys::*;
    match event {
        esp_gap_ble_cb_event_t_ESP_GAP_BLE_ADV_START_COMPLETE_EVT => {
            log::info!("BLE GAP: advertising started");
        }
        esp_gap_ble_cb_event_t_ESP_GAP_BLE_ADV_STOP_COMPLETE_EVT => {
            log::info!("BLE GAP: advertising stopped");
        }
        _ => {}
    }
}

#[cfg(target_os = "espidf")]
unsafe extern "C" fn ble_gatts_event_handler(
    event: esp_idf_svc::sys::esp_gatts_cb_event_t,
    gatts_if: esp_idf_svc::sys::esp_gatt_if_t,
    param: *mut esp_idf_svc::sys::esp_ble_gatts_cb_param_t,
) {
    use esp_idf_svc::sys::*;

    BLE_GATTS_IF.store(gatts_if as u32, AtomicOrdering::Relaxed);

    match event {
        esp_gatts_cb_event_t_ESP_GATTS_REG_EVT => {
            log::info!("BLE GATTS: app registered (if={})", gatts_if);
            let mut svc_id = esp_gatt_srvc_id_t {
                id: esp_gatt_id_t { uuid: uuid16_to_esp(SERVICE_UUID), inst_id: 0 },
                is_primary: true,
            };
            unsafe { esp_ble_gatts_create_service(gatts_if, &mut svc_id, 8) };
        }
        esp_gatts_cb_event_t_ESP_GATTS_CREATE_EVT => {
            let svc_handle = unsafe { (*param).create.service_handle };
            BLE_SVC_HANDLE.store(svc_handle as u32, AtomicOrdering::Relaxed);
            BLE_CHAR_STEP.store(1, AtomicOrdering::Relaxed);
            unsafe {
                esp_ble_gatts_start_service(svc_handle);
                add_gatt_char(
                    svc_handle,
                    CHAR_COMMAND,
                    ESP_GATT_PERM_WRITE,
                    ESP_GATT_CHAR_PROP_BIT_WRITE,
                );
            }
        }
        esp_gatts_cb_event_t_ESP_GATTS_ADD_CHAR_EVT => {
            let handle = unsafe { (*param).add_char.attr_handle };
            let svc_handle = BLE_SVC_HANDLE.load(AtomicOrdering::Relaxed) as u16;
            match BLE_CHAR_STEP.load(AtomicOrdering::Relaxed) {
                1 => {
                    BLE_COMMAND_HANDLE.store(handle as u32, AtomicOrdering::Relaxed);
                    BLE_CHAR_STEP.store(2, AtomicOrdering::Relaxed);
                    unsafe {
                        add_gatt_char(
                            svc_handle,
                            CHAR_REPLY,
                            ESP_GATT_PERM_READ,
                            ESP_GATT_CHAR_PROP_BIT_READ | ESP_GATT_CHAR_PROP_BIT_NOTIFY,
                        );
                    }
                }
                2 => {
                    BLE_REPLY_HANDLE.store(handle as u32, AtomicOrdering::Relaxed);
                    BLE_CHAR_STEP.store(3, AtomicOrdering::Relaxed);
                    let mut cccd = uuid16_to_esp(ESP_GATT_UUID_CHAR_CLIENT_CONFIG as u16);
                    unsafe {
                        esp_ble_gatts_add_char_descr(
                            svc_handle,
                            &mut cccd,
                            (ESP_GATT_PERM_READ | ESP_GATT_PERM_WRITE) as esp_gatt_perm_t,
                            core::ptr::null_mut(),
                            core::ptr::null_mut(),
                        );
                    }
                    log::info!("BLE GATTS: provisioning service ready");
                }
                _ => {}
            }
        }
        esp_gatts_cb_event_t_ESP_GATTS_CONNECT_EVT => {
            let conn_id = unsafe { (*param).connect.conn_id };
            BLE_CONN_ID.store(conn_id as u32, AtomicOrdering::Relaxed);
            push_event(GattEvent::Connected);
        }
        esp_gatts_cb_event_t_ESP_GATTS_DISCONNECT_EVT => {
            let reason = unsafe { (*param).disconnect.reason } as u16;
            BLE_CONN_ID.store(u32::MAX, AtomicOrdering::Relaxed);
            push_event(GattEvent::Disconnected { reason });
            let mut params = adv_params();
            unsafe { esp_ble_gap_start_advertising(&mut params) };
        }
        esp_gatts_cb_event_t_ESP_GATTS_WRITE_EVT => {
            let p = unsafe { &(*param).write };
            if p.need_rsp {
                unsafe {
                    esp_ble_gatts_send_response(
                        gatts_if,
                        p.conn_id,
                        p.trans_id,
                        esp_gatt_status_t_ESP_GATT_OK,
                        core::ptr::null_mut(),
                    );
                }
            }
            if p.handle as u32 != BLE_COMMAND_HANDLE.load(AtomicOrdering::Relaxed) {
                return;
            }
            let data = unsafe { core::slice::from_raw_parts(p.value, p.len as usize) };
            match WriteBuf::from_slice(data) {
                Ok(buf) => push_event(GattEvent::Write(buf)),
                Err(()) => log::warn!("BLE GATTS: {} byte write dropped", data.len()),
            }
        }
        _ => {}
    }
}

/// Bring up the Bluetooth controller and Bluedroid host.
///
/// Must run before the GATT server and the mesh stack start.
#[cfg(target_os = "espidf")]
pub fn bluetooth_init() -> Result<(), Error> {
    use esp_idf_svc::sys::*;
    unsafe {
        esp_bt_controller_mem_release(esp_bt_mode_t_ESP_BT_MODE_CLASSIC_BT);

        let mut bt_cfg = esp_bt_controller_config_t::default();
        if esp_bt_controller_init(&mut bt_cfg) != ESP_OK as i32 {
            return Err(Error::Init("bt controller init"));
        }
        if esp_bt_controller_enable(esp_bt_mode_t_ESP_BT_MODE_BLE) != ESP_OK as i32 {
            return Err(Error::Init("bt controller enable"));
        }
        if esp_bluedroid_init() != ESP_OK as i32 {
            return Err(Error::Init("bluedroid init"));
        }
        if esp_bluedroid_enable() != ESP_OK as i32 {
            return Err(Error::Init("bluedroid enable"));
        }
    }
    info!("BLE(espidf): controller and Bluedroid up");
    Ok(())
}

#[cfg(not(target_os = "espidf"))]
pub fn bluetooth_init() -> Result<(), Error> {
    Ok(())
}

// ───────────────────────────────────────────────────────────────
// Adapter
// ───────────────────────────────────────────────────────────────

pub struct BleAdapter {
    state: BleState,
    device_name: heapless::String<16>,
    provisioning: GattProvisioning,
    monitor: DisconnectMonitor,
    #[cfg(not(target_os = "espidf"))]
    sim_notified: Vec<std::string::String>,
}

impl BleAdapter {
    pub fn new(device_name: heapless::String<16>) -> Self {
        Self {
            state: BleState::Idle,
            device_name,
            provisioning: GattProvisioning::new(),
            monitor: DisconnectMonitor::new(),
            #[cfg(not(target_os = "espidf"))]
            sim_notified: Vec::new(),
        }
    }

    pub fn state(&self) -> BleState {
        self.state
    }

    pub fn start(&mut self) {
        info!("BLE: advertising as '{}'", self.device_name);
        self.state = if self.platform_start() { BleState::Advertising } else { BleState::Failed };
    }

    /// Apply one GATT event.  Returns the reply notified, if any.
    pub fn handle_event<N, C, Y>(
        &mut self,
        event: GattEvent,
        net: &mut N,
        store: &C,
        system: &Y,
    ) -> Option<std::string::String>
    where
        N: NetworkPort,
        C: ConfigPort,
        Y: SystemPort,
    {
        match event {
            GattEvent::Connected => {
                info!("BLE: central connected");
                self.state = BleState::Connected;
                None
            }
            GattEvent::Disconnected { reason } => {
                info!("BLE: central disconnected (reason 0x{:04x})", reason);
                if self.state != BleState::Idle {
                    self.state = BleState::Advertising;
                }
                if self.monitor.on_disconnect(reason) {
                    warn!("BLE: repeated connection cancels, restarting");
                    system.request_restart();
                }
                None
            }
            GattEvent::Write(raw) => {
                let reply = self.provisioning.handle_write(&raw, net, store)?;
                self.notify(&reply);
                Some(reply)
            }
        }
    }

    fn notify(&mut self, payload: &str) {
        self.platform_notify(payload);
    }

    // ── Simulation hooks ──────────────────────────────────────

    #[cfg(not(target_os = "espidf"))]
    pub fn sim_connect() {
        push_event(GattEvent::Connected);
    }

    /// Queue a write as if a central wrote the command characteristic.
    #[cfg(not(target_os = "espidf"))]
    pub fn sim_write(raw: &[u8]) -> bool {
        match WriteBuf::from_slice(raw) {
            Ok(buf) => {
                push_event(GattEvent::Write(buf));
                true
            }
            Err(()) => false,
        }
    }

    #[cfg(not(target_os = "espidf"))]
    pub fn sim_disconnect(reason: u16) {
        push_event(GattEvent::Disconnected { reason });
    }

    #[cfg(not(target_os = "espidf"))]
    pub fn take_notifications(&mut self) -> Vec<std::string::String> {
        core::mem::take(&mut self.sim_notified)
    }

    // ── Platform-specific ─────────────────────────────────────

    #[cfg(target_os = "espidf")]
    fn platform_start(&mut self) -> bool {
        use esp_idf_svc::sys::*;

        let mut name = heapless::Vec::<u8, 17>::new();
        let _ = name.extend_from_slice(self.device_name.as_bytes());
        let _ = name.push(0);

        unsafe {
            if esp_ble_gap_register_callback(Some(ble_gap_event_handler)) != ESP_OK as i32
                || esp_ble_gatts_register_callback(Some(ble_gatts_event_handler)) != ESP_OK as i32
                || esp_ble_gatts_app_register(0) != ESP_OK as i32
            {
                warn!("BLE: GATT server registration failed");
                return false;
            }
            esp_ble_gap_set_device_name(name.as_ptr() as *const _);
            let mut params = adv_params();
            esp_ble_gap_start_advertising(&mut params);
        }
        true
    }

    #[cfg(not(target_os = "espidf"))]
    fn platform_start(&mut self) -> bool {
        info!("BLE(sim): service 0x{:04X} registered", SERVICE_UUID);
        true
    }

    #[cfg(target_os = "espidf")]
    fn platform_notify(&mut self, payload: &str) {
        use esp_idf_svc::sys::*;
        let handle = BLE_REPLY_HANDLE.load(AtomicOrdering::Relaxed);
        let conn = BLE_CONN_ID.load(AtomicOrdering::Relaxed);
        if handle == 0 || conn == u32::MAX {
            warn!("BLE: no central to notify");
            return;
        }
        unsafe {
            esp_ble_gatts_send_indicate(
                BLE_GATTS_IF.load(AtomicOrdering::Relaxed) as esp_gatt_if_t,
                conn as u16,
                handle as u16,
                payload.len() as u16,
                payload.as_ptr() as *mut u8,
                false,
            );
        }
    }

    #[cfg(not(target_os = "espidf"))]
    fn platform_notify(&mut self, payload: &str) {
        info!("BLE(sim): notify {}", payload);
        self.sim_notified.push(payload.into());
    }
}

// ───────────────────────────────────────────────────────────────
// Tests
// ───────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::nvs::NvsAdapter;
    use crate::adapters::system::SystemAdapter;
    use crate::adapters::wifi::{CloudLink, WifiAdapter};
    use crate::gatt::CONN_CANCEL_REASON;

    struct Rig {
        ble: BleAdapter,
        wifi: WifiAdapter,
        nvs: NvsAdapter,
        sys: SystemAdapter,
    }

    fn rig() -> Rig {
        let name = heapless::String::try_from("YiRoot-0001").unwrap();
        let mut ble = BleAdapter::new(name);
        ble.start();
        Rig {
            ble,
            wifi: WifiAdapter::new(CloudLink::new(&[1, 2, 3, 4, 5, 6])),
            nvs: NvsAdapter::new().unwrap(),
            sys: SystemAdapter::new(),
        }
    }

    impl Rig {
        fn feed(&mut self, ev: GattEvent) -> Option<std::string::String> {
            self.ble.handle_event(ev, &mut self.wifi, &self.nvs, &self.sys)
        }

        fn write(&mut self, raw: &str) -> Option<std::string::String> {
            self.feed(GattEvent::Write(WriteBuf::from_slice(raw.as_bytes()).unwrap()))
        }
    }

    #[test]
    fn wifi_then_mqtt_persists_both() {
        let mut r = rig();
        assert_eq!(r.ble.state(), BleState::Advertising);
        r.feed(GattEvent::Connected);
        assert_eq!(r.ble.state(), BleState::Connected);

        let reply = r.write(r#"{"wifi":"HomeWiFi|secret123"}"#).unwrap();
        assert_eq!(reply, r#"{"wifi":"ok"}"#);
        let reply = r.write(r#"{"mqtt":"broker.local|1883|u|p|1"}"#).unwrap();
        assert_eq!(reply, r#"{"mqtt":"ok"}"#);

        assert_eq!(r.nvs.load_wifi().unwrap().ssid.as_str(), "HomeWiFi");
        assert_eq!(r.nvs.load_mqtt().unwrap().qos, 1);
        assert_eq!(r.ble.take_notifications().len(), 2);
    }

    #[test]
    fn mqtt_without_wifi_fails() {
        let mut r = rig();
        let reply = r.write(r#"{"mqtt":"broker.local|1883|u|p|0"}"#).unwrap();
        assert_eq!(reply, r#"{"mqtt":"fail"}"#);
    }

    #[test]
    fn malformed_write_is_silent() {
        let mut r = rig();
        assert_eq!(r.write("not json"), None);
        assert!(r.ble.take_notifications().is_empty());
    }

    #[test]
    fn third_conn_cancel_requests_restart() {
        let mut r = rig();
        r.feed(GattEvent::Disconnected { reason: CONN_CANCEL_REASON });
        r.feed(GattEvent::Disconnected { reason: CONN_CANCEL_REASON });
        assert!(!r.sys.restart_requested());
        r.feed(GattEvent::Disconnected { reason: CONN_CANCEL_REASON });
        assert!(r.sys.restart_requested());
    }

    #[test]
    fn other_reason_resets_cancel_count() {
        let mut r = rig();
        r.feed(GattEvent::Disconnected { reason: CONN_CANCEL_REASON });
        r.feed(GattEvent::Disconnected { reason: CONN_CANCEL_REASON });
        r.feed(GattEvent::Disconnected { reason: 0x0013 });
        r.feed(GattEvent::Disconnected { reason: CONN_CANCEL_REASON });
        assert!(!r.sys.restart_requested());
    }

    #[test]
    fn sim_write_rejects_oversized() {
        assert!(!BleAdapter::sim_write(&[b'x'; MAX_WRITE_LEN + 1]));
    }
}
