//! Scripted mesh stack and test rig for integration tests.
//!
//! [`MockMesh`] records every call the gateway makes and answers the way a
//! cooperative node would: provisioning opens a link and completes,
//! config requests get a zero-status reply, unicast client sends get a
//! status back.  Replies are queued on a channel and fed to
//! [`Gateway::on_mesh_event`] by a responder thread, so they arrive on a
//! different context than the caller, as on the device.

use std::sync::atomic::{AtomicBool, AtomicU16, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use meshgate::adapters::nvs::NvsAdapter;
use meshgate::adapters::time::Esp32TimeAdapter;
use meshgate::adapters::wifi::{CloudLink, WifiAdapter};
use meshgate::app::events::GatewayEvent;
use meshgate::app::ports::{EventSink, MeshError, MeshStack, NetworkPort, SystemPort};
use meshgate::app::service::Gateway;
use meshgate::config::{GatewayConfig, MqttConfig, WifiConfig};
use meshgate::mesh::event::{Bearer, ClientEventKind, MeshEvent, ctl_payload, hsl_payload};
use meshgate::mesh::keys::ProvisionerKeys;
use meshgate::mesh::message::{
    ClientMessage, ConfigRequest, HeartbeatFilter, LocalModel, MessageContext,
    UnprovisionedDevice,
};
use meshgate::mesh::opcode::{OP_GEN_ONOFF_STATUS, OP_LIGHT_CTL_STATUS, OP_LIGHT_HSL_STATUS};
use meshgate::mesh::{is_group, MacAddr};
use meshgate::provisioning::SessionPhase;

pub const GATEWAY_MAC: MacAddr = [0x24, 0x0a, 0xc4, 0x12, 0x34, 0x56];
pub const LIGHT_MAC: MacAddr = [0x58, 0xcf, 0x79, 0x1a, 0x21, 0xee];

/// Composition page 0 of a one-element light with the vendor server.
pub const LIGHT_COMPOSITION: [u8; 20] = [
    0xE5, 0x02, 0x01, 0x00, 0x01, 0x00, 0x0A, 0x00, 0x03, 0x00, // header
    0x00, 0x00, 0x01, 0x01, 0x00, 0x10, 0xE5, 0x02, 0x00, 0x00, // element 0
];

// ── Call record ───────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub enum MeshCall {
    AddUnprov(MacAddr),
    Config { dst: u16, request: ConfigRequest },
    Client { ctx: MessageContext, msg: ClientMessage },
    StoreComposition(u16),
    DeleteNode(u16),
    EraseSettings,
}

enum Script {
    Event(MeshEvent),
    Pause(Duration),
}

// ── MockMesh ──────────────────────────────────────────────────

struct MockState {
    calls: Mutex<Vec<MeshCall>>,
    nodes: Mutex<Vec<u16>>,
    next_addr: AtomicU16,
    /// Unicast client sends get no reply (node out of range).
    silent_nodes: AtomicBool,
    tx: Mutex<Sender<Script>>,
}

#[derive(Clone)]
pub struct MockMesh {
    state: Arc<MockState>,
}

#[allow(dead_code)]
impl MockMesh {
    fn new(first_addr: u16, tx: Sender<Script>) -> Self {
        Self {
            state: Arc::new(MockState {
                calls: Mutex::new(Vec::new()),
                nodes: Mutex::new(Vec::new()),
                next_addr: AtomicU16::new(first_addr),
                silent_nodes: AtomicBool::new(false),
                tx: Mutex::new(tx),
            }),
        }
    }

    fn reply(&self, event: MeshEvent) {
        let _ = self.state.tx.lock().unwrap().send(Script::Event(event));
    }

    fn pause(&self, ms: u64) {
        let _ = self.state.tx.lock().unwrap().send(Script::Pause(Duration::from_millis(ms)));
    }

    fn record(&self, call: MeshCall) {
        self.state.calls.lock().unwrap().push(call);
    }

    pub fn calls(&self) -> Vec<MeshCall> {
        self.state.calls.lock().unwrap().clone()
    }

    pub fn clear_calls(&self) {
        self.state.calls.lock().unwrap().clear();
    }

    pub fn config_requests(&self) -> Vec<ConfigRequest> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                MeshCall::Config { request, .. } => Some(request),
                _ => None,
            })
            .collect()
    }

    pub fn client_sends(&self) -> Vec<(MessageContext, ClientMessage)> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                MeshCall::Client { ctx, msg } => Some((ctx, msg)),
                _ => None,
            })
            .collect()
    }

    pub fn add_node(&self, addr: u16) {
        self.state.nodes.lock().unwrap().push(addr);
    }

    pub fn nodes(&self) -> Vec<u16> {
        self.state.nodes.lock().unwrap().clone()
    }

    pub fn set_silent_nodes(&self, silent: bool) {
        self.state.silent_nodes.store(silent, Ordering::Relaxed);
    }

    /// Deliver an unprovisioned beacon for `mac` with product id `pid`.
    pub fn beacon(&self, mac: MacAddr, pid: u8) {
        let mut uuid = [0u8; 16];
        uuid[0] = b'Y';
        uuid[1] = b'i';
        uuid[2] = pid;
        self.reply(MeshEvent::UnprovisionedAdv {
            addr: mac,
            addr_type: 0,
            uuid,
            oob_info: 0,
            bearer: Bearer::Adv,
        });
    }

    pub fn heartbeat(&self, src: u16) {
        self.reply(MeshEvent::HeartbeatReceived { src, dst: 0xC000, rssi: -60 });
    }

    fn status_for(msg: &ClientMessage) -> Option<(u32, Vec<u8>)> {
        Some(match msg {
            ClientMessage::OnOffGet => (OP_GEN_ONOFF_STATUS, vec![1]),
            ClientMessage::OnOffSet { onoff, .. } => (OP_GEN_ONOFF_STATUS, vec![u8::from(*onoff)]),
            ClientMessage::HslGet => (OP_LIGHT_HSL_STATUS, hsl_payload(0x1000, 0x2000, 0x3000)),
            ClientMessage::HslSet { hue, saturation, lightness, .. } => {
                (OP_LIGHT_HSL_STATUS, hsl_payload(*hue, *saturation, *lightness))
            }
            ClientMessage::CtlGet => (OP_LIGHT_CTL_STATUS, ctl_payload(0xFFFF, 0x0320)),
            ClientMessage::CtlSet { lightness, temperature, .. } => {
                (OP_LIGHT_CTL_STATUS, ctl_payload(*lightness, *temperature))
            }
            ClientMessage::Vendor { .. } => return None,
        })
    }
}

impl MeshStack for MockMesh {
    fn set_uuid_match(&self, _prefix: &[u8]) -> Result<(), MeshError> {
        Ok(())
    }

    fn add_local_net_key(&self, _net_key: &[u8; 16], _net_idx: u16) -> Result<(), MeshError> {
        Ok(())
    }

    fn update_local_net_key(&self, _net_key: &[u8; 16], _net_idx: u16) -> Result<(), MeshError> {
        Ok(())
    }

    fn add_local_app_key(&self, _: &[u8; 16], _: u16, _: u16) -> Result<(), MeshError> {
        Ok(())
    }

    fn update_local_app_key(&self, _: &[u8; 16], _: u16, _: u16) -> Result<(), MeshError> {
        Ok(())
    }

    fn bind_local_model(&self, _app_idx: u16, _model: LocalModel) -> Result<(), MeshError> {
        Ok(())
    }

    fn enable_heartbeat_recv(&self) -> Result<(), MeshError> {
        Ok(())
    }

    fn set_heartbeat_filter(&self, _filter: HeartbeatFilter) -> Result<(), MeshError> {
        Ok(())
    }

    fn add_unprov_device(&self, device: &UnprovisionedDevice) -> Result<(), MeshError> {
        self.record(MeshCall::AddUnprov(device.addr));
        let addr = self.state.next_addr.fetch_add(1, Ordering::Relaxed);
        self.reply(MeshEvent::LinkOpen { bearer: Bearer::Adv });
        self.reply(MeshEvent::ProvisioningComplete {
            node_idx: 0,
            unicast_addr: addr,
            element_num: 1,
            net_idx: 0,
        });
        self.reply(MeshEvent::LinkClose { bearer: Bearer::Adv, reason: 0 });
        Ok(())
    }

    fn config_send(&self, ctx: &MessageContext, request: &ConfigRequest) -> Result<(), MeshError> {
        self.record(MeshCall::Config { dst: ctx.dst, request: request.clone() });
        if *request == ConfigRequest::NodeReset {
            return Ok(());
        }
        let data = match request {
            ConfigRequest::CompositionDataGet { .. } => LIGHT_COMPOSITION.to_vec(),
            _ => Vec::new(),
        };
        self.reply(MeshEvent::ConfigStatus {
            opcode: request.opcode(),
            addr: ctx.dst,
            error_code: 0,
            data,
        });
        Ok(())
    }

    fn store_composition(&self, addr: u16, _data: &[u8]) -> Result<(), MeshError> {
        self.record(MeshCall::StoreComposition(addr));
        self.add_node(addr);
        Ok(())
    }

    fn client_send(&self, ctx: &MessageContext, msg: &ClientMessage) -> Result<(), MeshError> {
        self.record(MeshCall::Client { ctx: *ctx, msg: msg.clone() });
        if is_group(ctx.dst) || self.state.silent_nodes.load(Ordering::Relaxed) {
            return Ok(());
        }
        match Self::status_for(msg) {
            Some((opcode, data)) => self.reply(MeshEvent::ClientStatus {
                kind: match msg {
                    ClientMessage::OnOffGet | ClientMessage::HslGet | ClientMessage::CtlGet => {
                        ClientEventKind::GetState
                    }
                    _ => ClientEventKind::SetState,
                },
                opcode,
                addr: ctx.dst,
                error_code: 0,
                data,
            }),
            None => {
                self.reply(MeshEvent::VendorSendComplete { opcode: ctx.opcode, err: 0 });
                // Leave the router time to consume the local completion.
                self.pause(30);
                if let ClientMessage::Vendor { payload, .. } = msg {
                    self.reply(MeshEvent::VendorOperation {
                        opcode: meshgate::mesh::opcode::OP_VND_ATTR_STATUS,
                        addr: ctx.dst,
                        msg: payload.clone(),
                    });
                }
            }
        }
        Ok(())
    }

    fn delete_node(&self, addr: u16) -> Result<(), MeshError> {
        self.record(MeshCall::DeleteNode(addr));
        let mut nodes = self.state.nodes.lock().unwrap();
        let Some(pos) = nodes.iter().position(|a| *a == addr) else {
            return Err(MeshError::UnknownNode(addr));
        };
        nodes.remove(pos);
        drop(nodes);
        self.reply(MeshEvent::NodeDeleted { addr, err: 0 });
        Ok(())
    }

    fn provisioned_nodes(&self) -> Vec<u16> {
        self.nodes()
    }

    fn erase_settings(&self) -> Result<(), MeshError> {
        self.record(MeshCall::EraseSettings);
        Ok(())
    }
}

// ── MockSystem ────────────────────────────────────────────────

#[derive(Default)]
struct SystemLog {
    time: Option<u64>,
    ota: Vec<(String, String)>,
    restarts: u32,
}

#[derive(Clone, Default)]
pub struct MockSystem {
    log: Arc<Mutex<SystemLog>>,
}

#[allow(dead_code)]
impl MockSystem {
    pub fn time(&self) -> Option<u64> {
        self.log.lock().unwrap().time
    }

    pub fn ota(&self) -> Vec<(String, String)> {
        self.log.lock().unwrap().ota.clone()
    }

    pub fn restarts(&self) -> u32 {
        self.log.lock().unwrap().restarts
    }
}

impl SystemPort for MockSystem {
    fn set_time(&self, unix_secs: u64) {
        self.log.lock().unwrap().time = Some(unix_secs);
    }

    fn start_ota(&self, url: &str, mid: &str) {
        self.log.lock().unwrap().ota.push((url.into(), mid.into()));
    }

    fn request_restart(&self) {
        self.log.lock().unwrap().restarts += 1;
    }
}

// ── RecordingSink ─────────────────────────────────────────────

#[derive(Clone, Default)]
pub struct RecordingSink {
    events: Arc<Mutex<Vec<GatewayEvent>>>,
}

#[allow(dead_code)]
impl RecordingSink {
    pub fn events(&self) -> Vec<GatewayEvent> {
        self.events.lock().unwrap().clone()
    }
}

impl EventSink for RecordingSink {
    fn emit(&self, event: &GatewayEvent) {
        self.events.lock().unwrap().push(event.clone());
    }
}

// ── Rig ───────────────────────────────────────────────────────

pub type TestGateway =
    Gateway<MockMesh, NvsAdapter, CloudLink, MockSystem, Esp32TimeAdapter, RecordingSink>;

/// Short timeouts, no pacing delays.
pub fn fast_config() -> GatewayConfig {
    GatewayConfig {
        link_open_timeout_ms: 300,
        prov_complete_timeout_ms: 1000,
        msg_timeout_ms: 300,
        unbind_reset_delay_ms: 0,
        unbind_delete_timeout_ms: 300,
        unbind_all_reset_delay_ms: 0,
        unbind_all_delete_timeout_ms: 300,
        flush_debounce_ms: 0,
        drain_wait_ms: 10,
        ..GatewayConfig::default()
    }
}

pub struct Rig {
    pub gateway: Arc<TestGateway>,
    pub mesh: MockMesh,
    pub cloud: CloudLink,
    pub system: MockSystem,
    pub sink: RecordingSink,
}

#[allow(dead_code)]
impl Rig {
    pub fn new() -> Self {
        Self::with_config(fast_config())
    }

    pub fn with_config(cfg: GatewayConfig) -> Self {
        let (tx, rx) = mpsc::channel();
        let mesh = MockMesh::new(0x0006, tx);
        let cloud = CloudLink::new(&GATEWAY_MAC);
        let system = MockSystem::default();
        let sink = RecordingSink::default();
        let gateway = Arc::new(Gateway::new(
            cfg,
            ProvisionerKeys::derive(0x1234_5678, &GATEWAY_MAC),
            mesh.clone(),
            NvsAdapter::new().unwrap(),
            cloud.clone(),
            system.clone(),
            Esp32TimeAdapter::new(),
            sink.clone(),
        ));
        spawn_responder(Arc::clone(&gateway), rx);
        gateway.start().unwrap();
        Self { gateway, mesh, cloud, system, sink }
    }

    /// Bring the broker link up through the real WiFi adapter.
    pub fn connect_cloud(&self) {
        let mut wifi = WifiAdapter::new(self.cloud.clone());
        assert!(wifi.connect_wifi(&WifiConfig {
            ssid: heapless::String::try_from("HomeWiFi").unwrap(),
            password: heapless::String::new(),
        }));
        assert!(wifi.connect_mqtt(&MqttConfig {
            host: heapless::String::try_from("broker.local").unwrap(),
            ..MqttConfig::default()
        }));
        self.gateway.on_cloud_connection(true);
        self.cloud.take_published();
    }

    /// Beacon `mac` as soon as a bind is waiting for it.
    pub fn beacon_when_scanning(&self, mac: MacAddr, pid: u8) -> thread::JoinHandle<()> {
        let gateway = Arc::clone(&self.gateway);
        let mesh = self.mesh.clone();
        thread::spawn(move || {
            if wait_until(Duration::from_secs(2), || {
                gateway.session_phase() == SessionPhase::Scanning
            }) {
                mesh.beacon(mac, pid);
            }
        })
    }

    /// Published payloads, parsed.
    pub fn published(&self) -> Vec<serde_json::Value> {
        self.cloud
            .take_published()
            .into_iter()
            .map(|(_, payload)| serde_json::from_str(&payload).unwrap())
            .collect()
    }

    /// Bind `mac` end to end and wait for the config chain to finish.
    pub fn bind_light(&self, mac: MacAddr, name: &str) -> u16 {
        let beacon = self.beacon_when_scanning(mac, 0x03);
        let addr = self.gateway.bind(mac, name).expect("bind failed");
        beacon.join().unwrap();
        assert!(wait_until(Duration::from_secs(2), || {
            self.gateway.session_phase() == SessionPhase::Bound
        }));
        addr
    }
}

fn spawn_responder(gateway: Arc<TestGateway>, rx: Receiver<Script>) {
    thread::spawn(move || {
        for item in rx {
            match item {
                Script::Event(event) => gateway.on_mesh_event(event),
                Script::Pause(d) => thread::sleep(d),
            }
        }
    });
}

/// Poll `cond` every few milliseconds until it holds or `timeout` passes.
pub fn wait_until(timeout: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    cond()
}
