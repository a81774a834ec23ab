//! Gateway service: the hexagonal core.
//!
//! [`Gateway`] owns every piece of mutable gateway state: the provisioning
//! session, both binding tables, the heartbeat tracker, the command router,
//! the shared event group and the mesh → cloud transfer queue.  The mesh
//! callback context, the cloud receive path and the event loop each hold an
//! `Arc<Gateway>` and call in through `&self`.
//!
//! ```text
//!  MeshStack ◀──┐ ┌──────────────────────────────┐ ──▶ CloudPort
//!               └─│           Gateway            │
//!  MeshEvent ────▶│ session · router · bindings  │ ──▶ EventSink
//!  cloud JSON ───▶│ heartbeat · transfer queue   │ ──▶ SystemPort
//!                 └──────────────────────────────┘
//! ```

use core::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Instant;

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::channel::Channel;
use embedded_hal::delay::DelayNs;
use log::{debug, info, warn};

use crate::binding::{BindingRecord, BindingStore, GATTC_BIND_KEY, MESH_BIND_KEY};
use crate::config::{GatewayConfig, FIRMWARE_VERSION};
use crate::error::Result;
use crate::heartbeat::HeartbeatTracker;
use crate::mesh::event::{Bearer, ClientEventKind, MeshEvent};
use crate::mesh::keys::{ProvisionerKeys, UUID_MATCH_PREFIX};
use crate::mesh::message::{HeartbeatFilter, LocalModel, UnprovisionedDevice};
use crate::mesh::opcode::{self, OP_GEN_ONOFF_SET, OP_LIGHT_CTL_SET, OP_LIGHT_HSL_SET};
use crate::mesh::transfer::{cloud_message, cloud_text_message, format_addr, TransferRecord};
use crate::mesh::{
    MacAddr, CID_COMPANY, CID_NONE, MODEL_GEN_ONOFF_CLI, MODEL_LIGHT_CTL_CLI,
    MODEL_LIGHT_HSL_CLI, VENDOR_MODEL_CLIENT,
};
use crate::provisioning::{ChainProgress, ProvisioningSession, SessionPhase};
use crate::router::{CommandRouter, PendingCommand};
use crate::sync::{EventGroup, SEND_COMP, SEND_TIMEOUT};

use super::commands::{
    parse_node, parse_request, parse_sys, NodeCommand, SysCommand, DEFAULT_MID, ROOT_ADDR,
};
use super::events::GatewayEvent;
use super::ports::{CloudPort, ConfigPort, EventSink, MeshStack, StoragePort, SystemPort};

/// Depth of the mesh → cloud transfer queue.
pub const TRANSFER_QUEUE_LEN: usize = 3;

pub type TransferChannel = Channel<CriticalSectionRawMutex, TransferRecord, TRANSFER_QUEUE_LEN>;

// ───────────────────────────────────────────────────────────────
// Gateway
// ───────────────────────────────────────────────────────────────

pub struct Gateway<M, S, C, Y, D, K> {
    cfg: GatewayConfig,
    keys: ProvisionerKeys,

    mesh: M,
    storage: Mutex<S>,
    cloud: C,
    system: Y,
    delay: Mutex<D>,
    sink: K,

    events: EventGroup,
    session: ProvisioningSession,
    router: CommandRouter,
    mesh_bindings: Mutex<BindingStore>,
    gattc_bindings: Mutex<BindingStore>,
    heartbeat: Mutex<HeartbeatTracker>,
    transfer: TransferChannel,

    /// Message id of the most recent cloud command.
    last_mid: Mutex<String>,
    /// Held across the whole parse/dispatch of one cloud payload.
    dispatch: Mutex<()>,
    cloud_up: AtomicBool,
    boot: Instant,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

impl<M, S, C, Y, D, K> Gateway<M, S, C, Y, D, K>
where
    M: MeshStack,
    S: StoragePort + ConfigPort + Send,
    C: CloudPort,
    Y: SystemPort,
    D: DelayNs + Send,
    K: EventSink,
{
    /// Build the gateway and load both binding tables from `storage`.
    ///
    /// Nothing is sent to the mesh stack until [`start`](Self::start).
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        cfg: GatewayConfig,
        keys: ProvisionerKeys,
        mesh: M,
        storage: S,
        cloud: C,
        system: Y,
        delay: D,
        sink: K,
    ) -> Self {
        let mesh_bindings = BindingStore::load(&storage, MESH_BIND_KEY, cfg.mesh_table_size);
        let gattc_bindings = BindingStore::load(&storage, GATTC_BIND_KEY, cfg.gattc_table_size);

        Self {
            session: ProvisioningSession::new(&cfg, &keys),
            router: CommandRouter::new(&cfg, &keys),
            heartbeat: Mutex::new(HeartbeatTracker::new(cfg.max_nodes)),
            mesh_bindings: Mutex::new(mesh_bindings),
            gattc_bindings: Mutex::new(gattc_bindings),
            events: EventGroup::new(),
            transfer: Channel::new(),
            last_mid: Mutex::new(DEFAULT_MID.into()),
            dispatch: Mutex::new(()),
            cloud_up: AtomicBool::new(false),
            boot: Instant::now(),
            storage: Mutex::new(storage),
            delay: Mutex::new(delay),
            cfg,
            keys,
            mesh,
            cloud,
            system,
            sink,
        }
    }

    // ── Lifecycle ─────────────────────────────────────────────

    /// Program the provisioner: UUID filter, local keys, client model
    /// bindings and the heartbeat filter.  Then seed the heartbeat table
    /// from the stack's node list.
    pub fn start(&self) -> Result<()> {
        let k = &self.keys;
        self.mesh.set_uuid_match(&UUID_MATCH_PREFIX)?;

        if let Err(e) = self.mesh.add_local_net_key(&k.net_key, k.net_idx) {
            debug!("gateway: net key add ({}), updating", e);
            self.mesh.update_local_net_key(&k.net_key, k.net_idx)?;
        }
        if let Err(e) = self.mesh.add_local_app_key(&k.app_key, k.net_idx, k.app_idx) {
            debug!("gateway: app key add ({}), updating", e);
            self.mesh
                .update_local_app_key(&k.app_key, k.net_idx, k.app_idx)?;
        }

        let models = [
            LocalModel { model_id: VENDOR_MODEL_CLIENT, company_id: CID_COMPANY },
            LocalModel { model_id: MODEL_GEN_ONOFF_CLI, company_id: CID_NONE },
            LocalModel { model_id: MODEL_LIGHT_HSL_CLI, company_id: CID_NONE },
            LocalModel { model_id: MODEL_LIGHT_CTL_CLI, company_id: CID_NONE },
        ];
        for model in models {
            self.mesh.bind_local_model(k.app_idx, model)?;
        }

        self.mesh.enable_heartbeat_recv()?;
        self.mesh.set_heartbeat_filter(HeartbeatFilter {
            reject_list: true,
            src: self.cfg.prov_own_addr,
            dst: self.cfg.heartbeat_group_addr,
        })?;

        let nodes = self.mesh.provisioned_nodes();
        lock(&self.heartbeat).rekey(&nodes);

        self.sink.emit(&GatewayEvent::Started {
            root_name: k.root_name(),
            nodes: nodes.len(),
        });
        info!(
            "gateway: {} up, net_idx={} app_idx={} ({} nodes)",
            k.root_name(),
            k.net_idx,
            k.app_idx,
            nodes.len()
        );
        Ok(())
    }

    // ── Mesh callback entry point ─────────────────────────────

    /// Route one mesh stack event.  Runs on the stack's callback context
    /// and never blocks beyond short lock sections.
    pub fn on_mesh_event(&self, event: MeshEvent) {
        match event {
            MeshEvent::UnprovisionedAdv { addr, addr_type, uuid, oob_info, bearer } => {
                let device = UnprovisionedDevice {
                    addr,
                    addr_type,
                    uuid,
                    oob_info,
                    bearer: match bearer {
                        Bearer::Adv => 0x01,
                        Bearer::Gatt => 0x02,
                    },
                };
                self.session.on_unprov_adv(&self.mesh, &self.events, &device);
            }
            MeshEvent::LinkOpen { bearer } => {
                debug!("gateway: link open ({:?})", bearer);
                self.session.on_link_open(&self.events);
            }
            MeshEvent::LinkClose { reason, .. } => self.session.on_link_close(&self.events, reason),
            MeshEvent::ProvisioningComplete { unicast_addr, node_idx, element_num, .. } => {
                info!(
                    "gateway: node {} provisioned at 0x{:04x} ({} elements)",
                    node_idx, unicast_addr, element_num
                );
                // Failure is logged by the session; PROV_COMP stays clear.
                let _ = self.session.on_prov_complete(&self.mesh, &self.events, unicast_addr);
            }
            MeshEvent::ConfigStatus { opcode, addr, error_code, data } => {
                let progress =
                    self.session.on_config_status(&self.mesh, opcode, addr, error_code, &data);
                self.report_chain(addr, progress);
            }
            MeshEvent::ConfigTimeout { opcode, addr } => {
                let progress = self.session.on_config_timeout(opcode, addr);
                self.report_chain(addr, progress);
            }
            MeshEvent::ClientStatus { kind, opcode, addr, error_code, data } => {
                if error_code != 0 {
                    warn!("gateway: client 0x{:04x} from 0x{:04x} err {}", opcode, addr, error_code);
                    return;
                }
                if !data.is_empty() {
                    self.push_transfer(TransferRecord::new(opcode, addr, &data));
                }
                if kind != ClientEventKind::Publish {
                    self.events.set(SEND_COMP);
                }
            }
            MeshEvent::ClientTimeout { opcode, addr } => {
                debug!("gateway: client 0x{:04x} to 0x{:04x} timed out", opcode, addr);
                self.events.set(SEND_TIMEOUT);
            }
            MeshEvent::VendorOperation { opcode, addr, msg } => {
                self.push_transfer(TransferRecord::new(opcode, addr, &msg));
                self.events.set(SEND_COMP);
            }
            MeshEvent::VendorSendComplete { err, .. } => {
                self.events.set(if err == 0 { SEND_COMP } else { SEND_TIMEOUT });
            }
            MeshEvent::VendorSendTimeout { .. } => self.events.set(SEND_TIMEOUT),
            MeshEvent::VendorPublish { opcode, addr, msg } => {
                self.push_transfer(TransferRecord::new(opcode, addr, &msg));
            }
            MeshEvent::HeartbeatReceived { src, .. } => {
                lock(&self.heartbeat).on_heartbeat(src);
            }
            MeshEvent::NodeDeleted { addr, err } => {
                self.session.on_node_deleted(&self.events, addr, err);
            }
        }
    }

    fn report_chain(&self, addr: u16, progress: ChainProgress) {
        let event = match progress {
            ChainProgress::Ignored => return,
            ChainProgress::Advanced(phase) => GatewayEvent::ChainProgress { addr, phase },
            ChainProgress::Completed { addr } => GatewayEvent::ChainProgress {
                addr,
                phase: SessionPhase::Bound,
            },
            ChainProgress::Aborted { addr, opcode } => GatewayEvent::ChainAborted { addr, opcode },
        };
        self.sink.emit(&event);
    }

    fn push_transfer(&self, record: TransferRecord) {
        if self.transfer.try_send(record).is_err() {
            warn!(
                "gateway: transfer queue full, dropping 0x{:06x} from 0x{:04x}",
                record.opcode, record.unicast_addr
            );
        }
    }

    // ── Cloud entry points ────────────────────────────────────

    /// Handle one inbound cloud payload.  Malformed payloads are logged
    /// and dropped without a reply.
    pub fn handle_cloud_message(&self, payload: &str) {
        let _guard = lock(&self.dispatch);
        let Some(request) = parse_request(payload) else {
            warn!("gateway: unparseable cloud payload ({} bytes)", payload.len());
            return;
        };
        *lock(&self.last_mid) = request.mid.clone();

        if request.actions.is_empty() {
            debug!("gateway: cloud payload without destination");
        }
        for action in request.actions {
            for (key, value) in action.entries {
                if action.dst == ROOT_ADDR {
                    let Some(cmd) = parse_sys(&key, &value) else {
                        debug!("gateway: ignoring root key '{}'", key);
                        continue;
                    };
                    if let Some(reply) = self.run_sys(cmd, &request.mid) {
                        self.publish(&cloud_text_message(ROOT_ADDR, &request.mid, &key, &reply));
                    }
                } else {
                    match parse_node(&key, &value) {
                        Some(cmd) => self.run_node(action.dst, &key, cmd, &request.mid),
                        None => debug!("gateway: dropping '{}' for 0x{:04x}", key, action.dst),
                    }
                }
            }
        }
    }

    fn run_sys(&self, cmd: SysCommand, mid: &str) -> Option<String> {
        match cmd {
            SysCommand::Version => Some(FIRMWARE_VERSION.into()),
            SysCommand::SyncTime(secs) => {
                self.system.set_time(secs);
                None
            }
            SysCommand::Ota(url) => {
                self.system.start_ota(&url, mid);
                None
            }
            SysCommand::Bind { mac, name } => Some(
                self.bind(mac, &name)
                    .map_or_else(|| "fail".into(), |a| format_addr(a).as_str().into()),
            ),
            SysCommand::BindMalformed => Some("fail".into()),
            SysCommand::UnbindAll => {
                self.unbind_all();
                Some("all".into())
            }
            SysCommand::Unbind { addr, raw } => {
                Some(if self.unbind(addr) == 0 { "fail".into() } else { raw })
            }
            SysCommand::Clear => {
                if let Err(e) = lock(&self.storage).reset_network() {
                    warn!("gateway: network reset failed: {}", e);
                }
                self.system.request_restart();
                Some("ok".into())
            }
        }
    }

    fn run_node(&self, dst: u16, key: &str, cmd: NodeCommand, mid: &str) {
        let Some(msg) = self.router.build_message(cmd.opcode, &cmd.data) else {
            warn!("gateway: unusable command 0x{:04x} for 0x{:04x}", cmd.opcode, dst);
            self.publish(&cloud_text_message(dst, mid, key, "fail"));
            return;
        };

        let outcome = self.router.send(&self.mesh, &self.events, dst, &msg);
        self.sink.emit(&GatewayEvent::CommandSent { dst, opcode: cmd.opcode, outcome });

        if !outcome.succeeded() {
            self.publish(&cloud_text_message(dst, mid, key, "fail"));
            return;
        }
        // Sets acknowledge themselves; gets wait for the node's status.
        if matches!(cmd.opcode, OP_GEN_ONOFF_SET | OP_LIGHT_HSL_SET | OP_LIGHT_CTL_SET) {
            if let Some(ack) = opcode::ack_code(cmd.opcode) {
                self.publish(&cloud_message(dst, mid, ack, &cmd.data));
            }
        }
    }

    /// Track cloud link state; announce the firmware version on connect.
    pub fn on_cloud_connection(&self, connected: bool) {
        let was = self.cloud_up.swap(connected, Ordering::AcqRel);
        if connected && !was {
            self.publish(&cloud_text_message(ROOT_ADDR, DEFAULT_MID, "ver", FIRMWARE_VERSION));
        }
    }

    /// Publish upstream, or drop while the link is down.
    fn publish(&self, message: &str) {
        if !self.cloud.is_connected() {
            self.sink.emit(&GatewayEvent::CloudOffline { dropped: 1 });
            return;
        }
        if let Err(e) = self.cloud.publish(message) {
            warn!("gateway: publish failed: {}", e);
        }
    }

    /// Turn one drained transfer record into a cloud message.
    pub fn publish_record(&self, record: &TransferRecord) {
        let mid = lock(&self.last_mid).clone();
        match record.to_cloud_json(&mid) {
            Some(json) => self.publish(&json),
            None => debug!("gateway: no cloud code for 0x{:06x}", record.opcode),
        }
    }

    // ── Provisioning API ──────────────────────────────────────

    /// Provision `mac`, then commit it to the binding table.  Returns the
    /// node's unicast address.
    pub fn bind(&self, mac: MacAddr, name: &str) -> Option<u16> {
        let addr = self.session.bind(&self.events, mac, name).and_then(|record| {
            let addr = record.unicast_addr;
            lock(&self.mesh_bindings)
                .add_or_update(record, self.now_ms())
                .then_some(addr)
        });
        self.sink.emit(&GatewayEvent::BindFinished { mac, unicast_addr: addr });
        addr
    }

    /// Reset and forget one node.  Returns `addr`, or 0 when refused.
    pub fn unbind(&self, addr: u16) -> u16 {
        let done = {
            let mut delay = lock(&self.delay);
            self.session.unbind(&self.mesh, &self.events, &mut *delay, addr)
        };
        if done != 0 {
            lock(&self.mesh_bindings).remove_by_unicast(done, self.now_ms());
            self.sink.emit(&GatewayEvent::Unbound { addr: done });
        }
        done
    }

    /// Reset every node, wipe the binding table and the stack's own state.
    pub fn unbind_all(&self) {
        let nodes = {
            let mut delay = lock(&self.delay);
            self.session
                .unbind_all_nodes(&self.mesh, &self.events, &mut *delay)
        };
        {
            let mut bindings = lock(&self.mesh_bindings);
            bindings.remove_all(&mut *lock(&self.storage));
        }
        if let Err(e) = self.mesh.erase_settings() {
            warn!("gateway: erase mesh settings failed: {}", e);
        }
        lock(&self.heartbeat).rekey(&self.mesh.provisioned_nodes());
        self.sink.emit(&GatewayEvent::UnboundAll { nodes: nodes.len() });
    }

    /// Remember a GATT-client peer.
    pub fn add_gattc_peer(&self, mac: MacAddr, product_id: u8, name: &str) -> bool {
        lock(&self.gattc_bindings).add_or_update(
            BindingRecord::new(mac, 0, product_id, name),
            self.now_ms(),
        )
    }

    pub fn gattc_peer_name(&self, mac: &MacAddr) -> Option<heapless::String<16>> {
        lock(&self.gattc_bindings)
            .find_name_by_mac(mac)
            .and_then(|n| heapless::String::try_from(n).ok())
    }

    // ── Periodic work ─────────────────────────────────────────

    pub fn tick_heartbeat(&self) -> usize {
        let (online, tracked) = {
            let mut hb = lock(&self.heartbeat);
            (hb.tick(), hb.entries().len())
        };
        self.sink.emit(&GatewayEvent::HeartbeatTick { online, tracked });
        online
    }

    /// Write dirty binding tables that have been quiet for the debounce
    /// window.
    pub fn flush_bindings(&self) {
        let now = self.now_ms();
        let debounce = u64::from(self.cfg.flush_debounce_ms);
        for table in [&self.mesh_bindings, &self.gattc_bindings] {
            let mut bindings = lock(table);
            if bindings.flush_if_dirty(&mut *lock(&self.storage), now, debounce) {
                self.sink.emit(&GatewayEvent::BindingsFlushed { records: bindings.len() });
            }
        }
    }

    // ── Queries ───────────────────────────────────────────────

    pub fn config(&self) -> &GatewayConfig {
        &self.cfg
    }

    pub fn keys(&self) -> &ProvisionerKeys {
        &self.keys
    }

    pub fn transfer(&self) -> &TransferChannel {
        &self.transfer
    }

    pub fn last_mid(&self) -> String {
        lock(&self.last_mid).clone()
    }

    pub fn session_phase(&self) -> SessionPhase {
        self.session.phase()
    }

    pub fn pending_command(&self) -> Option<PendingCommand> {
        self.router.pending()
    }

    pub fn is_node_online(&self, addr: u16) -> bool {
        lock(&self.heartbeat).is_online(addr)
    }

    pub fn binding_name(&self, mac: &MacAddr) -> Option<heapless::String<16>> {
        lock(&self.mesh_bindings)
            .find_name_by_mac(mac)
            .and_then(|n| heapless::String::try_from(n).ok())
    }

    pub fn binding_for(&self, addr: u16) -> Option<BindingRecord> {
        lock(&self.mesh_bindings).find_by_unicast(addr).cloned()
    }

    pub fn find_mac_by_name(&self, name: &str, select_index: usize) -> Option<MacAddr> {
        lock(&self.mesh_bindings).find_addr_by_name(name, select_index)
    }

    pub fn bindings_len(&self) -> usize {
        lock(&self.mesh_bindings).len()
    }

    /// Run `f` against the storage backend (inspection, tests).
    pub fn with_storage<R>(&self, f: impl FnOnce(&mut S) -> R) -> R {
        f(&mut lock(&self.storage))
    }

    fn now_ms(&self) -> u64 {
        self.boot.elapsed().as_millis() as u64
    }
}
