//! Single-slot provisioning session and the post-provisioning config chain.
//!
//! ```text
//!  bind() ──▶ Scanning ──adv match──▶ add_unprov_device
//!                │                         │
//!                ▼  PROV_OPEN (8 s)        ▼
//!            LinkOpen ──prov complete──▶ CompositionDataGet
//!                │  PROV_COMP (8 s)         │ status
//!                ▼                          ▼
//!         bind() returns          NetKeyAdd → AppKeyAdd → ModelAppBind
//!                                       → HeartbeatPubSet → Bound
//! ```
//!
//! [`ProvisioningSession::bind`] blocks on the shared [`EventGroup`]; the
//! `on_*` handlers run on the mesh callback context and set its bits.  Each
//! config status triggers the next request, so the chain keeps running
//! after `bind` has returned.  Any rejected send, non-zero status or
//! timeout aborts the chain; the node stays provisioned but partially
//! configured.

use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use embedded_hal::delay::DelayNs;
use log::{debug, info, warn};

use crate::app::ports::{MeshError, MeshStack};
use crate::binding::BindingRecord;
use crate::config::GatewayConfig;
use crate::mesh::composition::CompositionData;
use crate::mesh::keys::ProvisionerKeys;
use crate::mesh::message::{
    ConfigRequest, HeartbeatPublication, MessageContext, UnprovisionedDevice,
};
use crate::mesh::opcode::OP_NODE_RESET;
use crate::mesh::{format_mac, MacAddr, CID_COMPANY, NET_PRIMARY, VENDOR_MODEL_SERVER};
use crate::sync::{EventGroup, PROV_CLOSE, PROV_COMP, PROV_DELETE, PROV_ERROR, PROV_OPEN};

const PROV_BITS: u32 = PROV_OPEN | PROV_CLOSE | PROV_COMP | PROV_ERROR | PROV_DELETE;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    Idle,
    Scanning,
    LinkOpen,
    ProvisioningComplete,
    FetchingComposition,
    AddingNetKey,
    AddingAppKey,
    BindingModelApp,
    SettingHeartbeatPub,
    Bound,
}

/// What a config status did to the chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChainProgress {
    /// Not for the running chain (stale, other node, node reset).
    Ignored,
    /// Next request sent; the chain is now in this phase.
    Advanced(SessionPhase),
    /// Heartbeat publication acknowledged: node fully configured.
    Completed { addr: u16 },
    /// Chain stopped at `opcode`.
    Aborted { addr: u16, opcode: u32 },
}

#[derive(Debug, Clone)]
struct ProvisioningRequest {
    target_mac: MacAddr,
    target_name: heapless::String<16>,
    product_id: u8,
    unicast_addr: u16,
    phase: SessionPhase,
}

#[derive(Debug, Clone, Copy)]
struct ConfigChain {
    addr: u16,
    step: SessionPhase,
}

#[derive(Debug)]
struct SessionState {
    request: Option<ProvisioningRequest>,
    chain: Option<ConfigChain>,
    /// Reported when neither a request nor a chain is running.
    rest_phase: SessionPhase,
}

pub struct ProvisioningSession {
    state: Mutex<SessionState>,
    /// Serialises bind / unbind / unbind-all.
    op_lock: Mutex<()>,
    keys: ProvisionerKeys,
    cfg: GatewayConfig,
}

impl ProvisioningSession {
    pub fn new(cfg: &GatewayConfig, keys: &ProvisionerKeys) -> Self {
        Self {
            state: Mutex::new(SessionState {
                request: None,
                chain: None,
                rest_phase: SessionPhase::Idle,
            }),
            op_lock: Mutex::new(()),
            keys: keys.clone(),
            cfg: cfg.clone(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, SessionState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn phase(&self) -> SessionPhase {
        let st = self.lock();
        if let Some(req) = &st.request {
            return req.phase;
        }
        st.chain.map_or(st.rest_phase, |c| c.step)
    }

    pub fn is_active(&self) -> bool {
        self.lock().request.is_some()
    }

    // ── Blocking API ──────────────────────────────────────────

    /// Provision the device advertising `mac` and name it `name`.
    ///
    /// Returns the record to commit once the device completed provisioning
    /// with an address at or above the provisioner start address and the
    /// config chain was started.  Blocks for at most the link-open plus
    /// provisioning-complete timeouts.
    pub fn bind(&self, events: &EventGroup, mac: MacAddr, name: &str) -> Option<BindingRecord> {
        let _op = self.op_lock.lock().unwrap_or_else(PoisonError::into_inner);

        // Clear before arming so a fast link-open is never lost.
        events.clear(PROV_BITS);
        {
            let mut st = self.lock();
            st.request = Some(ProvisioningRequest {
                target_mac: mac,
                target_name: BindingRecord::new(mac, 0, 0, name).name,
                product_id: 0,
                unicast_addr: 0,
                phase: SessionPhase::Scanning,
            });
        }
        info!("prov: waiting for {} '{}'", format_mac(&mac), name);

        let mut result = None;
        let bits = events.wait_any(
            PROV_OPEN | PROV_ERROR,
            Duration::from_millis(u64::from(self.cfg.link_open_timeout_ms)),
        );

        if bits & PROV_OPEN == 0 {
            warn!(
                "prov: no link to {} ({})",
                format_mac(&mac),
                if bits & PROV_ERROR != 0 { "add failed" } else { "timeout" }
            );
        } else {
            let bits = events.wait_any(
                PROV_CLOSE | PROV_COMP,
                Duration::from_millis(u64::from(self.cfg.prov_complete_timeout_ms)),
            );
            let st = self.lock();
            if let Some(req) = &st.request {
                if bits & PROV_COMP != 0 && req.unicast_addr >= self.cfg.prov_start_addr {
                    result = Some(BindingRecord {
                        mac: req.target_mac,
                        unicast_addr: req.unicast_addr,
                        product_id: req.product_id,
                        name: req.target_name.clone(),
                    });
                } else {
                    warn!(
                        "prov: {} not completed (bits=0x{:02x} addr=0x{:04x})",
                        format_mac(&mac),
                        bits,
                        req.unicast_addr
                    );
                }
            }
        }

        self.lock().request = None;
        result
    }

    /// Reset and delete one node.  Returns `addr`, or 0 when `addr` is
    /// below the provisioner start address.
    pub fn unbind<M: MeshStack, D: DelayNs>(
        &self,
        mesh: &M,
        events: &EventGroup,
        delay: &mut D,
        addr: u16,
    ) -> u16 {
        if addr < self.cfg.prov_start_addr {
            warn!("prov: refusing to unbind 0x{:04x}", addr);
            return 0;
        }
        let _op = self.op_lock.lock().unwrap_or_else(PoisonError::into_inner);
        self.reset_and_delete(
            mesh,
            events,
            delay,
            addr,
            self.cfg.unbind_reset_delay_ms,
            self.cfg.unbind_delete_timeout_ms,
        );
        addr
    }

    /// Reset and delete every node in the stack's live table.  Returns the
    /// addresses processed, in order.
    pub fn unbind_all_nodes<M: MeshStack, D: DelayNs>(
        &self,
        mesh: &M,
        events: &EventGroup,
        delay: &mut D,
    ) -> Vec<u16> {
        let _op = self.op_lock.lock().unwrap_or_else(PoisonError::into_inner);
        let nodes = mesh.provisioned_nodes();
        info!("prov: unbinding {} nodes", nodes.len());
        for &addr in &nodes {
            self.reset_and_delete(
                mesh,
                events,
                delay,
                addr,
                self.cfg.unbind_all_reset_delay_ms,
                self.cfg.unbind_all_delete_timeout_ms,
            );
        }
        self.lock().chain = None;
        nodes
    }

    fn reset_and_delete<M: MeshStack, D: DelayNs>(
        &self,
        mesh: &M,
        events: &EventGroup,
        delay: &mut D,
        addr: u16,
        reset_delay_ms: u32,
        delete_timeout_ms: u32,
    ) {
        let ctx = MessageContext {
            net_idx: self.keys.net_idx,
            app_idx: self.keys.app_idx,
            dst: addr,
            ttl: self.cfg.msg_ttl,
            send_rel: false,
            timeout_ms: self.cfg.msg_timeout_ms,
            opcode: OP_NODE_RESET,
        };
        if let Err(e) = mesh.config_send(&ctx, &ConfigRequest::NodeReset) {
            warn!("prov: node reset 0x{:04x} failed: {}", addr, e);
        }
        delay.delay_ms(reset_delay_ms);

        events.clear(PROV_DELETE);
        if let Err(e) = mesh.delete_node(addr) {
            warn!("prov: delete 0x{:04x} failed: {}", addr, e);
        }
        let bits = events.wait_any(
            PROV_DELETE,
            Duration::from_millis(u64::from(delete_timeout_ms)),
        );
        if bits == 0 {
            warn!("prov: no delete confirmation for 0x{:04x}", addr);
        }

        let mut st = self.lock();
        if st.chain.is_some_and(|c| c.addr == addr) {
            st.chain = None;
            st.rest_phase = SessionPhase::Idle;
        }
    }

    // ── Mesh callback handlers ────────────────────────────────

    /// Unprovisioned beacon.  Returns the product id when it belongs to the
    /// device being bound and provisioning was started.
    pub fn on_unprov_adv<M: MeshStack>(
        &self,
        mesh: &M,
        events: &EventGroup,
        device: &UnprovisionedDevice,
    ) -> Option<u8> {
        let pid = {
            let mut st = self.lock();
            let req = st.request.as_mut()?;
            if req.phase != SessionPhase::Scanning || req.target_mac != device.addr {
                return None;
            }
            req.product_id = device.uuid[2];
            req.phase = SessionPhase::LinkOpen;
            req.product_id
        };

        if let Err(e) = mesh.add_unprov_device(device) {
            warn!("prov: add {} failed: {}", format_mac(&device.addr), e);
            events.set(PROV_ERROR);
            return None;
        }
        info!("prov: matched {} pid={}", format_mac(&device.addr), pid);
        Some(pid)
    }

    pub fn on_link_open(&self, events: &EventGroup) {
        events.set(PROV_OPEN);
    }

    pub fn on_link_close(&self, events: &EventGroup, reason: u8) {
        debug!("prov: link closed (reason {})", reason);
        events.set(PROV_CLOSE);
    }

    pub fn on_node_deleted(&self, events: &EventGroup, addr: u16, err: i32) {
        if err != 0 {
            warn!("prov: delete 0x{:04x} reported err {}", addr, err);
        }
        events.set(PROV_DELETE);
    }

    /// Provisioning finished for `unicast_addr`: start the config chain.
    ///
    /// The address is only recorded, and `PROV_COMP` only set, once the
    /// composition-data get was accepted by the stack.
    pub fn on_prov_complete<M: MeshStack>(
        &self,
        mesh: &M,
        events: &EventGroup,
        unicast_addr: u16,
    ) -> Result<(), MeshError> {
        let request = ConfigRequest::CompositionDataGet { page: 0 };
        mesh.config_send(&self.config_ctx(unicast_addr, request.opcode()), &request)
            .inspect_err(|e| {
                warn!("prov: composition get 0x{:04x} failed: {}", unicast_addr, e);
            })?;

        {
            let mut st = self.lock();
            if let Some(req) = st.request.as_mut() {
                req.unicast_addr = unicast_addr;
                req.phase = SessionPhase::ProvisioningComplete;
            }
            st.chain = Some(ConfigChain {
                addr: unicast_addr,
                step: SessionPhase::FetchingComposition,
            });
        }
        events.set(PROV_COMP);
        Ok(())
    }

    /// Config-client status.  Advances the chain when it answers the
    /// request the chain is waiting on.
    pub fn on_config_status<M: MeshStack>(
        &self,
        mesh: &M,
        opcode: u32,
        addr: u16,
        error_code: i32,
        data: &[u8],
    ) -> ChainProgress {
        let Some(chain) = self.current_chain(opcode, addr) else {
            return ChainProgress::Ignored;
        };

        if error_code != 0 {
            warn!(
                "prov: 0x{:04x} step {:?} status err {}",
                addr, chain.step, error_code
            );
            return self.abort(addr, opcode);
        }

        let (next, request) = match chain.step {
            SessionPhase::FetchingComposition => {
                match CompositionData::parse(data) {
                    Ok(comp) => info!("prov: 0x{:04x} {}", addr, comp),
                    Err(e) => warn!("prov: 0x{:04x} {}", addr, e),
                }
                if let Err(e) = mesh.store_composition(addr, data) {
                    warn!("prov: store composition 0x{:04x} failed: {}", addr, e);
                    return self.abort(addr, opcode);
                }
                (
                    SessionPhase::AddingNetKey,
                    ConfigRequest::NetKeyAdd {
                        net_idx: self.keys.net_idx,
                        net_key: self.keys.net_key,
                    },
                )
            }
            SessionPhase::AddingNetKey => (
                SessionPhase::AddingAppKey,
                ConfigRequest::AppKeyAdd {
                    net_idx: self.keys.net_idx,
                    app_idx: self.keys.app_idx,
                    app_key: self.keys.app_key,
                },
            ),
            SessionPhase::AddingAppKey => (
                SessionPhase::BindingModelApp,
                ConfigRequest::ModelAppBind {
                    element_addr: addr,
                    app_idx: self.keys.app_idx,
                    model_id: VENDOR_MODEL_SERVER,
                    company_id: CID_COMPANY,
                },
            ),
            SessionPhase::BindingModelApp => (
                SessionPhase::SettingHeartbeatPub,
                ConfigRequest::HeartbeatPubSet(HeartbeatPublication {
                    dst: self.cfg.heartbeat_group_addr,
                    period: self.cfg.heartbeat_pub_period,
                    ttl: self.cfg.heartbeat_pub_ttl,
                    count: self.cfg.heartbeat_pub_count,
                    features: self.cfg.heartbeat_pub_features,
                    net_idx: self.keys.net_idx,
                }),
            ),
            SessionPhase::SettingHeartbeatPub => {
                let mut st = self.lock();
                st.chain = None;
                st.rest_phase = SessionPhase::Bound;
                info!("prov: 0x{:04x} configured", addr);
                return ChainProgress::Completed { addr };
            }
            _ => return ChainProgress::Ignored,
        };

        if let Err(e) = mesh.config_send(&self.config_ctx(addr, request.opcode()), &request) {
            warn!("prov: 0x{:04x} {:?} send failed: {}", addr, next, e);
            return self.abort(addr, request.opcode());
        }
        if let Some(c) = self.lock().chain.as_mut().filter(|c| c.addr == addr) {
            c.step = next;
        }
        ChainProgress::Advanced(next)
    }

    /// Config-client timeout: abort the chain if it was waiting on it.
    pub fn on_config_timeout(&self, opcode: u32, addr: u16) -> ChainProgress {
        if self.current_chain(opcode, addr).is_none() {
            return ChainProgress::Ignored;
        }
        warn!("prov: 0x{:04x} opcode 0x{:04x} timed out", addr, opcode);
        self.abort(addr, opcode)
    }

    fn current_chain(&self, opcode: u32, addr: u16) -> Option<ConfigChain> {
        self.lock()
            .chain
            .filter(|c| c.addr == addr && step_opcode(c.step) == Some(opcode))
    }

    fn abort(&self, addr: u16, opcode: u32) -> ChainProgress {
        let mut st = self.lock();
        st.chain = None;
        st.rest_phase = SessionPhase::Idle;
        ChainProgress::Aborted { addr, opcode }
    }

    fn config_ctx(&self, dst: u16, opcode: u32) -> MessageContext {
        MessageContext {
            net_idx: NET_PRIMARY,
            app_idx: self.keys.app_idx,
            dst,
            ttl: self.cfg.msg_ttl,
            send_rel: false,
            timeout_ms: self.cfg.msg_timeout_ms,
            opcode,
        }
    }
}

/// Opcode of the status a chain phase is waiting for.
fn step_opcode(step: SessionPhase) -> Option<u32> {
    use crate::mesh::opcode::{
        OP_APP_KEY_ADD, OP_COMPOSITION_DATA_GET, OP_HEARTBEAT_PUB_SET, OP_MODEL_APP_BIND,
        OP_NET_KEY_ADD,
    };
    match step {
        SessionPhase::FetchingComposition => Some(OP_COMPOSITION_DATA_GET),
        SessionPhase::AddingNetKey => Some(OP_NET_KEY_ADD),
        SessionPhase::AddingAppKey => Some(OP_APP_KEY_ADD),
        SessionPhase::BindingModelApp => Some(OP_MODEL_APP_BIND),
        SessionPhase::SettingHeartbeatPub => Some(OP_HEARTBEAT_PUB_SET),
        _ => None,
    }
}
