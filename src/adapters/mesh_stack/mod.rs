//! BLE-Mesh provisioner stack adapter.
//!
//! Implements [`MeshStack`] on top of the ESP-IDF BLE-Mesh component and
//! turns its C callbacks into [`MeshEvent`]s.
//!
//! ## cfg gating
//!
//! - **`target_os = "espidf"`**: `esp_ble_mesh_*` FFI in `esp_impl`.
//! - **all other targets**: an in-memory stack that records every request,
//!   for host-side tests.
//!
//! ## Event delivery
//!
//! Stack callbacks are plain C function pointers.  They decode the
//! callback parameters and hand the event to the handler installed with
//! [`set_event_handler`], normally `Gateway::on_mesh_event`.

use std::sync::{Mutex, OnceLock, PoisonError};

use log::{info, warn};

use crate::app::ports::{MeshError, MeshStack};
use crate::mesh::event::MeshEvent;
use crate::mesh::keys::ProvisionerKeys;
use crate::mesh::message::{
    ClientMessage, ConfigRequest, HeartbeatFilter, LocalModel, MessageContext,
    UnprovisionedDevice,
};

#[cfg(target_os = "espidf")]
mod esp_impl;

type Handler = Box<dyn Fn(MeshEvent) + Send + Sync>;

static EVENT_HANDLER: OnceLock<Handler> = OnceLock::new();

/// Install the mesh event consumer.  Only the first call takes effect.
pub fn set_event_handler(handler: impl Fn(MeshEvent) + Send + Sync + 'static) -> bool {
    EVENT_HANDLER.set(Box::new(handler)).is_ok()
}

/// Forward one decoded stack event to the installed handler.
pub(crate) fn dispatch(event: MeshEvent) {
    match EVENT_HANDLER.get() {
        Some(handler) => handler(event),
        None => warn!("mesh: event before handler installed: {:?}", event),
    }
}

// ───────────────────────────────────────────────────────────────
// Host simulation state
// ───────────────────────────────────────────────────────────────

/// A request the simulated stack accepted.
#[cfg(not(target_os = "espidf"))]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SimRequest {
    Config(MessageContext, ConfigRequest),
    Client(MessageContext, ClientMessage),
    Provision(UnprovisionedDevice),
    Delete(u16),
}

#[cfg(not(target_os = "espidf"))]
#[derive(Debug, Default)]
struct SimState {
    uuid_match: Vec<u8>,
    net_keys: Vec<(u16, [u8; 16])>,
    app_keys: Vec<(u16, u16, [u8; 16])>,
    local_models: Vec<(u16, LocalModel)>,
    heartbeat_recv: bool,
    heartbeat_filter: Option<HeartbeatFilter>,
    nodes: Vec<u16>,
    requests: Vec<SimRequest>,
}

// ───────────────────────────────────────────────────────────────
// Adapter
// ───────────────────────────────────────────────────────────────

pub struct MeshStackAdapter {
    own_addr: u16,
    #[cfg(not(target_os = "espidf"))]
    sim: Mutex<SimState>,
    #[cfg(target_os = "espidf")]
    _guard: Mutex<()>,
}

impl MeshStackAdapter {
    /// Register the gateway composition and enable the provisioner role.
    ///
    /// The Bluetooth controller must already be up.
    pub fn init(keys: &ProvisionerKeys, own_addr: u16, start_addr: u16) -> Result<Self, MeshError> {
        #[cfg(target_os = "espidf")]
        esp_impl::init(keys, own_addr, start_addr)?;
        #[cfg(not(target_os = "espidf"))]
        let _ = (keys, start_addr);

        info!("mesh: provisioner up at 0x{:04x}", own_addr);
        Ok(Self {
            own_addr,
            #[cfg(not(target_os = "espidf"))]
            sim: Mutex::new(SimState::default()),
            #[cfg(target_os = "espidf")]
            _guard: Mutex::new(()),
        })
    }

    pub fn own_addr(&self) -> u16 {
        self.own_addr
    }

    #[cfg(not(target_os = "espidf"))]
    fn sim(&self) -> std::sync::MutexGuard<'_, SimState> {
        self.sim.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Simulation: drain the recorded requests.
    #[cfg(not(target_os = "espidf"))]
    pub fn take_requests(&self) -> Vec<SimRequest> {
        core::mem::take(&mut self.sim().requests)
    }

    /// Simulation: place a node in the live table.
    #[cfg(not(target_os = "espidf"))]
    pub fn sim_add_node(&self, addr: u16) {
        let mut s = self.sim();
        if !s.nodes.contains(&addr) {
            s.nodes.push(addr);
        }
    }

    /// Simulation: UUID prefix currently armed.
    #[cfg(not(target_os = "espidf"))]
    pub fn uuid_match(&self) -> Vec<u8> {
        self.sim().uuid_match.clone()
    }

    /// Simulation: `(net_idx, app_idx)` pairs installed locally.
    #[cfg(not(target_os = "espidf"))]
    pub fn local_app_keys(&self) -> Vec<(u16, u16)> {
        self.sim().app_keys.iter().map(|(n, a, _)| (*n, *a)).collect()
    }

    #[cfg(not(target_os = "espidf"))]
    pub fn heartbeat_filter(&self) -> Option<HeartbeatFilter> {
        self.sim().heartbeat_filter
    }
}

#[cfg(target_os = "espidf")]
impl MeshStack for MeshStackAdapter {
    fn set_uuid_match(&self, prefix: &[u8]) -> Result<(), MeshError> {
        esp_impl::set_uuid_match(prefix)
    }

    fn add_local_net_key(&self, net_key: &[u8; 16], net_idx: u16) -> Result<(), MeshError> {
        esp_impl::add_local_net_key(net_key, net_idx)
    }

    fn update_local_net_key(&self, net_key: &[u8; 16], net_idx: u16) -> Result<(), MeshError> {
        esp_impl::update_local_net_key(net_key, net_idx)
    }

    fn add_local_app_key(&self, app_key: &[u8; 16], net_idx: u16, app_idx: u16) -> Result<(), MeshError> {
        esp_impl::add_local_app_key(app_key, net_idx, app_idx)
    }

    fn update_local_app_key(&self, app_key: &[u8; 16], net_idx: u16, app_idx: u16) -> Result<(), MeshError> {
        esp_impl::update_local_app_key(app_key, net_idx, app_idx)
    }

    fn bind_local_model(&self, app_idx: u16, model: LocalModel) -> Result<(), MeshError> {
        esp_impl::bind_local_model(self.own_addr, app_idx, model)
    }

    fn enable_heartbeat_recv(&self) -> Result<(), MeshError> {
        esp_impl::enable_heartbeat_recv()
    }

    fn set_heartbeat_filter(&self, filter: HeartbeatFilter) -> Result<(), MeshError> {
        esp_impl::set_heartbeat_filter(filter)
    }

    fn add_unprov_device(&self, device: &UnprovisionedDevice) -> Result<(), MeshError> {
        esp_impl::add_unprov_device(device)
    }

    fn config_send(&self, ctx: &MessageContext, request: &ConfigRequest) -> Result<(), MeshError> {
        let _g = self._guard.lock().unwrap_or_else(PoisonError::into_inner);
        esp_impl::config_send(ctx, request)
    }

    fn store_composition(&self, addr: u16, data: &[u8]) -> Result<(), MeshError> {
        esp_impl::store_composition(addr, data)
    }

    fn client_send(&self, ctx: &MessageContext, msg: &ClientMessage) -> Result<(), MeshError> {
        let _g = self._guard.lock().unwrap_or_else(PoisonError::into_inner);
        esp_impl::client_send(ctx, msg)
    }

    fn delete_node(&self, addr: u16) -> Result<(), MeshError> {
        esp_impl::delete_node(addr)
    }

    fn provisioned_nodes(&self) -> Vec<u16> {
        esp_impl::provisioned_nodes()
    }

    fn erase_settings(&self) -> Result<(), MeshError> {
        esp_impl::erase_settings()
    }
}

#[cfg(not(target_os = "espidf"))]
impl MeshStack for MeshStackAdapter {
    fn set_uuid_match(&self, prefix: &[u8]) -> Result<(), MeshError> {
        self.sim().uuid_match = prefix.to_vec();
        Ok(())
    }

    fn add_local_net_key(&self, net_key: &[u8; 16], net_idx: u16) -> Result<(), MeshError> {
        let mut s = self.sim();
        if s.net_keys.iter().any(|(idx, _)| *idx == net_idx) {
            return Err(MeshError::Rejected(-1));
        }
        s.net_keys.push((net_idx, *net_key));
        Ok(())
    }

    fn update_local_net_key(&self, net_key: &[u8; 16], net_idx: u16) -> Result<(), MeshError> {
        let mut s = self.sim();
        match s.net_keys.iter_mut().find(|(idx, _)| *idx == net_idx) {
            Some(slot) => {
                slot.1 = *net_key;
                Ok(())
            }
            None => Err(MeshError::Rejected(-1)),
        }
    }

    fn add_local_app_key(&self, app_key: &[u8; 16], net_idx: u16, app_idx: u16) -> Result<(), MeshError> {
        let mut s = self.sim();
        if s.app_keys.iter().any(|(_, a, _)| *a == app_idx) {
            return Err(MeshError::Rejected(-1));
        }
        s.app_keys.push((net_idx, app_idx, *app_key));
        Ok(())
    }

    fn update_local_app_key(&self, app_key: &[u8; 16], net_idx: u16, app_idx: u16) -> Result<(), MeshError> {
        let mut s = self.sim();
        match s.app_keys.iter_mut().find(|(_, a, _)| *a == app_idx) {
            Some(slot) => {
                *slot = (net_idx, app_idx, *app_key);
                Ok(())
            }
            None => Err(MeshError::Rejected(-1)),
        }
    }

    fn bind_local_model(&self, app_idx: u16, model: LocalModel) -> Result<(), MeshError> {
        self.sim().local_models.push((app_idx, model));
        Ok(())
    }

    fn enable_heartbeat_recv(&self) -> Result<(), MeshError> {
        self.sim().heartbeat_recv = true;
        Ok(())
    }

    fn set_heartbeat_filter(&self, filter: HeartbeatFilter) -> Result<(), MeshError> {
        let mut s = self.sim();
        if !s.heartbeat_recv {
            return Err(MeshError::NotReady);
        }
        s.heartbeat_filter = Some(filter);
        Ok(())
    }

    fn add_unprov_device(&self, device: &UnprovisionedDevice) -> Result<(), MeshError> {
        self.sim().requests.push(SimRequest::Provision(device.clone()));
        Ok(())
    }

    fn config_send(&self, ctx: &MessageContext, request: &ConfigRequest) -> Result<(), MeshError> {
        self.sim().requests.push(SimRequest::Config(*ctx, request.clone()));
        Ok(())
    }

    fn store_composition(&self, addr: u16, _data: &[u8]) -> Result<(), MeshError> {
        self.sim_add_node(addr);
        Ok(())
    }

    fn client_send(&self, ctx: &MessageContext, msg: &ClientMessage) -> Result<(), MeshError> {
        self.sim().requests.push(SimRequest::Client(*ctx, msg.clone()));
        Ok(())
    }

    fn delete_node(&self, addr: u16) -> Result<(), MeshError> {
        {
            let mut s = self.sim();
            let before = s.nodes.len();
            s.nodes.retain(|a| *a != addr);
            if s.nodes.len() == before {
                return Err(MeshError::UnknownNode(addr));
            }
            s.requests.push(SimRequest::Delete(addr));
        }
        // The real stack confirms deletion through its provisioning callback.
        dispatch(MeshEvent::NodeDeleted { addr, err: 0 });
        Ok(())
    }

    fn provisioned_nodes(&self) -> Vec<u16> {
        self.sim().nodes.clone()
    }

    fn erase_settings(&self) -> Result<(), MeshError> {
        let mut s = self.sim();
        s.nodes.clear();
        s.net_keys.clear();
        s.app_keys.clear();
        s.local_models.clear();
        Ok(())
    }
}
