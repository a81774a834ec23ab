//! ESP-IDF BLE-Mesh FFI for `MeshStackAdapter`.
//!
//! Compiled only for `target_os = "espidf"`.  Owns the gateway's mesh
//! composition (one element: config server + config / generic / light /
//! vendor clients) and the C callbacks that feed [`super::dispatch`].

use std::sync::OnceLock;

use log::{info, warn};

use esp_idf_svc::sys::*;

use crate::app::ports::MeshError;
use crate::mesh::event::{
    Bearer, ClientEventKind, MeshEvent, ctl_payload, hsl_payload, onoff_payload,
};
use crate::mesh::keys::ProvisionerKeys;
use crate::mesh::message::{
    ClientMessage, ClientModel, ConfigRequest, HeartbeatFilter, LocalModel, MessageContext,
    UnprovisionedDevice,
};
use crate::mesh::opcode::{OP_VND_ATTR_STATUS, is_vendor};
use crate::mesh::{
    CID_COMPANY, MODEL_GEN_ONOFF_CLI, MODEL_LIGHT_CTL_CLI, MODEL_LIGHT_HSL_CLI,
    VENDOR_MODEL_CLIENT,
};

const SIG_MODEL_CFG_SRV: u16 = 0x0000;
const SIG_MODEL_CFG_CLI: u16 = 0x0001;

const KEY_UNUSED: u16 = 0xFFFF;

const PROV_ADV: u32 = 1 << 0;
const PROV_GATT: u32 = 1 << 1;

const ADD_DEV_RM_AFTER_PROV: u8 = 1 << 0;
const ADD_DEV_START_PROV_NOW: u8 = 1 << 1;
const ADD_DEV_FLUSHABLE: u8 = 1 << 2;

const HB_FILTER_ACCEPTLIST: u8 = 0;
const HB_FILTER_REJECTLIST: u8 = 1;
const HB_FILTER_ADD: u8 = 0;

const ROLE_PROVISIONER: u8 = 1;

// ── Model handles ─────────────────────────────────────────────
//
// Raw pointers into the leaked composition.  The stack keeps its own
// references for the lifetime of the program, so they never dangle.

#[derive(Clone, Copy)]
struct ModelPtr(*mut esp_ble_mesh_model_t);

// SAFETY: the pointees are leaked and only mutated by the mesh stack,
// which serialises access on its own task.
unsafe impl Send for ModelPtr {}
unsafe impl Sync for ModelPtr {}

struct Models {
    cfg_cli: ModelPtr,
    onoff_cli: ModelPtr,
    hsl_cli: ModelPtr,
    ctl_cli: ModelPtr,
    vnd_cli: ModelPtr,
}

static MODELS: OnceLock<Models> = OnceLock::new();

fn check(code: esp_err_t) -> Result<(), MeshError> {
    if code == ESP_OK as esp_err_t { Ok(()) } else { Err(MeshError::Rejected(code)) }
}

fn models() -> Result<&'static Models, MeshError> {
    MODELS.get().ok_or(MeshError::NotReady)
}

// ───────────────────────────────────────────────────────────────
// Composition
// ───────────────────────────────────────────────────────────────

fn leak<T>(value: T) -> *mut T {
    Box::into_raw(Box::new(value))
}

fn sig_model(id: u16, user_data: *mut core::ffi::c_void) -> esp_ble_mesh_model_t {
    // SAFETY: an all-zero model is the C initialiser state.
    let mut m: esp_ble_mesh_model_t = unsafe { core::mem::zeroed() };
    m.__bindgen_anon_1.model_id = id;
    m.keys.fill(KEY_UNUSED);
    m.user_data = user_data;
    m
}

fn client_data() -> *mut core::ffi::c_void {
    // SAFETY: zeroed client context is what ESP_BLE_MESH_MODEL_*_CLI expects.
    leak(unsafe { core::mem::zeroed::<esp_ble_mesh_client_t>() }).cast()
}

fn vendor_client() -> esp_ble_mesh_model_t {
    let ops: &'static mut [esp_ble_mesh_model_op_t; 2] = Box::leak(Box::new([
        esp_ble_mesh_model_op_t { opcode: OP_VND_ATTR_STATUS, min_len: 1, param_cb: 0 },
        // SAFETY: terminator entry.
        unsafe { core::mem::zeroed() },
    ]));
    let mut m: esp_ble_mesh_model_t = unsafe { core::mem::zeroed() };
    m.__bindgen_anon_1.vnd.company_id = CID_COMPANY;
    m.__bindgen_anon_1.vnd.model_id = VENDOR_MODEL_CLIENT;
    m.keys.fill(KEY_UNUSED);
    m.op = ops.as_mut_ptr();
    m.user_data = client_data();
    m
}

pub(super) fn init(keys: &ProvisionerKeys, own_addr: u16, start_addr: u16) -> Result<(), MeshError> {
    if MODELS.get().is_some() {
        return Ok(());
    }

    // SAFETY: zeroed server state, then the handful of fields the macro sets.
    let mut cfg_srv: esp_ble_mesh_cfg_srv_t = unsafe { core::mem::zeroed() };
    cfg_srv.relay = ESP_BLE_MESH_RELAY_DISABLED as u8;
    cfg_srv.beacon = ESP_BLE_MESH_BEACON_ENABLED as u8;
    cfg_srv.friend_state = ESP_BLE_MESH_FRIEND_NOT_SUPPORTED as u8;
    cfg_srv.gatt_proxy = ESP_BLE_MESH_GATT_PROXY_NOT_SUPPORTED as u8;
    cfg_srv.default_ttl = 7;

    let sig: &'static mut [esp_ble_mesh_model_t; 5] = Box::leak(Box::new([
        sig_model(SIG_MODEL_CFG_SRV, leak(cfg_srv).cast()),
        sig_model(SIG_MODEL_CFG_CLI, client_data()),
        sig_model(MODEL_GEN_ONOFF_CLI, client_data()),
        sig_model(MODEL_LIGHT_HSL_CLI, client_data()),
        sig_model(MODEL_LIGHT_CTL_CLI, client_data()),
    ]));
    let vnd: &'static mut [esp_ble_mesh_model_t; 1] = Box::leak(Box::new([vendor_client()]));

    let sig_ptr = sig.as_mut_ptr();
    let vnd_ptr = vnd.as_mut_ptr();

    // SAFETY: zeroed element / composition / prov structs filled below.
    let mut elem: esp_ble_mesh_elem_t = unsafe { core::mem::zeroed() };
    elem.sig_model_count = sig.len() as u8;
    elem.vnd_model_count = vnd.len() as u8;
    elem.sig_models = sig_ptr;
    elem.vnd_models = vnd_ptr;
    let elem = leak(elem);

    let mut comp: esp_ble_mesh_comp_t = unsafe { core::mem::zeroed() };
    comp.cid = CID_COMPANY;
    comp.element_count = 1;
    comp.elements = elem;
    let comp = leak(comp);

    let uuid: &'static [u8; 16] = Box::leak(Box::new(keys.dev_uuid));
    let mut prov: esp_ble_mesh_prov_t = unsafe { core::mem::zeroed() };
    prov.prov_uuid = uuid.as_ptr();
    prov.prov_unicast_addr = own_addr;
    prov.prov_start_address = start_addr;
    let prov = leak(prov);

    // SAFETY: callbacks are `extern "C"` with the signatures the stack expects;
    // all structures passed to `esp_ble_mesh_init` are leaked.
    unsafe {
        check(esp_ble_mesh_register_prov_callback(Some(prov_cb)))?;
        check(esp_ble_mesh_register_config_client_callback(Some(cfg_client_cb)))?;
        check(esp_ble_mesh_register_generic_client_callback(Some(generic_client_cb)))?;
        check(esp_ble_mesh_register_light_client_callback(Some(light_client_cb)))?;
        check(esp_ble_mesh_register_custom_model_callback(Some(custom_model_cb)))?;
        check(esp_ble_mesh_init(prov, comp))?;
        check(esp_ble_mesh_client_model_init(vnd_ptr))?;
        check(esp_ble_mesh_provisioner_prov_enable(PROV_ADV | PROV_GATT))?;
    }

    let _ = MODELS.set(Models {
        // SAFETY: indices match the array built above.
        cfg_cli: ModelPtr(unsafe { sig_ptr.add(1) }),
        onoff_cli: ModelPtr(unsafe { sig_ptr.add(2) }),
        hsl_cli: ModelPtr(unsafe { sig_ptr.add(3) }),
        ctl_cli: ModelPtr(unsafe { sig_ptr.add(4) }),
        vnd_cli: ModelPtr(vnd_ptr),
    });
    info!("mesh(espidf): stack initialised, provisioning enabled");
    Ok(())
}

// ───────────────────────────────────────────────────────────────
// Local configuration
// ───────────────────────────────────────────────────────────────

pub(super) fn set_uuid_match(prefix: &[u8]) -> Result<(), MeshError> {
    // SAFETY: the stack copies `prefix` before returning.
    check(unsafe {
        esp_ble_mesh_provisioner_set_dev_uuid_match(prefix.as_ptr(), prefix.len() as u8, 0, false)
    })
}

pub(super) fn add_local_net_key(key: &[u8; 16], net_idx: u16) -> Result<(), MeshError> {
    check(unsafe { esp_ble_mesh_provisioner_add_local_net_key(key.as_ptr(), net_idx) })
}

pub(super) fn update_local_net_key(key: &[u8; 16], net_idx: u16) -> Result<(), MeshError> {
    check(unsafe { esp_ble_mesh_provisioner_update_local_net_key(key.as_ptr(), net_idx) })
}

pub(super) fn add_local_app_key(key: &[u8; 16], net_idx: u16, app_idx: u16) -> Result<(), MeshError> {
    check(unsafe { esp_ble_mesh_provisioner_add_local_app_key(key.as_ptr(), net_idx, app_idx) })
}

pub(super) fn update_local_app_key(key: &[u8; 16], net_idx: u16, app_idx: u16) -> Result<(), MeshError> {
    check(unsafe { esp_ble_mesh_provisioner_update_local_app_key(key.as_ptr(), net_idx, app_idx) })
}

pub(super) fn bind_local_model(own_addr: u16, app_idx: u16, model: LocalModel) -> Result<(), MeshError> {
    check(unsafe {
        esp_ble_mesh_provisioner_bind_app_key_to_local_model(
            own_addr,
            app_idx,
            model.model_id,
            model.company_id,
        )
    })
}

pub(super) fn enable_heartbeat_recv() -> Result<(), MeshError> {
    check(unsafe { esp_ble_mesh_provisioner_recv_heartbeat(true) })
}

pub(super) fn set_heartbeat_filter(filter: HeartbeatFilter) -> Result<(), MeshError> {
    let kind = if filter.reject_list { HB_FILTER_REJECTLIST } else { HB_FILTER_ACCEPTLIST };
    let info = esp_ble_mesh_heartbeat_filter_info_t { hb_src: filter.src, hb_dst: filter.dst };
    unsafe {
        check(esp_ble_mesh_provisioner_set_heartbeat_filter_type(kind))?;
        check(esp_ble_mesh_provisioner_set_heartbeat_filter_info(HB_FILTER_ADD, &info as *const _ as *mut _))
    }
}

pub(super) fn add_unprov_device(device: &UnprovisionedDevice) -> Result<(), MeshError> {
    let mut add = esp_ble_mesh_unprov_dev_add_t {
        addr: device.addr,
        addr_type: device.addr_type as _,
        uuid: device.uuid,
        oob_info: device.oob_info,
        bearer: device.bearer as _,
    };
    check(unsafe {
        esp_ble_mesh_provisioner_add_unprov_dev(
            &mut add,
            (ADD_DEV_RM_AFTER_PROV | ADD_DEV_START_PROV_NOW | ADD_DEV_FLUSHABLE) as _,
        )
    })
}

pub(super) fn store_composition(addr: u16, data: &[u8]) -> Result<(), MeshError> {
    check(unsafe {
        esp_ble_mesh_provisioner_store_node_comp_data(addr, data.as_ptr() as *mut u8, data.len() as u16)
    })
}

pub(super) fn delete_node(addr: u16) -> Result<(), MeshError> {
    check(unsafe { esp_ble_mesh_provisioner_delete_node_with_addr(addr) })
}

pub(super) fn provisioned_nodes() -> Vec<u16> {
    let mut out = Vec::new();
    // SAFETY: the table has CONFIG_BLE_MESH_MAX_PROV_NODES slots; empty ones are null.
    unsafe {
        let table = esp_ble_mesh_provisioner_get_node_table_entry();
        if table.is_null() {
            return out;
        }
        for i in 0..CONFIG_BLE_MESH_MAX_PROV_NODES as usize {
            let node = *table.add(i);
            if !node.is_null() {
                out.push((*node).unicast_addr);
            }
        }
    }
    out
}

pub(super) fn erase_settings() -> Result<(), MeshError> {
    check(unsafe { esp_ble_mesh_provisioner_direct_erase_settings() })
}

// ───────────────────────────────────────────────────────────────
// Sending
// ───────────────────────────────────────────────────────────────

fn common(model: ModelPtr, ctx: &MessageContext, opcode: u32) -> esp_ble_mesh_client_common_param_t {
    // SAFETY: zeroed params, then every field the stack reads.
    let mut p: esp_ble_mesh_client_common_param_t = unsafe { core::mem::zeroed() };
    p.opcode = opcode;
    p.model = model.0;
    p.ctx.net_idx = ctx.net_idx;
    p.ctx.app_idx = ctx.app_idx;
    p.ctx.addr = ctx.dst;
    p.ctx.send_ttl = ctx.ttl;
    p.msg_timeout = ctx.timeout_ms as i32;
    p.msg_role = ROLE_PROVISIONER;
    p
}

pub(super) fn config_send(ctx: &MessageContext, request: &ConfigRequest) -> Result<(), MeshError> {
    let models = models()?;
    let mut params = common(models.cfg_cli, ctx, request.opcode());

    if let ConfigRequest::CompositionDataGet { page } = request {
        let mut get: esp_ble_mesh_cfg_client_get_state_t = unsafe { core::mem::zeroed() };
        get.comp_data_get.page = *page;
        return check(unsafe { esp_ble_mesh_config_client_get_state(&mut params, &mut get) });
    }

    let mut set: esp_ble_mesh_cfg_client_set_state_t = unsafe { core::mem::zeroed() };
    // SAFETY: each arm writes only the union member matching the opcode.
    unsafe {
        match request {
            ConfigRequest::NetKeyAdd { net_idx, net_key } => {
                set.net_key_add.net_idx = *net_idx;
                set.net_key_add.net_key = *net_key;
            }
            ConfigRequest::AppKeyAdd { net_idx, app_idx, app_key } => {
                set.app_key_add.net_idx = *net_idx;
                set.app_key_add.app_idx = *app_idx;
                set.app_key_add.app_key = *app_key;
            }
            ConfigRequest::ModelAppBind { element_addr, app_idx, model_id, company_id } => {
                set.model_app_bind.element_addr = *element_addr;
                set.model_app_bind.model_app_idx = *app_idx;
                set.model_app_bind.model_id = *model_id;
                set.model_app_bind.company_id = *company_id;
            }
            ConfigRequest::HeartbeatPubSet(hb) => {
                set.heartbeat_pub_set.dst = hb.dst;
                set.heartbeat_pub_set.count = hb.count;
                set.heartbeat_pub_set.period = hb.period;
                set.heartbeat_pub_set.ttl = hb.ttl;
                set.heartbeat_pub_set.feature = hb.features;
                set.heartbeat_pub_set.net_idx = hb.net_idx;
            }
            ConfigRequest::NodeReset | ConfigRequest::CompositionDataGet { .. } => {}
        }
        check(esp_ble_mesh_config_client_set_state(&mut params, &mut set))
    }
}

pub(super) fn client_send(ctx: &MessageContext, msg: &ClientMessage) -> Result<(), MeshError> {
    let models = models()?;
    let opcode = msg.wire_opcode(ctx.dst);

    if let ClientMessage::Vendor { payload, .. } = msg {
        let mut c: esp_ble_mesh_msg_ctx_t = unsafe { core::mem::zeroed() };
        c.net_idx = ctx.net_idx;
        c.app_idx = ctx.app_idx;
        c.addr = ctx.dst;
        c.send_ttl = ctx.ttl;
        return check(unsafe {
            esp_ble_mesh_client_model_send_msg(
                models.vnd_cli.0,
                &mut c,
                opcode,
                payload.len() as u16,
                payload.as_ptr() as *mut u8,
                ctx.timeout_ms as i32,
                ctx.send_rel,
                ROLE_PROVISIONER,
            )
        });
    }

    let model = match msg.model() {
        ClientModel::GenericOnOff => models.onoff_cli,
        ClientModel::LightHsl => models.hsl_cli,
        ClientModel::LightCtl => models.ctl_cli,
        ClientModel::Vendor => models.vnd_cli,
    };
    let mut params = common(model, ctx, opcode);

    // SAFETY: zeroed request unions; each arm writes its own member.
    unsafe {
        match msg {
            ClientMessage::OnOffGet => {
                let mut get: esp_ble_mesh_generic_client_get_state_t = core::mem::zeroed();
                check(esp_ble_mesh_generic_client_get_state(&mut params, &mut get))
            }
            ClientMessage::OnOffSet { onoff, tid } => {
                let mut set: esp_ble_mesh_generic_client_set_state_t = core::mem::zeroed();
                set.onoff_set.onoff = u8::from(*onoff);
                set.onoff_set.tid = *tid;
                check(esp_ble_mesh_generic_client_set_state(&mut params, &mut set))
            }
            ClientMessage::HslGet | ClientMessage::CtlGet => {
                let mut get: esp_ble_mesh_light_client_get_state_t = core::mem::zeroed();
                check(esp_ble_mesh_light_client_get_state(&mut params, &mut get))
            }
            ClientMessage::HslSet { hue, saturation, lightness, tid } => {
                let mut set: esp_ble_mesh_light_client_set_state_t = core::mem::zeroed();
                set.hsl_set.hsl_hue = *hue;
                set.hsl_set.hsl_saturation = *saturation;
                set.hsl_set.hsl_lightness = *lightness;
                set.hsl_set.tid = *tid;
                check(esp_ble_mesh_light_client_set_state(&mut params, &mut set))
            }
            ClientMessage::CtlSet { lightness, temperature, delta_uv, tid } => {
                let mut set: esp_ble_mesh_light_client_set_state_t = core::mem::zeroed();
                set.ctl_set.ctl_lightness = *lightness;
                set.ctl_set.ctl_temperatrue = *temperature;
                set.ctl_set.ctl_delta_uv = *delta_uv;
                set.ctl_set.tid = *tid;
                check(esp_ble_mesh_light_client_set_state(&mut params, &mut set))
            }
            ClientMessage::Vendor { .. } => Ok(()),
        }
    }
}

// ───────────────────────────────────────────────────────────────
// Callbacks
// ───────────────────────────────────────────────────────────────

fn bearer(raw: u32) -> Bearer {
    if raw & PROV_GATT != 0 { Bearer::Gatt } else { Bearer::Adv }
}

unsafe extern "C" fn prov_cb(event: esp_ble_mesh_prov_cb_event_t, param: *mut esp_ble_mesh_prov_cb_param_t) {
    if param.is_null() {
        return;
    }
    let p = unsafe { &*param };
    let ev = match event {
        esp_ble_mesh_prov_cb_event_t_ESP_BLE_MESH_PROVISIONER_RECV_UNPROV_ADV_PKT_EVT => {
            let a = unsafe { &p.provisioner_recv_unprov_adv_pkt };
            MeshEvent::UnprovisionedAdv {
                addr: a.addr,
                addr_type: a.addr_type as u8,
                uuid: a.dev_uuid,
                oob_info: a.oob_info,
                bearer: bearer(a.bearer as u32),
            }
        }
        esp_ble_mesh_prov_cb_event_t_ESP_BLE_MESH_PROVISIONER_PROV_LINK_OPEN_EVT => {
            let a = unsafe { &p.provisioner_prov_link_open };
            MeshEvent::LinkOpen { bearer: bearer(a.bearer as u32) }
        }
        esp_ble_mesh_prov_cb_event_t_ESP_BLE_MESH_PROVISIONER_PROV_LINK_CLOSE_EVT => {
            let a = unsafe { &p.provisioner_prov_link_close };
            MeshEvent::LinkClose { bearer: bearer(a.bearer as u32), reason: a.reason }
        }
        esp_ble_mesh_prov_cb_event_t_ESP_BLE_MESH_PROVISIONER_PROV_COMPLETE_EVT => {
            let a = unsafe { &p.provisioner_prov_complete };
            MeshEvent::ProvisioningComplete {
                node_idx: a.node_idx,
                unicast_addr: a.unicast_addr,
                element_num: a.element_num,
                net_idx: a.netkey_idx,
            }
        }
        esp_ble_mesh_prov_cb_event_t_ESP_BLE_MESH_PROVISIONER_DELETE_NODE_WITH_ADDR_COMP_EVT => {
            let a = unsafe { &p.provisioner_delete_node_with_addr_comp };
            MeshEvent::NodeDeleted { addr: a.unicast_addr, err: a.err_code }
        }
        esp_ble_mesh_prov_cb_event_t_ESP_BLE_MESH_PROVISIONER_RECV_HEARTBEAT_MESSAGE_EVT => {
            let a = unsafe { &p.provisioner_recv_heartbeat };
            MeshEvent::HeartbeatReceived { src: a.hb_src, dst: a.hb_dst, rssi: a.rssi }
        }
        esp_ble_mesh_prov_cb_event_t_ESP_BLE_MESH_PROVISIONER_PROV_ENABLE_COMP_EVT => {
            info!("mesh(espidf): provisioner enabled");
            return;
        }
        _ => return,
    };
    super::dispatch(ev);
}

unsafe extern "C" fn cfg_client_cb(
    event: esp_ble_mesh_cfg_client_cb_event_t,
    param: *mut esp_ble_mesh_cfg_client_cb_param_t,
) {
    if param.is_null() || unsafe { (*param).params.is_null() } {
        return;
    }
    let p = unsafe { &*param };
    let common = unsafe { &*p.params };
    let (opcode, addr) = (common.opcode, common.ctx.addr);

    let ev = match event {
        esp_ble_mesh_cfg_client_cb_event_t_ESP_BLE_MESH_CFG_CLIENT_TIMEOUT_EVT => {
            MeshEvent::ConfigTimeout { opcode, addr }
        }
        esp_ble_mesh_cfg_client_cb_event_t_ESP_BLE_MESH_CFG_CLIENT_GET_STATE_EVT
        | esp_ble_mesh_cfg_client_cb_event_t_ESP_BLE_MESH_CFG_CLIENT_SET_STATE_EVT => {
            let mut data = Vec::new();
            if opcode == crate::mesh::opcode::OP_COMPOSITION_DATA_GET && p.error_code == 0 {
                let buf = unsafe { p.status_cb.comp_data_status.composition_data };
                if !buf.is_null() {
                    let buf = unsafe { &*buf };
                    data.extend_from_slice(unsafe {
                        core::slice::from_raw_parts(buf.data, buf.len as usize)
                    });
                }
            }
            MeshEvent::ConfigStatus { opcode, addr, error_code: p.error_code, data }
        }
        _ => return,
    };
    super::dispatch(ev);
}

fn client_kind(event: u32, get: u32, set: u32) -> ClientEventKind {
    if event == get {
        ClientEventKind::GetState
    } else if event == set {
        ClientEventKind::SetState
    } else {
        ClientEventKind::Publish
    }
}

unsafe extern "C" fn generic_client_cb(
    event: esp_ble_mesh_generic_client_cb_event_t,
    param: *mut esp_ble_mesh_generic_client_cb_param_t,
) {
    if param.is_null() || unsafe { (*param).params.is_null() } {
        return;
    }
    let p = unsafe { &*param };
    let common = unsafe { &*p.params };
    let (opcode, addr) = (common.opcode, common.ctx.addr);

    if event == esp_ble_mesh_generic_client_cb_event_t_ESP_BLE_MESH_GENERIC_CLIENT_TIMEOUT_EVT {
        super::dispatch(MeshEvent::ClientTimeout { opcode, addr });
        return;
    }
    let kind = client_kind(
        event,
        esp_ble_mesh_generic_client_cb_event_t_ESP_BLE_MESH_GENERIC_CLIENT_GET_STATE_EVT,
        esp_ble_mesh_generic_client_cb_event_t_ESP_BLE_MESH_GENERIC_CLIENT_SET_STATE_EVT,
    );
    let data = if p.error_code == 0 {
        onoff_payload(unsafe { p.status_cb.onoff_status.present_onoff } != 0)
    } else {
        Vec::new()
    };
    super::dispatch(MeshEvent::ClientStatus { kind, opcode, addr, error_code: p.error_code, data });
}

unsafe extern "C" fn light_client_cb(
    event: esp_ble_mesh_light_client_cb_event_t,
    param: *mut esp_ble_mesh_light_client_cb_param_t,
) {
    if param.is_null() || unsafe { (*param).params.is_null() } {
        return;
    }
    let p = unsafe { &*param };
    let common = unsafe { &*p.params };
    let (opcode, addr) = (common.opcode, common.ctx.addr);

    if event == esp_ble_mesh_light_client_cb_event_t_ESP_BLE_MESH_LIGHT_CLIENT_TIMEOUT_EVT {
        super::dispatch(MeshEvent::ClientTimeout { opcode, addr });
        return;
    }
    let kind = client_kind(
        event,
        esp_ble_mesh_light_client_cb_event_t_ESP_BLE_MESH_LIGHT_CLIENT_GET_STATE_EVT,
        esp_ble_mesh_light_client_cb_event_t_ESP_BLE_MESH_LIGHT_CLIENT_SET_STATE_EVT,
    );

    let model = unsafe { (*common.model).__bindgen_anon_1.model_id };
    let data = if p.error_code != 0 {
        Vec::new()
    } else if model == MODEL_LIGHT_HSL_CLI {
        let s = unsafe { &p.status_cb.hsl_status };
        hsl_payload(s.hsl_hue, s.hsl_saturation, s.hsl_lightness)
    } else {
        let s = unsafe { &p.status_cb.ctl_status };
        ctl_payload(s.present_ctl_lightness, s.present_ctl_temperature)
    };
    super::dispatch(MeshEvent::ClientStatus { kind, opcode, addr, error_code: p.error_code, data });
}

unsafe extern "C" fn custom_model_cb(
    event: esp_ble_mesh_model_cb_event_t,
    param: *mut esp_ble_mesh_model_cb_param_t,
) {
    if param.is_null() {
        return;
    }
    let p = unsafe { &*param };
    let ev = match event {
        esp_ble_mesh_model_cb_event_t_ESP_BLE_MESH_MODEL_OPERATION_EVT => {
            let a = unsafe { &p.model_operation };
            if !is_vendor(a.opcode) || a.ctx.is_null() {
                return;
            }
            let msg = unsafe { core::slice::from_raw_parts(a.msg, a.length as usize) }.to_vec();
            MeshEvent::VendorOperation { opcode: a.opcode, addr: unsafe { (*a.ctx).addr }, msg }
        }
        esp_ble_mesh_model_cb_event_t_ESP_BLE_MESH_CLIENT_MODEL_RECV_PUBLISH_MSG_EVT => {
            let a = unsafe { &p.client_recv_publish_msg };
            if a.ctx.is_null() {
                return;
            }
            let msg = unsafe { core::slice::from_raw_parts(a.msg, a.length as usize) }.to_vec();
            MeshEvent::VendorPublish { opcode: a.opcode, addr: unsafe { (*a.ctx).addr }, msg }
        }
        esp_ble_mesh_model_cb_event_t_ESP_BLE_MESH_MODEL_SEND_COMP_EVT => {
            let a = unsafe { &p.model_send_comp };
            MeshEvent::VendorSendComplete { opcode: a.opcode, err: a.err_code }
        }
        esp_ble_mesh_model_cb_event_t_ESP_BLE_MESH_CLIENT_MODEL_SEND_TIMEOUT_EVT => {
            let a = unsafe { &p.client_send_timeout };
            let addr = if a.ctx.is_null() { 0 } else { unsafe { (*a.ctx).addr } };
            MeshEvent::VendorSendTimeout { opcode: a.opcode, addr }
        }
        _ => {
            warn!("mesh(espidf): unhandled model event {}", event);
            return;
        }
    };
    super::dispatch(ev);
}
