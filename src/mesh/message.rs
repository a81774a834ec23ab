//! Requests the gateway hands to the mesh stack.

use super::opcode::{
    self, OP_APP_KEY_ADD, OP_COMPOSITION_DATA_GET, OP_GEN_ONOFF_GET, OP_GEN_ONOFF_SET,
    OP_HEARTBEAT_PUB_SET, OP_LIGHT_CTL_GET, OP_LIGHT_CTL_SET, OP_LIGHT_HSL_GET, OP_LIGHT_HSL_SET,
    OP_MODEL_APP_BIND, OP_NET_KEY_ADD, OP_NODE_RESET,
};
use super::MacAddr;

/// Addressing and delivery parameters for one outbound message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessageContext {
    pub net_idx: u16,
    pub app_idx: u16,
    pub dst: u16,
    pub ttl: u8,
    /// Require segmented-message acknowledgment from the transport.
    pub send_rel: bool,
    /// Stack-side response timeout; 0 disables it (group sends).
    pub timeout_ms: u32,
    /// Effective opcode on the wire (unack variant for groups).
    pub opcode: u32,
}

/// Which local client model originates a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ClientModel {
    GenericOnOff,
    LightHsl,
    LightCtl,
    Vendor,
}

/// Client-model payloads the router can send.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientMessage {
    OnOffGet,
    OnOffSet {
        onoff: bool,
        tid: u8,
    },
    HslGet,
    HslSet {
        hue: u16,
        saturation: u16,
        lightness: u16,
        tid: u8,
    },
    CtlGet,
    CtlSet {
        lightness: u16,
        temperature: u16,
        delta_uv: i16,
        tid: u8,
    },
    Vendor {
        opcode: u32,
        payload: Vec<u8>,
    },
}

impl ClientMessage {
    /// Acknowledged opcode of the message.
    pub fn opcode(&self) -> u32 {
        match self {
            Self::OnOffGet => OP_GEN_ONOFF_GET,
            Self::OnOffSet { .. } => OP_GEN_ONOFF_SET,
            Self::HslGet => OP_LIGHT_HSL_GET,
            Self::HslSet { .. } => OP_LIGHT_HSL_SET,
            Self::CtlGet => OP_LIGHT_CTL_GET,
            Self::CtlSet { .. } => OP_LIGHT_CTL_SET,
            Self::Vendor { opcode, .. } => *opcode,
        }
    }

    pub fn model(&self) -> ClientModel {
        match self {
            Self::OnOffGet | Self::OnOffSet { .. } => ClientModel::GenericOnOff,
            Self::HslGet | Self::HslSet { .. } => ClientModel::LightHsl,
            Self::CtlGet | Self::CtlSet { .. } => ClientModel::LightCtl,
            Self::Vendor { .. } => ClientModel::Vendor,
        }
    }

    /// Opcode to put on the wire for `dst`.
    pub fn wire_opcode(&self, dst: u16) -> u32 {
        if super::is_group(dst) {
            opcode::unack_variant(self.opcode())
        } else {
            self.opcode()
        }
    }
}

/// Heartbeat publication parameters pushed to each new node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeartbeatPublication {
    pub dst: u16,
    /// Period exponent: 2^(n-1) seconds.
    pub period: u8,
    pub ttl: u8,
    pub count: u8,
    pub features: u16,
    pub net_idx: u16,
}

/// Configuration-client requests, in the order the provisioning chain
/// issues them, plus node reset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigRequest {
    CompositionDataGet {
        page: u8,
    },
    NetKeyAdd {
        net_idx: u16,
        net_key: [u8; 16],
    },
    AppKeyAdd {
        net_idx: u16,
        app_idx: u16,
        app_key: [u8; 16],
    },
    ModelAppBind {
        element_addr: u16,
        app_idx: u16,
        model_id: u16,
        company_id: u16,
    },
    HeartbeatPubSet(HeartbeatPublication),
    NodeReset,
}

impl ConfigRequest {
    pub fn opcode(&self) -> u32 {
        match self {
            Self::CompositionDataGet { .. } => OP_COMPOSITION_DATA_GET,
            Self::NetKeyAdd { .. } => OP_NET_KEY_ADD,
            Self::AppKeyAdd { .. } => OP_APP_KEY_ADD,
            Self::ModelAppBind { .. } => OP_MODEL_APP_BIND,
            Self::HeartbeatPubSet(_) => OP_HEARTBEAT_PUB_SET,
            Self::NodeReset => OP_NODE_RESET,
        }
    }
}

/// An unprovisioned device the provisioner should start on immediately.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnprovisionedDevice {
    pub addr: MacAddr,
    pub addr_type: u8,
    pub uuid: [u8; 16],
    pub oob_info: u16,
    pub bearer: u8,
}

/// A model on the gateway's own primary element.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LocalModel {
    pub model_id: u16,
    /// [`CID_NONE`](super::CID_NONE) for SIG models.
    pub company_id: u16,
}

/// Heartbeat filter entry registered with the stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeartbeatFilter {
    pub reject_list: bool,
    pub src: u16,
    pub dst: u16,
}
