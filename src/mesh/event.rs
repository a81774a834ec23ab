//! Events delivered by the mesh stack's callback context.
//!
//! The stack adapter translates each native callback into one
//! [`MeshEvent`] and hands it to
//! [`Gateway::on_mesh_event`](crate::app::service::Gateway::on_mesh_event).

use super::MacAddr;

/// Provisioning bearer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Bearer {
    Adv,
    Gatt,
}

/// How a client-model status reached us.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientEventKind {
    /// Response to one of our gets.
    GetState,
    /// Response to one of our acknowledged sets.
    SetState,
    /// Unsolicited publication from a node.
    Publish,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MeshEvent {
    /// An unprovisioned device beacon passed the UUID prefix match.
    UnprovisionedAdv {
        addr: MacAddr,
        addr_type: u8,
        uuid: [u8; 16],
        oob_info: u16,
        bearer: Bearer,
    },
    LinkOpen {
        bearer: Bearer,
    },
    LinkClose {
        bearer: Bearer,
        reason: u8,
    },
    ProvisioningComplete {
        node_idx: u16,
        unicast_addr: u16,
        element_num: u8,
        net_idx: u16,
    },
    /// Config-client status for a request we sent.  `data` carries the raw
    /// composition data for a composition-data get and is empty otherwise.
    ConfigStatus {
        opcode: u32,
        addr: u16,
        error_code: i32,
        data: Vec<u8>,
    },
    ConfigTimeout {
        opcode: u32,
        addr: u16,
    },
    /// Generic / light client status.  `data` is the big-endian state
    /// payload; it is empty for set responses that carry nothing to report.
    ClientStatus {
        kind: ClientEventKind,
        opcode: u32,
        addr: u16,
        error_code: i32,
        data: Vec<u8>,
    },
    ClientTimeout {
        opcode: u32,
        addr: u16,
    },
    /// Vendor response to one of our sends.
    VendorOperation {
        opcode: u32,
        addr: u16,
        msg: Vec<u8>,
    },
    /// Local send result for a vendor message.
    VendorSendComplete {
        opcode: u32,
        err: i32,
    },
    VendorSendTimeout {
        opcode: u32,
        addr: u16,
    },
    /// Unsolicited vendor publication.
    VendorPublish {
        opcode: u32,
        addr: u16,
        msg: Vec<u8>,
    },
    HeartbeatReceived {
        src: u16,
        dst: u16,
        rssi: i8,
    },
    NodeDeleted {
        addr: u16,
        err: i32,
    },
}

// ── Payload helpers for the stack adapter ─────────────────────

pub fn onoff_payload(present_onoff: bool) -> Vec<u8> {
    vec![u8::from(present_onoff)]
}

/// hue, saturation, lightness, big-endian.
pub fn hsl_payload(hue: u16, saturation: u16, lightness: u16) -> Vec<u8> {
    let mut out = Vec::with_capacity(6);
    out.extend_from_slice(&hue.to_be_bytes());
    out.extend_from_slice(&saturation.to_be_bytes());
    out.extend_from_slice(&lightness.to_be_bytes());
    out
}

/// present lightness, present temperature, big-endian.
pub fn ctl_payload(lightness: u16, temperature: u16) -> Vec<u8> {
    let mut out = Vec::with_capacity(4);
    out.extend_from_slice(&lightness.to_be_bytes());
    out.extend_from_slice(&temperature.to_be_bytes());
    out
}
