//! BLE-Mesh domain types shared by the provisioner, router and stack adapter.
//!
//! Nothing in here talks to the radio.  The mesh stack itself sits behind
//! the [`MeshStack`](crate::app::ports::MeshStack) port; this module only
//! describes addresses, opcodes, keys and the messages exchanged with it.

pub mod composition;
pub mod event;
pub mod keys;
pub mod message;
pub mod opcode;
pub mod transfer;

use core::fmt::Write;

/// 48-bit Bluetooth device address.
pub type MacAddr = [u8; 6];

/// Unassigned (zero) mesh address.
pub const ADDR_UNASSIGNED: u16 = 0x0000;

/// Company id used by every vendor model in this network.
pub const CID_COMPANY: u16 = 0x02E5;
/// Sentinel company id for SIG models.
pub const CID_NONE: u16 = 0xFFFF;

/// Vendor server model id on the nodes.
pub const VENDOR_MODEL_SERVER: u16 = 0x0000;
/// Vendor client model id on the gateway.
pub const VENDOR_MODEL_CLIENT: u16 = 0x0001;

pub const MODEL_GEN_ONOFF_CLI: u16 = 0x1001;
pub const MODEL_LIGHT_CTL_CLI: u16 = 0x1305;
pub const MODEL_LIGHT_HSL_CLI: u16 = 0x1309;

/// Primary subnet preset by the stack.
pub const NET_PRIMARY: u16 = 0x0000;

/// Lower bound of a CTL temperature value.
pub const TEMPERATURE_MIN: u16 = 0x0320;
/// Upper bound of a CTL temperature value.
pub const TEMPERATURE_MAX: u16 = 0x4E20;

/// Group addresses: sends are unacknowledged and never wait.
pub fn is_group(addr: u16) -> bool {
    (0xC000..=0xFEFF).contains(&addr)
}

pub fn is_unicast(addr: u16) -> bool {
    addr != ADDR_UNASSIGNED && addr < 0x8000
}

/// Parse a MAC written as 12 hex digits, optionally `:`-separated.
pub fn parse_mac(s: &str) -> Option<MacAddr> {
    let mut mac = [0u8; 6];
    let mut nibbles = s.chars().filter(|c| *c != ':');
    for byte in &mut mac {
        let hi = nibbles.next()?.to_digit(16)?;
        let lo = nibbles.next()?.to_digit(16)?;
        *byte = ((hi << 4) | lo) as u8;
    }
    if nibbles.next().is_some() {
        return None;
    }
    Some(mac)
}

/// `aa:bb:cc:dd:ee:ff`, for logs.
pub fn format_mac(mac: &MacAddr) -> heapless::String<17> {
    let mut out = heapless::String::new();
    let _ = write!(
        out,
        "{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}",
        mac[0], mac[1], mac[2], mac[3], mac[4], mac[5]
    );
    out
}

/// Product type carried in byte 2 of a node's device UUID.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProductId {
    Root,
    Bed,
    Light,
    Switch,
    Curtain,
    Sumanbo,
    Tumble,
    Smr,
    Unknown(u8),
}

impl From<u8> for ProductId {
    fn from(raw: u8) -> Self {
        match raw {
            0 => Self::Root,
            1 => Self::Bed,
            2 => Self::Light,
            3 => Self::Switch,
            4 => Self::Curtain,
            5 => Self::Sumanbo,
            6 => Self::Tumble,
            7 => Self::Smr,
            other => Self::Unknown(other),
        }
    }
}
