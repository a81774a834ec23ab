//! Model opcodes and the cloud acknowledgment table.

// ── SIG config model ──────────────────────────────────────────
pub const OP_COMPOSITION_DATA_GET: u32 = 0x8008;
pub const OP_NET_KEY_ADD: u32 = 0x8040;
pub const OP_APP_KEY_ADD: u32 = 0x00;
pub const OP_MODEL_APP_BIND: u32 = 0x803D;
pub const OP_HEARTBEAT_PUB_SET: u32 = 0x8039;
pub const OP_NODE_RESET: u32 = 0x8049;

// ── Generic OnOff ─────────────────────────────────────────────
pub const OP_GEN_ONOFF_GET: u32 = 0x8201;
pub const OP_GEN_ONOFF_SET: u32 = 0x8202;
pub const OP_GEN_ONOFF_SET_UNACK: u32 = 0x8203;
pub const OP_GEN_ONOFF_STATUS: u32 = 0x8204;

// ── Light HSL ─────────────────────────────────────────────────
pub const OP_LIGHT_HSL_GET: u32 = 0x826D;
pub const OP_LIGHT_HSL_SET: u32 = 0x8276;
pub const OP_LIGHT_HSL_STATUS: u32 = 0x8278;

// ── Light CTL ─────────────────────────────────────────────────
pub const OP_LIGHT_CTL_GET: u32 = 0x825D;
pub const OP_LIGHT_CTL_SET: u32 = 0x825E;
pub const OP_LIGHT_CTL_STATUS: u32 = 0x8260;

// ── Vendor attribute model ────────────────────────────────────

/// Three-byte vendor opcode: `0xC0 | op`, then the company id little-endian.
pub const fn vendor_opcode(op: u8, cid: u16) -> u32 {
    (((0xC0 | op) as u32) << 16) | cid as u32
}

pub const OP_VND_ATTR_GET: u32 = vendor_opcode(0x11, super::CID_COMPANY);
pub const OP_VND_ATTR_SET: u32 = vendor_opcode(0x12, super::CID_COMPANY);
pub const OP_VND_ATTR_SET_UNACK: u32 = vendor_opcode(0x13, super::CID_COMPANY);
pub const OP_VND_ATTR_STATUS: u32 = vendor_opcode(0x14, super::CID_COMPANY);

/// Vendor opcodes occupy the top two bits of a 3-byte opcode.
pub fn is_vendor(opcode: u32) -> bool {
    opcode > 0xFFFF && (opcode >> 22) & 0b11 == 0b11
}

/// Unacknowledged variant used for group destinations.
///
/// SIG set opcodes are followed by their unack twin; vendor opcodes are
/// sent unchanged.
pub fn unack_variant(opcode: u32) -> u32 {
    if is_vendor(opcode) { opcode } else { opcode + 1 }
}

/// Cloud acknowledgment key for an opcode, if the cloud understands it.
pub fn ack_code(opcode: u32) -> Option<&'static str> {
    match opcode {
        OP_GEN_ONOFF_GET | OP_GEN_ONOFF_SET | OP_GEN_ONOFF_STATUS => Some("0x8204"),
        OP_LIGHT_HSL_GET | OP_LIGHT_HSL_SET | OP_LIGHT_HSL_STATUS => Some("0x8278"),
        OP_LIGHT_CTL_GET | OP_LIGHT_CTL_SET | OP_LIGHT_CTL_STATUS => Some("0x8260"),
        OP_VND_ATTR_GET | OP_VND_ATTR_SET | OP_VND_ATTR_STATUS => Some("0xD402E5"),
        _ => None,
    }
}

/// Parse a cloud opcode key: `"0x8202"`, `"8202"` or `"0xD202E5"`.
pub fn parse_opcode(key: &str) -> Option<u32> {
    let digits = key
        .strip_prefix("0x")
        .or_else(|| key.strip_prefix("0X"))
        .unwrap_or(key);
    if digits.is_empty() || digits.len() > 6 {
        return None;
    }
    u32::from_str_radix(digits, 16).ok()
}
