//! Mesh → cloud transfer records.
//!
//! Status, publish and get-state events are flattened into a fixed-size
//! [`TransferRecord`] and queued for the drain task, which turns each one
//! into a cloud JSON message.

use core::fmt::Write;

use serde_json::{Map, Value};

use super::opcode;

/// Payload bytes carried per record; longer vendor payloads are truncated.
pub const TRANSFER_DATA_LEN: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferRecord {
    pub opcode: u32,
    pub unicast_addr: u16,
    pub data: [u8; TRANSFER_DATA_LEN],
    pub len: u8,
}

impl TransferRecord {
    /// Build a record, truncating `payload` to [`TRANSFER_DATA_LEN`].
    pub fn new(opcode: u32, unicast_addr: u16, payload: &[u8]) -> Self {
        let len = payload.len().min(TRANSFER_DATA_LEN);
        let mut data = [0u8; TRANSFER_DATA_LEN];
        data[..len].copy_from_slice(&payload[..len]);
        Self {
            opcode,
            unicast_addr,
            data,
            len: len as u8,
        }
    }

    pub fn payload(&self) -> &[u8] {
        &self.data[..self.len as usize]
    }

    /// Cloud JSON for this record, or `None` when the opcode has no
    /// acknowledgment code.
    pub fn to_cloud_json(&self, mid: &str) -> Option<String> {
        let key = opcode::ack_code(self.opcode)?;
        Some(cloud_message(self.unicast_addr, mid, key, self.payload()))
    }
}

/// `"0x%04X"` address rendering used on the cloud link.
pub fn format_addr(addr: u16) -> heapless::String<6> {
    let mut out = heapless::String::new();
    let _ = write!(out, "0x{addr:04X}");
    out
}

/// `{"addr":"0x%04X","mid":mid,key:value}`.
///
/// The value is an integer array when `0 < len < 8`, otherwise the payload
/// bytes are rendered as a (lossy UTF-8) string.
pub fn cloud_message(addr: u16, mid: &str, key: &str, payload: &[u8]) -> String {
    let value = if !payload.is_empty() && payload.len() < TRANSFER_DATA_LEN {
        Value::Array(payload.iter().map(|b| Value::from(*b)).collect())
    } else {
        Value::String(String::from_utf8_lossy(payload).into_owned())
    };
    cloud_value_message(addr, mid, key, value)
}

/// Same envelope with an arbitrary string value (`"ok"`, `"fail"`, ...).
pub fn cloud_text_message(addr: u16, mid: &str, key: &str, text: &str) -> String {
    cloud_value_message(addr, mid, key, Value::String(text.into()))
}

fn cloud_value_message(addr: u16, mid: &str, key: &str, value: Value) -> String {
    let mut obj = Map::new();
    obj.insert("addr".into(), Value::String(format_addr(addr).as_str().into()));
    obj.insert("mid".into(), Value::String(mid.into()));
    obj.insert(key.into(), value);
    Value::Object(obj).to_string()
}
