//! Inbound cloud commands.
//!
//! The cloud sends JSON objects such as
//! `{"mid":"1680161030123","addr":"0x0006","0x8202":[1]}`.  This module
//! turns one payload into a [`CloudRequest`]: the message id plus a list of
//! [`CloudAction`]s, each a destination and its remaining keys.  The
//! [`Gateway`](super::service::Gateway) then interprets each key either as
//! a system command (root destination) or as a mesh opcode (node
//! destination).

use serde_json::{Map, Value};

use crate::mesh::opcode::parse_opcode;
use crate::mesh::{parse_mac, MacAddr};

/// The gateway's own address on the cloud link.
pub const ROOT_ADDR: u16 = 0x0001;

/// Message id used before any command arrived.
pub const DEFAULT_MID: &str = "0";

/// One decoded cloud payload.
#[derive(Debug, Clone, PartialEq)]
pub struct CloudRequest {
    pub mid: String,
    pub actions: Vec<CloudAction>,
}

/// A destination and the command keys addressed to it, in the order they
/// appear in the payload.
#[derive(Debug, Clone, PartialEq)]
pub struct CloudAction {
    pub dst: u16,
    pub entries: Vec<(String, Value)>,
}

/// Commands handled by the gateway itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SysCommand {
    /// `ver`: report the firmware version.
    Version,
    /// `sntp`: set the clock (value already adjusted by +1 s).
    SyncTime(u64),
    /// `ota`: start a firmware download.
    Ota(String),
    /// `bind`: `"MAC12|NAME"`.
    Bind { mac: MacAddr, name: String },
    /// `bind` with an unusable value.
    BindMalformed,
    /// `unbind`: hex address.  `raw` is echoed back on success.
    Unbind { addr: u16, raw: String },
    /// `unbind: "all"`.
    UnbindAll,
    /// `clear`: forget network credentials and restart.
    Clear,
}

/// A mesh client command for a node or group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeCommand {
    pub opcode: u32,
    pub data: Vec<u8>,
}

/// Decode a cloud payload.  Returns `None` for anything that is not a JSON
/// object.
pub fn parse_request(payload: &str) -> Option<CloudRequest> {
    let Value::Object(mut root) = serde_json::from_str::<Value>(payload).ok()? else {
        return None;
    };

    let mid = match root.shift_remove("mid") {
        Some(Value::String(s)) => s,
        Some(Value::Number(n)) => n.to_string(),
        _ => DEFAULT_MID.into(),
    };

    let mut actions = Vec::new();
    if let Some(srun) = root.shift_remove("srun") {
        let list = srun
            .get("action")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        for item in list {
            match item {
                Value::Null => break,
                Value::Object(obj) => actions.extend(parse_action(obj)),
                _ => {}
            }
        }
    } else {
        actions.extend(parse_action(root));
    }

    Some(CloudRequest { mid, actions })
}

/// Split `"addr"` off an object.  Objects without a usable address are
/// dropped.
fn parse_action(mut obj: Map<String, Value>) -> Option<CloudAction> {
    let dst = match obj.shift_remove("addr")? {
        Value::String(s) => {
            if s.as_bytes().get(1) == Some(&b'x') {
                u16::from_str_radix(&s[2..], 16).ok()?
            } else {
                ROOT_ADDR
            }
        }
        Value::Number(n) => u16::try_from(n.as_u64()?).ok()?,
        _ => return None,
    };
    if dst == 0 {
        return None;
    }
    Some(CloudAction {
        dst,
        entries: obj.into_iter().collect(),
    })
}

/// Interpret a root-destination key.  Unknown keys and unusable values
/// give `None`.
pub fn parse_sys(key: &str, value: &Value) -> Option<SysCommand> {
    match key {
        "ver" => Some(SysCommand::Version),
        "sntp" => {
            let secs = match value {
                Value::Number(n) => n.as_u64()?,
                Value::String(s) => {
                    // At most 11 digits are significant.
                    let digits: String = s.chars().take(11).collect();
                    digits.trim().parse().ok()?
                }
                _ => return None,
            };
            Some(SysCommand::SyncTime(secs.checked_add(1)?))
        }
        "ota" => Some(SysCommand::Ota(value.as_str()?.to_owned())),
        "bind" => Some(parse_bind(value).unwrap_or(SysCommand::BindMalformed)),
        "unbind" => {
            let raw = value.as_str()?;
            if raw == "all" {
                return Some(SysCommand::UnbindAll);
            }
            let digits = raw
                .strip_prefix("0x")
                .or_else(|| raw.strip_prefix("0X"))
                .unwrap_or(raw);
            Some(SysCommand::Unbind {
                addr: u16::from_str_radix(digits, 16).unwrap_or(0),
                raw: raw.to_owned(),
            })
        }
        "clear" => Some(SysCommand::Clear),
        _ => None,
    }
}

fn parse_bind(value: &Value) -> Option<SysCommand> {
    let (mac, name) = value.as_str()?.split_once('|')?;
    Some(SysCommand::Bind {
        mac: parse_mac(mac)?,
        name: name.to_owned(),
    })
}

/// Interpret a node-destination key: a hex opcode with a byte array.
pub fn parse_node(key: &str, value: &Value) -> Option<NodeCommand> {
    let opcode = parse_opcode(key)?;
    let data = value
        .as_array()?
        .iter()
        .map(|v| v.as_u64().and_then(|b| u8::try_from(b).ok()))
        .collect::<Option<Vec<u8>>>()?;
    Some(NodeCommand { opcode, data })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn mid_defaults_and_numbers() {
        let r = parse_request(r#"{"addr":"0x0006","0x8202":[1]}"#).unwrap();
        assert_eq!(r.mid, "0");
        let r = parse_request(r#"{"mid":1680161030123,"addr":"0x0006"}"#).unwrap();
        assert_eq!(r.mid, "1680161030123");
    }

    #[test]
    fn sntp_at_the_top_of_the_range_is_ignored() {
        assert_eq!(parse_sys("sntp", &json!(u64::MAX)), None);
        assert_eq!(
            parse_sys("sntp", &json!(u64::MAX - 1)),
            Some(SysCommand::SyncTime(u64::MAX))
        );
        let r = parse_request(r#"{"addr":"x","sntp":18446744073709551615}"#).unwrap();
        assert_eq!(parse_sys(&r.actions[0].entries[0].0, &r.actions[0].entries[0].1), None);
    }

    #[test]
    fn keys_keep_payload_order() {
        let r = parse_request(
            r#"{"0x8276":[0,1,0,2,0,3],"addr":"0x0006","0x8202":[0],"mid":"9","0x8201":[]}"#,
        )
        .unwrap();
        assert_eq!(r.mid, "9");
        let keys: Vec<&str> = r.actions[0].entries.iter().map(|(k, _)| k.as_str()).collect();
        assert_eq!(keys, vec!["0x8276", "0x8202", "0x8201"]);
    }

    #[test]
    fn addr_forms() {
        let r = parse_request(r#"{"addr":"0xC001","0x8202":[1]}"#).unwrap();
        assert_eq!(r.actions[0].dst, 0xC001);
        let r = parse_request(r#"{"addr":"68b6b3341e7a","ver":""}"#).unwrap();
        assert_eq!(r.actions[0].dst, ROOT_ADDR);
        let r = parse_request(r#"{"addr":6,"0x8201":[]}"#).unwrap();
        assert_eq!(r.actions[0].dst, 6);
        assert_eq!(r.actions[0].entries.len(), 1);
    }

    #[test]
    fn missing_or_zero_addr_is_dropped() {
        assert!(parse_request(r#"{"ver":""}"#).unwrap().actions.is_empty());
        assert!(parse_request(r#"{"addr":"0x0000","ver":""}"#).unwrap().actions.is_empty());
        assert!(parse_request(r#"{"addr":"0xzz","ver":""}"#).unwrap().actions.is_empty());
    }

    #[test]
    fn malformed_json_is_none() {
        assert!(parse_request("not json").is_none());
        assert!(parse_request("[1,2]").is_none());
    }

    #[test]
    fn srun_actions_skip_non_objects_and_stop_at_null() {
        let r = parse_request(
            r#"{"mid":"7","srun":{"action":[
                {"addr":"0x0006","0x8202":[1]},
                5,
                {"addr":"0x0007","0x8202":[0]},
                null,
                {"addr":"0x0008","0x8202":[1]}
            ]}}"#,
        )
        .unwrap();
        assert_eq!(r.mid, "7");
        let dsts: Vec<u16> = r.actions.iter().map(|a| a.dst).collect();
        assert_eq!(dsts, vec![6, 7]);
    }

    #[test]
    fn sys_commands() {
        assert_eq!(parse_sys("ver", &json!("")), Some(SysCommand::Version));
        assert_eq!(
            parse_sys("sntp", &json!("1680161030")),
            Some(SysCommand::SyncTime(1_680_161_031))
        );
        assert_eq!(parse_sys("sntp", &json!(10)), Some(SysCommand::SyncTime(11)));
        assert_eq!(
            parse_sys("ota", &json!("http://x/fw.bin")),
            Some(SysCommand::Ota("http://x/fw.bin".into()))
        );
        assert_eq!(
            parse_sys("bind", &json!("58cf791a21ee|Light1")),
            Some(SysCommand::Bind {
                mac: [0x58, 0xcf, 0x79, 0x1a, 0x21, 0xee],
                name: "Light1".into()
            })
        );
        assert_eq!(parse_sys("bind", &json!("nopipe")), Some(SysCommand::BindMalformed));
        assert_eq!(parse_sys("unbind", &json!("all")), Some(SysCommand::UnbindAll));
        assert_eq!(
            parse_sys("unbind", &json!("0x0006")),
            Some(SysCommand::Unbind { addr: 6, raw: "0x0006".into() })
        );
        assert_eq!(
            parse_sys("unbind", &json!("junk")),
            Some(SysCommand::Unbind { addr: 0, raw: "junk".into() })
        );
        assert_eq!(parse_sys("clear", &json!("all")), Some(SysCommand::Clear));
        assert_eq!(parse_sys("reboot", &json!("")), None);
    }

    #[test]
    fn node_commands() {
        assert_eq!(
            parse_node("0x8202", &json!([1])),
            Some(NodeCommand { opcode: 0x8202, data: vec![1] })
        );
        assert_eq!(
            parse_node("8276", &json!([0, 1, 2, 3, 4, 5])).map(|c| c.opcode),
            Some(0x8276)
        );
        assert_eq!(parse_node("0x8202", &json!("1")), None);
        assert_eq!(parse_node("0x8202", &json!([300])), None);
        assert_eq!(parse_node("onoff", &json!([1])), None);
    }
}
