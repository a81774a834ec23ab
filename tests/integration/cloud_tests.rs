//! Root-address cloud commands and link-state handling.

use heapless::String;
use serde_json::json;

use meshgate::adapters::wifi::CloudInbound;
use meshgate::app::ports::ConfigPort;
use meshgate::config::{FIRMWARE_VERSION, WifiConfig};
use meshgate::mesh::message::ClientMessage;

use crate::mock_mesh::{LIGHT_MAC, Rig};

const ROOT: &str = "240ac4123456";

fn root_cmd(mid: &str, key: &str, value: &str) -> std::string::String {
    json!({ "mid": mid, "addr": ROOT, key: value }).to_string()
}

fn connected_rig() -> Rig {
    let rig = Rig::new();
    rig.connect_cloud();
    rig
}

#[test]
fn connect_announces_version_once() {
    let rig = connected_rig();

    // Already up: no second announcement.
    rig.gateway.on_cloud_connection(true);
    assert!(rig.published().is_empty());

    rig.gateway.on_cloud_connection(false);
    rig.gateway.on_cloud_connection(true);
    assert_eq!(
        rig.published(),
        vec![json!({"addr":"0x0001","mid":"0","ver":FIRMWARE_VERSION})]
    );
}

#[test]
fn link_transitions_and_messages_reach_inbound_queue() {
    let rig = connected_rig();
    assert_eq!(rig.cloud.try_next_inbound(), Some(CloudInbound::Connected));

    rig.cloud.inject(r#"{"addr":"240ac4123456","ver":""}"#);
    match rig.cloud.try_next_inbound() {
        Some(CloudInbound::Message(text)) => rig.gateway.handle_cloud_message(&text),
        other => panic!("unexpected inbound {other:?}"),
    }
    assert_eq!(rig.published().len(), 1);

    rig.cloud.sim_disconnect();
    assert_eq!(rig.cloud.try_next_inbound(), Some(CloudInbound::Disconnected));
}

#[test]
fn version_request_echoes_mid() {
    let rig = connected_rig();
    rig.gateway.handle_cloud_message(&root_cmd("42", "ver", ""));
    assert_eq!(
        rig.published(),
        vec![json!({"addr":"0x0001","mid":"42","ver":FIRMWARE_VERSION})]
    );
    assert_eq!(rig.gateway.last_mid(), "42");
}

#[test]
fn bind_command_replies_with_address() {
    let rig = connected_rig();
    let beacon = rig.beacon_when_scanning(LIGHT_MAC, 0x03);
    rig.gateway
        .handle_cloud_message(&root_cmd("9", "bind", "58:cf:79:1a:21:ee|Light1"));
    beacon.join().unwrap();

    assert_eq!(
        rig.published(),
        vec![json!({"addr":"0x0001","mid":"9","bind":"0x0006"})]
    );
    assert_eq!(rig.gateway.binding_name(&LIGHT_MAC).unwrap().as_str(), "Light1");
}

#[test]
fn malformed_bind_fails_without_scanning() {
    let rig = connected_rig();
    rig.gateway.handle_cloud_message(&root_cmd("9", "bind", "not-a-mac"));

    assert_eq!(
        rig.published(),
        vec![json!({"addr":"0x0001","mid":"9","bind":"fail"})]
    );
    assert!(rig.mesh.calls().is_empty());
}

#[test]
fn unbind_echoes_raw_address_or_fails() {
    let rig = connected_rig();
    let addr = rig.bind_light(LIGHT_MAC, "Light1");
    assert_eq!(addr, 0x0006);

    rig.gateway.handle_cloud_message(&root_cmd("1", "unbind", "0x0006"));
    rig.gateway.handle_cloud_message(&root_cmd("2", "unbind", "0x0002"));
    assert_eq!(
        rig.published(),
        vec![
            json!({"addr":"0x0001","mid":"1","unbind":"0x0006"}),
            json!({"addr":"0x0001","mid":"2","unbind":"fail"}),
        ]
    );
    assert_eq!(rig.gateway.bindings_len(), 0);
}

#[test]
fn unbind_all_replies_all() {
    let rig = connected_rig();
    rig.mesh.add_node(0x0010);
    rig.gateway.handle_cloud_message(&root_cmd("3", "unbind", "all"));

    assert_eq!(
        rig.published(),
        vec![json!({"addr":"0x0001","mid":"3","unbind":"all"})]
    );
    assert!(rig.mesh.nodes().is_empty());
}

#[test]
fn sntp_sets_clock_one_second_ahead() {
    let rig = connected_rig();
    rig.gateway.handle_cloud_message(&root_cmd("5", "sntp", "1680161030"));

    assert_eq!(rig.system.time(), Some(1_680_161_031));
    assert!(rig.published().is_empty());
}

#[test]
fn ota_is_handed_to_system_with_mid() {
    let rig = connected_rig();
    rig.gateway
        .handle_cloud_message(&root_cmd("11", "ota", "http://fw.example/meshgate.bin"));

    assert_eq!(
        rig.system.ota(),
        vec![("http://fw.example/meshgate.bin".into(), "11".into())]
    );
}

#[test]
fn clear_forgets_network_and_restarts() {
    let rig = connected_rig();
    rig.gateway.with_storage(|s| {
        s.save_wifi(&WifiConfig {
            ssid: String::try_from("HomeWiFi").unwrap(),
            password: String::new(),
        })
        .unwrap();
    });

    rig.gateway.handle_cloud_message(&root_cmd("6", "clear", ""));

    assert_eq!(
        rig.published(),
        vec![json!({"addr":"0x0001","mid":"6","clear":"ok"})]
    );
    assert_eq!(rig.system.restarts(), 1);
    let wifi = rig.gateway.with_storage(|s| s.load_wifi()).unwrap();
    assert!(!wifi.is_configured());
}

#[test]
fn unknown_root_keys_and_garbage_get_no_reply() {
    let rig = connected_rig();
    rig.gateway.handle_cloud_message(&root_cmd("1", "reboot", ""));
    rig.gateway.handle_cloud_message("{not json");
    rig.gateway.handle_cloud_message(r#"{"mid":"2","ver":""}"#);

    assert!(rig.published().is_empty());
    assert!(rig.mesh.calls().is_empty());
}

#[test]
fn node_keys_are_sent_in_payload_order() {
    let rig = connected_rig();
    rig.gateway.handle_cloud_message(
        r#"{"mid":"4","addr":"0xC001","0x8276":[0,1,0,2,0,3],"0x8202":[0]}"#,
    );

    let msgs: Vec<ClientMessage> = rig.mesh.client_sends().into_iter().map(|(_, m)| m).collect();
    assert_eq!(msgs.len(), 2);
    assert!(matches!(
        msgs[0],
        ClientMessage::HslSet { hue: 0x0001, saturation: 0x0002, lightness: 0x0003, .. }
    ));
    assert!(matches!(msgs[1], ClientMessage::OnOffSet { onoff: false, .. }));

    let replies: Vec<_> = rig
        .published()
        .into_iter()
        .map(|v| v.as_object().unwrap().keys().last().cloned().unwrap())
        .collect();
    assert_eq!(replies, vec!["0x8278", "0x8204"]);
}
