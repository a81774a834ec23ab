//! Bind / unbind flows through the gateway against the scripted stack.

use std::time::{Duration, Instant};

use meshgate::app::events::GatewayEvent;
use meshgate::binding::{BindingStore, GATTC_BIND_KEY, MESH_BIND_KEY};
use meshgate::mesh::message::ConfigRequest;
use meshgate::mesh::opcode::{
    OP_APP_KEY_ADD, OP_COMPOSITION_DATA_GET, OP_HEARTBEAT_PUB_SET, OP_MODEL_APP_BIND,
    OP_NET_KEY_ADD,
};
use meshgate::mesh::{CID_COMPANY, VENDOR_MODEL_SERVER};
use meshgate::provisioning::SessionPhase;

use crate::mock_mesh::{LIGHT_MAC, MeshCall, Rig, wait_until};

const OTHER_MAC: [u8; 6] = [0x11, 0x22, 0x33, 0x44, 0x55, 0x66];

#[test]
fn bind_provisions_and_configures_node() {
    let rig = Rig::new();
    let addr = rig.bind_light(LIGHT_MAC, "Light1");
    assert_eq!(addr, 0x0006);

    let opcodes: Vec<u32> = rig.mesh.config_requests().iter().map(ConfigRequest::opcode).collect();
    assert_eq!(
        opcodes,
        vec![
            OP_COMPOSITION_DATA_GET,
            OP_NET_KEY_ADD,
            OP_APP_KEY_ADD,
            OP_MODEL_APP_BIND,
            OP_HEARTBEAT_PUB_SET,
        ]
    );

    let bind = rig
        .mesh
        .config_requests()
        .into_iter()
        .find(|r| r.opcode() == OP_MODEL_APP_BIND)
        .unwrap();
    assert_eq!(
        bind,
        ConfigRequest::ModelAppBind {
            element_addr: 0x0006,
            app_idx: rig.gateway.keys().app_idx,
            model_id: VENDOR_MODEL_SERVER,
            company_id: CID_COMPANY,
        }
    );

    let record = rig.gateway.binding_for(0x0006).unwrap();
    assert_eq!(record.mac, LIGHT_MAC);
    assert_eq!(record.product_id, 0x03);
    assert_eq!(record.name.as_str(), "Light1");
    assert_eq!(rig.gateway.find_mac_by_name("Light1", 0), Some(LIGHT_MAC));
    assert_eq!(rig.mesh.nodes(), vec![0x0006]);

    let events = rig.sink.events();
    assert!(events.contains(&GatewayEvent::BindFinished {
        mac: LIGHT_MAC,
        unicast_addr: Some(0x0006),
    }));
    assert!(events.contains(&GatewayEvent::ChainProgress {
        addr: 0x0006,
        phase: SessionPhase::Bound,
    }));
}

#[test]
fn bind_times_out_without_beacon() {
    let rig = Rig::new();
    let start = Instant::now();
    assert_eq!(rig.gateway.bind(LIGHT_MAC, "Light1"), None);
    assert!(start.elapsed() >= Duration::from_millis(300));

    assert!(rig.mesh.calls().is_empty());
    assert_eq!(rig.gateway.bindings_len(), 0);
    assert_eq!(rig.gateway.session_phase(), SessionPhase::Idle);
    assert!(rig.sink.events().contains(&GatewayEvent::BindFinished {
        mac: LIGHT_MAC,
        unicast_addr: None,
    }));
}

#[test]
fn beacon_from_other_device_is_ignored() {
    let rig = Rig::new();
    let beacon = rig.beacon_when_scanning(OTHER_MAC, 0x03);
    assert_eq!(rig.gateway.bind(LIGHT_MAC, "Light1"), None);
    beacon.join().unwrap();

    assert!(!rig.mesh.calls().iter().any(|c| matches!(c, MeshCall::AddUnprov(_))));
}

#[test]
fn rebinding_same_device_keeps_one_record() {
    let rig = Rig::new();
    assert_eq!(rig.bind_light(LIGHT_MAC, "Light1"), 0x0006);
    assert_eq!(rig.bind_light(LIGHT_MAC, "Desk"), 0x0007);

    assert_eq!(rig.gateway.bindings_len(), 1);
    assert!(rig.gateway.binding_for(0x0006).is_none());
    assert_eq!(rig.gateway.binding_name(&LIGHT_MAC).unwrap().as_str(), "Desk");
}

#[test]
fn unbind_resets_then_deletes() {
    let rig = Rig::new();
    let addr = rig.bind_light(LIGHT_MAC, "Light1");
    rig.mesh.clear_calls();

    assert_eq!(rig.gateway.unbind(addr), addr);
    let calls = rig.mesh.calls();
    assert_eq!(
        calls,
        vec![
            MeshCall::Config { dst: addr, request: ConfigRequest::NodeReset },
            MeshCall::DeleteNode(addr),
        ]
    );
    assert_eq!(rig.gateway.bindings_len(), 0);
    assert!(rig.mesh.nodes().is_empty());
    assert!(rig.sink.events().contains(&GatewayEvent::Unbound { addr }));
}

#[test]
fn unbind_below_start_address_is_refused() {
    let rig = Rig::new();
    assert_eq!(rig.gateway.unbind(0x0002), 0);
    assert!(rig.mesh.calls().is_empty());
}

#[test]
fn unbind_all_walks_node_table_in_order() {
    let rig = Rig::new();
    for addr in [0x0010, 0x0011, 0x0012] {
        rig.mesh.add_node(addr);
    }

    rig.gateway.unbind_all();

    let calls = rig.mesh.calls();
    let mut expected = Vec::new();
    for addr in [0x0010, 0x0011, 0x0012] {
        expected.push(MeshCall::Config { dst: addr, request: ConfigRequest::NodeReset });
        expected.push(MeshCall::DeleteNode(addr));
    }
    expected.push(MeshCall::EraseSettings);
    assert_eq!(calls, expected);

    assert!(rig.mesh.nodes().is_empty());
    assert!(rig.sink.events().contains(&GatewayEvent::UnboundAll { nodes: 3 }));
}

#[test]
fn unbind_all_clears_binding_table() {
    let rig = Rig::new();
    rig.bind_light(LIGHT_MAC, "Light1");
    assert_eq!(rig.gateway.bindings_len(), 1);

    rig.gateway.unbind_all();
    assert_eq!(rig.gateway.bindings_len(), 0);
    assert_eq!(rig.gateway.binding_name(&LIGHT_MAC), None);
}

#[test]
fn heartbeats_mark_nodes_online_per_period() {
    let rig = Rig::new();
    rig.mesh.heartbeat(0x0006);
    assert!(wait_until(Duration::from_secs(1), || rig.gateway.tick_heartbeat() == 1));
    assert!(rig.gateway.is_node_online(0x0006));

    // A silent period takes it offline again.
    assert_eq!(rig.gateway.tick_heartbeat(), 0);
    assert!(!rig.gateway.is_node_online(0x0006));
}

#[test]
fn gattc_peers_are_capped_and_flushed_separately() {
    let rig = Rig::new();
    assert!(rig.gateway.add_gattc_peer([1, 0, 0, 0, 0, 1], 0x10, "Remote"));
    assert!(rig.gateway.add_gattc_peer([1, 0, 0, 0, 0, 2], 0x10, "Knob"));
    assert!(!rig.gateway.add_gattc_peer([1, 0, 0, 0, 0, 3], 0x10, "Spare"));
    assert_eq!(
        rig.gateway.gattc_peer_name(&[1, 0, 0, 0, 0, 2]).unwrap().as_str(),
        "Knob"
    );

    rig.gateway.flush_bindings();
    let (gattc, mesh) = rig.gateway.with_storage(|s| {
        (
            BindingStore::load(s, GATTC_BIND_KEY, 2).len(),
            BindingStore::load(s, MESH_BIND_KEY, 20).len(),
        )
    });
    assert_eq!(gattc, 2);
    assert_eq!(mesh, 0);
    assert!(rig.sink.events().contains(&GatewayEvent::BindingsFlushed { records: 2 }));
}
