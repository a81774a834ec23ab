//! Cloud node commands routed into the mesh.

use std::time::Duration;

use futures_lite::future::block_on;
use serde_json::json;

use meshgate::app::events::GatewayEvent;
use meshgate::event_loop::drain_once;
use meshgate::mesh::message::ClientMessage;
use meshgate::mesh::opcode::{OP_GEN_ONOFF_SET, OP_GEN_ONOFF_SET_UNACK, OP_VND_ATTR_SET};
use meshgate::mesh::TEMPERATURE_MIN;
use meshgate::router::{PendingCommand, SendOutcome};

use crate::mock_mesh::{Rig, wait_until};

fn connected_rig() -> Rig {
    let rig = Rig::new();
    rig.connect_cloud();
    rig
}

fn outcome_for(rig: &Rig, dst: u16) -> Option<SendOutcome> {
    rig.sink.events().into_iter().rev().find_map(|e| match e {
        GatewayEvent::CommandSent { dst: d, outcome, .. } if d == dst => Some(outcome),
        _ => None,
    })
}

#[test]
fn group_set_goes_out_unacknowledged() {
    let rig = connected_rig();
    rig.gateway
        .handle_cloud_message(r#"{"mid":"5","addr":"0xC001","0x8202":[1]}"#);

    let sends = rig.mesh.client_sends();
    assert_eq!(sends.len(), 1);
    let (ctx, msg) = &sends[0];
    assert_eq!(ctx.dst, 0xC001);
    assert_eq!(ctx.opcode, OP_GEN_ONOFF_SET_UNACK);
    assert_eq!(ctx.timeout_ms, 0);
    assert_eq!(*msg, ClientMessage::OnOffSet { onoff: true, tid: 0 });

    assert_eq!(outcome_for(&rig, 0xC001), Some(SendOutcome::Sent));
    assert_eq!(
        rig.published(),
        vec![json!({"addr":"0xC001","mid":"5","0x8204":[1]})]
    );
}

#[test]
fn unicast_set_waits_for_status() {
    let rig = connected_rig();
    rig.gateway
        .handle_cloud_message(r#"{"mid":"6","addr":"0x0006","0x8202":[0]}"#);

    let (ctx, _) = rig.mesh.client_sends()[0].clone();
    assert_eq!(ctx.opcode, OP_GEN_ONOFF_SET);
    assert_eq!(ctx.timeout_ms, rig.gateway.config().msg_timeout_ms);
    assert_eq!(outcome_for(&rig, 0x0006), Some(SendOutcome::Completed));
    assert_eq!(
        rig.published(),
        vec![json!({"addr":"0x0006","mid":"6","0x8204":[0]})]
    );
}

#[test]
fn unicast_get_reports_through_transfer_queue() {
    let rig = connected_rig();
    rig.gateway
        .handle_cloud_message(r#"{"mid":"8","addr":"0x0006","0x826D":[]}"#);

    assert_eq!(rig.mesh.client_sends()[0].1, ClientMessage::HslGet);
    assert!(rig.published().is_empty());

    assert!(block_on(drain_once(&*rig.gateway)));
    assert_eq!(
        rig.published(),
        vec![json!({"addr":"0x0006","mid":"8","0x8278":[0x10, 0, 0x20, 0, 0x30, 0]})]
    );
}

#[test]
fn silent_node_answers_fail() {
    let rig = connected_rig();
    rig.mesh.set_silent_nodes(true);
    rig.gateway
        .handle_cloud_message(r#"{"mid":"3","addr":"0x0006","0x8202":[1]}"#);

    assert_eq!(outcome_for(&rig, 0x0006), Some(SendOutcome::TimedOut));
    assert_eq!(
        rig.published(),
        vec![json!({"addr":"0x0006","mid":"3","0x8202":"fail"})]
    );
}

#[test]
fn vendor_set_waits_for_remote_answer() {
    let rig = connected_rig();
    rig.gateway
        .handle_cloud_message(r#"{"mid":"12","addr":"0x0006","0xD202E5":[1,2,3]}"#);

    let (ctx, msg) = rig.mesh.client_sends()[0].clone();
    assert_eq!(ctx.opcode, OP_VND_ATTR_SET);
    assert_eq!(
        msg,
        ClientMessage::Vendor { opcode: OP_VND_ATTR_SET, payload: vec![1, 2, 3] }
    );
    assert_eq!(outcome_for(&rig, 0x0006), Some(SendOutcome::Completed));

    assert!(block_on(drain_once(&*rig.gateway)));
    assert_eq!(
        rig.published(),
        vec![json!({"addr":"0x0006","mid":"12","0xD402E5":[1, 2, 3]})]
    );
}

#[test]
fn ctl_temperature_is_offset_and_clamped() {
    let rig = connected_rig();
    rig.gateway
        .handle_cloud_message(r#"{"addr":"0x0006","0x825E":[255,255,0,0]}"#);

    match &rig.mesh.client_sends()[0].1 {
        ClientMessage::CtlSet { lightness, temperature, .. } => {
            assert_eq!(*lightness, 0xFFFF);
            assert_eq!(*temperature, TEMPERATURE_MIN);
        }
        other => panic!("unexpected message {other:?}"),
    }
    assert_eq!(
        rig.published(),
        vec![json!({"addr":"0x0006","mid":"0","0x8260":[255, 255, 0, 0]})]
    );
}

#[test]
fn unusable_opcode_answers_fail_without_sending() {
    let rig = connected_rig();
    rig.gateway
        .handle_cloud_message(r#"{"mid":"4","addr":"0x0006","0x1234":[1]}"#);

    assert!(rig.mesh.client_sends().is_empty());
    assert_eq!(
        rig.published(),
        vec![json!({"addr":"0x0006","mid":"4","0x1234":"fail"})]
    );
}

#[test]
fn replies_are_dropped_while_offline() {
    let rig = Rig::new();
    rig.gateway
        .handle_cloud_message(r#"{"mid":"5","addr":"0xC001","0x8202":[1]}"#);

    assert_eq!(rig.mesh.client_sends().len(), 1);
    assert!(rig.cloud.take_published().is_empty());
    assert!(rig.sink.events().contains(&GatewayEvent::CloudOffline { dropped: 1 }));
}

#[test]
fn scene_runs_every_action() {
    let rig = connected_rig();
    rig.gateway.handle_cloud_message(
        r#"{"mid":"7","srun":{"action":[
            {"addr":"0xC001","0x8202":[1]},
            {"addr":"0xC002","0x8202":[0]}
        ]}}"#,
    );

    let dsts: Vec<u16> = rig.mesh.client_sends().iter().map(|(ctx, _)| ctx.dst).collect();
    assert_eq!(dsts, vec![0xC001, 0xC002]);
    assert_eq!(rig.published().len(), 2);
}

#[test]
fn one_command_is_in_flight_while_waiting() {
    let rig = connected_rig();
    rig.mesh.set_silent_nodes(true);
    assert_eq!(rig.gateway.pending_command(), None);

    let gateway = rig.gateway.clone();
    let sender = std::thread::spawn(move || {
        gateway.handle_cloud_message(r#"{"mid":"3","addr":"0x0006","0x8202":[1]}"#);
    });
    assert!(wait_until(Duration::from_millis(250), || {
        rig.gateway.pending_command()
            == Some(PendingCommand { opcode: OP_GEN_ONOFF_SET, dst: 0x0006 })
    }));
    sender.join().unwrap();

    assert_eq!(rig.gateway.pending_command(), None);
}

#[test]
fn payloads_do_not_interleave() {
    let rig = connected_rig();
    rig.mesh.set_silent_nodes(true);

    let gateway = rig.gateway.clone();
    let first = std::thread::spawn(move || {
        gateway.handle_cloud_message(r#"{"mid":"A","addr":"0x0006","0x8202":[1],"0x8201":[]}"#);
    });
    assert!(wait_until(Duration::from_millis(250), || rig.gateway.pending_command().is_some()));

    let gateway = rig.gateway.clone();
    let second = std::thread::spawn(move || {
        gateway.handle_cloud_message(r#"{"mid":"B","addr":"0xC001","0x8202":[1]}"#);
    });
    std::thread::sleep(Duration::from_millis(50));
    assert_eq!(rig.gateway.last_mid(), "A");

    first.join().unwrap();
    second.join().unwrap();

    let dsts: Vec<u16> = rig.mesh.client_sends().iter().map(|(ctx, _)| ctx.dst).collect();
    assert_eq!(dsts, vec![0x0006, 0x0006, 0xC001]);
    assert_eq!(rig.gateway.last_mid(), "B");
}
