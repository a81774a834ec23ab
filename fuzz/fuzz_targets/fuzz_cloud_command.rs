//! Fuzz target: cloud command decoding
//!
//! Feeds arbitrary text into `parse_request`, then interprets every key the
//! way the gateway would (system command or node opcode).  Nothing may
//! panic, and no action may target the unassigned address.
//!
//! cargo fuzz run fuzz_cloud_command

#![no_main]

use libfuzzer_sys::fuzz_target;
use meshgate::app::commands::{parse_node, parse_request, parse_sys, ROOT_ADDR};

fuzz_target!(|data: &[u8]| {
    let Ok(text) = core::str::from_utf8(data) else {
        return;
    };
    let Some(request) = parse_request(text) else {
        return;
    };

    for action in &request.actions {
        assert_ne!(action.dst, 0, "unassigned destination slipped through");
        for (key, value) in &action.entries {
            if action.dst == ROOT_ADDR {
                let _ = parse_sys(key, value);
            } else if let Some(cmd) = parse_node(key, value) {
                assert!(cmd.opcode <= 0xFF_FFFF, "opcode wider than three bytes");
            }
        }
    }
});
