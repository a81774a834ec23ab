//! Outbound gateway events.
//!
//! The [`Gateway`](super::service::Gateway) emits these through the
//! [`EventSink`](super::ports::EventSink) port.  The log sink prints them on
//! the console; a telemetry adapter could forward them elsewhere.

use crate::mesh::MacAddr;
use crate::provisioning::SessionPhase;
use crate::router::SendOutcome;

/// Structured events emitted by the gateway core.
#[derive(Debug, Clone, PartialEq)]
pub enum GatewayEvent {
    /// Boot sequence finished.
    Started { root_name: heapless::String<16>, nodes: usize },

    /// A bind request finished; `unicast_addr` is `None` on failure.
    BindFinished { mac: MacAddr, unicast_addr: Option<u16> },

    /// The config chain moved on, finished or stopped.
    ChainProgress { addr: u16, phase: SessionPhase },
    ChainAborted { addr: u16, opcode: u32 },

    /// A node was reset and forgotten.
    Unbound { addr: u16 },
    /// Every node was reset and the mesh state erased.
    UnboundAll { nodes: usize },

    /// A cloud command was sent into the mesh.
    CommandSent { dst: u16, opcode: u32, outcome: SendOutcome },

    /// Heartbeat ageing tick.
    HeartbeatTick { online: usize, tracked: usize },

    /// The binding table reached flash.
    BindingsFlushed { records: usize },

    /// A cloud message was dropped because the link is down.
    CloudOffline { dropped: usize },
}
