//! Log-based event sink adapter.
//!
//! Implements [`EventSink`] by writing gateway events to the ESP-IDF logger
//! (UART / USB-CDC in production), one tagged line per event.

use log::{info, warn};

use crate::app::events::GatewayEvent;
use crate::app::ports::EventSink;
use crate::mesh::format_mac;

/// Adapter that logs every [`GatewayEvent`] to the serial console.
#[derive(Debug, Default)]
pub struct LogEventSink;

impl LogEventSink {
    pub fn new() -> Self {
        Self
    }
}

impl EventSink for LogEventSink {
    fn emit(&self, event: &GatewayEvent) {
        match event {
            GatewayEvent::Started { root_name, nodes } => {
                info!("START | root={} | nodes={}", root_name, nodes);
            }
            GatewayEvent::BindFinished { mac, unicast_addr: Some(addr) } => {
                info!("PROV  | bound {} -> 0x{:04X}", format_mac(mac), addr);
            }
            GatewayEvent::BindFinished { mac, unicast_addr: None } => {
                warn!("PROV  | bind {} failed", format_mac(mac));
            }
            GatewayEvent::ChainProgress { addr, phase } => {
                info!("CHAIN | 0x{:04X} -> {:?}", addr, phase);
            }
            GatewayEvent::ChainAborted { addr, opcode } => {
                warn!("CHAIN | 0x{:04X} aborted at 0x{:04X}", addr, opcode);
            }
            GatewayEvent::Unbound { addr } => {
                info!("PROV  | unbound 0x{:04X}", addr);
            }
            GatewayEvent::UnboundAll { nodes } => {
                info!("PROV  | unbound all ({} nodes), mesh state erased", nodes);
            }
            GatewayEvent::CommandSent { dst, opcode, outcome } => {
                info!("CMD   | 0x{:06X} -> 0x{:04X} | {:?}", opcode, dst, outcome);
            }
            GatewayEvent::HeartbeatTick { online, tracked } => {
                info!("HBEAT | online={}/{}", online, tracked);
            }
            GatewayEvent::BindingsFlushed { records } => {
                info!("NVS   | bindings flushed ({} records)", records);
            }
            GatewayEvent::CloudOffline { dropped } => {
                warn!("CLOUD | offline, dropped {} message(s)", dropped);
            }
        }
    }
}
