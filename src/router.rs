//! Cloud → mesh command router.
//!
//! Turns an `(opcode, data)` pair from the cloud into a client-model
//! message, sends it and waits for the stack's completion signal.  Group
//! destinations are fire-and-forget; unicast destinations block until the
//! status arrives or the per-message timeout expires.  Vendor messages wait
//! twice: once for the local send and once for the remote response.

use core::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use log::{debug, warn};

use crate::app::ports::MeshStack;
use crate::config::GatewayConfig;
use crate::mesh::keys::ProvisionerKeys;
use crate::mesh::message::{ClientMessage, ClientModel, MessageContext};
use crate::mesh::opcode::{
    is_vendor, OP_GEN_ONOFF_GET, OP_GEN_ONOFF_SET, OP_LIGHT_CTL_GET, OP_LIGHT_CTL_SET,
    OP_LIGHT_HSL_GET, OP_LIGHT_HSL_SET,
};
use crate::mesh::{is_group, TEMPERATURE_MAX, TEMPERATURE_MIN};
use crate::sync::{EventGroup, SEND_COMP, SEND_TIMEOUT};

/// Result of one routed send.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    /// Unicast: the completion signal arrived.
    Completed,
    /// Group: handed to the stack, nothing to wait for.
    Sent,
    /// The stack refused the send.
    Rejected,
    /// No completion within the timeout (or the stack reported a timeout).
    TimedOut,
    /// Vendor only: local send done, but the remote never answered.
    RemoteTimedOut,
}

impl SendOutcome {
    pub fn succeeded(self) -> bool {
        matches!(self, Self::Completed | Self::Sent)
    }
}

/// The one send currently waiting for its completion signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PendingCommand {
    pub opcode: u32,
    pub dst: u16,
}

pub struct CommandRouter {
    send_lock: Mutex<()>,
    in_flight: Mutex<Option<PendingCommand>>,
    onoff_tid: AtomicU8,
    hsl_tid: AtomicU8,
    ctl_tid: AtomicU8,
    net_idx: u16,
    app_idx: u16,
    ttl: u8,
    timeout: Duration,
}

impl CommandRouter {
    pub fn new(cfg: &GatewayConfig, keys: &ProvisionerKeys) -> Self {
        Self {
            send_lock: Mutex::new(()),
            in_flight: Mutex::new(None),
            onoff_tid: AtomicU8::new(0),
            hsl_tid: AtomicU8::new(0),
            ctl_tid: AtomicU8::new(0),
            net_idx: keys.net_idx,
            app_idx: keys.app_idx,
            ttl: cfg.msg_ttl,
            timeout: Duration::from_millis(u64::from(cfg.msg_timeout_ms)),
        }
    }

    fn next_tid(&self, model: ClientModel) -> u8 {
        let counter = match model {
            ClientModel::GenericOnOff => &self.onoff_tid,
            ClientModel::LightHsl => &self.hsl_tid,
            ClientModel::LightCtl => &self.ctl_tid,
            ClientModel::Vendor => return 0,
        };
        counter.fetch_add(1, Ordering::Relaxed)
    }

    /// Decode a cloud command into a client message.
    ///
    /// Returns `None` for unknown opcodes or payloads that are too short.
    pub fn build_message(&self, opcode: u32, data: &[u8]) -> Option<ClientMessage> {
        let be16 = |i: usize| -> Option<u16> {
            Some(u16::from_be_bytes([*data.get(i)?, *data.get(i + 1)?]))
        };

        let msg = match opcode {
            OP_GEN_ONOFF_GET => ClientMessage::OnOffGet,
            OP_GEN_ONOFF_SET => ClientMessage::OnOffSet {
                onoff: *data.first()? != 0,
                tid: self.next_tid(ClientModel::GenericOnOff),
            },
            OP_LIGHT_HSL_GET => ClientMessage::HslGet,
            OP_LIGHT_HSL_SET => ClientMessage::HslSet {
                hue: be16(0)?,
                saturation: be16(2)?,
                lightness: be16(4)?,
                tid: self.next_tid(ClientModel::LightHsl),
            },
            OP_LIGHT_CTL_GET => ClientMessage::CtlGet,
            OP_LIGHT_CTL_SET => ClientMessage::CtlSet {
                lightness: be16(0)?,
                temperature: be16(2)?
                    .saturating_add(TEMPERATURE_MIN)
                    .clamp(TEMPERATURE_MIN, TEMPERATURE_MAX),
                delta_uv: 0,
                tid: self.next_tid(ClientModel::LightCtl),
            },
            op if is_vendor(op) => ClientMessage::Vendor {
                opcode: op,
                payload: data.to_vec(),
            },
            _ => return None,
        };
        Some(msg)
    }

    /// The command currently awaiting completion, if any.
    pub fn pending(&self) -> Option<PendingCommand> {
        *self.in_flight.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_pending(&self, pending: Option<PendingCommand>) {
        *self.in_flight.lock().unwrap_or_else(PoisonError::into_inner) = pending;
    }

    /// Send `msg` to `dst` and wait according to the destination kind.
    pub fn send<M: MeshStack>(
        &self,
        mesh: &M,
        events: &EventGroup,
        dst: u16,
        msg: &ClientMessage,
    ) -> SendOutcome {
        let _guard = self.send_lock.lock().unwrap_or_else(PoisonError::into_inner);
        let group = is_group(dst);

        let ctx = MessageContext {
            net_idx: self.net_idx,
            app_idx: self.app_idx,
            dst,
            ttl: self.ttl,
            send_rel: false,
            timeout_ms: if group { 0 } else { self.timeout.as_millis() as u32 },
            opcode: msg.wire_opcode(dst),
        };

        // Clear before sending: the callback may fire before we wait.
        events.clear(SEND_COMP | SEND_TIMEOUT);
        if let Err(e) = mesh.client_send(&ctx, msg) {
            warn!("router: 0x{:06x} -> 0x{:04x} rejected: {}", ctx.opcode, dst, e);
            return SendOutcome::Rejected;
        }
        if group {
            debug!("router: 0x{:06x} -> group 0x{:04x}", ctx.opcode, dst);
            return SendOutcome::Sent;
        }

        self.set_pending(Some(PendingCommand { opcode: ctx.opcode, dst }));
        let outcome = if !self.wait_complete(events) {
            SendOutcome::TimedOut
        } else if msg.model() == ClientModel::Vendor && !self.wait_complete(events) {
            warn!("router: vendor 0x{:06x} -> 0x{:04x} no response", ctx.opcode, dst);
            SendOutcome::RemoteTimedOut
        } else {
            SendOutcome::Completed
        };
        self.set_pending(None);
        outcome
    }

    fn wait_complete(&self, events: &EventGroup) -> bool {
        events.wait_any(SEND_COMP | SEND_TIMEOUT, self.timeout) & SEND_COMP != 0
    }
}
