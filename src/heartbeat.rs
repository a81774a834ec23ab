//! Node liveness from mesh heartbeats.
//!
//! Heartbeat receptions only set a per-node "seen" flag; [`HeartbeatTracker::tick`]
//! runs on a fixed period and turns the flags into online/offline state.
//! The table is bounded: once full, heartbeats from new addresses are
//! ignored and existing entries are never evicted.

use log::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodeHeartbeatEntry {
    pub unicast_addr: u16,
    pub seen_this_period: bool,
    pub online: bool,
}

pub struct HeartbeatTracker {
    entries: Vec<NodeHeartbeatEntry>,
    max_nodes: usize,
}

impl HeartbeatTracker {
    pub fn new(max_nodes: usize) -> Self {
        Self {
            entries: Vec::with_capacity(max_nodes),
            max_nodes,
        }
    }

    /// Record a heartbeat from `src`.  Returns `false` when `src` is new and
    /// the table is already full.
    pub fn on_heartbeat(&mut self, src: u16) -> bool {
        if let Some(e) = self.entries.iter_mut().find(|e| e.unicast_addr == src) {
            e.seen_this_period = true;
            return true;
        }
        if self.entries.len() >= self.max_nodes {
            debug!("heartbeat: table full, ignoring 0x{:04x}", src);
            return false;
        }
        self.entries.push(NodeHeartbeatEntry {
            unicast_addr: src,
            seen_this_period: true,
            online: false,
        });
        true
    }

    /// Age every entry.  Returns the number of nodes now online.
    pub fn tick(&mut self) -> usize {
        for e in &mut self.entries {
            e.online = e.seen_this_period;
            e.seen_this_period = false;
        }
        self.online_count()
    }

    pub fn online_count(&self) -> usize {
        self.entries.iter().filter(|e| e.online).count()
    }

    pub fn is_online(&self, addr: u16) -> bool {
        self.entries
            .iter()
            .any(|e| e.unicast_addr == addr && e.online)
    }

    pub fn entries(&self) -> &[NodeHeartbeatEntry] {
        &self.entries
    }

    /// Reset the table to the nodes the mesh stack currently knows.
    pub fn rekey(&mut self, nodes: &[u16]) {
        self.entries.clear();
        for &addr in nodes.iter().take(self.max_nodes) {
            self.entries.push(NodeHeartbeatEntry {
                unicast_addr: addr,
                seen_this_period: false,
                online: false,
            });
        }
        info!("heartbeat: tracking {} nodes", self.entries.len());
    }
}
