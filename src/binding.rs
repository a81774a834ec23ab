//! Persistent MAC → mesh address binding table.
//!
//! The table lives in RAM as a fixed number of slots and is written back to
//! the key/blob store as one postcard blob.  Mutations only mark the table
//! dirty; [`BindingStore::flush_if_dirty`] coalesces them into a single
//! write once the table has been quiet for the debounce window.
//!
//! Storage failures never escape this module: a failed load yields an empty
//! table, a failed flush leaves the table dirty for the next attempt.

use heapless::String;
use log::{info, warn};
use serde::{Deserialize, Serialize};

use crate::app::ports::StoragePort;
use crate::mesh::{format_mac, MacAddr, ADDR_UNASSIGNED};

/// Namespace shared by every gateway blob.
pub const NVS_NAMESPACE: &str = "mesh";
/// Key of the mesh node table.
pub const MESH_BIND_KEY: &str = "_BIND_KEY_";
/// Key of the GATT-client peer table.
pub const GATTC_BIND_KEY: &str = "_GATTC_KEY_";

/// Longest display name kept per record.
pub const NAME_MAX_LEN: usize = 15;

/// Upper bound on one encoded slot, used to size the read buffer.
const MAX_ENCODED_SLOT: usize = 32;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BindingRecord {
    pub mac: MacAddr,
    /// 0 until provisioning completes.
    pub unicast_addr: u16,
    pub product_id: u8,
    pub name: String<16>,
}

impl BindingRecord {
    /// Build a record, truncating `name` to [`NAME_MAX_LEN`] characters.
    pub fn new(mac: MacAddr, unicast_addr: u16, product_id: u8, name: &str) -> Self {
        let mut n = String::new();
        for c in name.chars().take(NAME_MAX_LEN) {
            if n.push(c).is_err() {
                break;
            }
        }
        Self {
            mac,
            unicast_addr,
            product_id,
            name: n,
        }
    }
}

pub struct BindingStore {
    key: &'static str,
    slots: Vec<Option<BindingRecord>>,
    dirty: bool,
    last_mutation_ms: u64,
}

impl BindingStore {
    /// Empty table with `capacity` slots, persisted under `key`.
    pub fn new(key: &'static str, capacity: usize) -> Self {
        Self {
            key,
            slots: vec![None; capacity],
            dirty: false,
            last_mutation_ms: 0,
        }
    }

    /// Load the table stored under `key`.
    ///
    /// Missing or undecodable blobs give an empty table.  A blob with a
    /// different slot count is padded or truncated to `capacity`.
    pub fn load<S: StoragePort>(storage: &S, key: &'static str, capacity: usize) -> Self {
        let mut store = Self::new(key, capacity);
        let mut buf = vec![0u8; capacity * MAX_ENCODED_SLOT + 8];

        let len = match storage.read(NVS_NAMESPACE, key, &mut buf) {
            Ok(len) => len,
            Err(e) => {
                info!("binding[{}]: nothing loaded ({}), starting empty", key, e);
                return store;
            }
        };

        match postcard::from_bytes::<Vec<Option<BindingRecord>>>(&buf[..len]) {
            Ok(mut slots) => {
                slots.resize(capacity, None);
                store.slots = slots;
                info!("binding[{}]: loaded {} records", key, store.len());
            }
            Err(_) => warn!("binding[{}]: stored table corrupted, starting empty", key),
        }
        store
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Number of occupied slots.
    pub fn len(&self) -> usize {
        self.slots.iter().flatten().count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn records(&self) -> impl Iterator<Item = &BindingRecord> {
        self.slots.iter().flatten()
    }

    pub fn find_name_by_mac(&self, mac: &MacAddr) -> Option<&str> {
        self.records()
            .find(|r| &r.mac == mac)
            .map(|r| r.name.as_str())
    }

    /// MAC of the `select_index`-th record whose name starts with `name`.
    pub fn find_addr_by_name(&self, name: &str, select_index: usize) -> Option<MacAddr> {
        self.records()
            .filter(|r| r.name.starts_with(name))
            .nth(select_index)
            .map(|r| r.mac)
    }

    pub fn find_by_unicast(&self, addr: u16) -> Option<&BindingRecord> {
        if addr == ADDR_UNASSIGNED {
            return None;
        }
        self.records().find(|r| r.unicast_addr == addr)
    }

    /// Insert `record`, or overwrite the slot already holding its MAC.
    ///
    /// Returns `false` only when the MAC is new and every slot is taken.
    pub fn add_or_update(&mut self, record: BindingRecord, now_ms: u64) -> bool {
        let slot = self
            .slots
            .iter()
            .position(|s| s.as_ref().is_some_and(|r| r.mac == record.mac))
            .or_else(|| self.slots.iter().position(Option::is_none));

        let Some(idx) = slot else {
            warn!(
                "binding[{}]: table full, cannot add {}",
                self.key,
                format_mac(&record.mac)
            );
            return false;
        };

        info!(
            "binding[{}]: slot {} <- {} 0x{:04x} '{}'",
            self.key,
            idx,
            format_mac(&record.mac),
            record.unicast_addr,
            record.name
        );
        self.slots[idx] = Some(record);
        self.mark_dirty(now_ms);
        true
    }

    /// Clear the slot bound to `addr`.  Absence is not an error.
    pub fn remove_by_unicast(&mut self, addr: u16, now_ms: u64) -> bool {
        if addr == ADDR_UNASSIGNED {
            return true;
        }
        let mut removed = false;
        for slot in &mut self.slots {
            if slot.as_ref().is_some_and(|r| r.unicast_addr == addr) {
                *slot = None;
                removed = true;
            }
        }
        if removed {
            info!("binding[{}]: removed 0x{:04x}", self.key, addr);
            self.mark_dirty(now_ms);
        }
        true
    }

    /// Drop every record and erase the stored blob right away.
    pub fn remove_all<S: StoragePort>(&mut self, storage: &mut S) {
        self.slots.iter_mut().for_each(|s| *s = None);
        match storage.delete(NVS_NAMESPACE, self.key) {
            Ok(()) => {
                self.dirty = false;
                info!("binding[{}]: table erased", self.key);
            }
            Err(e) => {
                // Left dirty so the next flush writes the empty table.
                self.dirty = true;
                warn!("binding[{}]: erase failed: {}", self.key, e);
            }
        }
    }

    /// Write the table once it has been dirty and untouched for
    /// `debounce_ms`.  Returns `true` when a write happened.
    pub fn flush_if_dirty<S: StoragePort>(
        &mut self,
        storage: &mut S,
        now_ms: u64,
        debounce_ms: u64,
    ) -> bool {
        if !self.dirty || now_ms.saturating_sub(self.last_mutation_ms) < debounce_ms {
            return false;
        }

        let bytes = match postcard::to_allocvec(&self.slots) {
            Ok(b) => b,
            Err(_) => {
                warn!("binding[{}]: encode failed", self.key);
                return false;
            }
        };

        match storage.write(NVS_NAMESPACE, self.key, &bytes) {
            Ok(()) => {
                self.dirty = false;
                info!("binding[{}]: flushed {} bytes", self.key, bytes.len());
                true
            }
            Err(e) => {
                // Retry after another quiet window.
                self.last_mutation_ms = now_ms;
                warn!("binding[{}]: flush failed: {}", self.key, e);
                false
            }
        }
    }

    fn mark_dirty(&mut self, now_ms: u64) {
        self.dirty = true;
        self.last_mutation_ms = now_ms;
    }
}
