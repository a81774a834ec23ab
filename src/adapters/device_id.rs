//! Gateway identity from factory eFuse data.
//!
//! The provisioner keys, device UUID and root name are all derived from
//! two factory values, so they come back identical after every reboot
//! without being stored:
//! - the chip-unique id (the 48-bit base MAC read as an integer);
//! - the Bluetooth MAC.

use crate::mesh::MacAddr;
use crate::mesh::keys::ProvisionerKeys;

/// Read the factory base MAC from eFuse.
#[cfg(target_os = "espidf")]
pub fn read_mac() -> MacAddr {
    let mut mac: MacAddr = [0u8; 6];
    unsafe {
        esp_idf_svc::sys::esp_efuse_mac_get_default(mac.as_mut_ptr());
    }
    mac
}

/// Simulation: returns a deterministic fake MAC.
#[cfg(not(target_os = "espidf"))]
pub fn read_mac() -> MacAddr {
    [0xDE, 0xAD, 0xBE, 0xEF, 0xCA, 0xFE]
}

/// Read the Bluetooth MAC (base MAC + 2 on ESP32).
#[cfg(target_os = "espidf")]
pub fn read_bt_mac() -> MacAddr {
    let mut mac: MacAddr = [0u8; 6];
    unsafe {
        esp_idf_svc::sys::esp_read_mac(
            mac.as_mut_ptr(),
            esp_idf_svc::sys::esp_mac_type_t_ESP_MAC_BT,
        );
    }
    mac
}

/// Simulation: base MAC with the last byte bumped, as on silicon.
#[cfg(not(target_os = "espidf"))]
pub fn read_bt_mac() -> MacAddr {
    let mut mac = read_mac();
    mac[5] = mac[5].wrapping_add(2);
    mac
}

/// Chip-unique id: the base MAC as a big-endian integer.
pub fn chip_id(mac: &MacAddr) -> u64 {
    mac.iter().fold(0u64, |acc, b| (acc << 8) | u64::from(*b))
}

/// Derive this gateway's provisioner keys from the factory identity.
pub fn provisioner_keys() -> ProvisionerKeys {
    ProvisionerKeys::derive(chip_id(&read_mac()), &read_bt_mac())
}
