//! Provisioner identity and key derivation.
//!
//! Keys are derived from the chip's factory-unique id and its BT MAC, so
//! the network survives a reboot without any key material in flash.

use core::fmt::Write;

use super::MacAddr;

/// Device UUID prefix every node of this network advertises.
pub const UUID_MATCH_PREFIX: [u8; 2] = *b"Yi";

pub const APP_IDX: u16 = 0x0000;
/// Primary subnet plus one; the stack presets the primary.
pub const NET_IDX: u16 = super::NET_PRIMARY + 1;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProvisionerKeys {
    pub net_idx: u16,
    pub app_idx: u16,
    pub net_key: [u8; 16],
    pub app_key: [u8; 16],
    /// The gateway's own device UUID.
    pub dev_uuid: [u8; 16],
    /// 16-bit fold of the chip id, used in the display name.
    pub chip_id16: u16,
}

/// XOR-fold the four little-endian words of the chip id, then add.
pub fn fold_chip_id(chip_id: u64) -> u16 {
    let b = chip_id.to_le_bytes();
    let w = |i: usize| u16::from_le_bytes([b[2 * i], b[2 * i + 1]]);
    (w(0) ^ w(1)).wrapping_add(w(2) ^ w(3))
}

impl ProvisionerKeys {
    pub fn derive(chip_id: u64, bt_mac: &MacAddr) -> Self {
        let chip_id16 = fold_chip_id(chip_id);

        let mut dev_uuid = [0u8; 16];
        dev_uuid[..2].copy_from_slice(&UUID_MATCH_PREFIX);
        // [2..4]: product id (root) + reserved
        dev_uuid[4..6].copy_from_slice(&super::CID_COMPANY.to_le_bytes());
        dev_uuid[6] = 0x80; // OTA capable
        dev_uuid[7] = 0x50; // BLE 5.0
        dev_uuid[8..10].copy_from_slice(&chip_id16.to_be_bytes());
        dev_uuid[10..16].copy_from_slice(bt_mac);

        let mut app_key = [0u8; 16];
        app_key[..8].copy_from_slice(&dev_uuid[8..16]);
        app_key[8..].copy_from_slice(&chip_id.to_le_bytes());

        let mut net_key = app_key;
        net_key.swap(0, 1);

        Self {
            net_idx: NET_IDX,
            app_idx: APP_IDX,
            net_key,
            app_key,
            dev_uuid,
            chip_id16,
        }
    }

    /// `YiRoot%05d`.
    pub fn root_name(&self) -> heapless::String<16> {
        let mut name = heapless::String::new();
        let _ = write!(name, "YiRoot{:05}", self.chip_id16);
        name
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MAC: MacAddr = [0x11, 0x22, 0x33, 0x44, 0x55, 0x66];

    #[test]
    fn chip_id_fold() {
        // words (LE): 0x0201, 0x0403, 0x0605, 0x0807
        let chip = u64::from_le_bytes([1, 2, 3, 4, 5, 6, 7, 8]);
        let want = (0x0201u16 ^ 0x0403).wrapping_add(0x0605 ^ 0x0807);
        assert_eq!(fold_chip_id(chip), want);
    }

    #[test]
    fn derivation_is_deterministic() {
        let a = ProvisionerKeys::derive(0xDEAD_BEEF_1234_5678, &MAC);
        let b = ProvisionerKeys::derive(0xDEAD_BEEF_1234_5678, &MAC);
        assert_eq!(a, b);
        let c = ProvisionerKeys::derive(0xDEAD_BEEF_1234_5679, &MAC);
        assert_ne!(a.app_key, c.app_key);
    }

    #[test]
    fn uuid_layout() {
        let k = ProvisionerKeys::derive(0x0102_0304_0506_0708, &MAC);
        assert_eq!(&k.dev_uuid[..2], b"Yi");
        assert_eq!(&k.dev_uuid[4..8], &[0xE5, 0x02, 0x80, 0x50]);
        assert_eq!(k.dev_uuid[8..10], k.chip_id16.to_be_bytes());
        assert_eq!(&k.dev_uuid[10..], &MAC);
    }

    #[test]
    fn net_key_swaps_first_two_app_key_bytes() {
        let chip = 0x0102_0304_0506_0708;
        let k = ProvisionerKeys::derive(chip, &MAC);
        assert_eq!(&k.app_key[..8], &k.dev_uuid[8..16]);
        assert_eq!(&k.app_key[8..], &chip.to_le_bytes());
        assert_eq!(k.net_key[0], k.app_key[1]);
        assert_eq!(k.net_key[1], k.app_key[0]);
        assert_eq!(&k.net_key[2..], &k.app_key[2..]);
        assert_eq!((k.net_idx, k.app_idx), (1, 0));
    }

    #[test]
    fn root_name_zero_pads() {
        let mut k = ProvisionerKeys::derive(0, &MAC);
        k.chip_id16 = 42;
        assert_eq!(k.root_name().as_str(), "YiRoot00042");
    }
}
