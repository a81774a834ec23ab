//! Fuzz target: GATT credential writes
//!
//! Arbitrary characteristic writes must never panic, and anything decoded
//! as credentials must already satisfy the storage validation limits.
//!
//! cargo fuzz run fuzz_gatt_write

#![no_main]

use libfuzzer_sys::fuzz_target;
use meshgate::gatt::{parse_write, GattRequest, MAX_WRITE_LEN};

fuzz_target!(|data: &[u8]| {
    match parse_write(data) {
        Ok(Ok(GattRequest::Wifi(wifi))) => {
            assert!(!wifi.ssid.is_empty());
            assert!(wifi.password.is_empty() || wifi.password.len() >= 8);
        }
        Ok(Ok(GattRequest::Mqtt(mqtt))) => {
            assert!(!mqtt.host.is_empty());
            assert_ne!(mqtt.port, 0);
            assert!(mqtt.qos <= 2);
        }
        Ok(Err(_)) => {}
        Err(_) => {}
    }
    if data.len() > MAX_WRITE_LEN {
        assert!(parse_write(data).is_err());
    }
});
