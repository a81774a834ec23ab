//! Field helpers for the `|`-separated credential strings written over GATT.

use core::str::FromStr;

/// `true` if every byte is printable ASCII (`0x20..=0x7E`).
///
/// SSIDs and broker host names must pass this before they reach the
/// WiFi driver or the MQTT URL.
pub(crate) fn is_printable_ascii(s: &str) -> bool {
    s.bytes().all(|b| (0x20..=0x7E).contains(&b))
}

/// Parse a numeric credential field, ignoring surrounding whitespace, and
/// keep it only if `accept` agrees.
pub(crate) fn parse_field<T: FromStr>(s: &str, accept: impl Fn(&T) -> bool) -> Option<T> {
    s.trim().parse().ok().filter(|v| accept(v))
}
