//! System services adapter: wall clock, OTA hand-off and restart.
//!
//! - **`target_os = "espidf"`**: `settimeofday()`, `esp_restart()`.
//! - **host**: records the requests so tests can inspect them.
//!
//! The firmware download itself lives outside this crate; `start_ota` only
//! records the request and logs it for the updater task to pick up.

use core::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};

use log::{info, warn};

use crate::app::ports::SystemPort;

/// A pending firmware update request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OtaRequest {
    pub url: String,
    pub mid: String,
}

#[derive(Debug, Default)]
pub struct SystemAdapter {
    restart_requested: AtomicBool,
    last_time_set: AtomicU64,
    ota: Mutex<Option<OtaRequest>>,
}

impl SystemAdapter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn restart_requested(&self) -> bool {
        self.restart_requested.load(Ordering::Acquire)
    }

    /// Last unix time handed to `set_time` (0 if never).
    pub fn last_time_set(&self) -> u64 {
        self.last_time_set.load(Ordering::Relaxed)
    }

    /// Take the pending OTA request, if any.
    pub fn take_ota(&self) -> Option<OtaRequest> {
        self.ota.lock().unwrap_or_else(PoisonError::into_inner).take()
    }

    #[cfg(target_os = "espidf")]
    fn platform_set_time(unix_secs: u64) {
        let tv = esp_idf_svc::sys::timeval {
            tv_sec: unix_secs as _,
            tv_usec: 0,
        };
        let rc = unsafe { esp_idf_svc::sys::settimeofday(&tv, core::ptr::null()) };
        if rc != 0 {
            warn!("SYS: settimeofday failed ({})", rc);
        }
    }

    #[cfg(not(target_os = "espidf"))]
    fn platform_set_time(_unix_secs: u64) {}

    #[cfg(target_os = "espidf")]
    fn platform_restart() {
        // Let the log line and the last MQTT reply drain.
        esp_idf_hal::delay::FreeRtos::delay_ms(500);
        unsafe { esp_idf_svc::sys::esp_restart() };
    }

    #[cfg(not(target_os = "espidf"))]
    fn platform_restart() {}
}

impl SystemPort for SystemAdapter {
    fn set_time(&self, unix_secs: u64) {
        info!("SYS: wall clock set to {}", unix_secs);
        self.last_time_set.store(unix_secs, Ordering::Relaxed);
        Self::platform_set_time(unix_secs);
    }

    fn start_ota(&self, url: &str, mid: &str) {
        info!("SYS: OTA requested from {} (mid {})", url, mid);
        let mut slot = self.ota.lock().unwrap_or_else(PoisonError::into_inner);
        if slot.is_some() {
            warn!("SYS: replacing pending OTA request");
        }
        *slot = Some(OtaRequest { url: url.into(), mid: mid.into() });
    }

    fn request_restart(&self) {
        warn!("SYS: restart requested");
        self.restart_requested.store(true, Ordering::Release);
        Self::platform_restart();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn requests_are_recorded() {
        let s = SystemAdapter::new();
        assert!(!s.restart_requested());
        assert_eq!(s.take_ota(), None);

        s.set_time(1_700_000_000);
        s.start_ota("http://fw.local/gw.bin", "42");
        s.request_restart();

        assert_eq!(s.last_time_set(), 1_700_000_000);
        assert!(s.restart_requested());
        let ota = s.take_ota().unwrap();
        assert_eq!(ota.url, "http://fw.local/gw.bin");
        assert_eq!(ota.mid, "42");
        assert_eq!(s.take_ota(), None);
    }
}
