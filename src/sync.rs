//! Bit-flag event group for cross-context signalling.
//!
//! Producers (mesh stack callbacks) set bits; a single blocking waiter
//! clears the bits it is about to wait on, then blocks until any of them
//! is set or the timeout expires.  Matched bits are consumed on return.
//!
//! The clear-then-wait order matters: a completion left over from a
//! previous operation must never satisfy the next wait.

use std::sync::{Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant};

/// Mesh send completed (local or remote, depending on the model).
pub const SEND_COMP: u32 = 1 << 0;
/// Mesh send timed out or was rejected by the stack.
pub const SEND_TIMEOUT: u32 = 1 << 1;
/// Provisioning link opened.
pub const PROV_OPEN: u32 = 1 << 3;
/// Provisioning link closed.
pub const PROV_CLOSE: u32 = 1 << 4;
/// Provisioning completed and the composition fetch was sent.
pub const PROV_COMP: u32 = 1 << 5;
/// Adding the unprovisioned device failed.
pub const PROV_ERROR: u32 = 1 << 6;
/// Node deletion confirmed.
pub const PROV_DELETE: u32 = 1 << 7;

pub const ALL_BITS: u32 = u32::MAX;

#[derive(Debug, Default)]
pub struct EventGroup {
    bits: Mutex<u32>,
    cond: Condvar,
}

impl EventGroup {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, u32> {
        self.bits.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Set `bits` and wake every waiter.
    pub fn set(&self, bits: u32) {
        let mut guard = self.lock();
        *guard |= bits;
        self.cond.notify_all();
    }

    pub fn clear(&self, bits: u32) {
        *self.lock() &= !bits;
    }

    /// Current bit state without consuming anything.
    pub fn peek(&self) -> u32 {
        *self.lock()
    }

    /// Block until any of `bits` is set or `timeout` elapses.
    ///
    /// Returns the subset of `bits` that was set (0 on timeout) and clears
    /// exactly that subset.
    pub fn wait_any(&self, bits: u32, timeout: Duration) -> u32 {
        let deadline = Instant::now() + timeout;
        let mut guard = self.lock();
        loop {
            let matched = *guard & bits;
            if matched != 0 {
                *guard &= !matched;
                return matched;
            }
            let now = Instant::now();
            if now >= deadline {
                return 0;
            }
            let (g, _) = self
                .cond
                .wait_timeout(guard, deadline - now)
                .unwrap_or_else(std::sync::PoisonError::into_inner);
            guard = g;
        }
    }

    /// Clear `bits`, then [`wait_any`](Self::wait_any) on them.
    pub fn clear_and_wait(&self, bits: u32, timeout: Duration) -> u32 {
        self.clear(bits);
        self.wait_any(bits, timeout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn wait_returns_matched_bits_and_consumes_them() {
        let eg = EventGroup::new();
        eg.set(PROV_OPEN | PROV_DELETE);
        let got = eg.wait_any(PROV_OPEN | PROV_ERROR, Duration::from_millis(10));
        assert_eq!(got, PROV_OPEN);
        // Unrelated bit untouched.
        assert_eq!(eg.peek(), PROV_DELETE);
    }

    #[test]
    fn wait_times_out_with_zero() {
        let eg = EventGroup::new();
        let start = Instant::now();
        assert_eq!(eg.wait_any(SEND_COMP, Duration::from_millis(30)), 0);
        assert!(start.elapsed() >= Duration::from_millis(30));
    }

    #[test]
    fn clear_then_wait_ignores_stale_signal() {
        let eg = EventGroup::new();
        eg.set(SEND_COMP);
        let got = eg.clear_and_wait(SEND_COMP | SEND_TIMEOUT, Duration::from_millis(20));
        assert_eq!(got, 0);
    }

    #[test]
    fn wakes_on_set_from_other_thread() {
        let eg = Arc::new(EventGroup::new());
        let producer = Arc::clone(&eg);
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            producer.set(SEND_TIMEOUT);
        });
        let got = eg.wait_any(SEND_COMP | SEND_TIMEOUT, Duration::from_secs(2));
        assert_eq!(got, SEND_TIMEOUT);
        handle.join().unwrap();
    }
}
