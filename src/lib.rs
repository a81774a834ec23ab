//! BLE-Mesh gateway core.
//!
//! Exposes the provisioning, binding, routing and heartbeat logic for
//! integration testing.  All ESP-IDF-specific code is guarded by
//! `#[cfg(target_os = "espidf")]` within each module.

#![deny(unused_must_use)]

pub mod app;
pub mod binding;
pub mod config;
pub mod error;
pub mod event_loop;
pub mod gatt;
pub mod heartbeat;
pub mod mesh;
pub mod provisioning;
pub mod router;
pub mod sync;

// The adapters carry host simulations, so they compile everywhere.
pub mod adapters;
