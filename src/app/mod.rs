//! Application core: the gateway's domain logic, zero I/O.
//!
//! The provisioning session, binding tables, heartbeat tracker and command
//! router are wired together by the [`service::Gateway`].  The mesh stack,
//! the cloud link, storage and system services are reached only through
//! the **port traits** in [`ports`], so the whole core runs against mocks
//! on the host.

pub mod commands;
pub mod events;
pub mod ports;
pub mod service;
