//! Integration test driver for `tests/integration/` submodule.
//!
//! Each `mod` below maps to a file that exercises a specific subsystem
//! against the scripted mesh stack and the host adapter backends.  All
//! tests run on the host (x86_64) with no radio required.

mod cloud_tests;
mod gatt_tests;
mod mock_mesh;
mod provisioning_flow_tests;
mod router_tests;
