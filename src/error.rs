//! Unified error types for the gateway firmware.
//!
//! Subsystems report their own typed errors ([`MeshError`], [`StorageError`])
//! and convert into [`Error`] at the boundaries where a caller needs one
//! type, mostly the boot sequence.  All variants are `Copy` so they can be
//! logged and handed across the callback/event-loop boundary freely.

use core::fmt;

pub use crate::app::ports::{ConfigError, MeshError, StorageError};
pub use crate::gatt::ProvisioningError;

// ---------------------------------------------------------------------------
// Top-level firmware error
// ---------------------------------------------------------------------------

/// Every fallible gateway operation that escapes its subsystem ends up here.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// The mesh stack rejected a call.
    Mesh(MeshError),
    /// The key/blob store failed.
    Storage(StorageError),
    /// A GATT credential write was rejected.
    Provisioning(ProvisioningError),
    /// A subsystem could not be brought up at boot.
    Init(&'static str),
    /// Configuration is invalid or could not be loaded.
    Config(&'static str),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Mesh(e) => write!(f, "mesh: {e}"),
            Self::Storage(e) => write!(f, "storage: {e}"),
            Self::Provisioning(e) => write!(f, "provisioning: {e}"),
            Self::Init(msg) => write!(f, "init: {msg}"),
            Self::Config(msg) => write!(f, "config: {msg}"),
        }
    }
}

impl core::error::Error for Error {}

impl From<MeshError> for Error {
    fn from(e: MeshError) -> Self {
        Self::Mesh(e)
    }
}

impl From<StorageError> for Error {
    fn from(e: StorageError) -> Self {
        Self::Storage(e)
    }
}

impl From<ProvisioningError> for Error {
    fn from(e: ProvisioningError) -> Self {
        Self::Provisioning(e)
    }
}

impl From<ConfigError> for Error {
    fn from(e: ConfigError) -> Self {
        match e {
            ConfigError::ValidationFailed(msg) => Self::Config(msg),
            ConfigError::Corrupted => Self::Config("stored config corrupted"),
            ConfigError::StorageFull => Self::Config("config store full"),
            ConfigError::IoError => Self::Config("config store I/O"),
        }
    }
}

// ---------------------------------------------------------------------------
// Convenience Result alias
// ---------------------------------------------------------------------------

/// Firmware-wide `Result` alias.
pub type Result<T> = core::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_prefixes_subsystem() {
        let e: Error = MeshError::Rejected(-1).into();
        assert_eq!(e.to_string(), "mesh: stack rejected call (err -1)");
        let e: Error = StorageError::NotFound.into();
        assert_eq!(e.to_string(), "storage: key not found");
        assert_eq!(Error::Init("keys").to_string(), "init: keys");
        let e: Error = ConfigError::ValidationFailed("qos").into();
        assert_eq!(e, Error::Config("qos"));
    }
}
