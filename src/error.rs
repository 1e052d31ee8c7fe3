//! Custom error types for the worker core.
//!
//! This module defines the primary error type, `DaqError`, shared by every
//! component of the crate. Using the `thiserror` crate, it provides a
//! centralized and consistent way to handle the kinds of errors the worker can
//! run into, from configuration problems to result serialization.
//!
//! ## Error Hierarchy
//!
//! - **`Config`**: Wraps errors from `figment` while loading the worker
//!   configuration file or environment overrides.
//! - **`Configuration`**: Semantic configuration errors: an unknown device
//!   type tag, an alias cycle in the device database, a local device with no
//!   registered factory, or a configuration value that fails validation.
//! - **`Io`**: Wraps standard `std::io::Error`.
//! - **`RunIdCache`**: The run identifier cache could not be read back or
//!   durably updated. This is the one I/O failure the worker treats as fatal.
//! - **`DeviceNotFound`** / **`DatasetNotFound`**: Lookups of names that do not
//!   exist. Propagated to the caller, never retried.
//! - **`DeviceCreation`**: A driver factory or RPC connector failed. The
//!   underlying `anyhow::Error` is kept as the source.
//! - **`UnsupportedType`**: A dataset value kind that has no result-file
//!   representation.
//!
//! Cleanup failures during device teardown are not errors. They
//! are logged and reported through
//! [`DeviceCloseFailure`](crate::device::DeviceCloseFailure).

use std::path::PathBuf;
use thiserror::Error;

/// Convenience alias for results using the crate error type.
pub type AppResult<T> = std::result::Result<T, DaqError>;

/// Errors raised by the worker core.
#[derive(Error, Debug)]
pub enum DaqError {
    /// Configuration could not be loaded or merged.
    #[error("Configuration error: {0}")]
    Config(#[from] figment::Error),

    /// Configuration loaded but failed validation.
    #[error("Configuration validation error: {0}")]
    Configuration(String),

    /// Filesystem error outside the run id cache.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The run id cache could not be read or written.
    #[error("Run ID cache '{}' error: {reason}", path.display())]
    RunIdCache {
        /// Cache file
        path: PathBuf,
        /// What went wrong
        reason: String,
    },

    /// No device database entry with this name.
    #[error("Device '{0}' not found in device database")]
    DeviceNotFound(String),

    /// Building a device handle failed.
    #[error("Failed to create device '{name}'")]
    DeviceCreation {
        /// Device database name
        name: String,
        /// Factory, connection or lookup error
        #[source]
        source: anyhow::Error,
    },

    /// Key present in neither dataset mapping.
    #[error("Dataset '{0}' not found")]
    DatasetNotFound(String),

    /// Index out of range or of the wrong kind for the value.
    #[error("Invalid dataset index: {0}")]
    InvalidIndex(String),

    /// Assigned element does not match the stored element type.
    #[error("Type mismatch: expected {expected}, got {found}")]
    TypeMismatch {
        /// Element type of the stored value
        expected: &'static str,
        /// Type of the assigned value
        found: &'static str,
    },

    /// Value kind without a result-file representation.
    #[error("Type {0} is not supported for result output")]
    UnsupportedType(&'static str),

    /// Result file or dataset database failure.
    #[error("Storage error: {0}")]
    Storage(String),

    /// Functionality compiled out of this build.
    #[error("Feature '{0}' is not enabled. Please build with --features {0}")]
    FeatureNotEnabled(String),
}

#[cfg(feature = "storage_hdf5")]
impl From<hdf5::Error> for DaqError {
    fn from(err: hdf5::Error) -> Self {
        DaqError::Storage(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = DaqError::UnsupportedType("list");
        assert_eq!(
            err.to_string(),
            "Type list is not supported for result output"
        );
    }

    #[test]
    fn test_device_creation_keeps_source() {
        use std::error::Error as _;

        let err = DaqError::DeviceCreation {
            name: "ttl0".into(),
            source: anyhow::anyhow!("core device unreachable"),
        };
        assert_eq!(err.to_string(), "Failed to create device 'ttl0'");
        let source = err.source().map(|s| s.to_string());
        assert_eq!(source.as_deref(), Some("core device unreachable"));
    }
}
