//! Run-time resource core for a rust_daq experiment worker.
//!
//! The worker process executing experiments depends on four pieces:
//!
//! - [`run_id`]: durable, strictly increasing run identifiers that survive
//!   restarts and can be recovered from the results tree
//! - [`device`]: lazily created device drivers and controller clients, torn
//!   down in reverse creation order
//! - [`dataset`]: local and broadcast dataset mappings
//! - [`data`]: serialization of a run's local datasets into a typed result
//!   file
//!
//! [`worker`] ties them together for a single run.
//!
//! # Features
//!
//! - `storage_hdf5` - Enable the HDF5 result file backend (needs libhdf5)

pub mod config;
pub mod data;
pub mod dataset;
pub mod device;
pub mod error;
pub mod logging;
pub mod run_id;
pub mod worker;

// Re-exports for convenience
pub use config::WorkerConfig;
pub use dataset::{DatasetIndex, DatasetScope, DatasetStore, DatasetValue};
pub use device::{DeviceCatalog, DeviceHandle, DeviceRegistry};
pub use error::{AppResult, DaqError};
pub use run_id::{RunId, RunIdAllocator};
pub use worker::{RunContext, WorkerCore};
