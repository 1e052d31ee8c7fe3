//! Device handles: database lookup, driver factories, controller clients and
//! the registry that owns them for the duration of a run.

pub mod catalog;
pub mod db;
pub mod descriptor;
pub mod manager;
pub mod rpc;

pub use catalog::{Device, DeviceCatalog, DeviceFactory};
pub use db::{DeviceDb, TomlDeviceDb};
pub use descriptor::{DeviceDbEntry, DeviceDescriptor};
pub use manager::{DeviceCloseFailure, DeviceHandle, DeviceRegistry};
pub use rpc::{ConnectMode, DisabledRpc, RpcClient, RpcConnector, RpcTarget};
