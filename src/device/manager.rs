//! Lazy creation and ordered teardown of device handles.

use super::catalog::{Device, DeviceCatalog};
use super::db::DeviceDb;
use super::descriptor::{DeviceDbEntry, DeviceDescriptor};
use super::rpc::{ConnectMode, DisabledRpc, RpcClient, RpcConnector, RpcTarget};
use crate::error::{AppResult, DaqError};
use anyhow::anyhow;
use std::any::Any;
use std::collections::{BTreeMap, HashMap};
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Handle to a local driver or a controller client.
#[derive(Clone)]
pub enum DeviceHandle {
    /// Driver built from the catalog
    Local(Arc<dyn Device>),
    /// Client connected to a controller
    Controller(Arc<dyn RpcClient>),
}

impl DeviceHandle {
    /// Borrow the concrete local driver, if this is one of type `T`.
    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        match self {
            DeviceHandle::Local(device) => device.as_any().downcast_ref::<T>(),
            DeviceHandle::Controller(_) => None,
        }
    }

    /// The controller client, if this handle is one.
    pub fn as_controller(&self) -> Option<&Arc<dyn RpcClient>> {
        match self {
            DeviceHandle::Controller(client) => Some(client),
            DeviceHandle::Local(_) => None,
        }
    }

    /// Whether both handles refer to the same underlying object.
    pub fn ptr_eq(&self, other: &DeviceHandle) -> bool {
        match (self, other) {
            (DeviceHandle::Local(a), DeviceHandle::Local(b)) => Arc::ptr_eq(a, b),
            (DeviceHandle::Controller(a), DeviceHandle::Controller(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }

    fn close(&self) -> anyhow::Result<()> {
        match self {
            DeviceHandle::Local(device) => device.close(),
            DeviceHandle::Controller(client) => client.close_rpc(),
        }
    }
}

impl std::fmt::Debug for DeviceHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeviceHandle::Local(_) => f.write_str("DeviceHandle::Local(..)"),
            DeviceHandle::Controller(_) => f.write_str("DeviceHandle::Controller(..)"),
        }
    }
}

/// A handle whose close failed during [`DeviceRegistry::close_all`].
#[derive(Debug)]
pub struct DeviceCloseFailure {
    /// Device database name
    pub name: String,
    /// Error returned or panic raised by the close
    pub error: anyhow::Error,
}

/// Creates device handles on first use and owns them until teardown.
///
/// Handles are closed in the reverse of their creation order, so a driver
/// that requested another device while being built is closed before it.
pub struct DeviceRegistry {
    db: Arc<dyn DeviceDb>,
    catalog: Arc<DeviceCatalog>,
    rpc: Arc<dyn RpcConnector>,
    virtual_devices: HashMap<String, DeviceHandle>,
    /// Creation order.
    active: Vec<(String, DeviceHandle)>,
    /// Names currently being built, outermost first.
    pending: Vec<String>,
}

impl DeviceRegistry {
    /// Registry without an RPC transport; controller entries fail to build.
    pub fn new(db: Arc<dyn DeviceDb>, catalog: Arc<DeviceCatalog>) -> Self {
        Self {
            db,
            catalog,
            rpc: Arc::new(DisabledRpc),
            virtual_devices: HashMap::new(),
            active: Vec::new(),
            pending: Vec::new(),
        }
    }

    /// Use `rpc` to connect controller entries.
    pub fn with_rpc(mut self, rpc: Arc<dyn RpcConnector>) -> Self {
        self.rpc = rpc;
        self
    }

    /// Add a caller-owned handle served under `name` without consulting the
    /// device database. It is never closed by the registry.
    pub fn with_virtual_device(mut self, name: impl Into<String>, handle: DeviceHandle) -> Self {
        self.virtual_devices.insert(name.into(), handle);
        self
    }

    /// Full contents of the device database.
    pub fn get_device_db(&self) -> AppResult<BTreeMap<String, DeviceDbEntry>> {
        self.db.get_device_db()
    }

    /// Get the driver or controller client for a device database entry,
    /// creating it on first use.
    pub fn get(&mut self, name: &str) -> AppResult<DeviceHandle> {
        if let Some(handle) = self.virtual_devices.get(name) {
            return Ok(handle.clone());
        }
        if let Some((_, handle)) = self.active.iter().find(|(active, _)| active == name) {
            return Ok(handle.clone());
        }
        if self.pending.iter().any(|pending| pending == name) {
            return Err(DaqError::Configuration(format!(
                "Circular device dependency: {} -> {}",
                self.pending.join(" -> "),
                name
            )));
        }

        let descriptor = self.resolve(name)?;
        self.pending.push(name.to_string());
        let created = self.create(name, descriptor);
        self.pending.pop();

        let handle = created?;
        info!(device = name, "Device created");
        self.active.push((name.to_string(), handle.clone()));
        Ok(handle)
    }

    /// Names of the handles created so far, oldest first.
    pub fn active_devices(&self) -> Vec<&str> {
        self.active.iter().map(|(name, _)| name.as_str()).collect()
    }

    /// Close every created handle, newest first.
    ///
    /// A failing (or panicking) close is logged and reported but never stops
    /// the remaining handles from being closed. The registry holds no handles
    /// afterwards, so calling this again is a no-op.
    pub fn close_all(&mut self) -> Vec<DeviceCloseFailure> {
        let mut failures = Vec::new();
        while let Some((name, handle)) = self.active.pop() {
            let result = panic::catch_unwind(AssertUnwindSafe(|| handle.close()))
                .unwrap_or_else(|payload| Err(anyhow!("panicked: {}", panic_message(&*payload))));
            match result {
                Ok(()) => debug!(device = %name, "Device closed"),
                Err(error) => {
                    let reason = format!("{:#}", error);
                    warn!(device = %name, error = %reason, "Exception when closing device");
                    failures.push(DeviceCloseFailure { name, error });
                }
            }
        }
        failures
    }

    /// Follow aliases until a concrete descriptor is reached.
    fn resolve(&self, name: &str) -> AppResult<DeviceDescriptor> {
        let mut chain = vec![name.to_string()];
        let mut entry = self.db.get(name)?;
        loop {
            match entry {
                DeviceDbEntry::Entry(table) => {
                    let resolved = chain.last().map_or(name, String::as_str);
                    return DeviceDescriptor::from_table(resolved, &table);
                }
                DeviceDbEntry::Alias(target) => {
                    let cyclic = chain.contains(&target);
                    chain.push(target);
                    if cyclic {
                        return Err(DaqError::Configuration(format!(
                            "Alias cycle in device database: {}",
                            chain.join(" -> ")
                        )));
                    }
                    entry = self.db.get(chain[chain.len() - 1].as_str())?;
                }
            }
        }
    }

    fn create(&mut self, name: &str, descriptor: DeviceDescriptor) -> AppResult<DeviceHandle> {
        let creation_error = |source| DaqError::DeviceCreation {
            name: name.to_string(),
            source,
        };

        match descriptor {
            DeviceDescriptor::Local {
                module,
                class,
                arguments,
            } => {
                debug!(device = name, %module, %class, "Instantiating local device");
                let factory = self.catalog.factory(&module, &class)?;
                let device = factory(self, &arguments).map_err(creation_error)?;
                Ok(DeviceHandle::Local(device))
            }
            DeviceDescriptor::Controller {
                host,
                port,
                target_name,
                best_effort,
            } => {
                let mode = if best_effort {
                    ConnectMode::BestEffort
                } else {
                    ConnectMode::Blocking
                };
                let target = RpcTarget::from(target_name);
                debug!(device = name, %host, port, %target, ?mode, "Connecting to controller");
                let client = self
                    .rpc
                    .connect(&host, port, target, mode)
                    .map_err(creation_error)?;
                Ok(DeviceHandle::Controller(client))
            }
        }
    }
}

impl Drop for DeviceRegistry {
    fn drop(&mut self) {
        if !self.active.is_empty() {
            warn!(
                devices = self.active.len(),
                "Device registry dropped with open devices, closing them"
            );
            self.close_all();
        }
    }
}

impl std::fmt::Debug for DeviceRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceRegistry")
            .field("catalog", &self.catalog)
            .field("virtual_devices", &self.virtual_devices.keys().collect::<Vec<_>>())
            .field("active", &self.active_devices())
            .finish()
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        (*msg).to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
