//! Factories for in-process device drivers.
//!
//! Local device descriptors name a `(module, class)` pair. The catalog maps
//! each pair to a builder closure registered at startup.

use super::manager::DeviceRegistry;
use crate::error::{AppResult, DaqError};
use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;
use toml::Table;

/// In-process device driver.
pub trait Device: Send + Sync {
    /// Release the hardware. Drivers without anything to release keep the
    /// default.
    fn close(&self) -> anyhow::Result<()> {
        Ok(())
    }

    /// Access the concrete driver type.
    fn as_any(&self) -> &dyn Any;
}

/// Driver builder.
///
/// Receives the registry so a driver can request the devices it depends on,
/// and the descriptor's `arguments` table.
pub type DeviceFactory =
    Arc<dyn Fn(&mut DeviceRegistry, &Table) -> anyhow::Result<Arc<dyn Device>> + Send + Sync>;

/// Device drivers by `(module, class)`.
#[derive(Clone, Default)]
pub struct DeviceCatalog {
    factories: HashMap<(String, String), DeviceFactory>,
}

impl DeviceCatalog {
    /// Catalog with no drivers.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the driver for `module.class`, replacing any previous one.
    pub fn register_factory<F>(
        &mut self,
        module: impl Into<String>,
        class: impl Into<String>,
        factory: F,
    ) where
        F: Fn(&mut DeviceRegistry, &Table) -> anyhow::Result<Arc<dyn Device>>
            + Send
            + Sync
            + 'static,
    {
        self.factories
            .insert((module.into(), class.into()), Arc::new(factory));
    }

    /// Builder form of [`register_factory`](Self::register_factory).
    pub fn with_factory<F>(
        mut self,
        module: impl Into<String>,
        class: impl Into<String>,
        factory: F,
    ) -> Self
    where
        F: Fn(&mut DeviceRegistry, &Table) -> anyhow::Result<Arc<dyn Device>>
            + Send
            + Sync
            + 'static,
    {
        self.register_factory(module, class, factory);
        self
    }

    /// Driver registered for `module.class`.
    pub fn factory(&self, module: &str, class: &str) -> AppResult<DeviceFactory> {
        self.factories
            .get(&(module.to_string(), class.to_string()))
            .cloned()
            .ok_or_else(|| {
                DaqError::Configuration(format!(
                    "No device class '{}' registered in module '{}'",
                    class, module
                ))
            })
    }

    /// Number of registered drivers.
    pub fn len(&self) -> usize {
        self.factories.len()
    }

    /// True if no driver is registered.
    pub fn is_empty(&self) -> bool {
        self.factories.is_empty()
    }
}

impl std::fmt::Debug for DeviceCatalog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut keys: Vec<_> = self
            .factories
            .keys()
            .map(|(module, class)| format!("{}.{}", module, class))
            .collect();
        keys.sort();
        f.debug_struct("DeviceCatalog")
            .field("factories", &keys)
            .finish()
    }
}
