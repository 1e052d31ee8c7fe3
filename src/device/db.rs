//! Device database sources.
//!
//! The worker never edits the device database; it only looks entries up by
//! name. [`TomlDeviceDb`] reads the database from a TOML file in which every
//! top-level key is either a string (an alias) or a table with a `type` tag:
//!
//! ```toml
//! core = { type = "local", module = "coredevice.core", class = "Core", arguments = { ref_period = 1e-9 } }
//! lda = { type = "controller", host = "::1", port = 3253, best_effort = true }
//! attenuator = "lda"
//! ```

use super::descriptor::DeviceDbEntry;
use crate::error::{AppResult, DaqError};
use std::collections::BTreeMap;
use std::path::Path;
use toml::{Table, Value};

/// Read-only source of device descriptions.
pub trait DeviceDb: Send + Sync {
    /// Full contents of the device database.
    fn get_device_db(&self) -> AppResult<BTreeMap<String, DeviceDbEntry>>;

    /// Single entry, without alias resolution.
    fn get(&self, name: &str) -> AppResult<DeviceDbEntry>;
}

/// Device database backed by a parsed TOML document.
#[derive(Debug, Clone, Default)]
pub struct TomlDeviceDb {
    entries: Table,
}

impl TomlDeviceDb {
    /// Load and parse a device database file.
    pub fn load(path: impl AsRef<Path>) -> AppResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)?;
        text.parse().map_err(|e: DaqError| {
            DaqError::Configuration(format!("{}: {}", path.display(), e))
        })
    }

    /// Wrap an already parsed table.
    pub fn from_table(entries: Table) -> Self {
        Self { entries }
    }

    fn entry(name: &str, value: &Value) -> AppResult<DeviceDbEntry> {
        match value {
            Value::String(target) => Ok(DeviceDbEntry::Alias(target.clone())),
            Value::Table(table) => Ok(DeviceDbEntry::Entry(table.clone())),
            other => Err(DaqError::Configuration(format!(
                "Device database entry '{}' must be a table or an alias, found {}",
                name,
                other.type_str()
            ))),
        }
    }
}

impl std::str::FromStr for TomlDeviceDb {
    type Err = DaqError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let entries = s
            .parse::<Table>()
            .map_err(|e| DaqError::Configuration(format!("Invalid device database: {}", e)))?;
        Ok(Self::from_table(entries))
    }
}

impl DeviceDb for TomlDeviceDb {
    fn get_device_db(&self) -> AppResult<BTreeMap<String, DeviceDbEntry>> {
        self.entries
            .iter()
            .map(|(name, value)| Ok((name.clone(), Self::entry(name, value)?)))
            .collect()
    }

    fn get(&self, name: &str) -> AppResult<DeviceDbEntry> {
        let value = self
            .entries
            .get(name)
            .ok_or_else(|| DaqError::DeviceNotFound(name.to_string()))?;
        Self::entry(name, value)
    }
}
