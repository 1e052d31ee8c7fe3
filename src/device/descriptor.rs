//! Device database entries.

use crate::error::{AppResult, DaqError};
use serde::Deserialize;
use toml::Table;

/// Raw entry as stored in a device database.
#[derive(Debug, Clone, PartialEq)]
pub enum DeviceDbEntry {
    /// Another entry name to resolve instead
    Alias(String),
    /// Concrete description, still carrying its `type` tag
    Entry(Table),
}

/// Concrete description of how to build a device handle.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum DeviceDescriptor {
    /// Driver instantiated in-process from the factory catalog
    Local {
        /// Catalog module of the driver
        module: String,
        /// Driver class within `module`
        class: String,
        /// Passed to the driver factory
        #[serde(default)]
        arguments: Table,
    },
    /// Out-of-process controller reached over RPC
    Controller {
        /// Controller host name or address
        host: String,
        /// Controller RPC port
        port: u16,
        /// `None` selects the controller's only target automatically
        #[serde(default)]
        target_name: Option<String>,
        /// Connect with [`ConnectMode::BestEffort`](super::rpc::ConnectMode::BestEffort)
        #[serde(default)]
        best_effort: bool,
    },
}

impl DeviceDescriptor {
    /// Parse a tagged table; `name` is only used in the error message.
    pub fn from_table(name: &str, table: &Table) -> AppResult<Self> {
        toml::Value::Table(table.clone())
            .try_into()
            .map_err(|e| {
                DaqError::Configuration(format!("Invalid device database entry '{}': {}", name, e))
            })
    }
}
