//! Worker configuration using Figment.
//!
//! Configuration is loaded from (in order of precedence):
//! 1. Environment variables prefixed with `DAQ_WORKER_`
//! 2. A TOML configuration file (default: `config/worker.toml`)
//!
//! Every field has a default, so a missing file section still produces a
//! usable configuration.
//!
//! # Environment Variables
//!
//! Nested keys are separated by a double underscore, because the keys
//! themselves contain single underscores:
//!
//! ```text
//! DAQ_WORKER_RUN_IDS__RESULTS_DIR=/data/results
//! DAQ_WORKER_LOGGING__LEVEL=debug
//! DAQ_WORKER_DEVICES__DEVICE_DB=/etc/daq/device_db.toml
//! ```
//!
//! # Example
//!
//! ```no_run
//! use rust_daq_worker::config::WorkerConfig;
//!
//! fn main() -> anyhow::Result<()> {
//!     let config = WorkerConfig::load_from("config/worker.toml")?;
//!     println!("Results directory: {}", config.run_ids.results_dir.display());
//!     Ok(())
//! }
//! ```

use crate::error::{AppResult, DaqError};
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Top-level worker configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// Run identifier allocation
    #[serde(default)]
    pub run_ids: RunIdConfig,
    /// Device database location
    #[serde(default)]
    pub devices: DeviceConfig,
    /// Logging settings
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Run identifier cache and results tree settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunIdConfig {
    /// File holding the last issued run id
    #[serde(default = "default_cache_file")]
    pub cache_file: PathBuf,
    /// Root of the `<date>/<time>/<rid>-<name>.<ext>` results tree
    #[serde(default = "default_results_dir")]
    pub results_dir: PathBuf,
    /// Extension of result files, without the leading dot
    #[serde(default = "default_result_extension")]
    pub result_extension: String,
}

/// Device database settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceConfig {
    /// TOML device database
    #[serde(default = "default_device_db")]
    pub device_db: PathBuf,
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Logging level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Emit JSON lines instead of human readable output
    #[serde(default)]
    pub json: bool,
}

// ============================================================================
// Default value functions
// ============================================================================

fn default_cache_file() -> PathBuf {
    PathBuf::from("last_rid.pyon")
}

fn default_results_dir() -> PathBuf {
    PathBuf::from("results")
}

fn default_result_extension() -> String {
    "h5".to_string()
}

fn default_device_db() -> PathBuf {
    PathBuf::from("device_db.toml")
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for RunIdConfig {
    fn default() -> Self {
        Self {
            cache_file: default_cache_file(),
            results_dir: default_results_dir(),
            result_extension: default_result_extension(),
        }
    }
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            device_db: default_device_db(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

// ============================================================================
// Configuration Loading and Validation
// ============================================================================

const VALID_LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

impl WorkerConfig {
    /// Load configuration from `config/worker.toml` and environment variables.
    pub fn load() -> AppResult<Self> {
        Self::load_from("config/worker.toml")
    }

    /// Load configuration from a specific file path.
    ///
    /// A missing file is not an error: defaults and environment overrides
    /// still apply. The result is validated before it is returned.
    pub fn load_from<P: AsRef<Path>>(path: P) -> AppResult<Self> {
        let config: Self = Figment::from(Serialized::defaults(Self::default()))
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed("DAQ_WORKER_").split("__"))
            .extract()?;

        config.validate()?;
        Ok(config)
    }

    /// Validate configuration after loading
    ///
    /// Checks:
    /// - Log level is valid (trace, debug, info, warn, error)
    /// - Result extension is a bare, non-empty extension
    /// - Cache file names a file, not a directory root
    pub fn validate(&self) -> AppResult<()> {
        let level = self.logging.level.to_lowercase();
        if !VALID_LOG_LEVELS.contains(&level.as_str()) {
            return Err(DaqError::Configuration(format!(
                "Invalid log level '{}'. Must be one of: {}",
                self.logging.level,
                VALID_LOG_LEVELS.join(", ")
            )));
        }

        let ext = &self.run_ids.result_extension;
        if ext.is_empty() || ext.contains(['.', '/', '\\']) {
            return Err(DaqError::Configuration(format!(
                "Invalid result extension '{}': expected a bare extension such as 'h5'",
                ext
            )));
        }

        if self.run_ids.cache_file.file_name().is_none() {
            return Err(DaqError::Configuration(format!(
                "Run ID cache path '{}' does not name a file",
                self.run_ids.cache_file.display()
            )));
        }

        Ok(())
    }
}
