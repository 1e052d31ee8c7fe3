//! Per-run wiring of the worker components.
//!
//! A [`WorkerCore`] lives for the whole worker process and owns the run id
//! allocator. Each run gets a fresh [`RunContext`] with its own device
//! registry and dataset store; [`RunContext::finish`] writes the run's local
//! datasets and closes its devices.

use crate::config::WorkerConfig;
use crate::data::output::result_file_path;
use crate::data::result_writer::ResultContainer;
use crate::dataset::{DatasetDb, DatasetStore, MemoryDatasetDb};
use crate::device::{
    DeviceCatalog, DeviceCloseFailure, DeviceDb, DeviceHandle, DeviceRegistry, DisabledRpc,
    RpcConnector, TomlDeviceDb,
};
use crate::error::AppResult;
use crate::run_id::{RunId, RunIdAllocator};
use chrono::{DateTime, Local};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

/// Process-wide state of a worker.
pub struct WorkerCore {
    config: WorkerConfig,
    run_ids: RunIdAllocator,
    device_db: Arc<dyn DeviceDb>,
    catalog: Arc<DeviceCatalog>,
    rpc: Arc<dyn RpcConnector>,
    dataset_db: Arc<dyn DatasetDb>,
    virtual_devices: HashMap<String, DeviceHandle>,
}

impl WorkerCore {
    /// Build a worker from its configuration.
    ///
    /// Loads the device database named in the configuration, recovers the
    /// run id counter, and starts without an RPC transport and with an
    /// in-process dataset database.
    pub fn from_config(config: WorkerConfig, catalog: DeviceCatalog) -> AppResult<Self> {
        config.validate()?;
        let device_db = TomlDeviceDb::load(&config.devices.device_db)?;
        Self::new(config, Arc::new(device_db), catalog)
    }

    /// Build a worker around an existing device database.
    pub fn new(
        config: WorkerConfig,
        device_db: Arc<dyn DeviceDb>,
        catalog: DeviceCatalog,
    ) -> AppResult<Self> {
        let run_ids = RunIdAllocator::from_config(&config.run_ids)?;
        Ok(Self {
            config,
            run_ids,
            device_db,
            catalog: Arc::new(catalog),
            rpc: Arc::new(DisabledRpc),
            dataset_db: Arc::new(MemoryDatasetDb::new()),
            virtual_devices: HashMap::new(),
        })
    }

    /// Use `rpc` to connect controller entries.
    pub fn with_rpc(mut self, rpc: Arc<dyn RpcConnector>) -> Self {
        self.rpc = rpc;
        self
    }

    /// Publish broadcast datasets to `dataset_db`.
    pub fn with_dataset_db(mut self, dataset_db: Arc<dyn DatasetDb>) -> Self {
        self.dataset_db = dataset_db;
        self
    }

    /// Serve `handle` as `name` in every run's device registry.
    pub fn with_virtual_device(mut self, name: impl Into<String>, handle: DeviceHandle) -> Self {
        self.virtual_devices.insert(name.into(), handle);
        self
    }

    /// Loaded configuration.
    pub fn config(&self) -> &WorkerConfig {
        &self.config
    }

    /// Run id allocator shared by every run.
    pub fn run_ids(&self) -> &RunIdAllocator {
        &self.run_ids
    }

    /// Allocate a run id and set up the run's devices and datasets.
    pub fn start_run(&mut self, name: &str) -> AppResult<RunContext> {
        let rid = self.run_ids.next()?;

        let mut devices = DeviceRegistry::new(self.device_db.clone(), self.catalog.clone())
            .with_rpc(self.rpc.clone());
        for (device, handle) in &self.virtual_devices {
            devices = devices.with_virtual_device(device.clone(), handle.clone());
        }

        info!(%rid, experiment = name, "Run started");
        Ok(RunContext {
            rid,
            name: name.to_string(),
            start_time: Local::now(),
            devices,
            datasets: DatasetStore::new(self.dataset_db.clone()),
        })
    }

    /// Location of `run`'s result file under the configured results tree.
    pub fn result_path(&self, run: &RunContext) -> AppResult<PathBuf> {
        result_file_path(
            &self.config.run_ids.results_dir,
            &run.start_time,
            run.rid,
            &run.name,
            &self.config.run_ids.result_extension,
        )
    }
}

impl std::fmt::Debug for WorkerCore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerCore")
            .field("config", &self.config)
            .field("run_ids", &self.run_ids)
            .field("catalog", &self.catalog)
            .finish()
    }
}

/// Resources of one run.
#[derive(Debug)]
pub struct RunContext {
    /// Run id
    pub rid: RunId,
    /// Run name, part of the result file name
    pub name: String,
    /// Wall-clock start of the run
    pub start_time: DateTime<Local>,
    /// Devices requested by the run
    pub devices: DeviceRegistry,
    /// Datasets set by the run
    pub datasets: DatasetStore,
}

impl RunContext {
    /// Write the local datasets into `container`, then close all devices.
    ///
    /// Devices are closed even if writing the results fails; the write error
    /// is returned in that case. On success the teardown failures are
    /// returned for the caller to report.
    pub fn finish(
        mut self,
        container: &mut dyn ResultContainer,
    ) -> AppResult<Vec<DeviceCloseFailure>> {
        let written = self.datasets.write_results(container);
        let failures = self.devices.close_all();
        if !failures.is_empty() {
            warn!(rid = %self.rid, failed = failures.len(), "Some devices failed to close");
        }
        info!(rid = %self.rid, "Run finished");
        written.map(|()| failures)
    }
}
