//! Boundary to the dataset database kept by the surrounding system.
//!
//! The database serves reads for keys the worker never wrote locally and
//! receives every broadcast write so that observers can follow it.

use super::value::DatasetValue;
use crate::error::{AppResult, DaqError};
use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

/// External dataset database.
pub trait DatasetDb: Send + Sync {
    /// Read-through lookup for keys not present locally.
    fn get(&self, key: &str) -> AppResult<DatasetValue>;

    /// Publish a broadcast write.
    fn update(&self, key: &str, persist: bool, value: &DatasetValue) -> AppResult<()>;
}

/// In-process dataset database, used when the worker runs standalone.
#[derive(Debug, Default)]
pub struct MemoryDatasetDb {
    entries: Mutex<BTreeMap<String, (bool, DatasetValue)>>,
}

impl MemoryDatasetDb {
    /// Empty database.
    pub fn new() -> Self {
        Self::default()
    }

    /// Pre-populate an entry.
    pub fn with_entry(self, key: impl Into<String>, persist: bool, value: DatasetValue) -> Self {
        self.lock().insert(key.into(), (persist, value));
        self
    }

    /// `(persist, value)` last published for `key`.
    pub fn entry(&self, key: &str) -> Option<(bool, DatasetValue)> {
        self.lock().get(key).cloned()
    }

    /// Entries flagged for persistence.
    pub fn persisted(&self) -> BTreeMap<String, DatasetValue> {
        self.lock()
            .iter()
            .filter(|(_, (persist, _))| *persist)
            .map(|(key, (_, value))| (key.clone(), value.clone()))
            .collect()
    }

    fn lock(&self) -> MutexGuard<'_, BTreeMap<String, (bool, DatasetValue)>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl DatasetDb for MemoryDatasetDb {
    fn get(&self, key: &str) -> AppResult<DatasetValue> {
        self.lock()
            .get(key)
            .map(|(_, value)| value.clone())
            .ok_or_else(|| DaqError::DatasetNotFound(key.to_string()))
    }

    fn update(&self, key: &str, persist: bool, value: &DatasetValue) -> AppResult<()> {
        self.lock().insert(key.to_string(), (persist, value.clone()));
        Ok(())
    }
}
