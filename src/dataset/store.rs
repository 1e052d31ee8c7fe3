//! Two-tier dataset storage for a single run.
//!
//! The *local* mapping holds values that end up in the run's result file.
//! The *broadcast* mapping holds values shared with the dataset database,
//! optionally flagged for persistence there. A key may live in both mappings
//! with unrelated values.

use super::db::DatasetDb;
use super::value::{DatasetIndex, DatasetValue};
use crate::data::result_writer::{ResultContainer, ResultSerializer};
use crate::error::{AppResult, DaqError};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::debug;

/// Where a `set` publishes its value.
///
/// Persisting implies broadcasting, so there is no persisted-but-private
/// variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DatasetScope {
    /// Not shared with the dataset database
    #[default]
    Local,
    /// Shared with observers for the lifetime of the database
    Broadcast,
    /// Shared and kept by the database across restarts
    BroadcastPersisted,
}

impl DatasetScope {
    /// Combine the flag pair used by experiment code; `persist` wins.
    pub fn from_flags(broadcast: bool, persist: bool) -> Self {
        match (broadcast, persist) {
            (_, true) => DatasetScope::BroadcastPersisted,
            (true, false) => DatasetScope::Broadcast,
            (false, false) => DatasetScope::Local,
        }
    }

    /// True unless the scope is `Local`.
    pub fn is_broadcast(self) -> bool {
        !matches!(self, DatasetScope::Local)
    }

    /// True for `BroadcastPersisted`.
    pub fn is_persisted(self) -> bool {
        matches!(self, DatasetScope::BroadcastPersisted)
    }
}

/// Value held in the broadcast mapping.
#[derive(Debug, Clone, PartialEq)]
pub struct BroadcastEntry {
    /// Kept across worker restarts
    pub persist: bool,
    /// Current value
    pub value: DatasetValue,
}

/// A run's local and broadcast dataset mappings.
pub struct DatasetStore {
    db: Arc<dyn DatasetDb>,
    local: HashMap<String, DatasetValue>,
    broadcast: HashMap<String, BroadcastEntry>,
}

impl DatasetStore {
    /// Empty store publishing broadcasts to `db`.
    pub fn new(db: Arc<dyn DatasetDb>) -> Self {
        Self {
            db,
            local: HashMap::new(),
            broadcast: HashMap::new(),
        }
    }

    /// Store a dataset.
    ///
    /// Broadcast scopes publish `(persist, value)` to the dataset database;
    /// `save` additionally keeps the value for the result file.
    pub fn set(
        &mut self,
        key: impl Into<String>,
        value: DatasetValue,
        scope: DatasetScope,
        save: bool,
    ) -> AppResult<()> {
        let key = key.into();
        debug!(dataset = %key, ?scope, save, "Setting dataset");

        if scope.is_broadcast() {
            let persist = scope.is_persisted();
            self.db.update(&key, persist, &value)?;
            let entry = BroadcastEntry {
                persist,
                value: value.clone(),
            };
            self.broadcast.insert(key.clone(), entry);
        }
        if save {
            self.local.insert(key, value);
        }
        Ok(())
    }

    /// Local value if present, otherwise whatever the dataset database holds.
    pub fn get(&self, key: &str) -> AppResult<DatasetValue> {
        match self.local.get(key) {
            Some(value) => Ok(value.clone()),
            None => self.db.get(key),
        }
    }

    /// Modify part of an existing dataset in place.
    ///
    /// The local value is preferred over the broadcast one. Changes to a
    /// broadcast value are published again, and kept only if publishing
    /// succeeds. Keys present in neither mapping
    /// fail with [`DaqError::DatasetNotFound`]; mutation never creates keys.
    pub fn mutate(&mut self, key: &str, index: DatasetIndex, value: DatasetValue) -> AppResult<()> {
        if let Some(target) = self.local.get_mut(key) {
            return target.assign(&index, value);
        }
        if let Some(entry) = self.broadcast.get_mut(key) {
            // Commit only once the database has accepted the new value.
            let mut updated = entry.value.clone();
            updated.assign(&index, value)?;
            self.db.update(key, entry.persist, &updated)?;
            entry.value = updated;
            return Ok(());
        }
        Err(DaqError::DatasetNotFound(key.to_string()))
    }

    /// Copy of the local mapping, ordered by key.
    pub fn snapshot_local(&self) -> BTreeMap<String, DatasetValue> {
        self.local
            .iter()
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect()
    }

    /// Value in the local mapping.
    pub fn local(&self, key: &str) -> Option<&DatasetValue> {
        self.local.get(key)
    }

    /// Entry in the broadcast mapping.
    pub fn broadcast(&self, key: &str) -> Option<&BroadcastEntry> {
        self.broadcast.get(key)
    }

    /// Serialize the local mapping into `container`.
    pub fn write_results(&self, container: &mut dyn ResultContainer) -> AppResult<()> {
        ResultSerializer::write(container, &self.snapshot_local())
    }
}

impl std::fmt::Debug for DatasetStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DatasetStore")
            .field("local", &self.local.keys().collect::<Vec<_>>())
            .field("broadcast", &self.broadcast.keys().collect::<Vec<_>>())
            .finish()
    }
}
