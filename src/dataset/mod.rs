//! Datasets produced and consumed by a run.

pub mod db;
pub mod store;
pub mod value;

pub use db::{DatasetDb, MemoryDatasetDb};
pub use store::{BroadcastEntry, DatasetScope, DatasetStore};
pub use value::{ArrayValue, DatasetIndex, DatasetValue, ElementKind};
