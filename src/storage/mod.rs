//! Durable job record storage.
//!
//! This module provides the [`JobStore`] trait the engine persists through,
//! with pluggable backends (in-memory, SQLite).

mod memory;
#[cfg(any(feature = "sqlite", test))]
mod sqlite;

pub use memory::InMemoryStore;
#[cfg(any(feature = "sqlite", test))]
pub use sqlite::SqliteStore;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

use crate::core::record::JobRecord;
use crate::core::types::JobId;

/// Errors that can occur during storage operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// A duplicate key was detected.
    #[error("duplicate key: {0}")]
    DuplicateKey(String),

    /// Storage lock was poisoned.
    #[error("storage lock poisoned")]
    LockPoisoned,

    /// Serialization/deserialization error.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Generic storage error.
    #[error("storage error: {0}")]
    Other(String),
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        StoreError::Serialization(e.to_string())
    }
}

/// Record selector for bulk reads and deletes.
///
/// Field names are the serialized record names (`jobName`, `locks`, ...).
/// A dotted path reaches into nested values, e.g. `params.region`.
#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    /// Every record.
    All,
    /// Records whose field equals the value.
    Eq { field: String, value: Value },
}

impl Filter {
    /// Match records whose `field` equals `value`.
    pub fn eq(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Filter::Eq {
            field: field.into(),
            value: value.into(),
        }
    }

    /// Match records of one job type.
    pub fn job_name(name: impl Into<String>) -> Self {
        Self::eq("jobName", name.into())
    }

    /// Evaluate the filter against a record's serialized form.
    pub fn matches(&self, record: &JobRecord) -> Result<bool, StoreError> {
        match self {
            Filter::All => Ok(true),
            Filter::Eq { field, value } => {
                let document = serde_json::to_value(record)?;
                let pointer = format!("/{}", field.replace('.', "/"));
                let found = document.pointer(&pointer).unwrap_or(&Value::Null);
                Ok(found == value)
            }
        }
    }
}

/// Integer record fields that support atomic increment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CounterField {
    /// Number of engine instances executing the record.
    Locks,
}

impl CounterField {
    /// Serialized field name.
    pub fn as_str(&self) -> &'static str {
        match self {
            CounterField::Locks => "locks",
        }
    }
}

/// Apply a signed delta to an unsigned counter, saturating at both ends.
pub(crate) fn apply_delta(current: u32, delta: i64) -> u32 {
    let next = i64::from(current).saturating_add(delta);
    u32::try_from(next.max(0)).unwrap_or(u32::MAX)
}

/// Storage trait for persisting job records.
///
/// Implementations must make [`atomic_increment`](JobStore::atomic_increment)
/// a single atomic read-modify-write: it is the only mutual exclusion between
/// engine instances sharing a store.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Insert a new record. Fails with `DuplicateKey` if the id exists.
    async fn insert(&self, record: JobRecord) -> Result<(), StoreError>;

    /// All records matching the filter, oldest first.
    async fn find_all(&self, filter: &Filter) -> Result<Vec<JobRecord>, StoreError>;

    /// Get a record by ID.
    async fn find_by_id(&self, id: &JobId) -> Result<Option<JobRecord>, StoreError>;

    /// Delete a record by ID. Returns whether a record was removed.
    async fn delete_by_id(&self, id: &JobId) -> Result<bool, StoreError>;

    /// Delete all records matching the filter. Returns how many were removed.
    async fn delete_all(&self, filter: &Filter) -> Result<u64, StoreError>;

    /// Atomically add `delta` to a counter and return the updated record.
    ///
    /// Returns `None` if the record does not exist.
    async fn atomic_increment(
        &self,
        id: &JobId,
        field: CounterField,
        delta: i64,
    ) -> Result<Option<JobRecord>, StoreError>;

    /// Namespace the store is bound to, if it has one.
    fn namespace(&self) -> Option<&str> {
        None
    }
}
