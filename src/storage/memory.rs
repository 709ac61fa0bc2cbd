//! In-memory storage implementation.
//!
//! Provides a thread-safe in-memory backend for testing and development.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::RwLock;

use super::{CounterField, Filter, JobStore, StoreError, apply_delta};
use crate::core::record::JobRecord;
use crate::core::types::JobId;

/// In-memory storage backend.
///
/// Thread-safe storage using RwLock for concurrent access.
/// Data is not persisted across restarts.
pub struct InMemoryStore {
    records: RwLock<HashMap<JobId, JobRecord>>,
}

impl InMemoryStore {
    /// Create a new empty in-memory store.
    pub fn new() -> Self {
        Self {
            records: RwLock::new(HashMap::new()),
        }
    }

    /// Number of stored records.
    pub fn len(&self) -> usize {
        self.records.read().map(|r| r.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl JobStore for InMemoryStore {
    async fn insert(&self, record: JobRecord) -> Result<(), StoreError> {
        let mut records = self.records.write().map_err(|_| StoreError::LockPoisoned)?;
        if records.contains_key(&record.id) {
            return Err(StoreError::DuplicateKey(format!("job: {}", record.id)));
        }
        records.insert(record.id.clone(), record);
        Ok(())
    }

    async fn find_all(&self, filter: &Filter) -> Result<Vec<JobRecord>, StoreError> {
        let records = self.records.read().map_err(|_| StoreError::LockPoisoned)?;
        let mut result = Vec::new();
        for record in records.values() {
            if filter.matches(record)? {
                result.push(record.clone());
            }
        }
        result.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(result)
    }

    async fn find_by_id(&self, id: &JobId) -> Result<Option<JobRecord>, StoreError> {
        let records = self.records.read().map_err(|_| StoreError::LockPoisoned)?;
        Ok(records.get(id).cloned())
    }

    async fn delete_by_id(&self, id: &JobId) -> Result<bool, StoreError> {
        let mut records = self.records.write().map_err(|_| StoreError::LockPoisoned)?;
        Ok(records.remove(id).is_some())
    }

    async fn delete_all(&self, filter: &Filter) -> Result<u64, StoreError> {
        let mut records = self.records.write().map_err(|_| StoreError::LockPoisoned)?;
        let mut doomed = Vec::new();
        for (id, record) in records.iter() {
            if filter.matches(record)? {
                doomed.push(id.clone());
            }
        }
        for id in &doomed {
            records.remove(id);
        }
        Ok(doomed.len() as u64)
    }

    async fn atomic_increment(
        &self,
        id: &JobId,
        field: CounterField,
        delta: i64,
    ) -> Result<Option<JobRecord>, StoreError> {
        let mut records = self.records.write().map_err(|_| StoreError::LockPoisoned)?;
        let Some(record) = records.get_mut(id) else {
            return Ok(None);
        };
        match field {
            CounterField::Locks => record.locks = apply_delta(record.locks, delta),
        }
        Ok(Some(record.clone()))
    }
}
