//! Read-through/write-through caching in front of the job store.
//!
//! A [`CacheLayer`] wraps individual store operations. Each method receives
//! the store call as an unstarted future: the cache decides whether to run
//! it, and keeps its own entries in step with the result. Entries are keyed
//! by record id and are invalidated on every remove.

use async_trait::async_trait;
use lru::LruCache as Lru;
use std::future::Future;
use std::num::NonZeroUsize;
use std::pin::Pin;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::core::record::JobRecord;
use crate::core::types::JobId;
use crate::storage::StoreError;

/// An unstarted store operation handed to the cache.
pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, StoreError>> + Send + 'a>>;

/// Caching decorator around store operations, keyed by record id.
#[async_trait]
pub trait CacheLayer: Send + Sync {
    /// Return the cached record, or run `loader` and cache what it returns.
    async fn get<'a>(
        &'a self,
        id: &'a JobId,
        loader: StoreFuture<'a, Option<JobRecord>>,
    ) -> Result<Option<JobRecord>, StoreError>;

    /// Run `writer` and cache the record it returns under `id`.
    ///
    /// A writer that returns `None` invalidates the entry.
    async fn set<'a>(
        &'a self,
        id: &'a JobId,
        writer: StoreFuture<'a, Option<JobRecord>>,
    ) -> Result<Option<JobRecord>, StoreError>;

    /// Invalidate `id` and run `deleter`.
    async fn remove<'a>(
        &'a self,
        id: &'a JobId,
        deleter: StoreFuture<'a, bool>,
    ) -> Result<bool, StoreError>;

    /// Invalidate every entry and run `deleter`.
    async fn remove_all<'a>(&'a self, deleter: StoreFuture<'a, u64>) -> Result<u64, StoreError>;

    /// Run the bulk `loader`, bypassing per-id lookups, and populate entries
    /// from its result.
    async fn get_all<'a>(
        &'a self,
        loader: StoreFuture<'a, Vec<JobRecord>>,
    ) -> Result<Vec<JobRecord>, StoreError>;

    /// Namespace the cache keys are bound to, if any.
    fn namespace(&self) -> Option<&str> {
        None
    }
}

/// Pass-through cache that runs every operation against the store.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoCache;

#[async_trait]
impl CacheLayer for NoCache {
    async fn get<'a>(
        &'a self,
        _id: &'a JobId,
        loader: StoreFuture<'a, Option<JobRecord>>,
    ) -> Result<Option<JobRecord>, StoreError> {
        loader.await
    }

    async fn set<'a>(
        &'a self,
        _id: &'a JobId,
        writer: StoreFuture<'a, Option<JobRecord>>,
    ) -> Result<Option<JobRecord>, StoreError> {
        writer.await
    }

    async fn remove<'a>(
        &'a self,
        _id: &'a JobId,
        deleter: StoreFuture<'a, bool>,
    ) -> Result<bool, StoreError> {
        deleter.await
    }

    async fn remove_all<'a>(&'a self, deleter: StoreFuture<'a, u64>) -> Result<u64, StoreError> {
        deleter.await
    }

    async fn get_all<'a>(
        &'a self,
        loader: StoreFuture<'a, Vec<JobRecord>>,
    ) -> Result<Vec<JobRecord>, StoreError> {
        loader.await
    }
}

/// Bounded in-process LRU cache.
///
/// Keys are prefixed with the namespace so several schedulers can share
/// one instance without seeing each other's records.
pub struct LruCache {
    namespace: String,
    inner: Mutex<Lru<String, JobRecord>>,
    hit_count: AtomicU64,
    miss_count: AtomicU64,
    /// Bumped on every invalidation.
    invalidations: AtomicU64,
}

/// Cache statistics
#[derive(Debug, Clone, PartialEq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub entries: usize,
}

impl CacheStats {
    /// Fraction of lookups served from the cache.
    pub fn hit_ratio(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

impl LruCache {
    /// Creates a cache holding at most `capacity` records (minimum 1).
    pub fn new(namespace: impl Into<String>, capacity: usize) -> Self {
        let cap = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            namespace: namespace.into(),
            inner: Mutex::new(Lru::new(cap)),
            hit_count: AtomicU64::new(0),
            miss_count: AtomicU64::new(0),
            invalidations: AtomicU64::new(0),
        }
    }

    fn key(&self, id: &JobId) -> String {
        format!("{}:{}", self.namespace, id)
    }

    fn lookup(&self, id: &JobId) -> Result<Option<JobRecord>, StoreError> {
        let mut cache = self.inner.lock().map_err(|_| StoreError::LockPoisoned)?;
        let found = cache.get(&self.key(id)).cloned();
        if found.is_some() {
            self.hit_count.fetch_add(1, Ordering::Relaxed);
        } else {
            self.miss_count.fetch_add(1, Ordering::Relaxed);
        }
        Ok(found)
    }

    fn store(&self, id: &JobId, record: Option<&JobRecord>) -> Result<(), StoreError> {
        let mut cache = self.inner.lock().map_err(|_| StoreError::LockPoisoned)?;
        let key = self.key(id);
        match record {
            Some(record) => {
                cache.put(key, record.clone());
            }
            None => {
                self.invalidations.fetch_add(1, Ordering::SeqCst);
                cache.pop(&key);
            }
        }
        Ok(())
    }

    /// Drops every entry belonging to this namespace.
    fn invalidate_namespace(&self) -> Result<(), StoreError> {
        let mut cache = self.inner.lock().map_err(|_| StoreError::LockPoisoned)?;
        self.invalidations.fetch_add(1, Ordering::SeqCst);
        let prefix = format!("{}:", self.namespace);
        let doomed: Vec<String> = cache
            .iter()
            .filter(|(key, _)| key.starts_with(&prefix))
            .map(|(key, _)| key.clone())
            .collect();
        for key in doomed {
            cache.pop(&key);
        }
        Ok(())
    }

    /// Whether `id` currently has an entry. Does not touch the counters.
    pub fn contains(&self, id: &JobId) -> bool {
        self.inner
            .lock()
            .map(|cache| cache.contains(&self.key(id)))
            .unwrap_or(false)
    }

    /// Returns cache statistics
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hit_count.load(Ordering::Relaxed),
            misses: self.miss_count.load(Ordering::Relaxed),
            entries: self.inner.lock().map(|c| c.len()).unwrap_or(0),
        }
    }
}

#[async_trait]
impl CacheLayer for LruCache {
    async fn get<'a>(
        &'a self,
        id: &'a JobId,
        loader: StoreFuture<'a, Option<JobRecord>>,
    ) -> Result<Option<JobRecord>, StoreError> {
        if let Some(record) = self.lookup(id)? {
            return Ok(Some(record));
        }
        let loaded = loader.await?;
        if loaded.is_some() {
            self.store(id, loaded.as_ref())?;
        }
        Ok(loaded)
    }

    async fn set<'a>(
        &'a self,
        id: &'a JobId,
        writer: StoreFuture<'a, Option<JobRecord>>,
    ) -> Result<Option<JobRecord>, StoreError> {
        let written = writer.await?;
        self.store(id, written.as_ref())?;
        Ok(written)
    }

    async fn remove<'a>(
        &'a self,
        id: &'a JobId,
        deleter: StoreFuture<'a, bool>,
    ) -> Result<bool, StoreError> {
        self.store(id, None)?;
        deleter.await
    }

    async fn remove_all<'a>(&'a self, deleter: StoreFuture<'a, u64>) -> Result<u64, StoreError> {
        self.invalidate_namespace()?;
        deleter.await
    }

    async fn get_all<'a>(
        &'a self,
        loader: StoreFuture<'a, Vec<JobRecord>>,
    ) -> Result<Vec<JobRecord>, StoreError> {
        let before = self.invalidations.load(Ordering::SeqCst);
        let records = loader.await?;
        // an invalidation during the scan may have removed one of these
        if self.invalidations.load(Ordering::SeqCst) != before {
            return Ok(records);
        }
        for record in &records {
            self.store(&record.id, Some(record))?;
        }
        Ok(records)
    }

    fn namespace(&self) -> Option<&str> {
        Some(&self.namespace)
    }
}
