//! Scheduler lifecycle and public API.
//!
//! A [`Scheduler`] owns the job registry and, once initialized, an engine
//! over an injected store and cache. Several independent schedulers can
//! live in one process.

use chrono::{DateTime, Utc};
use std::sync::{Arc, RwLock};

use super::engine::{Dispatched, Engine, SharedRegistry};
use super::handle::{PollerControl, PollerHandle};
use super::request::ScheduleRequest;
use super::types::{SchedulerError, SchedulerState};
use crate::cache::{CacheLayer, LruCache, NoCache};
use crate::config::{PollMode, SchedulerConfig, StorageConfig};
use crate::core::job::{Job, JobRegistry, RegistryError};
use crate::core::periodic::Periodic;
use crate::core::record::JobRecord;
use crate::core::types::JobId;
use crate::events::EventBus;
use crate::storage::{Filter, InMemoryStore, JobStore};

/// State held between `init` and `shutdown`.
struct Active {
    engine: Arc<Engine>,
    poller: Option<PollerHandle>,
    config: SchedulerConfig,
}

/// Persistent job scheduler.
///
/// # Example
///
/// ```no_run
/// use kronos::{InMemoryStore, NoCache, ScheduleRequest, Scheduler, SchedulerConfig};
/// use std::sync::Arc;
///
/// # async fn example() -> Result<(), kronos::SchedulerError> {
/// let scheduler = Scheduler::new();
/// scheduler
///     .init(
///         Arc::new(InMemoryStore::new()),
///         Arc::new(NoCache),
///         SchedulerConfig::default(),
///     )
///     .await?;
///
/// let id = scheduler.schedule(ScheduleRequest::new("say-hello")).await?;
/// println!("scheduled {}", id);
///
/// scheduler.shutdown().await?;
/// # Ok(())
/// # }
/// ```
pub struct Scheduler {
    registry: SharedRegistry,
    event_bus: Arc<EventBus>,
    active: RwLock<Option<Active>>,
}

impl Scheduler {
    /// Create an uninitialized scheduler with an empty registry.
    pub fn new() -> Self {
        Self {
            registry: Arc::new(RwLock::new(JobRegistry::new())),
            event_bus: Arc::new(EventBus::new()),
            active: RwLock::new(None),
        }
    }

    /// Set the event bus.
    pub fn with_event_bus(mut self, event_bus: EventBus) -> Self {
        self.event_bus = Arc::new(event_bus);
        self
    }

    /// Get the event bus.
    pub fn event_bus(&self) -> &EventBus {
        &self.event_bus
    }

    /// Start the scheduler over `store` and `cache`.
    ///
    /// In [`PollMode::Background`] a poll loop is spawned on the current
    /// tokio runtime; in [`PollMode::Manual`] the caller drives
    /// [`tick`](Scheduler::tick). Fails with `AlreadyInitialized` until
    /// [`shutdown`](Scheduler::shutdown) has been called.
    ///
    /// The backends decide which namespace is read and written. A store or
    /// cache bound to a namespace other than `config.namespace` is rejected
    /// with `InvalidRequest`.
    pub async fn init(
        &self,
        store: Arc<dyn JobStore>,
        cache: Arc<dyn CacheLayer>,
        config: SchedulerConfig,
    ) -> Result<(), SchedulerError> {
        config.validate()?;
        for (backend, namespace) in [("store", store.namespace()), ("cache", cache.namespace())] {
            if let Some(namespace) = namespace {
                if namespace != config.namespace {
                    return Err(SchedulerError::InvalidRequest(format!(
                        "{} namespace '{}' does not match configured namespace '{}'",
                        backend, namespace, config.namespace
                    )));
                }
            }
        }

        let mut active = self.active.write().map_err(|_| SchedulerError::LockPoisoned)?;
        if active.is_some() {
            return Err(SchedulerError::AlreadyInitialized);
        }

        let engine = Arc::new(Engine::new(
            Arc::clone(&self.registry),
            store,
            cache,
            Arc::clone(&self.event_bus),
        ));

        let poller = match config.poll_mode {
            PollMode::Background => Some(PollerHandle::spawn(
                Arc::clone(&engine),
                config.poll_interval,
            )),
            PollMode::Manual => None,
        };

        tracing::info!(
            namespace = %config.namespace,
            poll_mode = ?config.poll_mode,
            poll_interval = ?config.poll_interval,
            "Scheduler initialized"
        );

        *active = Some(Active {
            engine,
            poller,
            config,
        });
        Ok(())
    }

    /// Build the store and cache described by `config`, then [`init`](Scheduler::init).
    pub async fn init_from_config(&self, config: SchedulerConfig) -> Result<(), SchedulerError> {
        config.validate()?;

        let store: Arc<dyn JobStore> = match &config.storage {
            StorageConfig::Memory => Arc::new(InMemoryStore::new()),
            #[cfg(feature = "sqlite")]
            StorageConfig::Sqlite { path } => {
                Arc::new(crate::storage::SqliteStore::new(path, config.namespace.clone()).await?)
            }
            #[cfg(not(feature = "sqlite"))]
            StorageConfig::Sqlite { .. } => {
                return Err(SchedulerError::InvalidRequest(
                    "sqlite storage requires the `sqlite` feature".into(),
                ));
            }
        };

        let cache: Arc<dyn CacheLayer> = if config.cache.enabled {
            Arc::new(LruCache::new(
                config.namespace.clone(),
                config.cache.capacity,
            ))
        } else {
            Arc::new(NoCache)
        };

        self.init(store, cache, config).await
    }

    /// Whether `init` has been called since the last shutdown.
    pub fn is_initialized(&self) -> bool {
        self.active.read().map(|a| a.is_some()).unwrap_or(false)
    }

    fn engine(&self) -> Result<Arc<Engine>, SchedulerError> {
        let active = self.active.read().map_err(|_| SchedulerError::LockPoisoned)?;
        active
            .as_ref()
            .map(|a| Arc::clone(&a.engine))
            .ok_or(SchedulerError::NotInitialized)
    }

    /// Register a job under its name.
    pub fn register(&self, job: Arc<dyn Job>) -> Result<(), SchedulerError> {
        let name = job.name().to_string();
        self.registry
            .write()
            .map_err(|_| RegistryError::LockPoisoned)?
            .register(job)?;
        tracing::debug!(job = %name, "Registered job");
        Ok(())
    }

    fn registered(&self, name: &str) -> Result<Arc<dyn Job>, SchedulerError> {
        Ok(self
            .registry
            .read()
            .map_err(|_| RegistryError::LockPoisoned)?
            .require(name)?)
    }

    /// Schedule a one-time or interval job.
    pub async fn schedule(&self, request: ScheduleRequest) -> Result<JobId, SchedulerError> {
        let engine = self.engine()?;
        let job = self.registered(request.job_name())?;

        let now = Utc::now();
        let start_time = request.start().resolve(now);
        let record = request.into_record(start_time, job.retries(), None, now);
        self.persist(&engine, record).await
    }

    /// Schedule a job on a calendar rule.
    ///
    /// The first occurrence is one rule step after the requested start,
    /// never the start itself.
    pub async fn schedule_periodic(
        &self,
        request: ScheduleRequest,
        periodic: Periodic,
    ) -> Result<JobId, SchedulerError> {
        if request.interval().is_some() {
            return Err(SchedulerError::InvalidRequest(
                "a periodic job cannot also have an interval".into(),
            ));
        }
        let engine = self.engine()?;
        let job = self.registered(request.job_name())?;

        let now = Utc::now();
        let start_time = periodic.next_nominal(request.start().resolve(now));
        let record = request.into_record(start_time, job.retries(), Some(periodic), now);
        self.persist(&engine, record).await
    }

    async fn persist(&self, engine: &Engine, record: JobRecord) -> Result<JobId, SchedulerError> {
        let job_name = record.job_name.clone();
        let start_time = record.start_time;
        let id = engine.insert_record(record).await?;
        tracing::info!(record_id = %id, job = %job_name, start_time, "Scheduled job");
        Ok(id)
    }

    /// Remove one record. Returns `false` if it did not exist.
    pub async fn drop_job_id(&self, id: &JobId) -> Result<bool, SchedulerError> {
        let engine = self.engine()?;
        Ok(engine.drop_record(id).await?)
    }

    /// Remove every record of the job `name`. Returns whether none remain.
    pub async fn drop_job(&self, name: &str) -> Result<bool, SchedulerError> {
        let engine = self.engine()?;
        let filter = Filter::job_name(name);

        for record in engine.find(&filter).await? {
            engine.drop_record(&record.id).await?;
        }
        Ok(engine.find(&filter).await?.is_empty())
    }

    /// Remove every record. Returns whether the store is now empty.
    pub async fn drop_all(&self) -> Result<bool, SchedulerError> {
        let engine = self.engine()?;
        let removed = engine.drop_matching(&Filter::All).await?;
        tracing::info!(removed, "Dropped all records");
        Ok(engine.find(&Filter::All).await?.is_empty())
    }

    /// A record serialized as JSON, or `None` if it does not exist.
    pub async fn check_job(&self, id: &JobId) -> Result<Option<String>, SchedulerError> {
        let engine = self.engine()?;
        match engine.find_by_id(id).await? {
            Some(record) => Ok(Some(serde_json::to_string(&record)?)),
            None => Ok(None),
        }
    }

    /// Stored records matching `filter`.
    pub async fn records(&self, filter: &Filter) -> Result<Vec<JobRecord>, SchedulerError> {
        let engine = self.engine()?;
        Ok(engine.find(filter).await?)
    }

    /// Run one poll tick at `now`.
    ///
    /// Background mode ticks on its own; this is how manual mode advances.
    pub async fn tick(&self, now: DateTime<Utc>) -> Result<Dispatched, SchedulerError> {
        let engine = self.engine()?;
        Ok(engine.tick(now).await?)
    }

    fn poller(&self) -> Result<PollerControl, SchedulerError> {
        let active = self.active.read().map_err(|_| SchedulerError::LockPoisoned)?;
        let active = active.as_ref().ok_or(SchedulerError::NotInitialized)?;
        active
            .poller
            .as_ref()
            .map(PollerHandle::control)
            .ok_or_else(|| {
                SchedulerError::InvalidRequest("manual poll mode has no background loop".into())
            })
    }

    /// Pause the background loop. Manual ticks still work while paused.
    pub async fn pause(&self) -> Result<(), SchedulerError> {
        self.poller()?.pause().await
    }

    /// Resume the background loop after being paused.
    pub async fn resume(&self) -> Result<(), SchedulerError> {
        self.poller()?.resume().await
    }

    /// Current state. Manual mode reports `Running` while initialized.
    pub async fn state(&self) -> SchedulerState {
        let control = {
            let Ok(active) = self.active.read() else {
                return SchedulerState::Stopped;
            };
            match active.as_ref() {
                None => return SchedulerState::Stopped,
                Some(Active { poller: None, .. }) => return SchedulerState::Running,
                Some(Active {
                    poller: Some(poller),
                    ..
                }) => poller.control(),
            }
        };
        control.state().await
    }

    /// Stop polling, clear the registry and release the store and cache.
    ///
    /// Safe to call repeatedly and on a scheduler that was never initialized.
    /// Records already dispatched are not awaited.
    pub async fn shutdown(&self) -> Result<(), SchedulerError> {
        let active = self
            .active
            .write()
            .map_err(|_| SchedulerError::LockPoisoned)?
            .take();

        if let Ok(mut registry) = self.registry.write() {
            registry.clear();
        }

        let Some(active) = active else {
            return Ok(());
        };

        if let Some(poller) = active.poller {
            if let Err(e) = poller.shutdown().await {
                tracing::warn!(error = %e, "Poll loop did not acknowledge shutdown");
            }
        }

        tracing::info!(namespace = %active.config.namespace, "Scheduler shut down");
        Ok(())
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}
