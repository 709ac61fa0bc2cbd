//! Execution engine.
//!
//! The engine is responsible for:
//! - Fetching every record once per tick
//! - Classifying each record and dispatching it to its own task
//! - Claiming records through the store's atomic lock increment
//! - Rescheduling repeating records before their body runs
//! - Executing jobs with bounded retries and removing finished records
//!
//! Nothing here returns an error to the poll loop except the bulk fetch.
//! Per-record failures are logged and the record is left for a later tick.

use chrono::{DateTime, Utc};
use std::sync::{Arc, RwLock};
use std::time::Instant;
use tokio::task::JoinHandle;

use crate::cache::CacheLayer;
use crate::core::job::{Job, JobRegistry, RegistryError};
use crate::core::record::{JobRecord, OvershotAction};
use crate::core::types::JobId;
use crate::core::validate::{Validity, validate};
use crate::events::{Event, EventBus};
use crate::storage::{CounterField, Filter, JobStore, StoreError};

/// Job registry shared between the scheduler and its engine.
pub type SharedRegistry = Arc<RwLock<JobRegistry>>;

/// Handling tasks spawned by one tick.
///
/// Dropping this detaches the tasks; [`join`](Dispatched::join) waits for
/// all of them.
#[derive(Debug, Default)]
pub struct Dispatched {
    handles: Vec<JoinHandle<()>>,
}

impl Dispatched {
    /// Number of records dispatched.
    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// Wait until every record handled in this tick is done.
    pub async fn join(self) {
        for handle in self.handles {
            if let Err(e) = handle.await {
                tracing::error!(error = %e, "Record handling task failed");
            }
        }
    }
}

/// Classifies, claims, runs and reschedules job records.
pub struct Engine {
    registry: SharedRegistry,
    store: Arc<dyn JobStore>,
    cache: Arc<dyn CacheLayer>,
    event_bus: Arc<EventBus>,
}

impl Engine {
    /// Create an engine over a store and the cache in front of it.
    pub fn new(
        registry: SharedRegistry,
        store: Arc<dyn JobStore>,
        cache: Arc<dyn CacheLayer>,
        event_bus: Arc<EventBus>,
    ) -> Self {
        Self {
            registry,
            store,
            cache,
            event_bus,
        }
    }

    /// Look up the job registered under `name`.
    pub fn job(&self, name: &str) -> Result<Arc<dyn Job>, RegistryError> {
        self.registry
            .read()
            .map_err(|_| RegistryError::LockPoisoned)?
            .require(name)
    }

    /// Run one poll tick at `now`.
    ///
    /// Waits for the fetch, then spawns one task per record and returns
    /// without waiting for them.
    pub async fn tick(self: &Arc<Self>, now: DateTime<Utc>) -> Result<Dispatched, StoreError> {
        let records = self.fetch_all().await?;
        tracing::debug!(records = records.len(), now = %now, "Dispatching poll tick");

        let handles = records
            .into_iter()
            .map(|record| {
                let engine = Arc::clone(self);
                tokio::spawn(async move { engine.handle_record(record, now).await })
            })
            .collect();

        Ok(Dispatched { handles })
    }

    /// Every stored record, through the cache's bulk path.
    pub async fn fetch_all(&self) -> Result<Vec<JobRecord>, StoreError> {
        let filter = Filter::All;
        self.cache.get_all(self.store.find_all(&filter)).await
    }

    /// Records matching `filter`, read straight from the store.
    pub async fn find(&self, filter: &Filter) -> Result<Vec<JobRecord>, StoreError> {
        self.store.find_all(filter).await
    }

    /// One record by id, through the cache.
    pub async fn find_by_id(&self, id: &JobId) -> Result<Option<JobRecord>, StoreError> {
        self.cache.get(id, self.store.find_by_id(id)).await
    }

    /// Persist a new record and cache it.
    pub async fn insert_record(&self, record: JobRecord) -> Result<JobId, StoreError> {
        let id = record.id.clone();
        let cached = record.clone();
        let store = &self.store;
        self.cache
            .set(
                &id,
                Box::pin(async move {
                    store.insert(record).await?;
                    Ok::<_, StoreError>(Some(cached))
                }),
            )
            .await?;
        Ok(id)
    }

    /// Remove a record from cache and store.
    pub async fn drop_record(&self, id: &JobId) -> Result<bool, StoreError> {
        self.cache.remove(id, self.store.delete_by_id(id)).await
    }

    /// Remove every record matching `filter`.
    pub async fn drop_matching(&self, filter: &Filter) -> Result<u64, StoreError> {
        self.cache.remove_all(self.store.delete_all(filter)).await
    }

    /// Classify one record and act on it.
    pub async fn handle_record(&self, record: JobRecord, now: DateTime<Utc>) {
        match validate(&record, now) {
            Validity::Scheduled => {}
            Validity::Valid if record.locks == 0 => self.run_job(record, now).await,
            Validity::Valid => {
                tracing::debug!(record_id = %record.id, locks = record.locks, "Record already claimed, skipping");
            }
            Validity::Overshot => self.handle_overshot(record, now).await,
        }
    }

    async fn handle_overshot(&self, record: JobRecord, now: DateTime<Utc>) {
        if record.locks != 0 {
            tracing::debug!(record_id = %record.id, locks = record.locks, "Overshot record is still running, skipping");
            return;
        }

        tracing::info!(
            record_id = %record.id,
            job = %record.job_name,
            action = ?record.overshot_action,
            "Record overshot its deadline"
        );
        self.event_bus
            .emit(Event::job_overshot(
                record.id.clone(),
                record.job_name.clone(),
                record.overshot_action,
            ))
            .await;

        match record.overshot_action {
            OvershotAction::Fire => self.run_job(record, now).await,
            OvershotAction::Drop => {
                if let Err(e) = self.drop_record(&record.id).await {
                    tracing::warn!(record_id = %record.id, error = %e, "Failed to drop overshot record");
                    return;
                }
                match self.job(&record.job_name) {
                    Ok(job) => job.on_drop(&record.id, true),
                    Err(e) => {
                        tracing::warn!(record_id = %record.id, job = %record.job_name, error = %e, "Dropped record of unknown job");
                    }
                }
                self.event_bus
                    .emit(Event::job_dropped(record.id, record.job_name, true))
                    .await;
            }
            OvershotAction::Nothing => {}
        }
    }

    /// Claim, reschedule, execute and remove one record.
    async fn run_job(&self, record: JobRecord, now: DateTime<Utc>) {
        let job = match self.job(&record.job_name) {
            Ok(job) => job,
            Err(e) => {
                tracing::error!(record_id = %record.id, job = %record.job_name, error = %e, "Cannot run record");
                return;
            }
        };

        let cycle_number = record.params.cycle_number();
        if job.challenge_run(cycle_number, &record.params) {
            tracing::warn!(record_id = %record.id, job = %record.job_name, cycle_number, "Run vetoed by job");
            self.event_bus
                .emit(Event::job_vetoed(
                    record.id.clone(),
                    record.job_name.clone(),
                    cycle_number,
                ))
                .await;
            return;
        }

        if !self.claim(&record.id).await {
            return;
        }
        tracing::info!(record_id = %record.id, job = %record.job_name, cycle_number, "Claimed record");

        let now_millis = now.timestamp_millis();
        if record.is_repeating() {
            if record.should_renew(now_millis) {
                self.reschedule(job.as_ref(), &record, now_millis).await;
            } else {
                if let Err(e) = self.drop_record(&record.id).await {
                    tracing::warn!(record_id = %record.id, error = %e, "Failed to drop final record");
                }
                job.on_drop(&record.id, true);
                self.event_bus
                    .emit(Event::job_dropped(
                        record.id.clone(),
                        record.job_name.clone(),
                        true,
                    ))
                    .await;
            }
        }

        self.event_bus
            .emit(Event::job_started(
                record.id.clone(),
                record.job_name.clone(),
                cycle_number,
            ))
            .await;

        let started = Instant::now();
        let (success, attempts) = execute_with_retries(job.as_ref(), &record).await;
        tracing::info!(
            record_id = %record.id,
            job = %record.job_name,
            cycle_number,
            success,
            attempts,
            "Record executed"
        );

        self.event_bus
            .emit(Event::job_completed(
                record.id.clone(),
                record.job_name.clone(),
                cycle_number,
                success,
                attempts,
                started.elapsed(),
            ))
            .await;

        if let Err(e) = self.drop_record(&record.id).await {
            tracing::warn!(record_id = %record.id, error = %e, "Failed to remove executed record");
        }
    }

    /// Atomically take the record's lock. Only the holder of lock 1 may run it.
    async fn claim(&self, id: &JobId) -> bool {
        let claimed = self
            .cache
            .set(id, self.store.atomic_increment(id, CounterField::Locks, 1))
            .await;

        match claimed {
            Ok(Some(record)) if record.locks == 1 => true,
            Ok(Some(record)) => {
                tracing::debug!(record_id = %id, locks = record.locks, "Lost claim race");
                if let Err(e) = self
                    .cache
                    .set(id, self.store.atomic_increment(id, CounterField::Locks, -1))
                    .await
                {
                    tracing::warn!(record_id = %id, error = %e, "Failed to release lost claim");
                }
                false
            }
            Ok(None) => {
                tracing::debug!(record_id = %id, "Record removed before it could be claimed");
                false
            }
            Err(e) => {
                tracing::warn!(record_id = %id, error = %e, "Failed to claim record");
                false
            }
        }
    }

    async fn reschedule(&self, job: &dyn Job, record: &JobRecord, now_millis: i64) {
        let next = record.successor(now_millis);
        match self.insert_record(next).await {
            Ok(next_id) => {
                tracing::info!(record_id = %record.id, next_id = %next_id, job = %record.job_name, "Rescheduled record");
                job.periodic_job_loaded(&record.id, &next_id);
                self.event_bus
                    .emit(Event::job_rescheduled(
                        record.id.clone(),
                        next_id,
                        record.job_name.clone(),
                    ))
                    .await;
            }
            Err(e) => {
                tracing::warn!(record_id = %record.id, error = %e, "Failed to persist successor record");
            }
        }
    }
}

/// Execute once, then retry up to `record.retries` times.
///
/// Returns the final outcome and the number of executions made.
async fn execute_with_retries(job: &dyn Job, record: &JobRecord) -> (bool, u32) {
    let cycle_number = record.params.cycle_number();
    let params = &record.params;

    if job.execute(cycle_number, params).await {
        job.on_success(cycle_number, params);
        return (true, 1);
    }
    job.on_fail(cycle_number, params);

    let mut attempts = 1;
    for retry_index in 0..record.retries {
        attempts += 1;
        if job.execute(cycle_number, params).await {
            job.on_success(cycle_number, params);
            return (true, attempts);
        }
        job.on_retry_fail(retry_index, cycle_number, params);
    }

    (false, attempts)
}
