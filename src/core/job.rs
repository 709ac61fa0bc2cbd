//! Job behaviors and the registry that binds them to names.
//!
//! A stored record refers to its behavior by name only. The registry maps
//! that name back to the [`Job`] implementation at schedule and run time.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;

use super::record::JobParams;
use super::types::JobId;

/// Errors raised by the job registry.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// A job with this name is already registered.
    #[error("job with name '{0}' already registered")]
    DuplicateJob(String),

    /// No job with this name is registered.
    #[error("job with name '{0}' has not been registered")]
    UnregisteredJob(String),

    /// Registry lock was poisoned.
    #[error("registry lock poisoned")]
    LockPoisoned,
}

/// User-supplied behavior bound to a job name.
///
/// Only [`name`](Job::name) and [`execute`](Job::execute) are required.
/// Every callback defaults to a no-op and [`challenge_run`](Job::challenge_run)
/// defaults to letting the run proceed.
///
/// # Example
///
/// ```
/// use async_trait::async_trait;
/// use kronos::{Job, JobParams};
///
/// struct SayHello;
///
/// #[async_trait]
/// impl Job for SayHello {
///     fn name(&self) -> &str {
///         "say-hello"
///     }
///
///     fn retries(&self) -> u32 {
///         2
///     }
///
///     async fn execute(&self, cycle_number: u32, params: &JobParams) -> bool {
///         println!("Hello {} ({})", params.get("name").unwrap_or("world"), cycle_number);
///         true
///     }
/// }
/// ```
#[async_trait]
pub trait Job: Send + Sync {
    /// Unique name of this job type.
    fn name(&self) -> &str;

    /// Default retry count for records that do not set one.
    fn retries(&self) -> u32 {
        0
    }

    /// Run one cycle. Returns `true` on success.
    async fn execute(&self, cycle_number: u32, params: &JobParams) -> bool;

    /// A retry failed. `retry_index` runs from 0 to `retries - 1`.
    fn on_retry_fail(&self, _retry_index: u32, _cycle_number: u32, _params: &JobParams) {}

    /// The first execution of a cycle failed.
    fn on_fail(&self, _cycle_number: u32, _params: &JobParams) {}

    /// A cycle succeeded.
    fn on_success(&self, _cycle_number: u32, _params: &JobParams) {}

    /// Veto gate checked before a due record is claimed.
    ///
    /// Returning `true` skips the record for this tick: no claim, no
    /// execution and no successor.
    fn challenge_run(&self, _cycle_number: u32, _params: &JobParams) -> bool {
        false
    }

    /// The successor of a repeating record was persisted.
    ///
    /// Called before the origin record finishes executing.
    fn periodic_job_loaded(&self, _origin_id: &JobId, _next_id: &JobId) {}

    /// The engine removed a record on its own. Not called for user drops.
    fn on_drop(&self, _id: &JobId, _last_job: bool) {}
}

/// Name-indexed set of registered jobs.
#[derive(Default, Clone)]
pub struct JobRegistry {
    jobs: HashMap<String, Arc<dyn Job>>,
}

impl JobRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a job under its own name.
    pub fn register(&mut self, job: Arc<dyn Job>) -> Result<(), RegistryError> {
        let name = job.name().to_string();
        if self.jobs.contains_key(&name) {
            return Err(RegistryError::DuplicateJob(name));
        }
        self.jobs.insert(name, job);
        Ok(())
    }

    /// Look up a job by name.
    pub fn get(&self, name: &str) -> Option<Arc<dyn Job>> {
        self.jobs.get(name).cloned()
    }

    /// Look up a job by name, failing if it is not registered.
    pub fn require(&self, name: &str) -> Result<Arc<dyn Job>, RegistryError> {
        self.get(name)
            .ok_or_else(|| RegistryError::UnregisteredJob(name.to_string()))
    }

    /// Whether a job with this name is registered.
    pub fn contains(&self, name: &str) -> bool {
        self.jobs.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    /// Remove every registration.
    pub fn clear(&mut self) {
        self.jobs.clear();
    }
}

impl std::fmt::Debug for JobRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobRegistry")
            .field("jobs", &self.jobs.keys().collect::<Vec<_>>())
            .finish()
    }
}
