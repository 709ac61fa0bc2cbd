//! Testing utilities for users of the Kronos library.
//!
//! This module provides job implementations that record what the engine
//! does to them:
//!
//! - [`RecordingJob`]: Records every callback, with a configurable outcome
//! - [`FlakyJob`]: A job that fails N times then succeeds

use async_trait::async_trait;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::Duration;

use crate::core::job::Job;
use crate::core::record::JobParams;
use crate::core::types::JobId;

/// Everything a [`RecordingJob`] has been told, in call order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CallLog {
    /// Cycle number of each `execute` call.
    pub executions: Vec<u32>,
    /// Params of the most recent `execute` call.
    pub last_params: Option<JobParams>,
    /// Cycle number of each `on_success` call.
    pub successes: Vec<u32>,
    /// Cycle number of each `on_fail` call.
    pub failures: Vec<u32>,
    /// `(retry_index, cycle_number)` of each `on_retry_fail` call.
    pub retry_failures: Vec<(u32, u32)>,
    /// `(origin_id, next_id)` of each `periodic_job_loaded` call.
    pub loaded: Vec<(JobId, JobId)>,
    /// `(id, last_job)` of each `on_drop` call.
    pub drops: Vec<(JobId, bool)>,
    /// Number of runs vetoed by `challenge_run`.
    pub vetoes: u32,
}

/// A job that records every callback it receives.
///
/// # Example
///
/// ```
/// use kronos::testing::RecordingJob;
///
/// // Always fails, retried twice per cycle
/// let job = RecordingJob::new("report").failing().with_retries(2);
/// assert_eq!(job.executions(), 0);
/// ```
pub struct RecordingJob {
    name: String,
    retries: u32,
    outcome: bool,
    veto: AtomicBool,
    delay: Option<Duration>,
    log: Mutex<CallLog>,
}

impl RecordingJob {
    /// Create a job that always succeeds.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            retries: 0,
            outcome: true,
            veto: AtomicBool::new(false),
            delay: None,
            log: Mutex::new(CallLog::default()),
        }
    }

    /// Make every execution fail.
    pub fn failing(mut self) -> Self {
        self.outcome = false;
        self
    }

    /// Set the default retry count.
    pub fn with_retries(mut self, retries: u32) -> Self {
        self.retries = retries;
        self
    }

    /// Veto every run until changed with [`set_veto`](RecordingJob::set_veto).
    pub fn with_veto(self, veto: bool) -> Self {
        self.veto.store(veto, Ordering::SeqCst);
        self
    }

    /// Sleep this long inside every execution.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn set_veto(&self, veto: bool) {
        self.veto.store(veto, Ordering::SeqCst);
    }

    fn record(&self, f: impl FnOnce(&mut CallLog)) {
        let mut log = self.log.lock().unwrap_or_else(|e| e.into_inner());
        f(&mut log);
    }

    /// Snapshot of the call log.
    pub fn log(&self) -> CallLog {
        self.log.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Number of `execute` calls.
    pub fn executions(&self) -> u32 {
        self.log().executions.len() as u32
    }

    pub fn successes(&self) -> Vec<u32> {
        self.log().successes
    }

    pub fn failures(&self) -> Vec<u32> {
        self.log().failures
    }

    pub fn retry_failures(&self) -> Vec<(u32, u32)> {
        self.log().retry_failures
    }

    pub fn loaded(&self) -> Vec<(JobId, JobId)> {
        self.log().loaded
    }

    pub fn drops(&self) -> Vec<(JobId, bool)> {
        self.log().drops
    }

    pub fn vetoes(&self) -> u32 {
        self.log().vetoes
    }
}

#[async_trait]
impl Job for RecordingJob {
    fn name(&self) -> &str {
        &self.name
    }

    fn retries(&self) -> u32 {
        self.retries
    }

    async fn execute(&self, cycle_number: u32, params: &JobParams) -> bool {
        self.record(|log| {
            log.executions.push(cycle_number);
            log.last_params = Some(params.clone());
        });
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.outcome
    }

    fn on_retry_fail(&self, retry_index: u32, cycle_number: u32, _params: &JobParams) {
        self.record(|log| log.retry_failures.push((retry_index, cycle_number)));
    }

    fn on_fail(&self, cycle_number: u32, _params: &JobParams) {
        self.record(|log| log.failures.push(cycle_number));
    }

    fn on_success(&self, cycle_number: u32, _params: &JobParams) {
        self.record(|log| log.successes.push(cycle_number));
    }

    fn challenge_run(&self, _cycle_number: u32, _params: &JobParams) -> bool {
        let veto = self.veto.load(Ordering::SeqCst);
        if veto {
            self.record(|log| log.vetoes += 1);
        }
        veto
    }

    fn periodic_job_loaded(&self, origin_id: &JobId, next_id: &JobId) {
        self.record(|log| log.loaded.push((origin_id.clone(), next_id.clone())));
    }

    fn on_drop(&self, id: &JobId, last_job: bool) {
        self.record(|log| log.drops.push((id.clone(), last_job)));
    }
}

/// A job that fails a configurable number of times before succeeding.
///
/// ```
/// use kronos::testing::FlakyJob;
///
/// // Fails 2 times, then succeeds on the 3rd attempt
/// let job = FlakyJob::new("flaky_job", 2);
/// assert_eq!(job.failures_remaining(), 2);
/// ```
pub struct FlakyJob {
    name: String,
    failures_remaining: AtomicU32,
    attempts: AtomicU32,
    succeeded: AtomicBool,
}

impl FlakyJob {
    /// Create a job that fails `fail_count` times then succeeds.
    pub fn new(name: impl Into<String>, fail_count: u32) -> Self {
        Self {
            name: name.into(),
            failures_remaining: AtomicU32::new(fail_count),
            attempts: AtomicU32::new(0),
            succeeded: AtomicBool::new(false),
        }
    }

    /// Get the number of failures remaining before success.
    pub fn failures_remaining(&self) -> u32 {
        self.failures_remaining.load(Ordering::SeqCst)
    }

    /// Get the number of times `execute` has been called.
    pub fn attempts(&self) -> u32 {
        self.attempts.load(Ordering::SeqCst)
    }

    /// Whether `on_success` has been called.
    pub fn succeeded(&self) -> bool {
        self.succeeded.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Job for FlakyJob {
    fn name(&self) -> &str {
        &self.name
    }

    async fn execute(&self, _cycle_number: u32, _params: &JobParams) -> bool {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        // check-and-decrement in one step
        self.failures_remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_err()
    }

    fn on_success(&self, _cycle_number: u32, _params: &JobParams) {
        self.succeeded.store(true, Ordering::SeqCst);
    }
}
