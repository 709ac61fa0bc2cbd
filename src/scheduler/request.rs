//! User intent for creating job records.

use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::time::Duration;

use crate::core::periodic::Periodic;
use crate::core::record::{JobParams, JobRecord, OvershotAction};

/// When a scheduled job becomes eligible.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Start {
    /// At a fixed instant.
    At(DateTime<Utc>),
    /// After a delay from the moment the request is scheduled.
    After(Duration),
}

impl Default for Start {
    fn default() -> Self {
        Start::After(Duration::ZERO)
    }
}

impl Start {
    /// Resolve to epoch millis relative to `now`.
    pub fn resolve(&self, now: DateTime<Utc>) -> i64 {
        match self {
            Start::At(instant) => instant.timestamp_millis(),
            Start::After(delay) => now
                .timestamp_millis()
                .saturating_add(i64::try_from(delay.as_millis()).unwrap_or(i64::MAX)),
        }
    }
}

/// Builder describing a job to schedule.
///
/// # Example
///
/// ```
/// use kronos::{ScheduleRequest, Start};
/// use std::time::Duration;
///
/// let request = ScheduleRequest::new("send-report")
///     .with_start(Start::After(Duration::from_secs(120)))
///     .with_interval(Duration::from_secs(3600))
///     .with_max_cycles(24)
///     .with_param("recipient", "ops@example.com");
/// assert_eq!(request.job_name(), "send-report");
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct ScheduleRequest {
    job_name: String,
    start: Start,
    interval: Option<Duration>,
    end_time: Option<DateTime<Utc>>,
    max_cycles: Option<u32>,
    retries: Option<u32>,
    params: BTreeMap<String, String>,
    overshot_action: OvershotAction,
}

impl ScheduleRequest {
    /// Request a run of the registered job `job_name`, starting now.
    pub fn new(job_name: impl Into<String>) -> Self {
        Self {
            job_name: job_name.into(),
            start: Start::default(),
            interval: None,
            end_time: None,
            max_cycles: None,
            retries: None,
            params: BTreeMap::new(),
            overshot_action: OvershotAction::default(),
        }
    }

    /// Set the start time or delay.
    pub fn with_start(mut self, start: Start) -> Self {
        self.start = start;
        self
    }

    /// Repeat on a fixed interval.
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = Some(interval);
        self
    }

    /// Stop renewing after this instant.
    pub fn with_end_time(mut self, end_time: DateTime<Utc>) -> Self {
        self.end_time = Some(end_time);
        self
    }

    /// Stop renewing after this many cycles.
    pub fn with_max_cycles(mut self, max_cycles: u32) -> Self {
        self.max_cycles = Some(max_cycles);
        self
    }

    /// Override the job's default retry count.
    pub fn with_retries(mut self, retries: u32) -> Self {
        self.retries = Some(retries);
        self
    }

    /// Add one parameter.
    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }

    /// Add several parameters.
    pub fn with_params<K, V>(mut self, params: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        self.params
            .extend(params.into_iter().map(|(k, v)| (k.into(), v.into())));
        self
    }

    /// Set the overshoot policy.
    pub fn with_overshot_action(mut self, action: OvershotAction) -> Self {
        self.overshot_action = action;
        self
    }

    pub fn job_name(&self) -> &str {
        &self.job_name
    }

    pub fn start(&self) -> Start {
        self.start
    }

    pub fn interval(&self) -> Option<Duration> {
        self.interval
    }

    /// Build the first record of the chain.
    ///
    /// `start_time` is already resolved by the caller; `retries` falls back
    /// to `default_retries` when the request does not set it.
    pub(crate) fn into_record(
        self,
        start_time: i64,
        default_retries: u32,
        periodic: Option<Periodic>,
        now: DateTime<Utc>,
    ) -> JobRecord {
        let mut record = JobRecord::new_at(
            self.job_name,
            start_time,
            JobParams::new(self.params),
            now.timestamp_millis(),
        )
        .with_retries(self.retries.unwrap_or(default_retries))
        .with_overshot_action(self.overshot_action);

        record.interval = self.interval;
        record.periodic = periodic;
        record.end_time = self.end_time.map(|t| t.timestamp_millis());
        record.max_cycles = self.max_cycles;
        record
    }
}
