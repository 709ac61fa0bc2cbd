//! The durable job record.
//!
//! One [`JobRecord`] exists per scheduled occurrence. Field names in the
//! serialized form are the persistence contract: instants are epoch
//! milliseconds, durations are milliseconds, enums use their symbolic names.

use chrono::Utc;
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::BTreeMap;
use std::time::Duration;

use super::periodic::Periodic;
use super::types::JobId;

/// Parameter key carrying the cycle number on the wire.
pub const CYCLE_NUMBER_KEY: &str = "cycleNumber";

/// What the engine does with a record found past its deadline.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OvershotAction {
    /// Execute it once anyway.
    #[default]
    Fire,
    /// Remove it without executing.
    Drop,
    /// Leave it in place.
    Nothing,
}

/// Parameters handed to a job on execution.
///
/// The cycle number is kept apart from user values in memory and merged
/// into the same string map on the wire. A user value under
/// `cycleNumber` never survives construction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobParams {
    cycle_number: u32,
    values: BTreeMap<String, String>,
}

impl JobParams {
    /// Build first-cycle params from user values.
    pub fn new<K, V>(values: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        let mut values: BTreeMap<String, String> = values
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();
        values.remove(CYCLE_NUMBER_KEY);
        Self {
            cycle_number: 1,
            values,
        }
    }

    /// Set the cycle number. Values below 1 are clamped to 1.
    pub fn with_cycle_number(mut self, cycle_number: u32) -> Self {
        self.cycle_number = cycle_number.max(1);
        self
    }

    /// 1-based count of executions in a repeating chain.
    pub fn cycle_number(&self) -> u32 {
        self.cycle_number
    }

    /// Look up a user value.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    /// All user values, without the cycle number.
    pub fn values(&self) -> &BTreeMap<String, String> {
        &self.values
    }

    /// Params for the next cycle of a repeating record.
    pub fn next_cycle(&self) -> Self {
        Self {
            cycle_number: self.cycle_number.saturating_add(1),
            values: self.values.clone(),
        }
    }
}

impl Default for JobParams {
    fn default() -> Self {
        Self::new(Vec::<(String, String)>::new())
    }
}

impl Serialize for JobParams {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut wire = self.values.clone();
        wire.insert(CYCLE_NUMBER_KEY.to_string(), self.cycle_number.to_string());
        wire.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for JobParams {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let mut values = BTreeMap::<String, String>::deserialize(deserializer)?;
        let cycle_number = match values.remove(CYCLE_NUMBER_KEY) {
            None => 1,
            Some(raw) => match raw.parse::<u32>() {
                Ok(n) if n >= 1 => n,
                _ => {
                    return Err(D::Error::custom(format!(
                        "{} must be a positive integer, got '{}'",
                        CYCLE_NUMBER_KEY, raw
                    )));
                }
            },
        };
        Ok(Self {
            cycle_number,
            values,
        })
    }
}

/// One durable, schedulable occurrence of a job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobRecord {
    /// Unique record identifier.
    pub id: JobId,
    /// Name of the registered job that executes this record.
    pub job_name: String,
    /// Payload passed to the job.
    #[serde(default)]
    pub params: JobParams,
    /// Epoch millis at or after which the record is eligible.
    pub start_time: i64,
    /// Epoch millis after which a repeating record is not renewed.
    #[serde(default)]
    pub end_time: Option<i64>,
    /// Fixed repeat interval.
    #[serde(default, with = "serde_millis")]
    pub interval: Option<Duration>,
    /// Calendar repeat rule.
    #[serde(default)]
    pub periodic: Option<Periodic>,
    /// Cap on the number of cycles.
    #[serde(default)]
    pub max_cycles: Option<u32>,
    /// Re-execution attempts after a failed execution.
    #[serde(default)]
    pub retries: u32,
    /// Creation instant of this occurrence.
    pub created_at: i64,
    /// Creation instant of the first occurrence in the chain.
    pub origin_created_at: i64,
    /// Number of engine instances currently executing this record.
    #[serde(default)]
    pub locks: u32,
    /// Policy applied when the record is found past its deadline.
    #[serde(default)]
    pub overshot_action: OvershotAction,
}

impl JobRecord {
    /// Create a one-time record with a fresh id, created now.
    pub fn new(job_name: impl Into<String>, start_time: i64, params: JobParams) -> Self {
        Self::new_at(job_name, start_time, params, Utc::now().timestamp_millis())
    }

    /// Create a one-time record with a fresh id and an explicit creation instant.
    pub fn new_at(
        job_name: impl Into<String>,
        start_time: i64,
        params: JobParams,
        created_at: i64,
    ) -> Self {
        Self {
            id: JobId::generate(),
            job_name: job_name.into(),
            params,
            start_time,
            end_time: None,
            interval: None,
            periodic: None,
            max_cycles: None,
            retries: 0,
            created_at,
            origin_created_at: created_at,
            locks: 0,
            overshot_action: OvershotAction::default(),
        }
    }

    /// Repeat on a fixed interval.
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = Some(interval);
        self
    }

    /// Repeat on a calendar rule.
    pub fn with_periodic(mut self, periodic: Periodic) -> Self {
        self.periodic = Some(periodic);
        self
    }

    /// Stop renewing after this instant.
    pub fn with_end_time(mut self, end_time: i64) -> Self {
        self.end_time = Some(end_time);
        self
    }

    /// Stop renewing after this many cycles.
    pub fn with_max_cycles(mut self, max_cycles: u32) -> Self {
        self.max_cycles = Some(max_cycles);
        self
    }

    /// Set the retry count.
    pub fn with_retries(mut self, retries: u32) -> Self {
        self.retries = retries;
        self
    }

    /// Set the overshoot policy.
    pub fn with_overshot_action(mut self, action: OvershotAction) -> Self {
        self.overshot_action = action;
        self
    }

    /// Whether the record renews itself after running.
    pub fn is_repeating(&self) -> bool {
        self.interval.is_some() || self.periodic.is_some()
    }

    /// Whether a repeating record gets a successor when run at `now_millis`.
    ///
    /// Without `endTime` and `maxCycles` it always does. Otherwise it does
    /// while any limit that is set has not been reached.
    pub fn should_renew(&self, now_millis: i64) -> bool {
        if self.end_time.is_none() && self.max_cycles.is_none() {
            return true;
        }
        let under_end_time = self.end_time.is_some_and(|end| now_millis < end);
        let under_max_cycles = self
            .max_cycles
            .is_some_and(|max| self.params.cycle_number() < max);
        under_end_time || under_max_cycles
    }

    /// Build the next occurrence of a repeating record.
    ///
    /// Periodic records step one nominal unit from `now_millis`, interval
    /// records add their interval to it. Everything else is carried over
    /// except the id, creation instant, lock count and cycle number.
    pub fn successor(&self, now_millis: i64) -> JobRecord {
        let start_time = match (&self.periodic, self.interval) {
            (Some(periodic), _) => periodic.next_nominal(now_millis),
            (None, Some(interval)) => {
                now_millis.saturating_add(i64::try_from(interval.as_millis()).unwrap_or(i64::MAX))
            }
            (None, None) => now_millis,
        };

        JobRecord {
            id: JobId::generate(),
            params: self.params.next_cycle(),
            start_time,
            created_at: now_millis,
            locks: 0,
            ..self.clone()
        }
    }
}

/// Serde helper for `Option<Duration>` stored as milliseconds.
mod serde_millis {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        duration
            .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
            .serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = Option::<u64>::deserialize(deserializer)?;
        Ok(millis.map(Duration::from_millis))
    }
}
