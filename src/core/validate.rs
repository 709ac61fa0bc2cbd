//! Due-time classification of job records.
//!
//! Comparisons are made on whole UTC minutes so that poll jitter of a few
//! milliseconds never moves a record across a minute boundary.

use chrono::{DateTime, Utc};

use super::record::JobRecord;
use super::types::whole_minute;

/// Classification of a record against the current instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Validity {
    /// Due now.
    Valid,
    /// Past its deadline without having run.
    Overshot,
    /// Not yet due.
    Scheduled,
}

/// Classify `record` at `now`.
///
/// - A passed `endTime` overshoots any record.
/// - A one-time record is valid in the minute of its start time and
///   overshot in any later minute.
/// - A repeating record is valid when its calendar rule matches and its
///   start minute has been reached. Interval records have no rule and are
///   valid from their start minute onward. Start time alone never
///   overshoots a repeating record.
pub fn validate(record: &JobRecord, now: DateTime<Utc>) -> Validity {
    let now_minute = whole_minute(now.timestamp_millis());

    if let Some(end_time) = record.end_time {
        if now_minute > whole_minute(end_time) {
            return Validity::Overshot;
        }
    }

    let start_diff = now_minute - whole_minute(record.start_time);

    if !record.is_repeating() {
        return match start_diff {
            d if d > 0 => Validity::Overshot,
            0 => Validity::Valid,
            _ => Validity::Scheduled,
        };
    }

    if start_diff < 0 {
        return Validity::Scheduled;
    }

    match &record.periodic {
        Some(rule) if !rule.matches(now) => Validity::Scheduled,
        _ => Validity::Valid,
    }
}
