//! Calendar rules for periodic jobs.
//!
//! A [`Periodic`] rule has one governing granularity ([`Every`]) and the
//! calendar fields that granularity needs. All matching uses UTC calendar
//! fields.
//!
//! Stepping to the next nominal due time adds a fixed offset per granularity.
//! Months are 30 days and years are 365 days, so monthly and yearly rules
//! drift against the real calendar. Downstream start times depend on this
//! exact offset.

use chrono::{DateTime, Datelike, Timelike, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::types::MINUTE_MS;

/// Errors raised when building a calendar rule.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PeriodicError {
    /// A calendar field is outside its allowed range.
    #[error("{field} must be between {min} and {max}, got {value}")]
    OutOfRange {
        field: &'static str,
        value: u32,
        min: u32,
        max: u32,
    },

    /// A field required by the rule's granularity is absent.
    #[error("{field} is required for a rule repeating every {every}")]
    MissingField { field: &'static str, every: Every },
}

/// Granularity of a calendar rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Every {
    Minute,
    Hour,
    Day,
    Week,
    Month,
    Year,
}

impl Every {
    /// Length of one nominal step in milliseconds.
    pub fn step_millis(self) -> i64 {
        let minutes = match self {
            Every::Minute => 1,
            Every::Hour => 60,
            Every::Day => 60 * 24,
            Every::Week => 60 * 24 * 7,
            Every::Month => 60 * 24 * 30,
            Every::Year => 60 * 24 * 365,
        };
        minutes * MINUTE_MS
    }

    fn as_str(self) -> &'static str {
        match self {
            Every::Minute => "minute",
            Every::Hour => "hour",
            Every::Day => "day",
            Every::Week => "week",
            Every::Month => "month",
            Every::Year => "year",
        }
    }
}

impl std::fmt::Display for Every {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An immutable calendar rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", try_from = "RawPeriodic")]
pub struct Periodic {
    every: Every,
    #[serde(skip_serializing_if = "Option::is_none")]
    minute: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    hour: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    day_of_week: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    day_of_month: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    month: Option<u32>,
}

/// Unvalidated wire form, checked by `TryFrom` on deserialization.
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawPeriodic {
    every: Every,
    #[serde(default)]
    minute: Option<u32>,
    #[serde(default)]
    hour: Option<u32>,
    #[serde(default)]
    day_of_week: Option<u32>,
    #[serde(default)]
    day_of_month: Option<u32>,
    #[serde(default)]
    month: Option<u32>,
}

impl TryFrom<RawPeriodic> for Periodic {
    type Error = PeriodicError;

    fn try_from(raw: RawPeriodic) -> Result<Self, Self::Error> {
        let rule = Periodic {
            every: raw.every,
            minute: raw.minute,
            hour: raw.hour,
            day_of_week: raw.day_of_week,
            day_of_month: raw.day_of_month,
            month: raw.month,
        };
        rule.validate()?;
        Ok(rule)
    }
}

fn check_range(field: &'static str, value: u32, min: u32, max: u32) -> Result<u32, PeriodicError> {
    if (min..=max).contains(&value) {
        Ok(value)
    } else {
        Err(PeriodicError::OutOfRange {
            field,
            value,
            min,
            max,
        })
    }
}

impl Periodic {
    /// Fires on every minute.
    pub fn every_minute() -> Self {
        Self {
            every: Every::Minute,
            minute: None,
            hour: None,
            day_of_week: None,
            day_of_month: None,
            month: None,
        }
    }

    /// Fires once an hour at `minute`.
    pub fn every_hour(minute: u32) -> Result<Self, PeriodicError> {
        Ok(Self {
            every: Every::Hour,
            minute: Some(check_range("minute", minute, 0, 59)?),
            ..Self::every_minute()
        })
    }

    /// Fires once a day at `hour:minute`.
    pub fn every_day(hour: u32, minute: u32) -> Result<Self, PeriodicError> {
        Ok(Self {
            every: Every::Day,
            minute: Some(check_range("minute", minute, 0, 59)?),
            hour: Some(check_range("hour", hour, 0, 23)?),
            ..Self::every_minute()
        })
    }

    /// Fires once a week on `day_of_week` (1 = Monday, 7 = Sunday) at `hour:minute`.
    pub fn every_week(day_of_week: u32, hour: u32, minute: u32) -> Result<Self, PeriodicError> {
        Ok(Self {
            every: Every::Week,
            day_of_week: Some(check_range("dayOfWeek", day_of_week, 1, 7)?),
            ..Self::every_day(hour, minute)?
        })
    }

    /// Fires once a month on `day_of_month` at `hour:minute`.
    pub fn every_month(day_of_month: u32, hour: u32, minute: u32) -> Result<Self, PeriodicError> {
        Ok(Self {
            every: Every::Month,
            day_of_month: Some(check_range("dayOfMonth", day_of_month, 0, 31)?),
            ..Self::every_day(hour, minute)?
        })
    }

    /// Fires once a year on `month` (1 = January) and `day_of_month` at `hour:minute`.
    pub fn every_year(
        month: u32,
        day_of_month: u32,
        hour: u32,
        minute: u32,
    ) -> Result<Self, PeriodicError> {
        Ok(Self {
            every: Every::Year,
            month: Some(check_range("month", month, 1, 12)?),
            ..Self::every_month(day_of_month, hour, minute)?
        })
    }

    /// Governing granularity.
    pub fn every(&self) -> Every {
        self.every
    }

    pub fn minute(&self) -> Option<u32> {
        self.minute
    }

    pub fn hour(&self) -> Option<u32> {
        self.hour
    }

    pub fn day_of_week(&self) -> Option<u32> {
        self.day_of_week
    }

    pub fn day_of_month(&self) -> Option<u32> {
        self.day_of_month
    }

    pub fn month(&self) -> Option<u32> {
        self.month
    }

    /// Check that every field the granularity needs is present and in range.
    fn validate(&self) -> Result<(), PeriodicError> {
        let require = |field: &'static str, value: Option<u32>| {
            value.ok_or(PeriodicError::MissingField {
                field,
                every: self.every,
            })
        };

        let needs_time = !matches!(self.every, Every::Minute);
        let needs_hour = matches!(
            self.every,
            Every::Day | Every::Week | Every::Month | Every::Year
        );

        if needs_time {
            check_range("minute", require("minute", self.minute)?, 0, 59)?;
        }
        if needs_hour {
            check_range("hour", require("hour", self.hour)?, 0, 23)?;
        }
        if self.every == Every::Week {
            check_range("dayOfWeek", require("dayOfWeek", self.day_of_week)?, 1, 7)?;
        }
        if matches!(self.every, Every::Month | Every::Year) {
            check_range("dayOfMonth", require("dayOfMonth", self.day_of_month)?, 0, 31)?;
        }
        if self.every == Every::Year {
            check_range("month", require("month", self.month)?, 1, 12)?;
        }
        Ok(())
    }

    /// Whether the rule is due at `instant`.
    ///
    /// Each granularity compares its own field plus every field of the
    /// finer granularities beneath it.
    pub fn matches(&self, instant: DateTime<Utc>) -> bool {
        let minute = || self.minute == Some(instant.minute());
        let hour = || self.hour == Some(instant.hour());
        let weekday = || self.day_of_week == Some(instant.weekday().number_from_monday());
        let day = || self.day_of_month == Some(instant.day());
        let month = || self.month == Some(instant.month());

        match self.every {
            Every::Minute => true,
            Every::Hour => minute(),
            Every::Day => hour() && minute(),
            Every::Week => weekday() && hour() && minute(),
            Every::Month => day() && hour() && minute(),
            Every::Year => month() && day() && hour() && minute(),
        }
    }

    /// Next nominal due time: `start_millis` plus one granularity step.
    pub fn next_nominal(&self, start_millis: i64) -> i64 {
        start_millis.saturating_add(self.every.step_millis())
    }
}
