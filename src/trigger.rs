//! Trigger modeling and next-fire computation.
//!
//! A trigger describes *when* a job fires: exactly once at a date, or
//! repeatedly on a fixed interval. Triggers are immutable once attached to a
//! job; changing a schedule means deleting and recreating the job.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{SchedulerError, SchedulerResult};

/// When a job fires.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "trigger", rename_all = "snake_case")]
pub enum Trigger {
    /// Fires exactly once at `fire_at`.
    Date { fire_at: DateTime<Utc> },
    /// Fires repeatedly at a fixed period.
    Interval(IntervalTrigger),
}

/// Repeating trigger: every `weeks + days + hours + minutes + seconds`,
/// starting at `start` (default: the reference instant of the first
/// computation) and stopping after `end` (default: never).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IntervalTrigger {
    #[serde(default)]
    pub weeks: u32,
    #[serde(default)]
    pub days: u32,
    #[serde(default)]
    pub hours: u32,
    #[serde(default)]
    pub minutes: u32,
    #[serde(default)]
    pub seconds: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end: Option<DateTime<Utc>>,
}

impl IntervalTrigger {
    /// Total period in seconds.
    pub fn period_seconds(&self) -> i64 {
        self.weeks as i64 * 7 * 86_400
            + self.days as i64 * 86_400
            + self.hours as i64 * 3_600
            + self.minutes as i64 * 60
            + self.seconds as i64
    }
}

impl Trigger {
    pub fn once_at(fire_at: DateTime<Utc>) -> Self {
        Self::Date { fire_at }
    }

    pub fn interval(interval: IntervalTrigger) -> Self {
        Self::Interval(interval)
    }

    /// Check structural validity. Instant parsing happens at the serde
    /// boundary, so the only failures here are an interval that never fires
    /// and an end before its start.
    pub fn validate(&self) -> SchedulerResult<()> {
        match self {
            Self::Date { .. } => Ok(()),
            Self::Interval(interval) => {
                if interval.period_seconds() == 0 {
                    return Err(SchedulerError::InvalidTrigger(
                        "interval trigger requires at least one positive period component"
                            .to_string(),
                    ));
                }
                if let (Some(start), Some(end)) = (interval.start, interval.end) {
                    if end < start {
                        return Err(SchedulerError::InvalidTrigger(format!(
                            "interval end {end} precedes start {start}"
                        )));
                    }
                }
                Ok(())
            }
        }
    }

    /// Compute the next fire time after `reference`, given the previously
    /// fired occurrence (if any).
    ///
    /// - Date: `fire_at` if nothing has fired yet and `fire_at` has not
    ///   passed; otherwise the trigger is exhausted.
    /// - Interval: the smallest `start + k * period` (`k >= 0`) strictly
    ///   greater than `max(reference, previous_fire)`, bounded by `end`.
    pub fn next_fire(
        &self,
        reference: DateTime<Utc>,
        previous_fire: Option<DateTime<Utc>>,
    ) -> Option<DateTime<Utc>> {
        match self {
            Self::Date { fire_at } => {
                if previous_fire.is_some() || *fire_at < reference {
                    None
                } else {
                    Some(*fire_at)
                }
            }
            Self::Interval(interval) => {
                let period = interval.period_seconds();
                if period == 0 {
                    return None;
                }
                let start = interval.start.unwrap_or(reference);
                let floor = match previous_fire {
                    Some(previous) => reference.max(previous),
                    None => reference,
                };
                let next = if start > floor {
                    start
                } else {
                    let elapsed = (floor - start).num_seconds();
                    let ticks = elapsed / period + 1;
                    start + Duration::seconds(period * ticks)
                };
                match interval.end {
                    Some(end) if next > end => None,
                    _ => Some(next),
                }
            }
        }
    }
}
