//! Period clock: decides when a group's daily resolution is due.
//!
//! A period runs from one goal-reset instant to the next and is identified by
//! the UTC date on which it began. All arithmetic is done in UTC; the
//! wall-clock entry points delegate to `_at` variants that take an explicit
//! `now` so every branch is testable at a fixed instant.

use std::fmt;

use chrono::{DateTime, Duration, NaiveTime, Utc};

/// A group's daily goal-reset time of day, hour and minute in UTC.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResetTime(NaiveTime);

impl ResetTime {
    /// Parse an `HH:MM` string. Seconds are always zero.
    pub fn parse(value: &str) -> Option<Self> {
        NaiveTime::parse_from_str(value, "%H:%M").ok().map(Self)
    }
}

impl Default for ResetTime {
    fn default() -> Self {
        Self(NaiveTime::MIN)
    }
}

impl fmt::Display for ResetTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.format("%H:%M"))
    }
}

/// The id (`YYYY-MM-DD`) of the period containing `now`.
///
/// If `now` has not yet reached today's reset instant, the current period is
/// still the one that began at yesterday's reset.
pub fn current_period_id_at(now: DateTime<Utc>, reset: ResetTime) -> String {
    let reset_today = now.date_naive().and_time(reset.0).and_utc();
    let period_start = if now < reset_today {
        reset_today - Duration::days(1)
    } else {
        reset_today
    };
    period_start.format("%Y-%m-%d").to_string()
}

/// Whether a resolution must run: false iff the current period was already
/// processed. An absent marker and a marker several periods old both read as
/// due; missed periods collapse into a single resolution step.
pub fn period_is_due_at(
    now: DateTime<Utc>,
    reset: ResetTime,
    last_processed: Option<&str>,
) -> bool {
    last_processed != Some(current_period_id_at(now, reset).as_str())
}

pub fn current_period_id(reset: ResetTime) -> String {
    current_period_id_at(Utc::now(), reset)
}

pub fn period_is_due(reset: ResetTime, last_processed: Option<&str>) -> bool {
    period_is_due_at(Utc::now(), reset, last_processed)
}
