/// Sortable send timestamps and elapsed-time buckets
use crate::error::{ChatError, Result};
use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Fixed-width so that string order is chronological order
pub const SENT_AT_FORMAT: &str = "%Y%m%d%H%M%S";

const MINUTE: i64 = 60;
const HOUR: i64 = 60 * MINUTE;
const DAY: i64 = 24 * HOUR;
const WEEK: i64 = 7 * DAY;
const FOUR_WEEKS: i64 = 28 * DAY;
// Mean Gregorian year
const YEAR: i64 = 31_556_952;

pub fn format_stamp(at: DateTime<Utc>) -> String {
    at.format(SENT_AT_FORMAT).to_string()
}

pub fn parse_stamp(stamp: &str) -> Result<DateTime<Utc>> {
    if stamp.len() != 14 {
        return Err(ChatError::InvalidArgument(format!(
            "timestamp '{}' is not 14 digits",
            stamp
        )));
    }
    let naive = NaiveDateTime::parse_from_str(stamp, SENT_AT_FORMAT)
        .map_err(|e| ChatError::InvalidArgument(format!("timestamp '{}': {}", stamp, e)))?;
    Ok(Utc.from_utc_datetime(&naive))
}

/// Coarse "how long ago" bucket for a conversation's last message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "unit", content = "count", rename_all = "snake_case")]
pub enum ElapsedLabel {
    JustNow,
    Minutes(i64),
    Hours(i64),
    Yesterday,
    Days(i64),
    Weeks(i64),
    Months(i64),
    Years(i64),
}

impl ElapsedLabel {
    /// Bucket the time between `sent_at` and `now`; future stamps count as just now
    pub fn between(sent_at: DateTime<Utc>, now: DateTime<Utc>) -> Self {
        let secs = (now - sent_at).num_seconds();
        let days = secs.max(0) / DAY;

        if secs < MINUTE {
            ElapsedLabel::JustNow
        } else if secs < HOUR {
            ElapsedLabel::Minutes(secs / MINUTE)
        } else if secs < DAY {
            ElapsedLabel::Hours(secs / HOUR)
        } else if secs < WEEK {
            if days == 1 {
                ElapsedLabel::Yesterday
            } else {
                ElapsedLabel::Days(days)
            }
        } else if secs < FOUR_WEEKS {
            ElapsedLabel::Weeks(days / 7)
        } else if secs < YEAR {
            ElapsedLabel::Months((days / 30).max(1))
        } else {
            ElapsedLabel::Years((days / 365).max(1))
        }
    }

    /// Same as [`ElapsedLabel::between`] for a stored `sentAt` string
    pub fn from_stamp(sent_at: &str, now: DateTime<Utc>) -> Result<Self> {
        Ok(Self::between(parse_stamp(sent_at)?, now))
    }
}

impl fmt::Display for ElapsedLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fn plural(f: &mut fmt::Formatter<'_>, n: i64, unit: &str) -> fmt::Result {
            if n == 1 {
                write!(f, "1 {} ago", unit)
            } else {
                write!(f, "{} {}s ago", n, unit)
            }
        }
        match *self {
            ElapsedLabel::JustNow => write!(f, "just now"),
            ElapsedLabel::Minutes(n) => plural(f, n, "minute"),
            ElapsedLabel::Hours(n) => plural(f, n, "hour"),
            ElapsedLabel::Yesterday => write!(f, "yesterday"),
            ElapsedLabel::Days(n) => plural(f, n, "day"),
            ElapsedLabel::Weeks(n) => plural(f, n, "week"),
            ElapsedLabel::Months(n) => plural(f, n, "month"),
            ElapsedLabel::Years(n) => plural(f, n, "year"),
        }
    }
}
