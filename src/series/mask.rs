//! Axis label granularity.

use crate::series::sample::MinAndMax;
use chrono::{DateTime, Utc};
use serde::Serialize;

pub const DAY_MILLIS: f64 = 24.0 * 60.0 * 60.0 * 1000.0;

/// Coarse classification of a data time span, used to pick a label format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeMask {
    /// Span up to one day
    TimeOnly,
    /// Span between one and three days
    DateTime,
    /// Span over three days
    DateOnly,
}

impl TimeMask {
    pub fn for_range(range: MinAndMax) -> Self {
        if range.min + 3.0 * DAY_MILLIS < range.max {
            TimeMask::DateOnly
        } else if range.min + DAY_MILLIS < range.max {
            TimeMask::DateTime
        } else {
            TimeMask::TimeOnly
        }
    }

    /// `chrono` format string for this granularity
    pub fn pattern(&self) -> &'static str {
        match self {
            TimeMask::TimeOnly => "%H:%M:%S",
            TimeMask::DateTime => "%d/%m/%y %H:%M:%S",
            TimeMask::DateOnly => "%d/%m/%y",
        }
    }

    /// Format an epoch-millisecond time (UTC).
    pub fn format(&self, time_ms: f64) -> Option<String> {
        if !time_ms.is_finite() {
            return None;
        }
        DateTime::<Utc>::from_timestamp_millis(time_ms as i64)
            .map(|time| time.format(self.pattern()).to_string())
    }
}
