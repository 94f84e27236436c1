//! Time/value samples.

use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Series identifier (a field name, optionally scoped by measurement)
pub type SeriesKey = Arc<str>;

/// One `(time, value)` observation; time is epoch milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    pub time: f64,
    pub value: f64,
}

impl Sample {
    pub fn new(time: f64, value: f64) -> Self {
        Self { time, value }
    }
}

/// A sample tagged with the series it belongs to.
#[derive(Debug, Clone, PartialEq)]
pub struct KeyedSample {
    pub key: SeriesKey,
    pub time: f64,
    pub value: f64,
}

impl KeyedSample {
    pub fn new<K: Into<SeriesKey>>(key: K, time: f64, value: f64) -> Self {
        Self {
            key: key.into(),
            time,
            value,
        }
    }

    pub fn sample(&self) -> Sample {
        Sample::new(self.time, self.value)
    }
}

/// Closed numeric range.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MinAndMax {
    pub min: f64,
    pub max: f64,
}

impl MinAndMax {
    pub fn new(min: f64, max: f64) -> Self {
        Self { min, max }
    }

    pub fn span(&self) -> f64 {
        self.max - self.min
    }

    /// Union of all present ranges; `None` when none is present.
    pub fn merge<I>(ranges: I) -> Option<Self>
    where
        I: IntoIterator<Item = Option<MinAndMax>>,
    {
        ranges.into_iter().flatten().reduce(|acc, range| MinAndMax {
            min: acc.min.min(range.min),
            max: acc.max.max(range.max),
        })
    }
}

/// Anything with a time and a value can be simplified.
pub trait TimeValue {
    fn time(&self) -> f64;
    fn value(&self) -> f64;
}

impl TimeValue for Sample {
    #[inline]
    fn time(&self) -> f64 {
        self.time
    }

    #[inline]
    fn value(&self) -> f64 {
        self.value
    }
}

impl TimeValue for KeyedSample {
    #[inline]
    fn time(&self) -> f64 {
        self.time
    }

    #[inline]
    fn value(&self) -> f64 {
        self.value
    }
}
