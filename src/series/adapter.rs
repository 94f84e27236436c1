//! Converts delivered points and historical query tables into keyed samples.

use crate::core::{PulseError, Result};
use crate::protocol::Point;
use crate::series::clock::Clock;
use crate::series::sample::{KeyedSample, SeriesKey};
use ahash::AHashMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

/// How wire timestamps are interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimestampUnit {
    Nanoseconds,
    Microseconds,
    Milliseconds,
    Seconds,
    /// Unknown precision: truncate or zero-pad to as many digits as the
    /// current epoch-millisecond time has
    MillisDigits,
}

impl TimestampUnit {
    /// Epoch milliseconds for a raw wire timestamp, floored.
    pub fn to_millis(&self, raw: &str, now_ms: f64) -> Option<f64> {
        let raw = raw.trim();
        if raw.is_empty() {
            return None;
        }

        let millis = match self {
            TimestampUnit::MillisDigits => {
                if !raw.bytes().all(|b| b.is_ascii_digit()) {
                    return None;
                }
                let digits = (now_ms.max(1.0) as u64).to_string().len();
                let mut text: String = raw.chars().take(digits).collect();
                while text.len() < digits {
                    text.push('0');
                }
                text.parse::<f64>().ok()?
            },
            unit => {
                let value = match raw.parse::<i64>() {
                    Ok(n) => n as f64,
                    Err(_) => raw.parse::<f64>().ok()?,
                };
                unit.scale(value)
            },
        };

        millis.is_finite().then(|| millis.floor())
    }

    /// Convert a numeric time in this unit to milliseconds.
    pub fn scale(&self, value: f64) -> f64 {
        match self {
            TimestampUnit::Nanoseconds => value / 1_000_000.0,
            TimestampUnit::Microseconds => value / 1_000.0,
            TimestampUnit::Milliseconds | TimestampUnit::MillisDigits => value,
            TimestampUnit::Seconds => value * 1_000.0,
        }
    }
}

/// How series keys are derived from a point's fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyScope {
    /// Field name only; equal field names from different measurements share a series
    Field,
    /// `measurement.field`
    MeasurementField,
}

impl KeyScope {
    pub fn key_for(&self, measurement: &str, field: &str) -> String {
        match self {
            KeyScope::Field => field.to_string(),
            KeyScope::MeasurementField => format!("{measurement}.{field}"),
        }
    }
}

/// Parse a broker delivery (JSON array of points).
pub fn parse_delivery(json: &str) -> Result<Vec<Point>> {
    serde_json::from_str(json).map_err(|e| PulseError::protocol(format!("malformed delivery: {e}")))
}

/// Turns points into samples using a timestamp unit and key scope.
#[derive(Debug, Clone)]
pub struct SampleAdapter {
    unit: TimestampUnit,
    scope: KeyScope,
    clock: Arc<dyn Clock>,
}

impl SampleAdapter {
    pub fn new(unit: TimestampUnit, scope: KeyScope, clock: Arc<dyn Clock>) -> Self {
        Self { unit, scope, clock }
    }

    pub fn unit(&self) -> TimestampUnit {
        self.unit
    }

    pub fn scope(&self) -> KeyScope {
        self.scope
    }

    /// One sample per numeric or boolean field. String fields are skipped;
    /// a missing or unreadable timestamp takes the current time.
    pub fn samples_from_points(&self, points: &[Point]) -> Vec<KeyedSample> {
        let now = self.clock.now_ms();
        let mut keys: AHashMap<String, SeriesKey> = AHashMap::new();
        let mut samples = Vec::with_capacity(points.len() * 4);

        for point in points {
            let time = point
                .timestamp
                .as_deref()
                .and_then(|raw| self.unit.to_millis(raw, now))
                .unwrap_or(now);

            for (field, value) in point.fields.iter() {
                let Some(value) = value.as_f64() else {
                    continue;
                };
                let name = self.scope.key_for(&point.measurement, field);
                let key = keys
                    .entry(name)
                    .or_insert_with_key(|name| SeriesKey::from(name.as_str()))
                    .clone();
                samples.push(KeyedSample { key, time, value });
            }
        }

        samples
    }

    /// Parse a delivery and convert it in one step.
    pub fn samples_from_delivery(&self, json: &str) -> Result<Vec<KeyedSample>> {
        let points = parse_delivery(json)?;
        Ok(self.samples_from_points(&points))
    }
}

/// Columnar result of a historical query.
///
/// Rows share an index across columns; `None` cells are nulls. The time
/// column is `_time`, falling back to `_start` then `_stop`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoricalTable {
    #[serde(default = "default_table_unit")]
    pub time_unit: TimestampUnit,
    pub columns: BTreeMap<String, Vec<Option<f64>>>,
}

fn default_table_unit() -> TimestampUnit {
    TimestampUnit::Milliseconds
}

impl Default for HistoricalTable {
    fn default() -> Self {
        Self {
            time_unit: default_table_unit(),
            columns: BTreeMap::new(),
        }
    }
}

impl HistoricalTable {
    pub const TIME_COLUMNS: [&'static str; 3] = ["_time", "_start", "_stop"];

    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_time_unit(mut self, unit: TimestampUnit) -> Self {
        self.time_unit = unit;
        self
    }

    pub fn with_column<S: Into<String>>(mut self, name: S, values: Vec<Option<f64>>) -> Self {
        self.columns.insert(name.into(), values);
        self
    }

    /// Row count (longest column)
    pub fn len(&self) -> usize {
        self.columns.values().map(Vec::len).max().unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn time_column(&self) -> Option<&[Option<f64>]> {
        Self::TIME_COLUMNS
            .iter()
            .find_map(|name| self.columns.get(*name))
            .map(Vec::as_slice)
    }

    /// Value columns: everything not prefixed with `_`.
    pub fn value_columns(&self) -> impl Iterator<Item = &str> {
        self.columns
            .keys()
            .map(String::as_str)
            .filter(|name| !name.starts_with('_'))
    }

    /// Flatten the pivot into samples for `fields`, or every value column
    /// when `fields` is `None`. Rows without a time and null cells are skipped.
    pub fn to_samples(&self, fields: Option<&[&str]>) -> Vec<KeyedSample> {
        let Some(times) = self.time_column() else {
            return Vec::new();
        };

        let selected: Vec<&str> = match fields {
            Some(fields) => fields.to_vec(),
            None => self.value_columns().collect(),
        };

        let mut samples = Vec::new();
        for name in selected {
            let Some(values) = self.columns.get(name) else {
                continue;
            };
            let key = SeriesKey::from(name);
            for (time, value) in times.iter().zip(values.iter()) {
                if let (Some(time), Some(value)) = (time, value) {
                    samples.push(KeyedSample {
                        key: Arc::clone(&key),
                        time: self.time_unit.scale(*time).floor(),
                        value: *value,
                    });
                }
            }
        }
        samples
    }
}
