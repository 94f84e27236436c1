//! Subscription filters.
//!
//! # Filter Logic
//!
//! - A filter matches when the measurement is equal AND every required
//!   `key=value` tag is present on the point (empty tag set = any tags)
//! - A subscription matches when ANY of its filters matches

use crate::core::{PulseError, Result};
use crate::protocol::Point;
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeSet;
use std::str::FromStr;

/// A `(measurement, required tags)` predicate.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct SubscriptionFilter {
    measurement: String,
    tags: BTreeSet<String>,
}

impl SubscriptionFilter {
    /// Build a filter; the measurement must be non-empty.
    pub fn new<M, I, T>(measurement: M, tags: I) -> Result<Self>
    where
        M: Into<String>,
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        let measurement = measurement.into();
        if measurement.is_empty() {
            return Err(PulseError::subscription("measurement must be a non-empty string"));
        }

        Ok(Self {
            measurement,
            tags: tags.into_iter().map(Into::into).collect(),
        })
    }

    /// Validate and build a filter from its JSON control-message form
    /// `{"measurement": "...", "tags": ["key=value", ...]}`.
    pub fn from_json(value: &Value) -> Result<Self> {
        let object = value
            .as_object()
            .ok_or_else(|| PulseError::subscription(format!("filter must be an object: {}", value)))?;

        let measurement = object
            .get("measurement")
            .and_then(Value::as_str)
            .ok_or_else(|| PulseError::subscription("measurement must be a non-empty string"))?;

        let tags = object
            .get("tags")
            .and_then(Value::as_array)
            .ok_or_else(|| PulseError::subscription("tags must be an array of strings"))?
            .iter()
            .map(|tag| {
                tag.as_str()
                    .map(str::to_string)
                    .ok_or_else(|| PulseError::subscription("tags must be an array of strings"))
            })
            .collect::<Result<Vec<_>>>()?;

        Self::new(measurement, tags)
    }

    pub fn measurement(&self) -> &str {
        &self.measurement
    }

    pub fn tags(&self) -> &BTreeSet<String> {
        &self.tags
    }

    #[inline]
    pub fn matches(&self, point: &Point) -> bool {
        point.measurement == self.measurement
            && self.tags.iter().all(|required| point.has_tag_pair(required))
    }
}

/// Parses the compact `measurement[,key=value...]` form.
impl FromStr for SubscriptionFilter {
    type Err = PulseError;

    fn from_str(s: &str) -> Result<Self> {
        let mut parts = s.split(',').map(str::trim);
        let measurement = parts.next().unwrap_or_default();
        let tags = parts
            .filter(|part| !part.is_empty())
            .map(|part| match part.split_once('=') {
                Some((key, _)) if !key.is_empty() => Ok(part.to_string()),
                _ => Err(PulseError::subscription(format!("tag must be key=value: {part}"))),
            })
            .collect::<Result<Vec<_>>>()?;
        Self::new(measurement, tags)
    }
}

/// A set of filters; a point is deliverable if any filter matches.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Subscription {
    filters: Vec<SubscriptionFilter>,
}

impl Subscription {
    /// Build a subscription, dropping duplicate filters.
    pub fn new(filters: Vec<SubscriptionFilter>) -> Self {
        let mut unique: Vec<SubscriptionFilter> = Vec::with_capacity(filters.len());
        for filter in filters {
            if !unique.contains(&filter) {
                unique.push(filter);
            }
        }
        Self { filters: unique }
    }

    pub fn filters(&self) -> &[SubscriptionFilter] {
        &self.filters
    }

    pub fn len(&self) -> usize {
        self.filters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.filters.is_empty()
    }

    #[inline]
    pub fn matches(&self, point: &Point) -> bool {
        self.filters.iter().any(|filter| filter.matches(point))
    }

    /// The matching subset of `points`, in input order.
    pub fn select<'a>(&self, points: &'a [Point]) -> Vec<&'a Point> {
        if self.filters.is_empty() {
            return Vec::new();
        }
        points.iter().filter(|point| self.matches(point)).collect()
    }
}
