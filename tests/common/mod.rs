//! Common test utilities and fixtures.
#![allow(dead_code)]

use iotpulse_lib::broker::{Broker, ConnectionId, SubscriptionFilter};
use iotpulse_lib::core::BrokerConfig;
use iotpulse_lib::protocol::Point;
use iotpulse_lib::series::{KeyedSample, ManualClock, StoreOptions, TimeSeriesStore};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

/// Fixed "now" used by clock-driven tests (2023-11-14T22:13:20Z)
pub const NOW_MS: f64 = 1_700_000_000_000.0;

/// One `environment` line for a device.
pub fn env_line(client: &str, temperature: f64, timestamp_ms: u64) -> String {
    format!("environment,clientId={client} Temperature={temperature} {timestamp_ms}\n")
}

/// Fixture builder for points with sensible defaults.
pub struct TestPointBuilder {
    measurement: String,
    tags: Vec<(String, String)>,
    fields: Vec<(String, String)>,
    timestamp: Option<String>,
}

impl TestPointBuilder {
    pub fn new(measurement: &str) -> Self {
        Self {
            measurement: measurement.to_string(),
            tags: Vec::new(),
            fields: vec![("Temperature".to_string(), "21.5".to_string())],
            timestamp: None,
        }
    }

    pub fn tag(mut self, key: &str, value: &str) -> Self {
        self.tags.push((key.to_string(), value.to_string()));
        self
    }

    pub fn field(mut self, key: &str, value: &str) -> Self {
        self.fields.push((key.to_string(), value.to_string()));
        self
    }

    pub fn timestamp(mut self, timestamp: u64) -> Self {
        self.timestamp = Some(timestamp.to_string());
        self
    }

    pub fn build(self) -> Point {
        let mut point = Point::new(self.measurement);
        for (key, value) in self.tags {
            point.insert_tag(key, value);
        }
        for (key, value) in self.fields {
            point.insert_field(key, value.into());
        }
        point.timestamp = self.timestamp;
        point
    }
}

/// Broker with small queues and a low parallel threshold.
pub fn test_broker() -> Arc<Broker> {
    Arc::new(Broker::new(BrokerConfig {
        channel_capacity: 16,
        max_connections: 64,
        parallel_fanout_threshold: 4,
        feed_capacity: 16,
    }))
}

pub fn filter(measurement: &str, tags: &[&str]) -> SubscriptionFilter {
    SubscriptionFilter::new(measurement, tags.iter().copied()).unwrap()
}

/// Connect and subscribe in one step.
pub fn subscribed(broker: &Broker, filters: Vec<SubscriptionFilter>) -> (ConnectionId, mpsc::Receiver<String>) {
    let (id, rx) = broker.connect().unwrap();
    broker.set_subscription(id, filters).unwrap();
    (id, rx)
}

/// Everything currently queued, without waiting.
pub fn drain(rx: &mut mpsc::Receiver<String>) -> Vec<String> {
    let mut messages = Vec::new();
    while let Ok(message) = rx.try_recv() {
        messages.push(message);
    }
    messages
}

/// Next message, or `None` after a short wait.
pub async fn next_message(rx: &mut mpsc::Receiver<String>) -> Option<String> {
    tokio::time::timeout(Duration::from_millis(500), rx.recv())
        .await
        .ok()
        .flatten()
}

/// Store on a manual clock at [`NOW_MS`].
pub fn manual_store(options: StoreOptions) -> (TimeSeriesStore, Arc<ManualClock>) {
    let clock = Arc::new(ManualClock::new(NOW_MS));
    (TimeSeriesStore::with_clock(options, clock.clone()), clock)
}

/// Samples for one key from `(time, value)` pairs.
pub fn keyed(key: &str, points: &[(f64, f64)]) -> Vec<KeyedSample> {
    points.iter().map(|&(t, v)| KeyedSample::new(key, t, v)).collect()
}

/// Verify samples are sorted by time (oldest first).
pub fn assert_sorted_by_time<T: iotpulse_lib::series::TimeValue>(samples: &[T]) {
    for i in 1..samples.len() {
        assert!(
            samples[i - 1].time() <= samples[i].time(),
            "Samples not sorted by time at index {}",
            i
        );
    }
}
