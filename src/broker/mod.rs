//! Subscription broker - fans decoded points out to live connections.
//!
//! # Architecture
//!
//! ```text
//! upstream feed (Bytes)
//!        │
//!        ▼
//!   ingest loop ── decode ──► on_ingest(points)
//!                                  │
//!                    per connection: select matching subset
//!                    (rayon above the fan-out threshold)
//!                                  │
//!                    non-empty ──► serialize once ──► try_send
//!                    empty     ──► nothing
//! ```
//!
//! Buffers are processed one at a time and sends happen in connection order
//! inside a pass, so a connection never sees batches out of order. Delivery
//! is at-most-once: a full queue drops that batch for that connection only,
//! a closed queue removes the connection.

pub mod connection;
pub mod control;
pub mod filter;

pub use connection::{Connection, ConnectionId, DeliveryOutcome};
pub use control::{ControlMessage, SUBSCRIBE_PREFIX};
pub use filter::{Subscription, SubscriptionFilter};

use crate::core::{BrokerConfig, PulseError, Result};
use crate::protocol::{self, Point};
use bytes::Bytes;
use dashmap::DashMap;
use rayon::prelude::*;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

/// Per-pass fan-out summary
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FanoutReport {
    /// Points in the ingested batch
    pub points: usize,
    /// Connections that received one message
    pub delivered: usize,
    /// Subscribed connections with an empty match
    pub skipped: usize,
    /// Connections whose queue was full
    pub dropped: usize,
    /// Connections removed because their channel closed
    pub disconnected: usize,
}

/// Cumulative broker statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BrokerStats {
    pub passes: u64,
    pub ingested_points: u64,
    pub delivered_messages: u64,
    pub skipped: u64,
    pub dropped: u64,
    pub disconnected: u64,
    pub live_connections: usize,
}

#[derive(Debug, Default)]
struct Counters {
    passes: AtomicU64,
    ingested_points: AtomicU64,
    delivered_messages: AtomicU64,
    skipped: AtomicU64,
    dropped: AtomicU64,
    disconnected: AtomicU64,
}

/// Subscription-aware fan-out of decoded points.
#[derive(Debug)]
pub struct Broker {
    connections: DashMap<ConnectionId, Connection>,
    next_id: AtomicU64,
    config: BrokerConfig,
    counters: Counters,
}

/// Running ingest loop. Dropping the handle stops the loop as well.
#[derive(Debug)]
pub struct BrokerHandle {
    shutdown: Option<oneshot::Sender<()>>,
    task: JoinHandle<()>,
}

impl BrokerHandle {
    /// Stop the ingest loop and wait for the in-flight pass to finish.
    pub async fn stop(mut self) -> Result<()> {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
        self.task.await?;
        Ok(())
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

impl Broker {
    pub fn new(config: BrokerConfig) -> Self {
        Self {
            connections: DashMap::new(),
            next_id: AtomicU64::new(1),
            config,
            counters: Counters::default(),
        }
    }

    pub fn config(&self) -> &BrokerConfig {
        &self.config
    }

    /// Channel pair sized for the upstream feed.
    pub fn feed_channel(&self) -> (mpsc::Sender<Bytes>, mpsc::Receiver<Bytes>) {
        mpsc::channel(self.config.feed_capacity)
    }

    /// Register a new connection with no subscription.
    ///
    /// Returns the connection ID and the receiver for serialized deliveries.
    pub fn connect(&self) -> Result<(ConnectionId, mpsc::Receiver<String>)> {
        if self.connections.len() >= self.config.max_connections {
            return Err(PulseError::MaxConnections {
                max: self.config.max_connections,
            });
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (sender, receiver) = mpsc::channel(self.config.channel_capacity);
        self.connections.insert(id, Connection::new(id, sender));

        debug!(id, "connection registered");
        Ok((id, receiver))
    }

    /// Replace the connection's filters. Filters are validated on
    /// construction, so the swap is all-or-nothing.
    pub fn set_subscription(&self, id: ConnectionId, filters: Vec<SubscriptionFilter>) -> Result<()> {
        let mut connection = self
            .connections
            .get_mut(&id)
            .ok_or(PulseError::ConnectionNotFound(id))?;

        let subscription = Subscription::new(filters);
        debug!(id, filters = subscription.len(), "subscription replaced");
        connection.replace_subscription(subscription);
        Ok(())
    }

    /// Clear the connection's filters; later batches are not delivered to it.
    pub fn unsubscribe(&self, id: ConnectionId) -> Result<()> {
        let mut connection = self
            .connections
            .get_mut(&id)
            .ok_or(PulseError::ConnectionNotFound(id))?;
        connection.clear_subscription();
        debug!(id, "unsubscribed");
        Ok(())
    }

    /// Apply a raw control message. A rejected message is logged and leaves
    /// the connection's current subscription in effect.
    pub fn handle_control(&self, id: ConnectionId, payload: &str) -> Result<()> {
        let message = ControlMessage::parse(payload).map_err(|e| {
            warn!(id, error = %e, "rejected control message");
            e
        })?;

        match message {
            ControlMessage::Subscribe(filters) => self.set_subscription(id, filters),
            ControlMessage::Unsubscribe => self.unsubscribe(id),
        }
    }

    /// Remove a connection. Returns false if it was already gone.
    pub fn disconnect(&self, id: ConnectionId) -> bool {
        let removed = self.connections.remove(&id).is_some();
        if removed {
            debug!(id, "connection removed");
        }
        removed
    }

    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    pub fn subscription_of(&self, id: ConnectionId) -> Option<Arc<Subscription>> {
        self.connections
            .get(&id)
            .and_then(|connection| connection.subscription().cloned())
    }

    /// Decode a raw buffer and fan it out.
    pub fn ingest_buffer(&self, buffer: &[u8]) -> FanoutReport {
        let points = protocol::decode(buffer);
        trace!(bytes = buffer.len(), points = points.len(), "decoded buffer");
        self.on_ingest(&points)
    }

    /// Deliver each subscribed connection its matching subset of `points`
    /// as one JSON message; connections with no match get nothing.
    pub fn on_ingest(&self, points: &[Point]) -> FanoutReport {
        let mut report = FanoutReport {
            points: points.len(),
            ..FanoutReport::default()
        };
        self.counters.passes.fetch_add(1, Ordering::Relaxed);
        self.counters
            .ingested_points
            .fetch_add(points.len() as u64, Ordering::Relaxed);

        if points.is_empty() {
            return report;
        }

        let mut targets: Vec<(ConnectionId, Arc<Subscription>, mpsc::Sender<String>)> = self
            .connections
            .iter()
            .filter_map(|entry| {
                entry
                    .subscription()
                    .map(|subscription| (entry.id(), Arc::clone(subscription), entry.sender().clone()))
            })
            .collect();
        targets.sort_unstable_by_key(|(id, _, _)| *id);

        let render = |(_, subscription, _): &(ConnectionId, Arc<Subscription>, mpsc::Sender<String>)| {
            let matched = subscription.select(points);
            if matched.is_empty() {
                None
            } else {
                Some(serde_json::to_string(&matched))
            }
        };

        let payloads: Vec<_> = if targets.len() >= self.config.parallel_fanout_threshold {
            targets.par_iter().map(render).collect()
        } else {
            targets.iter().map(render).collect()
        };

        let mut closed = Vec::new();
        for ((id, _, sender), payload) in targets.iter().zip(payloads) {
            let message = match payload {
                None => {
                    report.skipped += 1;
                    continue;
                },
                Some(Ok(message)) => message,
                Some(Err(e)) => {
                    warn!(id, error = %e, "failed to serialize delivery");
                    continue;
                },
            };

            match connection::try_deliver(sender, message) {
                DeliveryOutcome::Delivered => report.delivered += 1,
                DeliveryOutcome::Full => {
                    report.dropped += 1;
                    warn!(id, "delivery queue full, batch dropped");
                },
                DeliveryOutcome::Closed => closed.push(*id),
            }
        }

        for id in closed {
            if self.connections.remove(&id).is_some() {
                report.disconnected += 1;
                debug!(id, "removed closed connection");
            }
        }

        self.record(&report);
        trace!(?report, "fan-out pass complete");
        report
    }

    fn record(&self, report: &FanoutReport) {
        let c = &self.counters;
        c.delivered_messages
            .fetch_add(report.delivered as u64, Ordering::Relaxed);
        c.skipped.fetch_add(report.skipped as u64, Ordering::Relaxed);
        c.dropped.fetch_add(report.dropped as u64, Ordering::Relaxed);
        c.disconnected
            .fetch_add(report.disconnected as u64, Ordering::Relaxed);
    }

    pub fn stats(&self) -> BrokerStats {
        let c = &self.counters;
        BrokerStats {
            passes: c.passes.load(Ordering::Relaxed),
            ingested_points: c.ingested_points.load(Ordering::Relaxed),
            delivered_messages: c.delivered_messages.load(Ordering::Relaxed),
            skipped: c.skipped.load(Ordering::Relaxed),
            dropped: c.dropped.load(Ordering::Relaxed),
            disconnected: c.disconnected.load(Ordering::Relaxed),
            live_connections: self.connections.len(),
        }
    }

    /// Remove connections whose consumer went away without a close.
    pub fn cleanup_disconnected(&self) -> usize {
        let before = self.connections.len();
        self.connections.retain(|_, connection| connection.is_connected());
        let removed = before - self.connections.len();
        if removed > 0 {
            self.counters
                .disconnected
                .fetch_add(removed as u64, Ordering::Relaxed);
            debug!(removed, "cleaned up disconnected connections");
        }
        removed
    }

    /// Periodically sweep connections whose consumer dropped its receiver.
    pub fn spawn_maintenance(self: &Arc<Self>, every: Duration) -> JoinHandle<()> {
        let broker = Arc::downgrade(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                let Some(broker) = broker.upgrade() else {
                    break;
                };
                broker.cleanup_disconnected();
            }
        })
    }

    /// Spawn the serial ingest loop over `feed`.
    ///
    /// The loop ends when the feed closes or the handle is stopped.
    pub fn start(self: &Arc<Self>, mut feed: mpsc::Receiver<Bytes>) -> BrokerHandle {
        let broker = Arc::clone(self);
        let (shutdown_tx, mut shutdown_rx) = oneshot::channel();

        let task = tokio::spawn(async move {
            info!("broker ingest loop started");
            loop {
                tokio::select! {
                    biased;
                    _ = &mut shutdown_rx => break,
                    buffer = feed.recv() => match buffer {
                        Some(buffer) => {
                            broker.ingest_buffer(&buffer);
                        },
                        None => {
                            debug!("upstream feed closed");
                            break;
                        },
                    },
                }
            }
            info!("broker ingest loop stopped");
        });

        BrokerHandle {
            shutdown: Some(shutdown_tx),
            task,
        }
    }
}

impl Default for Broker {
    fn default() -> Self {
        Self::new(BrokerConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn broker() -> Broker {
        Broker::new(BrokerConfig {
            channel_capacity: 4,
            max_connections: 3,
            parallel_fanout_threshold: 2,
            feed_capacity: 8,
        })
    }

    #[test]
    fn test_connect_unique_ids_and_limit() {
        let broker = broker();
        let (a, _ra) = broker.connect().unwrap();
        let (b, _rb) = broker.connect().unwrap();
        let (_c, _rc) = broker.connect().unwrap();
        assert_ne!(a, b);
        assert!(matches!(broker.connect(), Err(PulseError::MaxConnections { max: 3 })));
    }

    #[test]
    fn test_disconnect_is_idempotent() {
        let broker = broker();
        let (id, _rx) = broker.connect().unwrap();
        assert!(broker.disconnect(id));
        assert!(!broker.disconnect(id));
        assert_eq!(broker.connection_count(), 0);
    }

    #[test]
    fn test_rejected_control_keeps_prior_subscription() {
        let broker = broker();
        let (id, _rx) = broker.connect().unwrap();
        broker
            .handle_control(id, r#"subscribe:[{"measurement":"environment","tags":[]}]"#)
            .unwrap();
        let before = broker.subscription_of(id).unwrap();

        assert!(broker
            .handle_control(id, r#"subscribe:[{"measurement":"x","tags":[]},{"measurement":""}]"#)
            .is_err());
        assert!(broker.handle_control(id, "ping").is_err());

        assert_eq!(broker.subscription_of(id).unwrap(), before);
    }

    #[test]
    fn test_unknown_connection() {
        let broker = broker();
        assert!(matches!(broker.unsubscribe(42), Err(PulseError::ConnectionNotFound(42))));
    }

    #[test]
    fn test_closed_connection_removed_during_fanout() {
        let broker = broker();
        let (gone, rx_gone) = broker.connect().unwrap();
        let (live, mut rx_live) = broker.connect().unwrap();
        let filter = || vec![SubscriptionFilter::new("m", Vec::<String>::new()).unwrap()];
        broker.set_subscription(gone, filter()).unwrap();
        broker.set_subscription(live, filter()).unwrap();
        drop(rx_gone);

        let report = broker.on_ingest(&[Point::new("m").with_field("f", "1")]);
        assert_eq!(report.delivered, 1);
        assert_eq!(report.disconnected, 1);
        assert_eq!(broker.connection_count(), 1);
        assert!(rx_live.try_recv().is_ok());
    }

    #[test]
    fn test_full_queue_drops_only_that_batch() {
        let broker = broker();
        let (id, mut rx) = broker.connect().unwrap();
        broker
            .set_subscription(id, vec![SubscriptionFilter::new("m", Vec::<String>::new()).unwrap()])
            .unwrap();
        let points = [Point::new("m").with_field("f", "1")];
        for _ in 0..5 {
            broker.on_ingest(&points);
        }
        assert_eq!(broker.stats().dropped, 1);
        assert_eq!(broker.connection_count(), 1);
        let mut received = 0;
        while rx.try_recv().is_ok() {
            received += 1;
        }
        assert_eq!(received, 4);
    }
}
