//! Live consumer connections.
//!
//! Each connection owns a bounded channel carrying serialized deliveries and
//! at most one subscription. Subscriptions are swapped whole, never edited.

use crate::broker::filter::Subscription;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Broker-assigned connection identifier
pub type ConnectionId = u64;

/// Outcome of handing one message to a connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryOutcome {
    /// Queued for the consumer
    Delivered,
    /// Queue full, this batch is dropped for this connection
    Full,
    /// Consumer went away
    Closed,
}

#[derive(Debug)]
pub struct Connection {
    id: ConnectionId,
    subscription: Option<Arc<Subscription>>,
    sender: mpsc::Sender<String>,
}

impl Connection {
    pub fn new(id: ConnectionId, sender: mpsc::Sender<String>) -> Self {
        Self {
            id,
            subscription: None,
            sender,
        }
    }

    #[inline]
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn subscription(&self) -> Option<&Arc<Subscription>> {
        self.subscription.as_ref()
    }

    /// Replace the subscription; an empty one is stored as none.
    pub fn replace_subscription(&mut self, subscription: Subscription) {
        self.subscription = if subscription.is_empty() {
            None
        } else {
            Some(Arc::new(subscription))
        };
    }

    pub fn clear_subscription(&mut self) {
        self.subscription = None;
    }

    pub fn sender(&self) -> &mpsc::Sender<String> {
        &self.sender
    }

    #[inline]
    pub fn is_connected(&self) -> bool {
        !self.sender.is_closed()
    }
}

/// Non-blocking send that classifies the failure.
pub fn try_deliver(sender: &mpsc::Sender<String>, message: String) -> DeliveryOutcome {
    match sender.try_send(message) {
        Ok(()) => DeliveryOutcome::Delivered,
        Err(mpsc::error::TrySendError::Full(_)) => DeliveryOutcome::Full,
        Err(mpsc::error::TrySendError::Closed(_)) => DeliveryOutcome::Closed,
    }
}
