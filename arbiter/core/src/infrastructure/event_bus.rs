// Event Bus - Pub/Sub over appended log events
//
// Provides in-memory event streaming using tokio broadcast channels so
// projectors, background processors, and observers learn about new appends
// without polling. The bus is a notification channel only: the event store
// remains the source of truth, and a lagged subscriber recovers by reading
// the log from its checkpoint.

use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, warn};

use crate::domain::event::StoredEvent;

/// Event bus for publishing and subscribing to appended events
#[derive(Clone)]
pub struct EventBus {
    sender: Arc<broadcast::Sender<StoredEvent>>,
}

impl EventBus {
    /// Create a new event bus with specified channel capacity
    /// Capacity determines how many events can be buffered before dropping old ones
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender: Arc::new(sender),
        }
    }

    /// Create event bus with default capacity (1024)
    pub fn with_default_capacity() -> Self {
        Self::new(1024)
    }

    /// Publish an appended event to all subscribers
    pub fn publish(&self, event: StoredEvent) {
        let receiver_count = self.sender.send(event).unwrap_or(0);
        if receiver_count == 0 {
            debug!("No subscribers listening to event");
        }
    }

    /// Subscribe to all appended events
    pub fn subscribe(&self) -> EventReceiver {
        EventReceiver {
            receiver: self.sender.subscribe(),
        }
    }

    /// Subscribe filtered by routing-key prefix, e.g. `"memory."` for every
    /// memory event or `"decision.outcome_observed."` for one type.
    pub fn subscribe_routing(&self, prefix: impl Into<String>) -> RoutedEventReceiver {
        RoutedEventReceiver {
            receiver: self.sender.subscribe(),
            prefix: prefix.into(),
        }
    }

    /// Get the number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::with_default_capacity()
    }
}

/// Receiver for all appended events
pub struct EventReceiver {
    receiver: broadcast::Receiver<StoredEvent>,
}

impl EventReceiver {
    /// Receive the next event (blocks until one is available)
    pub async fn recv(&mut self) -> Result<StoredEvent, EventBusError> {
        self.receiver.recv().await.map_err(map_recv_error)
    }

    /// Try to receive an event without blocking
    pub fn try_recv(&mut self) -> Result<StoredEvent, EventBusError> {
        self.receiver.try_recv().map_err(|e| match e {
            broadcast::error::TryRecvError::Empty => EventBusError::Empty,
            broadcast::error::TryRecvError::Closed => EventBusError::Closed,
            broadcast::error::TryRecvError::Lagged(n) => {
                warn!("Event receiver lagged by {} events", n);
                EventBusError::Lagged(n)
            }
        })
    }
}

/// Receiver filtered by routing-key prefix
pub struct RoutedEventReceiver {
    receiver: broadcast::Receiver<StoredEvent>,
    prefix: String,
}

impl RoutedEventReceiver {
    /// Receive the next event whose routing key matches the prefix
    pub async fn recv(&mut self) -> Result<StoredEvent, EventBusError> {
        loop {
            let event = self.receiver.recv().await.map_err(map_recv_error)?;
            if event.envelope.routing_key().starts_with(&self.prefix) {
                return Ok(event);
            }
        }
    }
}

fn map_recv_error(e: broadcast::error::RecvError) -> EventBusError {
    match e {
        broadcast::error::RecvError::Closed => EventBusError::Closed,
        broadcast::error::RecvError::Lagged(n) => {
            warn!("Event receiver lagged by {} events", n);
            EventBusError::Lagged(n)
        }
    }
}

/// Errors that can occur when receiving events
#[derive(Debug, thiserror::Error)]
pub enum EventBusError {
    #[error("Event bus is closed")]
    Closed,

    #[error("No events available")]
    Empty,

    #[error("Receiver lagged by {0} events (events were dropped)")]
    Lagged(u64),
}
