// Broker lifecycle events
// Publish/subscribe over tokio broadcast channels so embedders can observe
// provider and execution state without polling the broker.

use chrono::{DateTime, Utc};
use std::fmt;
use tokio::sync::broadcast;

use crate::broker::schema::{ExecutionId, ExecutionStatus};

/// Maximum capacity for the event broadcast channel
const EVENT_CHANNEL_CAPACITY: usize = 1000;

/// Envelope carrying one broker event and when it happened
#[derive(Debug, Clone)]
pub struct Event {
    pub kind: BrokerEvent,
    pub timestamp: DateTime<Utc>,
}

impl Event {
    pub fn new(kind: BrokerEvent) -> Self {
        Self {
            kind,
            timestamp: Utc::now(),
        }
    }

    /// Provider this event concerns
    pub fn provider(&self) -> &str {
        match &self.kind {
            BrokerEvent::ProviderConnected { provider }
            | BrokerEvent::ProviderDisconnected { provider }
            | BrokerEvent::ProviderError { provider, .. }
            | BrokerEvent::CapabilitiesDiscovered { provider, .. }
            | BrokerEvent::ExecutionStarted { provider, .. }
            | BrokerEvent::ExecutionFinished { provider, .. } => provider,
        }
    }
}

/// Things the broker reports as they happen
#[derive(Debug, Clone, PartialEq)]
pub enum BrokerEvent {
    /// Handshake succeeded
    ProviderConnected { provider: String },

    /// Adapter torn down
    ProviderDisconnected { provider: String },

    /// Connect or discovery failed
    ProviderError { provider: String, message: String },

    /// Catalog replaced for a provider
    CapabilitiesDiscovered { provider: String, count: usize },

    /// Invocation dispatched to its transport
    ExecutionStarted {
        id: ExecutionId,
        provider: String,
        capability: String,
    },

    /// Invocation reached a terminal status
    ExecutionFinished {
        id: ExecutionId,
        provider: String,
        capability: String,
        status: ExecutionStatus,
    },
}

/// Event bus for publishing and subscribing to broker events
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<Event>,
}

impl EventBus {
    /// Create a new event bus with default capacity
    pub fn new() -> Self {
        Self::with_capacity(EVENT_CHANNEL_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.tx.subscribe()
    }

    /// Publish an event to all subscribers
    ///
    /// Returns the number of subscribers reached; `SendFailed` only means
    /// nobody is listening.
    pub fn publish(&self, kind: BrokerEvent) -> Result<usize, EventError> {
        self.tx.send(Event::new(kind)).map_err(|_| EventError::SendFailed)
    }

    /// Publish, ignoring the no-subscriber case
    pub fn emit(&self, kind: BrokerEvent) {
        let _ = self.publish(kind);
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone)]
pub enum EventError {
    SendFailed,
}

impl fmt::Display for EventError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EventError::SendFailed => write!(f, "No subscribers for broker event"),
        }
    }
}

impl std::error::Error for EventError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_publish_without_subscribers() {
        let bus = EventBus::new();
        assert_eq!(bus.subscriber_count(), 0);
        assert!(bus
            .publish(BrokerEvent::ProviderConnected {
                provider: "weather".into()
            })
            .is_err());

        // emit() swallows the no-subscriber case
        bus.emit(BrokerEvent::ProviderDisconnected {
            provider: "weather".into(),
        });
    }

    #[test]
    fn test_multiple_subscribers() {
        let bus = EventBus::new();
        let mut rx1 = bus.subscribe();
        let mut rx2 = bus.clone().subscribe();

        let delivered = bus
            .publish(BrokerEvent::CapabilitiesDiscovered {
                provider: "files".into(),
                count: 3,
            })
            .unwrap();
        assert_eq!(delivered, 2);

        let event = rx1.try_recv().unwrap();
        assert_eq!(event.provider(), "files");
        assert!(matches!(
            event.kind,
            BrokerEvent::CapabilitiesDiscovered { count: 3, .. }
        ));
        assert!(rx2.try_recv().is_ok());
    }
}
