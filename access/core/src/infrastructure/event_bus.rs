// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

// Event Bus Implementation - Pub/Sub for Access-Control Events
//
// Provides in-memory event streaming using tokio broadcast channels.
// Observers (CLI logging, tests) subscribe; publishers never wait on them.
//
// In-memory only: events are lost on restart.

use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, warn};

use crate::domain::events::AccessControlEvent;

/// Event bus for publishing and subscribing to access-control events
#[derive(Clone)]
pub struct EventBus {
    sender: Arc<broadcast::Sender<AccessControlEvent>>,
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

    /// Create event bus with default capacity (1000)
    pub fn with_default_capacity() -> Self {
        Self::new(1000)
    }

    /// Publish an event to all subscribers
    pub fn publish(&self, event: AccessControlEvent) {
        debug!("Publishing event: {:?}", event);

        let receiver_count = self.sender.send(event).unwrap_or(0);
        if receiver_count == 0 {
            debug!("No subscribers listening to event");
        }
    }

    /// Subscribe to all events
    pub fn subscribe(&self) -> EventReceiver {
        EventReceiver {
            receiver: self.sender.subscribe(),
            subject: None,
        }
    }

    /// Subscribe to events about one resource, stream or domain
    pub fn subscribe_subject(&self, subject: impl Into<String>) -> EventReceiver {
        EventReceiver {
            receiver: self.sender.subscribe(),
            subject: Some(subject.into()),
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

/// Receiver for access-control events, optionally filtered by subject
pub struct EventReceiver {
    receiver: broadcast::Receiver<AccessControlEvent>,
    subject: Option<String>,
}

impl EventReceiver {
    /// Receive the next matching event
    pub async fn recv(&mut self) -> Result<AccessControlEvent, EventBusError> {
        loop {
            let event = self.receiver.recv().await.map_err(|e| match e {
                broadcast::error::RecvError::Closed => EventBusError::Closed,
                broadcast::error::RecvError::Lagged(n) => {
                    warn!("Event receiver lagged by {} events", n);
                    EventBusError::Lagged(n)
                }
            })?;
            if self.matches(&event) {
                return Ok(event);
            }
        }
    }

    /// Try to receive a matching event without blocking
    pub fn try_recv(&mut self) -> Result<AccessControlEvent, EventBusError> {
        loop {
            let event = self.receiver.try_recv().map_err(|e| match e {
                broadcast::error::TryRecvError::Empty => EventBusError::Empty,
                broadcast::error::TryRecvError::Closed => EventBusError::Closed,
                broadcast::error::TryRecvError::Lagged(n) => {
                    warn!("Event receiver lagged by {} events", n);
                    EventBusError::Lagged(n)
                }
            })?;
            if self.matches(&event) {
                return Ok(event);
            }
        }
    }

    fn matches(&self, event: &AccessControlEvent) -> bool {
        self.subject
            .as_deref()
            .map_or(true, |subject| event.subject() == subject)
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

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn added(resource: &str) -> AccessControlEvent {
        AccessControlEvent::AuthorizationAdded {
            resource_uri: resource.to_string(),
            rule_id: "http://example.org/rule".to_string(),
            added_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_event_bus_publish_subscribe() {
        let event_bus = EventBus::new(10);
        let mut receiver = event_bus.subscribe();

        event_bus.publish(added("http://example.org/door"));

        let received = receiver.recv().await.unwrap();
        assert_eq!(received.subject(), "http://example.org/door");
    }

    #[tokio::test]
    async fn test_subject_filter() {
        let event_bus = EventBus::new(10);
        let mut receiver = event_bus.subscribe_subject("http://example.org/window");

        event_bus.publish(added("http://example.org/door"));
        event_bus.publish(added("http://example.org/window"));

        let received = receiver.recv().await.unwrap();
        assert_eq!(received.subject(), "http://example.org/window");
        assert!(matches!(receiver.try_recv(), Err(EventBusError::Empty)));
    }

    #[test]
    fn test_publish_without_subscribers() {
        let event_bus = EventBus::default();
        event_bus.publish(added("http://example.org/door"));
        assert_eq!(event_bus.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn test_lagged_receiver() {
        let event_bus = EventBus::new(2);
        let mut receiver = event_bus.subscribe();
        for _ in 0..5 {
            event_bus.publish(added("http://example.org/door"));
        }
        assert!(matches!(receiver.try_recv(), Err(EventBusError::Lagged(_))));
    }
}
