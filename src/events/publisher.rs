use chrono::{DateTime, Utc};
use serde_json::Value;
use tokio::sync::broadcast;

/// High-throughput broadcast publisher for lifecycle events.
///
/// Publishing never blocks and never fails: events published with no
/// subscribers are dropped, which is the intended behavior for optional
/// observers.
#[derive(Debug, Clone)]
pub struct EventPublisher {
    sender: broadcast::Sender<PublishedEvent>,
}

/// Event that has been published
#[derive(Debug, Clone)]
pub struct PublishedEvent {
    pub name: String,
    pub context: Value,
    pub published_at: DateTime<Utc>,
}

impl EventPublisher {
    /// Create a new event publisher with the specified channel capacity
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish an event with the given name and context.
    pub fn publish(&self, event_name: impl Into<String>, context: Value) {
        let event = PublishedEvent {
            name: event_name.into(),
            context,
            published_at: Utc::now(),
        };
        // A send error only means there are no subscribers right now.
        let _ = self.sender.send(event);
    }

    /// Subscribe to all subsequently published events.
    pub fn subscribe(&self) -> broadcast::Receiver<PublishedEvent> {
        self.sender.subscribe()
    }

    /// Number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventPublisher {
    fn default() -> Self {
        Self::new(1024)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_subscriber_receives_published_event() {
        let publisher = EventPublisher::new(16);
        let mut receiver = publisher.subscribe();

        publisher.publish("case.state.changed", json!({"case_id": "abc"}));

        let event = receiver.recv().await.unwrap();
        assert_eq!(event.name, "case.state.changed");
        assert_eq!(event.context["case_id"], "abc");
    }

    #[test]
    fn test_publish_without_subscribers_is_dropped() {
        let publisher = EventPublisher::new(16);
        publisher.publish("ignored", json!({}));
        assert_eq!(publisher.subscriber_count(), 0);
    }
}
