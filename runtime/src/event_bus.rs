//! In-process [`EventBus`] backed by one tokio broadcast channel per topic.
//!
//! Topics are created lazily on first publish or subscribe. Publishing to a topic
//! nobody listens to succeeds and the notification is dropped. A subscriber that
//! falls more than `capacity` notifications behind receives
//! [`EventBusError::Lagged`] and keeps going from the oldest retained notification.

use futures::stream::{self, StreamExt};
use rollcall_core::event::SerializedEvent;
use rollcall_core::event_bus::{EventBus, EventBusError, EventStream};
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, PoisonError, RwLock};
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;

/// Topic-based in-memory bus.
#[derive(Clone)]
pub struct InMemoryEventBus {
    topics: Arc<RwLock<HashMap<String, broadcast::Sender<SerializedEvent>>>>,
    capacity: usize,
}

impl InMemoryEventBus {
    /// Create a bus whose topics each buffer 256 notifications
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(256)
    }

    /// Create a bus with a custom per-topic buffer
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            topics: Arc::new(RwLock::new(HashMap::new())),
            capacity: capacity.max(1),
        }
    }

    /// Number of live subscriptions on a topic
    #[must_use]
    pub fn subscriber_count(&self, topic: &str) -> usize {
        self.topics
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(topic)
            .map_or(0, broadcast::Sender::receiver_count)
    }

    fn sender(&self, topic: &str) -> broadcast::Sender<SerializedEvent> {
        if let Some(sender) = self
            .topics
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(topic)
        {
            return sender.clone();
        }

        self.topics
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(topic.to_string())
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .clone()
    }
}

impl Default for InMemoryEventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for InMemoryEventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let topics = self.topics.read().map_or(0, |t| t.len());
        f.debug_struct("InMemoryEventBus")
            .field("topics", &topics)
            .field("capacity", &self.capacity)
            .finish()
    }
}

fn validate_topic(topic: &str) -> Result<(), EventBusError> {
    if topic.trim().is_empty() {
        return Err(EventBusError::InvalidTopic(topic.to_string()));
    }
    Ok(())
}

fn topic_stream(
    mut rx: broadcast::Receiver<SerializedEvent>,
) -> impl futures::Stream<Item = Result<SerializedEvent, EventBusError>> + Send {
    async_stream::stream! {
        loop {
            match rx.recv().await {
                Ok(event) => yield Ok(event),
                Err(RecvError::Lagged(skipped)) => {
                    metrics::counter!("event_bus.lagged").increment(skipped);
                    yield Err(EventBusError::Lagged(skipped));
                },
                Err(RecvError::Closed) => break,
            }
        }
    }
}

impl EventBus for InMemoryEventBus {
    fn publish(
        &self,
        topic: &str,
        event: &SerializedEvent,
    ) -> Pin<Box<dyn Future<Output = Result<(), EventBusError>> + Send + '_>> {
        let result = validate_topic(topic).map(|()| {
            // Err only means there are no subscribers right now
            let delivered = self.sender(topic).send(event.clone()).unwrap_or(0);
            metrics::counter!("event_bus.published").increment(1);
            tracing::trace!(topic, event_type = %event.event_type, delivered, "Notification published");
        });
        Box::pin(async move { result })
    }

    fn subscribe(
        &self,
        topics: &[&str],
    ) -> Pin<Box<dyn Future<Output = Result<EventStream, EventBusError>> + Send + '_>> {
        let result = if topics.is_empty() {
            Err(EventBusError::SubscriptionFailed {
                topics: Vec::new(),
                reason: "no topics given".to_string(),
            })
        } else {
            topics
                .iter()
                .try_for_each(|topic| validate_topic(topic))
                .map(|()| {
                    let streams = topics
                        .iter()
                        .map(|topic| topic_stream(self.sender(topic).subscribe()).boxed());
                    tracing::debug!(?topics, "Subscribed to topics");
                    stream::select_all(streams).boxed()
                })
        };
        Box::pin(async move { result })
    }
}
