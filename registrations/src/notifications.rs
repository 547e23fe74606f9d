//! Notifications about capacity and waitlist changes.
//!
//! Each notice goes to its event's topic (`event-{id}`) and, when it concerns one
//! person, to that user's topic (`user-{id}`) too.

use crate::types::{EventId, RegistrationId, UserId};
use chrono::{DateTime, Utc};
use rollcall_core::event::{Notification, SerializedEvent};
use rollcall_core::event_bus::EventBus;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Topic carrying every notice for one event
#[must_use]
pub fn event_topic(event_id: EventId) -> String {
    format!("event-{event_id}")
}

/// Topic carrying every notice for one user
#[must_use]
pub fn user_topic(user_id: UserId) -> String {
    format!("user-{user_id}")
}

/// Something subscribers may want to react to.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Notice {
    /// A slot went back to the pool
    CapacityFreed {
        /// Event
        event_id: EventId,
        /// Spots left after promotion ran
        spots_left: u32,
    },
    /// A waitlisted user now holds a slot until `payment_deadline`
    WaitlistPromoted {
        /// Event
        event_id: EventId,
        /// Promoted user
        user_id: UserId,
        /// Pay by
        payment_deadline: DateTime<Utc>,
    },
    /// A promoted user missed the payment deadline
    WaitlistExpired {
        /// Event
        event_id: EventId,
        /// User who lost the slot
        user_id: UserId,
    },
    /// A registration was confirmed
    RegistrationConfirmed {
        /// Event
        event_id: EventId,
        /// Registrant
        user_id: UserId,
        /// Registration
        registration_id: RegistrationId,
    },
    /// A registration was cancelled
    RegistrationCancelled {
        /// Event
        event_id: EventId,
        /// Former registrant
        user_id: UserId,
        /// Registration
        registration_id: RegistrationId,
    },
}

impl Notice {
    /// Event the notice is about
    #[must_use]
    pub const fn event_id(&self) -> EventId {
        match self {
            Self::CapacityFreed { event_id, .. }
            | Self::WaitlistPromoted { event_id, .. }
            | Self::WaitlistExpired { event_id, .. }
            | Self::RegistrationConfirmed { event_id, .. }
            | Self::RegistrationCancelled { event_id, .. } => *event_id,
        }
    }

    /// User the notice is about, if any
    #[must_use]
    pub const fn user_id(&self) -> Option<UserId> {
        match self {
            Self::CapacityFreed { .. } => None,
            Self::WaitlistPromoted { user_id, .. }
            | Self::WaitlistExpired { user_id, .. }
            | Self::RegistrationConfirmed { user_id, .. }
            | Self::RegistrationCancelled { user_id, .. } => Some(*user_id),
        }
    }

    /// Topics this notice is published to
    #[must_use]
    pub fn topics(&self) -> Vec<String> {
        let mut topics = vec![event_topic(self.event_id())];
        topics.extend(self.user_id().map(user_topic));
        topics
    }
}

impl Notification for Notice {
    fn notification_type(&self) -> &'static str {
        match self {
            Self::CapacityFreed { .. } => "CapacityFreed.v1",
            Self::WaitlistPromoted { .. } => "WaitlistPromoted.v1",
            Self::WaitlistExpired { .. } => "WaitlistExpired.v1",
            Self::RegistrationConfirmed { .. } => "RegistrationConfirmed.v1",
            Self::RegistrationCancelled { .. } => "RegistrationCancelled.v1",
        }
    }
}

/// Publishes notices to the bus.
///
/// Publishing is best effort: a failure is logged and never rolls back the state
/// change that produced the notice.
#[derive(Clone)]
pub struct Notifier {
    bus: Arc<dyn EventBus>,
}

impl Notifier {
    /// Notifier on top of a bus
    #[must_use]
    pub fn new(bus: Arc<dyn EventBus>) -> Self {
        Self { bus }
    }

    /// Publish notices in order
    pub async fn publish(&self, notices: Vec<Notice>) {
        for notice in notices {
            let metadata = serde_json::json!({
                "event_id": notice.event_id(),
                "user_id": notice.user_id(),
            });
            let event = match SerializedEvent::from_notification(&notice, Some(metadata)) {
                Ok(event) => event,
                Err(error) => {
                    tracing::error!(%error, ?notice, "Could not encode notification");
                    continue;
                },
            };
            for topic in notice.topics() {
                if let Err(error) = self.bus.publish(&topic, &event).await {
                    tracing::warn!(%error, %topic, event_type = %event.event_type, "Notification not published");
                }
            }
        }
    }
}

impl std::fmt::Debug for Notifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Notifier").finish_non_exhaustive()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use futures::StreamExt;
    use rollcall_runtime::InMemoryEventBus;

    #[tokio::test]
    async fn promotion_reaches_event_and_user_topics() {
        let bus = Arc::new(InMemoryEventBus::new());
        let (event_id, user_id) = (EventId::new(), UserId::new());
        let event_topic = event_topic(event_id);
        let user_topic = user_topic(user_id);
        let mut by_event = bus.subscribe(&[event_topic.as_str()]).await.unwrap();
        let mut by_user = bus.subscribe(&[user_topic.as_str()]).await.unwrap();

        let notice = Notice::WaitlistPromoted {
            event_id,
            user_id,
            payment_deadline: Utc::now(),
        };
        Notifier::new(bus.clone()).publish(vec![notice.clone()]).await;

        let received = by_event.next().await.unwrap().unwrap();
        assert_eq!(received.event_type, "WaitlistPromoted.v1");
        assert_eq!(received.decode::<Notice>().unwrap(), notice);
        assert_eq!(by_user.next().await.unwrap().unwrap().event_type, "WaitlistPromoted.v1");
    }

    #[test]
    fn capacity_notices_have_no_user_topic() {
        let notice = Notice::CapacityFreed {
            event_id: EventId::new(),
            spots_left: 1,
        };
        assert_eq!(notice.topics().len(), 1);
        assert!(notice.topics()[0].starts_with("event-"));
    }
}
