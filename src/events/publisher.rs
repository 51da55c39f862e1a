//! # Event Bus
//!
//! The publish side of the coordinator's observability contract. The host
//! platform supplies an [`EventBus`] implementation; [`BroadcastEventBus`]
//! is the in-process default built on a tokio broadcast channel.

use crate::constants::system;
use crate::events::types::Event;
use async_trait::async_trait;
use tokio::sync::broadcast;

/// Publish/subscribe notification channel for coordinator lifecycle events.
///
/// Publish failures never affect coordinator control flow; call sites log
/// and continue.
#[async_trait]
pub trait EventBus: Send + Sync {
    async fn publish(&self, event: Event) -> anyhow::Result<()>;
}

/// In-process event bus over a tokio broadcast channel.
///
/// # Usage
///
/// ```rust
/// use branch_coordinator::events::{BroadcastEventBus, EventBus, Event, EventData, EventSource};
/// use uuid::Uuid;
///
/// # tokio_test::block_on(async {
/// let bus = BroadcastEventBus::default();
/// let mut receiver = bus.subscribe();
///
/// let source = EventSource { component: "branch-coordinator".into(), instance_id: "doc".into() };
/// let data = EventData::ContextUpdated { run_id: Uuid::new_v4(), branch_id: None, keys: vec![] };
/// bus.publish(Event::new(source, data)).await.unwrap();
///
/// let received = receiver.recv().await.unwrap();
/// assert_eq!(received.event_type.as_str(), "CONTEXT_UPDATED");
/// # });
/// ```
#[derive(Debug, Clone)]
pub struct BroadcastEventBus {
    sender: broadcast::Sender<Event>,
}

impl BroadcastEventBus {
    /// Create a new event bus with the specified channel capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Subscribe to events published after this call.
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.sender.subscribe()
    }

    /// Number of active subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for BroadcastEventBus {
    fn default() -> Self {
        Self::new(system::DEFAULT_EVENT_CHANNEL_CAPACITY)
    }
}

#[async_trait]
impl EventBus for BroadcastEventBus {
    async fn publish(&self, event: Event) -> anyhow::Result<()> {
        // send() errors only when no subscriber is attached; publishing
        // without listeners is acceptable.
        let _ = self.sender.send(event);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::types::{EventData, EventSource, EventType};
    use uuid::Uuid;

    fn test_event() -> Event {
        Event::new(
            EventSource {
                component: system::COMPONENT_NAME.into(),
                instance_id: "test".into(),
            },
            EventData::BranchFailed {
                branch_id: Uuid::new_v4(),
                run_id: Uuid::new_v4(),
                reason: system::CANCELLED_REASON.into(),
            },
        )
    }

    #[tokio::test]
    async fn test_publish_without_subscribers_succeeds() {
        let bus = BroadcastEventBus::new(16);
        assert_eq!(bus.subscriber_count(), 0);
        bus.publish(test_event()).await.unwrap();
    }

    #[tokio::test]
    async fn test_subscriber_receives_published_event() {
        let bus = BroadcastEventBus::new(16);
        let mut receiver = bus.subscribe();

        bus.publish(test_event()).await.unwrap();

        let received = receiver.recv().await.unwrap();
        assert_eq!(received.event_type, EventType::BranchFailed);
        assert_eq!(received.source.component, system::COMPONENT_NAME);
    }
}
