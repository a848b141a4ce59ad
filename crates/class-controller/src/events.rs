//! Typed class events and the per-session event bus.
//!
//! The session actor is the only producer. Subscribers pick a stream by
//! [`EventType`]; each subscriber sees events in the order the actor
//! produced them.

use crate::provider::ProviderKind;
use crate::types::{ConnectionQuality, Participant};
use serde::Serialize;
use tokio::sync::broadcast;
use tracing::warn;

/// Default broadcast capacity per session.
pub const DEFAULT_EVENT_CAPACITY: usize = 1024;

/// Event stream selector for UI subscriptions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventType {
    Participant,
    Video,
    Audio,
    Connection,
    Scaling,
}

/// Where a participant change was observed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeSource {
    /// Vendor event stream.
    Event,
    /// Periodic roster reconciliation (a missed event was recovered).
    Reconciliation,
}

/// Participant roster changes.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum ParticipantEvent {
    Joined {
        participant: Participant,
        source: ChangeSource,
    },
    Left {
        participant_id: String,
        source: ChangeSource,
    },
    Updated {
        participant: Participant,
    },
}

/// Video state changes.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum VideoEvent {
    Changed { participant_id: String, video_on: bool },
}

/// Audio state changes.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum AudioEvent {
    Changed { participant_id: String, audio_on: bool },
    /// `None` when nobody is speaking.
    ActiveSpeakerChanged { participant_id: Option<String> },
}

/// Connection and provider changes.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum ConnectionEvent {
    QualityChanged {
        participant_id: String,
        quality: ConnectionQuality,
    },
    Joined {
        provider: ProviderKind,
    },
    ProviderSwitched {
        from: ProviderKind,
        to: ProviderKind,
    },
    Left,
}

/// Pagination changes.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum ScalingEvent {
    PageChanged {
        page: usize,
        page_count: usize,
        visible: Vec<String>,
    },
}

/// Event delivered to UI subscribers.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum ClassEvent {
    Participant(ParticipantEvent),
    Video(VideoEvent),
    Audio(AudioEvent),
    Connection(ConnectionEvent),
    Scaling(ScalingEvent),
}

impl ClassEvent {
    /// Stream this event belongs to.
    #[must_use]
    pub fn event_type(&self) -> EventType {
        match self {
            ClassEvent::Participant(_) => EventType::Participant,
            ClassEvent::Video(_) => EventType::Video,
            ClassEvent::Audio(_) => EventType::Audio,
            ClassEvent::Connection(_) => EventType::Connection,
            ClassEvent::Scaling(_) => EventType::Scaling,
        }
    }
}

/// Broadcast fan-out of class events.
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<ClassEvent>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_CAPACITY)
    }
}

impl EventBus {
    /// Create a bus with the given per-subscriber buffer.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Publish an event. Having no subscribers is not an error.
    pub fn publish(&self, event: ClassEvent) {
        let _ = self.sender.send(event);
    }

    /// Publish a batch in order.
    pub fn publish_all(&self, events: impl IntoIterator<Item = ClassEvent>) {
        for event in events {
            self.publish(event);
        }
    }

    /// Subscribe to one event stream.
    #[must_use]
    pub fn subscribe(&self, event_type: EventType) -> EventSubscription {
        EventSubscription {
            filter: Some(event_type),
            receiver: self.sender.subscribe(),
        }
    }

    /// Subscribe to every event stream.
    #[must_use]
    pub fn subscribe_all(&self) -> EventSubscription {
        EventSubscription {
            filter: None,
            receiver: self.sender.subscribe(),
        }
    }

    /// Number of live subscriptions.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

/// Receiving side of a subscription.
#[derive(Debug)]
pub struct EventSubscription {
    filter: Option<EventType>,
    receiver: broadcast::Receiver<ClassEvent>,
}

impl EventSubscription {
    /// Next matching event, or `None` once the session is gone.
    ///
    /// A subscriber that falls behind skips the overwritten events and keeps
    /// going. Skipped events are not re-sent; reconciliation only corrects
    /// the participant map, so a lagged subscriber should re-read
    /// `participants()` to resync.
    pub async fn recv(&mut self) -> Option<ClassEvent> {
        loop {
            match self.receiver.recv().await {
                Ok(event) if self.matches(&event) => return Some(event),
                Ok(_) => {}
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(target: "cc.events", skipped, "Event subscriber lagged");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Next matching event if one is already buffered.
    pub fn try_recv(&mut self) -> Option<ClassEvent> {
        loop {
            match self.receiver.try_recv() {
                Ok(event) if self.matches(&event) => return Some(event),
                Ok(_) => {}
                Err(broadcast::error::TryRecvError::Lagged(skipped)) => {
                    warn!(target: "cc.events", skipped, "Event subscriber lagged");
                }
                Err(_) => return None,
            }
        }
    }

    /// Drain every buffered matching event.
    pub fn drain(&mut self) -> Vec<ClassEvent> {
        std::iter::from_fn(|| self.try_recv()).collect()
    }

    fn matches(&self, event: &ClassEvent) -> bool {
        self.filter.map_or(true, |filter| event.event_type() == filter)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::types::ParticipantRole;

    fn joined(id: &str) -> ClassEvent {
        ClassEvent::Participant(ParticipantEvent::Joined {
            participant: Participant::new(id, id, ParticipantRole::Student),
            source: ChangeSource::Event,
        })
    }

    fn video(id: &str, on: bool) -> ClassEvent {
        ClassEvent::Video(VideoEvent::Changed {
            participant_id: id.to_string(),
            video_on: on,
        })
    }

    #[tokio::test]
    async fn test_subscription_filters_by_type() {
        let bus = EventBus::default();
        let mut participants = bus.subscribe(EventType::Participant);
        let mut videos = bus.subscribe(EventType::Video);

        bus.publish(joined("a"));
        bus.publish(video("a", true));
        bus.publish(joined("b"));

        assert_eq!(participants.recv().await, Some(joined("a")));
        assert_eq!(participants.recv().await, Some(joined("b")));
        assert_eq!(videos.recv().await, Some(video("a", true)));
        assert!(videos.try_recv().is_none());
    }

    #[tokio::test]
    async fn test_subscribe_all_preserves_order() {
        let bus = EventBus::default();
        let mut all = bus.subscribe_all();

        bus.publish_all(vec![joined("a"), video("a", true), video("a", false)]);

        assert_eq!(all.drain(), vec![joined("a"), video("a", true), video("a", false)]);
    }

    #[tokio::test]
    async fn test_recv_returns_none_when_bus_dropped() {
        let bus = EventBus::default();
        let mut sub = bus.subscribe(EventType::Scaling);
        drop(bus);
        assert!(sub.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_lagged_subscriber_keeps_receiving() {
        let bus = EventBus::new(2);
        let mut sub = bus.subscribe(EventType::Participant);

        bus.publish(joined("a"));
        bus.publish(joined("b"));
        bus.publish(joined("c"));

        // "a" was overwritten and is gone for good.
        assert_eq!(sub.recv().await, Some(joined("b")));
        assert_eq!(sub.recv().await, Some(joined("c")));
        assert!(sub.try_recv().is_none());
    }

    #[test]
    fn test_publish_without_subscribers_is_ok() {
        let bus = EventBus::default();
        assert_eq!(bus.subscriber_count(), 0);
        bus.publish(joined("a"));
    }
}
