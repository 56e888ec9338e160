#![forbid(unsafe_code)]

use tokio::sync::broadcast;

use crate::Event;

/// Broadcast bus for playback events.
///
/// Every component holds a cloned `EventBus` and publishes directly;
/// subscribers see all events. `publish()` is sync and never blocks; with
/// no subscribers events are dropped. Slow subscribers observe
/// `RecvError::Lagged` instead of back-pressuring producers.
#[derive(Clone, Debug)]
pub struct EventBus {
    tx: broadcast::Sender<Event>,
}

impl EventBus {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Publish an event; sub-enum values convert implicitly, so
    /// `bus.publish(StreamEvent::EndOfStream)` works.
    pub fn publish<E: Into<Event>>(&self, event: E) {
        let _ = self.tx.send(event.into());
    }

    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.tx.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(64)
    }
}

#[cfg(test)]
mod tests {
    use skene_core::MediaType;

    use super::*;
    use crate::{BufferEvent, StreamEvent};

    #[test]
    fn publish_without_subscribers_is_silent() {
        let bus = EventBus::new(8);
        bus.publish(StreamEvent::EndOfStream);
    }

    #[tokio::test]
    async fn subscribers_receive_published_events() {
        let bus = EventBus::new(8);
        let mut rx = bus.subscribe();
        bus.publish(BufferEvent::FullBuffer {
            media_type: MediaType::Audio,
        });
        assert!(matches!(
            rx.recv().await.unwrap(),
            Event::Buffer(BufferEvent::FullBuffer {
                media_type: MediaType::Audio
            })
        ));
    }

    #[tokio::test]
    async fn lagged_subscriber_sees_lag() {
        let bus = EventBus::new(2);
        let mut rx = bus.subscribe();
        for _ in 0..8 {
            bus.publish(StreamEvent::EndOfStream);
        }
        assert!(matches!(
            rx.recv().await,
            Err(broadcast::error::RecvError::Lagged(_))
        ));
    }
}
