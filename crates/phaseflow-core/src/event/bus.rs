//! Broadcast event bus for distributing `RunEvent` to multiple subscribers.
//!
//! Built on `tokio::sync::broadcast`. Publishing with no active subscribers
//! is a no-op, so the engine publishes unconditionally after every append.

use phaseflow_types::event::RunEvent;
use tokio::sync::broadcast;

/// Multi-consumer bus for appended run events.
///
/// Cloning the bus clones the sender, so the engine and any number of
/// observers share one channel.
pub struct EventBus {
    sender: broadcast::Sender<RunEvent>,
}

impl EventBus {
    /// Create a new event bus with the given channel capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Create a new subscriber that will receive all future events.
    pub fn subscribe(&self) -> broadcast::Receiver<RunEvent> {
        self.sender.subscribe()
    }

    /// Publish an event to all current subscribers.
    ///
    /// If there are no subscribers, the event is silently dropped.
    pub fn publish(&self, event: RunEvent) {
        let _ = self.sender.send(event);
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}

impl Clone for EventBus {
    fn clone(&self) -> Self {
        Self {
            sender: self.sender.clone(),
        }
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("receiver_count", &self.sender.receiver_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use phaseflow_types::event::{EventKind, NewRunEvent};
    use uuid::Uuid;

    fn sample_event(seq: u64) -> RunEvent {
        NewRunEvent::new(Uuid::now_v7(), EventKind::StepStart)
            .phase("build")
            .step("implement")
            .sequenced(seq)
    }

    #[tokio::test]
    async fn multiple_subscribers_each_receive_event() {
        let bus = EventBus::new(16);
        let mut rx1 = bus.subscribe();
        let mut rx2 = bus.subscribe();

        bus.publish(sample_event(1));

        assert_eq!(rx1.recv().await.unwrap().seq, 1);
        assert_eq!(rx2.recv().await.unwrap().kind, EventKind::StepStart);
    }

    #[test]
    fn publish_with_no_subscribers_does_not_panic() {
        let bus = EventBus::default();
        bus.publish(sample_event(1));
        bus.publish(sample_event(2));
    }

    #[test]
    fn clone_shares_channel() {
        let bus = EventBus::new(16);
        let bus2 = bus.clone();
        let mut rx = bus.subscribe();

        bus2.publish(sample_event(3));

        assert_eq!(rx.try_recv().map(|e| e.seq).ok(), Some(3));
        assert!(format!("{bus:?}").contains("receiver_count"));
    }
}
