//! Broadcast bus for runtime events.
//!
//! Thin wrapper around [`tokio::sync::broadcast`]. Publishing never
//! blocks; slow receivers observe `RecvError::Lagged(n)` and skip the
//! `n` oldest items. Events are fire-and-forget — if nobody listens at
//! send time, the event is dropped.

use tokio::sync::broadcast;

use super::event::Event;

/// Broadcast channel for runtime events.
///
/// Cheap to clone; multiple publishers can publish concurrently and every
/// subscriber receives its own clone of each event.
#[derive(Clone, Debug)]
pub struct Bus {
    tx: broadcast::Sender<Event>,
}

impl Bus {
    /// Creates a bus with the given ring-buffer capacity (min 1).
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Publishes an event to all active subscribers; never blocks.
    pub fn publish(&self, event: Event) {
        let _ = self.tx.send(event);
    }

    /// Creates an independent receiver observing subsequent events.
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.tx.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventKind;

    #[tokio::test]
    async fn subscribers_see_published_events() {
        let bus = Bus::new(8);
        let mut rx = bus.subscribe();
        bus.publish(Event::now(EventKind::FaultInjected).with_instance("a/b"));

        let ev = rx.recv().await.unwrap();
        assert_eq!(ev.kind, EventKind::FaultInjected);
        assert_eq!(ev.instance.as_deref(), Some("a/b"));
    }

    #[tokio::test]
    async fn publish_without_subscribers_is_fine() {
        let bus = Bus::new(8);
        bus.publish(Event::now(EventKind::ShutdownRequested));
    }
}
