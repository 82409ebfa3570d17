//! Event fan-out to user subscribers.
//!
//! The supervisor subscribes to the [`Bus`](crate::events::Bus) once and
//! forwards each event to every registered [`Subscribe`] in order. A slow
//! subscriber delays its peers but never the publishers — publishing is
//! non-blocking by construction.

mod log;
mod subscribe;

use std::sync::Arc;

use crate::events::Event;

pub use log::LogWriter;
pub use subscribe::Subscribe;

/// Immutable set of subscribers sharing one delivery order.
#[derive(Default)]
pub struct SubscriberSet {
    subscribers: Vec<Arc<dyn Subscribe>>,
}

impl SubscriberSet {
    pub fn new(subscribers: Vec<Arc<dyn Subscribe>>) -> Self {
        Self { subscribers }
    }

    pub fn is_empty(&self) -> bool {
        self.subscribers.is_empty()
    }

    /// Delivers one event to every subscriber, in registration order.
    pub async fn emit(&self, event: &Event) {
        for sub in &self.subscribers {
            sub.on_event(event).await;
        }
    }
}
