//! The subscriber seam.

use async_trait::async_trait;

use crate::events::Event;

/// Hook into runtime events (metrics, auditing, custom sinks).
///
/// Subscribers run on the supervisor's listener task; keep `on_event`
/// fast and non-blocking, or hand the event off to your own worker.
#[async_trait]
pub trait Subscribe: Send + Sync {
    /// Stable subscriber name, for logs.
    fn name(&self) -> &'static str {
        "subscriber"
    }

    /// Called for every published event, in sequence order.
    async fn on_event(&self, event: &Event);
}
