//! Built-in subscriber that mirrors events into `tracing`.

use async_trait::async_trait;
use tracing::{info, warn};

use crate::events::{Event, EventKind};
use crate::subscribers::Subscribe;

/// Logs every runtime event through `tracing`.
#[derive(Default)]
pub struct LogWriter;

impl LogWriter {
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Subscribe for LogWriter {
    fn name(&self) -> &'static str {
        "log-writer"
    }

    async fn on_event(&self, e: &Event) {
        let instance = e.instance.as_deref().unwrap_or("-");
        match e.kind {
            EventKind::FinalizerInited => {
                info!(instance, target = e.target.as_deref(), "finalizer recorded");
            }
            EventKind::FinalizerRemoved => {
                info!(instance, target = e.target.as_deref(), "finalizer cleared");
            }
            EventKind::FaultInjected => info!(instance, "fault injected"),
            EventKind::FaultRecovered => info!(instance, "fault recovered"),
            EventKind::FaultPaused => info!(instance, "fault paused"),
            EventKind::FaultResumed => info!(instance, "fault resumed"),
            EventKind::ApplyFailed => {
                warn!(instance, error = e.error.as_deref(), "apply failed");
            }
            EventKind::RecoverFailed => {
                warn!(instance, error = e.error.as_deref(), "recovery incomplete");
            }
            EventKind::ReconcileRequeued => {
                info!(
                    instance,
                    delay = ?e.delay,
                    attempt = e.attempt,
                    "reconcile requeued"
                );
            }
            EventKind::ShutdownRequested => info!("shutdown requested"),
            EventKind::AllStoppedWithin => info!("all workers stopped within grace"),
            EventKind::GraceExceeded => warn!("shutdown grace exceeded"),
        }
    }
}
