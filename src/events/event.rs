//! Runtime events emitted by the reconcilers and the recovery protocol.
//!
//! Every event carries a globally unique, monotonically increasing
//! sequence number (`seq`); use it to restore ordering when events are
//! observed out of order.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

/// Global sequence counter for event ordering.
static EVENT_SEQ: AtomicU64 = AtomicU64::new(0);

/// Classification of runtime events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    // === Recovery protocol ===
    /// A pending-recovery work item was recorded for a target.
    ///
    /// Sets: `instance`, `target`.
    FinalizerInited,

    /// A pending-recovery work item was cleared (recovered or gone).
    ///
    /// Sets: `instance`, `target`.
    FinalizerRemoved,

    /// Every finalizer drained; the instance is fully recovered.
    ///
    /// Sets: `instance`.
    FaultRecovered,

    /// A recovery pass left failures behind; it will be retried.
    ///
    /// Sets: `instance`, `error`.
    RecoverFailed,

    // === Injection ===
    /// Every selected target acknowledged injection.
    ///
    /// Sets: `instance`.
    FaultInjected,

    /// The apply fan-out failed; outstanding siblings were cancelled.
    ///
    /// Sets: `instance`, `error`, optionally `target`.
    ApplyFailed,

    // === Pause overlay ===
    /// The pause annotation took effect; injected state was recovered.
    ///
    /// Sets: `instance`.
    FaultPaused,

    /// The pause annotation was lifted; injection will be re-applied.
    ///
    /// Sets: `instance`.
    FaultResumed,

    // === Runtime ===
    /// A failed reconcile was requeued with backoff.
    ///
    /// Sets: `instance`, `delay`, `attempt`, `error`.
    ReconcileRequeued,

    /// Shutdown requested (OS signal observed).
    ShutdownRequested,

    /// All workers stopped within the grace period.
    AllStoppedWithin,

    /// Grace period exceeded; some reconciles were still in flight.
    GraceExceeded,
}

/// Runtime event with optional metadata.
#[derive(Clone, Debug)]
pub struct Event {
    /// Globally unique, monotonically increasing sequence number.
    pub seq: u64,
    /// Wall-clock timestamp.
    pub at: SystemTime,
    /// Event classification.
    pub kind: EventKind,

    /// Instance key (`namespace/name`), if applicable.
    pub instance: Option<Arc<str>>,
    /// Target key (`namespace/name`), if applicable.
    pub target: Option<Arc<str>>,
    /// Human-readable error, if applicable.
    pub error: Option<Arc<str>>,
    /// Requeue delay, if applicable.
    pub delay: Option<Duration>,
    /// Requeue attempt counter, if applicable.
    pub attempt: Option<u32>,
}

impl Event {
    /// Creates a new event with the current timestamp and next sequence.
    pub fn now(kind: EventKind) -> Self {
        Self {
            seq: EVENT_SEQ.fetch_add(1, Ordering::Relaxed),
            at: SystemTime::now(),
            kind,
            instance: None,
            target: None,
            error: None,
            delay: None,
            attempt: None,
        }
    }

    /// Attaches the instance key.
    #[inline]
    pub fn with_instance(mut self, key: impl Into<Arc<str>>) -> Self {
        self.instance = Some(key.into());
        self
    }

    /// Attaches the target key.
    #[inline]
    pub fn with_target(mut self, key: impl Into<Arc<str>>) -> Self {
        self.target = Some(key.into());
        self
    }

    /// Attaches a human-readable error.
    #[inline]
    pub fn with_error(mut self, error: impl Into<Arc<str>>) -> Self {
        self.error = Some(error.into());
        self
    }

    /// Attaches a requeue delay.
    #[inline]
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Attaches a requeue attempt counter.
    #[inline]
    pub fn with_attempt(mut self, attempt: u32) -> Self {
        self.attempt = Some(attempt);
        self
    }
}
