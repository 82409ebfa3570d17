//! Reconcilers and the work queue.
//!
//! ## Contents
//! - [`WorkQueue`] — per-key exclusive reconcile queue
//! - [`LifecycleReconciler`] — one-shot inject→hold→recover path
//! - [`ScheduledReconciler`] — recurring two-phase path
//! - [`Dispatcher`] — routes an instance to the right reconciler
//!
//! ## Path selection
//! ```text
//! (scheduler, duration)
//!   (Some, Some) ──► ScheduledReconciler
//!   (Some, None) ──► invariant violation: log, take no action
//!   (None, _)    ──► LifecycleReconciler (duration optional)
//! ```

pub(crate) mod lifecycle;
mod queue;
mod schedule;

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use crate::error::{ReconcileError, StoreError};
use crate::fault::InstanceKey;
use crate::store::InstanceStore;

pub use lifecycle::LifecycleReconciler;
pub use queue::WorkQueue;
pub use schedule::ScheduledReconciler;

/// What the worker should do with the key after a reconcile.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Nothing further until an external change enqueues the key again.
    Done,
    /// Reconcile again immediately.
    Requeue,
    /// Reconcile again after the delay.
    RequeueAfter(Duration),
}

/// Loads an instance and routes it to the right reconciler.
pub struct Dispatcher {
    store: Arc<dyn InstanceStore>,
    lifecycle: Arc<LifecycleReconciler>,
    scheduled: Arc<ScheduledReconciler>,
}

impl Dispatcher {
    pub fn new(
        store: Arc<dyn InstanceStore>,
        lifecycle: Arc<LifecycleReconciler>,
        scheduled: Arc<ScheduledReconciler>,
    ) -> Self {
        Self {
            store,
            lifecycle,
            scheduled,
        }
    }

    /// One reconcile for the key.
    pub async fn reconcile(
        &self,
        key: &InstanceKey,
        now: DateTime<Utc>,
    ) -> Result<Outcome, ReconcileError> {
        let instance = match self.store.get(key).await {
            Ok(instance) => instance,
            Err(StoreError::NotFound { .. }) => {
                debug!(instance = %key, "instance gone, nothing to reconcile");
                return Ok(Outcome::Done);
            }
            Err(err) => return Err(err.into()),
        };

        match (&instance.scheduler, &instance.duration) {
            (Some(_), Some(_)) => self.scheduled.reconcile(instance, now).await,
            (Some(_), None) => {
                warn!(
                    instance = %key,
                    "scheduler set without duration; taking no action"
                );
                Ok(Outcome::Done)
            }
            (None, _) => self.lifecycle.reconcile(instance, now).await,
        }
    }
}
