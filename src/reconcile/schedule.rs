//! # Scheduled (two-phase) reconciler.
//!
//! Drives recurring inject→hold→recover cycles for instances that carry
//! both a scheduler and a duration, using the same apply and recovery
//! contracts as the one-shot path:
//!
//! ```text
//! reconcile(instance, now)
//!   ├─ both fields present?  ── no ──► log the inconsistency, do nothing
//!   ├─ deleted? ──► recover, Finished
//!   ├─ paused?  ──► recover current cycle, Paused
//!   ├─ next_recover due ──► recover, Waiting
//!   ├─ next_start   due ──► apply, Running,
//!   │                       next_recover = now + duration
//!   │                       next_start   = schedule.next(now)
//!   └─ requeue at min(next_start, next_recover)
//! ```
//!
//! ## Rules
//! - An instance with exactly one of scheduler/duration set is an
//!   admission bug; the reconciler logs it and takes no action rather
//!   than failing destructively.
//! - Recovery failures keep `next_recover` in the past, so the cycle is
//!   retried with backoff until the targets are clean.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use crate::error::ReconcileError;
use crate::events::{Bus, Event, EventKind};
use crate::fault::{FaultInstance, Phase, SchedulerSpec};
use crate::recover::RecoveryCoordinator;
use crate::reconcile::lifecycle::LifecycleReconciler;
use crate::reconcile::Outcome;
use crate::store::InstanceStore;

/// Reconciles recurring fault instances.
pub struct ScheduledReconciler {
    store: Arc<dyn InstanceStore>,
    recovery: Arc<RecoveryCoordinator>,
    lifecycle: Arc<LifecycleReconciler>,
    bus: Bus,
}

impl ScheduledReconciler {
    pub fn new(
        store: Arc<dyn InstanceStore>,
        recovery: Arc<RecoveryCoordinator>,
        lifecycle: Arc<LifecycleReconciler>,
        bus: Bus,
    ) -> Self {
        Self {
            store,
            recovery,
            lifecycle,
            bus,
        }
    }

    /// One reconcile of a loaded instance.
    pub async fn reconcile(
        &self,
        mut instance: FaultInstance,
        now: DateTime<Utc>,
    ) -> Result<Outcome, ReconcileError> {
        let key = instance.key();

        let (Some(scheduler), Some(_)) = (instance.scheduler.clone(), instance.duration.clone())
        else {
            warn!(
                instance = %key,
                "scheduler and duration must be set together; taking no action"
            );
            return Ok(Outcome::Done);
        };

        if instance.is_deleted() {
            debug!(instance = %key, "deleted, recovering");
            if let Err(err) = self.recovery.recover(&mut instance).await {
                return self.fail(&mut instance, err.into()).await;
            }
            instance.status.phase = Phase::Finished;
            instance.status.conditions.all_injected = false;
            instance.status.failed_message = None;
            self.lifecycle.persist(&mut instance).await?;
            return Ok(Outcome::Done);
        }

        if instance.is_paused() {
            return self.pause(&mut instance, now).await;
        }

        if instance.status.conditions.paused {
            info!(instance = %key, "resuming, next cycle starts now");
            instance.status.conditions.paused = false;
            instance.status.schedule.next_start = Some(now);
            self.bus
                .publish(Event::now(EventKind::FaultResumed).with_instance(key.to_string()));
        }

        // Recover the current cycle once its window closes.
        if let Some(next_recover) = instance.status.schedule.next_recover {
            if next_recover <= now {
                info!(instance = %key, "cycle window closed, recovering");
                if let Err(err) = self.recovery.recover(&mut instance).await {
                    return self.fail(&mut instance, err.into()).await;
                }
                instance.status.conditions.all_injected = false;
                instance.status.schedule.next_recover = None;
                instance.status.phase = Phase::Waiting;
                instance.status.experiment.end_time = Some(now);
            }
        }

        // First reconcile: plant the first cycle.
        if instance.status.schedule.next_start.is_none() {
            instance.status.schedule.next_start = Some(scheduler.next_time(now)?);
            if instance.status.phase == Phase::Initializing {
                instance.status.phase = Phase::Waiting;
            }
        }

        // Start a cycle once its time arrives.
        if instance.status.schedule.next_start.is_some_and(|t| t <= now) {
            if let Err(err) = self.start_cycle(&mut instance, &scheduler, now).await {
                return self.fail(&mut instance, err).await;
            }
        }

        self.lifecycle.persist(&mut instance).await?;
        Ok(self.requeue_outcome(&instance, now))
    }

    /// Injects one cycle and plants the next boundary times.
    async fn start_cycle(
        &self,
        instance: &mut FaultInstance,
        scheduler: &SchedulerSpec,
        now: DateTime<Utc>,
    ) -> Result<(), ReconcileError> {
        info!(instance = %instance.key(), "starting cycle");
        self.lifecycle.apply(instance).await?;

        instance.status.conditions.all_injected = true;
        instance.status.failed_message = None;
        instance.status.phase = Phase::Running;
        instance.status.experiment.start_time = Some(now);

        let duration = instance
            .duration()?
            .unwrap_or(Duration::ZERO);
        let hold = chrono::Duration::from_std(duration).unwrap_or_else(|_| chrono::Duration::zero());
        instance.status.schedule.next_recover = Some(now + hold);
        instance.status.schedule.next_start = Some(scheduler.next_time(now)?);
        self.bus
            .publish(Event::now(EventKind::FaultInjected).with_instance(instance.key().to_string()));
        Ok(())
    }

    /// Pause path: recover the in-flight cycle, stop planting new ones.
    async fn pause(
        &self,
        instance: &mut FaultInstance,
        now: DateTime<Utc>,
    ) -> Result<Outcome, ReconcileError> {
        if instance.status.conditions.paused {
            return Ok(Outcome::Done);
        }

        if instance.status.conditions.all_injected {
            info!(instance = %instance.key(), "pausing, recovering current cycle");
            if let Err(err) = self.recovery.recover(instance).await {
                return self.fail(instance, err.into()).await;
            }
            instance.status.experiment.end_time = Some(now);
        }

        instance.status.conditions.paused = true;
        instance.status.conditions.all_injected = false;
        instance.status.schedule.next_recover = None;
        instance.status.schedule.next_start = None;
        instance.status.phase = Phase::Paused;
        self.lifecycle.persist(instance).await?;
        self.bus
            .publish(Event::now(EventKind::FaultPaused).with_instance(instance.key().to_string()));
        Ok(Outcome::Done)
    }

    /// Requeue at the nearest future boundary.
    fn requeue_outcome(&self, instance: &FaultInstance, now: DateTime<Utc>) -> Outcome {
        let next = [
            instance.status.schedule.next_start,
            instance.status.schedule.next_recover,
        ]
        .into_iter()
        .flatten()
        .filter(|t| *t > now)
        .min();

        match next {
            Some(t) => {
                let delay = (t - now).to_std().unwrap_or(Duration::ZERO);
                Outcome::RequeueAfter(delay)
            }
            None => {
                // Both boundaries in the past means the state machine is
                // wedged; retrying on time will not help.
                warn!(instance = %instance.key(), "no upcoming boundary, not requeueing");
                Outcome::Done
            }
        }
    }

    async fn fail(
        &self,
        instance: &mut FaultInstance,
        err: ReconcileError,
    ) -> Result<Outcome, ReconcileError> {
        instance.status.failed_message = Some(err.to_string());
        if let Err(persist_err) = self.lifecycle.persist(instance).await {
            warn!(instance = %instance.key(), error = %persist_err, "failed to record failure message");
        }
        Err(err)
    }
}
