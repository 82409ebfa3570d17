//! # One-shot lifecycle reconciler.
//!
//! Drives a fault instance through
//! `Initializing → Selecting → Injecting → Running|Holding → Finished`,
//! with the pause annotation as an orthogonal overlay.
//!
//! ```text
//! reconcile(instance, now)
//!   ├─ deleted?  ──► recover, Finished, let the store collect it
//!   ├─ paused?   ──► recover injected state, Paused
//!   ├─ resumed?  ──► fall through and re-apply
//!   ├─ Running/Holding
//!   │    ├─ no duration        ──► nothing to do until deleted
//!   │    ├─ duration elapsed   ──► recover, Finished
//!   │    └─ still holding      ──► requeue at the boundary
//!   └─ otherwise ──► apply:
//!        select targets
//!        record a finalizer per target and PERSIST   ◄── intent first
//!        fan out one inject RPC per target
//!        (first error cancels outstanding siblings;
//!         dispatched RPCs are never rolled back)
//! ```
//!
//! ## Rules
//! - The finalizer write precedes every inject RPC. Recovery is attempted
//!   for every target that was *meant* to be injected, whether or not the
//!   RPC itself succeeded, failed, or the process died mid-flight.
//! - Status writes go through the version-checked store; on conflict the
//!   reconciler re-reads the version and reapplies its own fields.
//! - A failed apply leaves the recorded finalizers in place: deletion
//!   still recovers the partially-applied state.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::error::{AgentError, ReconcileError, RecoverError, StoreError};
use crate::events::{Bus, Event, EventKind};
use crate::fault::{FaultInstance, Phase};
use crate::kinds::KindRegistry;
use crate::recover::RecoveryCoordinator;
use crate::reconcile::Outcome;
use crate::store::InstanceStore;
use crate::target::{TargetKey, TargetSelector};

/// Reconciles one-shot fault instances.
pub struct LifecycleReconciler {
    registry: Arc<KindRegistry>,
    selector: Arc<dyn TargetSelector>,
    store: Arc<dyn InstanceStore>,
    recovery: Arc<RecoveryCoordinator>,
    bus: Bus,
    rpc_timeout: Duration,
    update_retries: u32,
}

impl LifecycleReconciler {
    pub fn new(
        registry: Arc<KindRegistry>,
        selector: Arc<dyn TargetSelector>,
        store: Arc<dyn InstanceStore>,
        recovery: Arc<RecoveryCoordinator>,
        bus: Bus,
        cfg: &Config,
    ) -> Self {
        Self {
            registry,
            selector,
            store,
            recovery,
            bus,
            rpc_timeout: cfg.rpc_timeout,
            update_retries: cfg.update_retries,
        }
    }

    /// One reconcile of a loaded instance.
    pub async fn reconcile(
        &self,
        mut instance: FaultInstance,
        now: DateTime<Utc>,
    ) -> Result<Outcome, ReconcileError> {
        let key = instance.key();

        if instance.is_deleted() {
            return self.finish(&mut instance, now).await;
        }

        if instance.is_paused() {
            return self.pause(&mut instance, now).await;
        }

        if instance.status.conditions.paused {
            // Annotation lifted: re-inject below.
            info!(instance = %key, "resuming");
            instance.status.conditions.paused = false;
            self.bus
                .publish(Event::now(EventKind::FaultResumed).with_instance(key.to_string()));
        }

        match instance.status.phase {
            Phase::Finished => Ok(Outcome::Done),
            Phase::Running | Phase::Holding => self.hold(&mut instance, now).await,
            _ => self.inject(&mut instance, now).await,
        }
    }

    /// Deletion path: recover, mark finished, let the store collect it.
    async fn finish(
        &self,
        instance: &mut FaultInstance,
        now: DateTime<Utc>,
    ) -> Result<Outcome, ReconcileError> {
        debug!(instance = %instance.key(), "deleted, recovering");
        if let Err(err) = self.recovery.recover(instance).await {
            return self.fail(instance, err.into()).await;
        }

        instance.status.phase = Phase::Finished;
        instance.status.conditions.all_injected = false;
        instance.status.failed_message = None;
        if instance.status.experiment.end_time.is_none() {
            instance.status.experiment.end_time = Some(now);
        }
        self.persist(instance).await?;
        Ok(Outcome::Done)
    }

    /// Pause path: recover injected state, keep the instance around.
    async fn pause(
        &self,
        instance: &mut FaultInstance,
        now: DateTime<Utc>,
    ) -> Result<Outcome, ReconcileError> {
        if instance.status.conditions.paused {
            return Ok(Outcome::Done);
        }

        if instance.status.conditions.all_injected {
            info!(instance = %instance.key(), "pausing, recovering injected state");
            if let Err(err) = self.recovery.recover(instance).await {
                return self.fail(instance, err.into()).await;
            }
            instance.status.experiment.end_time = Some(now);
        }

        instance.status.conditions.paused = true;
        instance.status.conditions.all_injected = false;
        instance.status.phase = Phase::Paused;
        instance.status.failed_message = None;
        self.persist(instance).await?;
        self.bus
            .publish(Event::now(EventKind::FaultPaused).with_instance(instance.key().to_string()));
        Ok(Outcome::Done)
    }

    /// Hold path: wait out the duration, then recover and finish.
    async fn hold(
        &self,
        instance: &mut FaultInstance,
        now: DateTime<Utc>,
    ) -> Result<Outcome, ReconcileError> {
        if instance.duration()?.is_none() {
            // Runs until deleted.
            return Ok(Outcome::Done);
        }

        let (elapsed, remaining) = instance.duration_exceeded(now)?;
        if !elapsed {
            return Ok(Outcome::RequeueAfter(remaining));
        }

        info!(instance = %instance.key(), "duration elapsed, recovering");
        if let Err(err) = self.recovery.recover(instance).await {
            return self.fail(instance, err.into()).await;
        }
        instance.status.phase = Phase::Finished;
        instance.status.conditions.all_injected = false;
        instance.status.failed_message = None;
        instance.status.experiment.end_time = Some(now);
        self.persist(instance).await?;
        Ok(Outcome::Done)
    }

    /// Selection + injection path.
    async fn inject(
        &self,
        instance: &mut FaultInstance,
        now: DateTime<Utc>,
    ) -> Result<Outcome, ReconcileError> {
        match self.apply(instance).await {
            Ok(()) => {}
            Err(err) => return self.fail(instance, err).await,
        }

        let one_shot = self
            .registry
            .lookup(instance.kind())
            .map(|e| e.one_shot)
            .unwrap_or(false);

        instance.status.conditions.all_injected = true;
        instance.status.failed_message = None;
        instance.status.experiment.start_time = Some(now);
        instance.status.phase = if one_shot {
            Phase::Finished
        } else if instance.duration.is_some() {
            Phase::Holding
        } else {
            Phase::Running
        };
        self.persist(instance).await?;
        self.bus
            .publish(Event::now(EventKind::FaultInjected).with_instance(instance.key().to_string()));

        if one_shot {
            return Ok(Outcome::Done);
        }
        match instance.duration_exceeded(now)? {
            (false, remaining) if !remaining.is_zero() => Ok(Outcome::RequeueAfter(remaining)),
            _ => Ok(Outcome::Done),
        }
    }

    /// Resolves targets and injects every one of them.
    ///
    /// The finalizer for each target is recorded and **persisted before
    /// any inject RPC is dispatched** — the durable intent the recovery
    /// protocol replays after a crash.
    pub(crate) async fn apply(&self, instance: &mut FaultInstance) -> Result<(), ReconcileError> {
        let key = instance.key().to_string();
        let entry = self.registry.lookup(instance.kind()).ok_or_else(|| {
            RecoverError::UnregisteredKind {
                kind: instance.kind().name().to_string(),
            }
        })?;

        instance.status.phase = Phase::Selecting;
        let targets = self.selector.select(instance.spec.selector()).await?;
        instance.status.conditions.selected = true;
        instance.status.phase = Phase::Injecting;
        debug!(instance = %key, targets = targets.len(), "targets selected");

        for target in &targets {
            if instance.finalizers.insert(target.key.clone()) {
                self.bus.publish(
                    Event::now(EventKind::FinalizerInited)
                        .with_instance(key.clone())
                        .with_target(target.key.to_string()),
                );
            }
        }
        self.persist(instance).await?;

        let snapshot = Arc::new(instance.clone());
        let mut set: JoinSet<(TargetKey, Result<(), AgentError>)> = JoinSet::new();
        for target in targets {
            let routine = entry.routine.clone();
            let inst = snapshot.clone();
            let deadline = self.rpc_timeout;
            set.spawn(async move {
                let result = tokio::time::timeout(deadline, routine.apply_one(&target, &inst))
                    .await
                    .unwrap_or(Err(AgentError::Timeout { deadline }));
                (target.key, result)
            });
        }

        // First failure cancels the outstanding siblings. Already-issued
        // RPCs are not retracted: their side effects are durable, and the
        // recorded finalizers make recovery idempotent over them.
        let mut first_failure: Option<(TargetKey, AgentError)> = None;
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok((_, Ok(()))) => {}
                Ok((target_key, Err(err))) => {
                    if first_failure.is_none() {
                        warn!(instance = %key, target = %target_key, error = %err, "inject rpc failed, cancelling siblings");
                        first_failure = Some((target_key, err));
                        set.abort_all();
                    }
                }
                Err(join_err) if join_err.is_cancelled() => {}
                Err(join_err) => {
                    if first_failure.is_none() {
                        first_failure = Some((
                            TargetKey::new(
                                instance.meta.namespace.clone(),
                                instance.meta.name.clone(),
                            ),
                            AgentError::Unavailable {
                                message: format!("inject task failed: {join_err}"),
                            },
                        ));
                        set.abort_all();
                    }
                }
            }
        }

        if let Some((target_key, err)) = first_failure {
            self.bus.publish(
                Event::now(EventKind::ApplyFailed)
                    .with_instance(key)
                    .with_target(target_key.to_string())
                    .with_error(err.to_string()),
            );
            return Err(ReconcileError::Apply {
                key: target_key.to_string(),
                source: err,
            });
        }
        Ok(())
    }

    /// Records the failure on status and propagates the error; the
    /// supervisor requeues with backoff.
    async fn fail(
        &self,
        instance: &mut FaultInstance,
        err: ReconcileError,
    ) -> Result<Outcome, ReconcileError> {
        instance.status.failed_message = Some(err.to_string());
        if let Err(persist_err) = self.persist(instance).await {
            warn!(instance = %instance.key(), error = %persist_err, "failed to record failure message");
        }
        Err(err)
    }

    /// Version-checked write with conflict retry: on conflict, adopt the
    /// stored version and reapply our fields.
    pub(crate) async fn persist(&self, instance: &mut FaultInstance) -> Result<(), StoreError> {
        let mut desired = instance.clone();
        let mut conflicts = 0;
        loop {
            match self.store.update(desired.clone()).await {
                Ok(updated) => {
                    *instance = updated;
                    return Ok(());
                }
                Err(err) if err.is_conflict() && conflicts + 1 < self.update_retries.max(1) => {
                    conflicts += 1;
                    let fresh = self.store.get(&desired.key()).await?;
                    desired.meta.resource_version = fresh.meta.resource_version;
                }
                Err(err) => return Err(err),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SelectError;
    use crate::fault::{FaultSpec, InstanceKey};
    use crate::kinds::{FaultRoutine, Kind, KindEntry};
    use crate::store::MemoryStore;
    use crate::target::{Resolution, Selector, Target};
    use async_trait::async_trait;
    use chrono::TimeZone;
    use std::collections::HashSet;
    use std::sync::Mutex;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    /// Selector over a fixed fleet; everything it ever selected resolves
    /// as found.
    struct FleetSelector {
        targets: Vec<Target>,
    }

    impl FleetSelector {
        fn of(names: &[&str]) -> Self {
            Self {
                targets: names
                    .iter()
                    .map(|n| Target::new(TargetKey::new("ns", *n), "node-1"))
                    .collect(),
            }
        }
    }

    #[async_trait]
    impl TargetSelector for FleetSelector {
        async fn select(&self, _: &Selector) -> Result<Vec<Target>, SelectError> {
            Ok(self.targets.clone())
        }

        async fn resolve(&self, key: &TargetKey) -> Result<Resolution, SelectError> {
            Ok(self
                .targets
                .iter()
                .find(|t| &t.key == key)
                .cloned()
                .map(Resolution::Found)
                .unwrap_or(Resolution::Gone))
        }
    }

    #[derive(Default)]
    struct Calls {
        applied: Vec<TargetKey>,
        recovered: Vec<TargetKey>,
    }

    struct ScriptedRoutine {
        calls: Mutex<Calls>,
        fail_apply: HashSet<TargetKey>,
        /// Set of finalizer keys observed on the instance when the first
        /// apply RPC arrived; proves the pre-commit ordering.
        seen_finalizers: Mutex<Option<Vec<TargetKey>>>,
    }

    impl ScriptedRoutine {
        fn new(fail_apply: impl IntoIterator<Item = TargetKey>) -> Arc<Self> {
            Arc::new(Self {
                calls: Mutex::new(Calls::default()),
                fail_apply: fail_apply.into_iter().collect(),
                seen_finalizers: Mutex::new(None),
            })
        }
    }

    #[async_trait]
    impl FaultRoutine for ScriptedRoutine {
        async fn apply_one(
            &self,
            target: &Target,
            instance: &FaultInstance,
        ) -> Result<(), AgentError> {
            self.seen_finalizers
                .lock()
                .unwrap()
                .get_or_insert_with(|| instance.finalizers.keys());
            if self.fail_apply.contains(&target.key) {
                return Err(AgentError::Unavailable {
                    message: "agent down".into(),
                });
            }
            self.calls.lock().unwrap().applied.push(target.key.clone());
            Ok(())
        }

        async fn recover_one(
            &self,
            target: &Target,
            _: &FaultInstance,
        ) -> Result<(), AgentError> {
            self.calls
                .lock()
                .unwrap()
                .recovered
                .push(target.key.clone());
            Ok(())
        }
    }

    struct Fixture {
        store: Arc<MemoryStore>,
        routine: Arc<ScriptedRoutine>,
        reconciler: LifecycleReconciler,
    }

    fn fixture(kind: Kind, fleet: &[&str], fail_apply: &[&str]) -> Fixture {
        let store = Arc::new(MemoryStore::new());
        let routine = ScriptedRoutine::new(
            fail_apply
                .iter()
                .map(|n| TargetKey::new("ns", *n))
                .collect::<Vec<_>>(),
        );
        let registry = Arc::new(
            KindRegistry::builder()
                .register(KindEntry {
                    kind,
                    prototype: FaultSpec::prototype(kind),
                    routine: routine.clone(),
                    batchable: false,
                    one_shot: kind == Kind::PodKill,
                })
                .build(),
        );
        let selector: Arc<dyn TargetSelector> = Arc::new(FleetSelector::of(fleet));
        let bus = Bus::new(256);
        let recovery = Arc::new(RecoveryCoordinator::new(
            registry.clone(),
            selector.clone(),
            bus.clone(),
            Duration::from_secs(5),
        ));
        let reconciler = LifecycleReconciler::new(
            registry,
            selector,
            store.clone(),
            recovery,
            bus,
            &Config::default(),
        );
        Fixture {
            store,
            routine,
            reconciler,
        }
    }

    async fn seed(fixture: &Fixture, kind: Kind, duration: Option<&str>) -> FaultInstance {
        let mut inst =
            FaultInstance::new("chaos", "exp", FaultSpec::prototype(kind), at(1_000));
        inst.duration = duration.map(String::from);
        fixture.store.insert(inst).await
    }

    #[tokio::test]
    async fn apply_records_finalizers_for_every_target() {
        let fx = fixture(Kind::StressCpu, &["a", "b", "c"], &[]);
        let inst = seed(&fx, Kind::StressCpu, None).await;

        let outcome = fx.reconciler.reconcile(inst.clone(), at(1_001)).await.unwrap();
        assert!(matches!(outcome, Outcome::Done));

        let stored = fx.store.get(&inst.key()).await.unwrap();
        assert_eq!(stored.status.phase, Phase::Running);
        assert!(stored.status.conditions.all_injected);
        for name in ["a", "b", "c"] {
            assert!(stored.finalizers.contains(&TargetKey::new("ns", name)));
        }
        assert_eq!(fx.routine.calls.lock().unwrap().applied.len(), 3);
    }

    #[tokio::test]
    async fn finalizers_are_persisted_before_the_first_inject_rpc() {
        let fx = fixture(Kind::StressCpu, &["a", "b"], &[]);
        let inst = seed(&fx, Kind::StressCpu, None).await;

        fx.reconciler.reconcile(inst, at(1_001)).await.unwrap();

        let seen = fx.routine.seen_finalizers.lock().unwrap().clone().unwrap();
        // Every target's key was already recorded when the first RPC ran.
        assert_eq!(seen.len(), 2);
        assert!(seen.contains(&TargetKey::new("ns", "a")));
        assert!(seen.contains(&TargetKey::new("ns", "b")));
    }

    #[tokio::test]
    async fn failed_apply_keeps_recorded_finalizers() {
        let fx = fixture(Kind::StressCpu, &["good", "bad"], &["bad"]);
        let inst = seed(&fx, Kind::StressCpu, None).await;

        let err = fx.reconciler.reconcile(inst.clone(), at(1_001)).await.unwrap_err();
        assert!(matches!(err, ReconcileError::Apply { .. }));
        assert!(err.is_retryable());

        let stored = fx.store.get(&inst.key()).await.unwrap();
        // Both keys survive for recovery, and the failure is on status.
        assert!(stored.finalizers.contains(&TargetKey::new("ns", "good")));
        assert!(stored.finalizers.contains(&TargetKey::new("ns", "bad")));
        assert!(stored.status.failed_message.is_some());
        assert!(!stored.status.conditions.all_injected);
    }

    #[tokio::test]
    async fn one_shot_kind_finishes_immediately() {
        let fx = fixture(Kind::PodKill, &["a"], &[]);
        let inst = seed(&fx, Kind::PodKill, None).await;

        let outcome = fx.reconciler.reconcile(inst.clone(), at(1_001)).await.unwrap();
        assert!(matches!(outcome, Outcome::Done));

        let stored = fx.store.get(&inst.key()).await.unwrap();
        assert_eq!(stored.status.phase, Phase::Finished);
    }

    #[tokio::test]
    async fn duration_bound_instance_holds_then_finishes() {
        let fx = fixture(Kind::StressCpu, &["a"], &[]);
        let inst = seed(&fx, Kind::StressCpu, Some("30s")).await;

        // Inject at t=1001: holding, requeue at the boundary.
        let outcome = fx.reconciler.reconcile(inst.clone(), at(1_001)).await.unwrap();
        let stored = fx.store.get(&inst.key()).await.unwrap();
        assert_eq!(stored.status.phase, Phase::Holding);
        match outcome {
            Outcome::RequeueAfter(d) => assert_eq!(d, Duration::from_secs(29)),
            other => panic!("expected requeue, got {other:?}"),
        }

        // Before the boundary: still holding.
        let outcome = fx.reconciler.reconcile(stored.clone(), at(1_010)).await.unwrap();
        assert!(matches!(outcome, Outcome::RequeueAfter(d) if d == Duration::from_secs(20)));

        // Past the boundary: recovered and finished.
        let stored = fx.store.get(&inst.key()).await.unwrap();
        let outcome = fx.reconciler.reconcile(stored, at(1_031)).await.unwrap();
        assert!(matches!(outcome, Outcome::Done));
        let stored = fx.store.get(&inst.key()).await.unwrap();
        assert_eq!(stored.status.phase, Phase::Finished);
        assert!(stored.finalizers.is_empty());
        assert_eq!(
            fx.routine.calls.lock().unwrap().recovered.as_slice(),
            &[TargetKey::new("ns", "a")]
        );
    }

    #[tokio::test]
    async fn deletion_recovers_and_lets_the_store_collect() {
        let fx = fixture(Kind::StressCpu, &["a"], &[]);
        let inst = seed(&fx, Kind::StressCpu, None).await;

        fx.reconciler.reconcile(inst.clone(), at(1_001)).await.unwrap();
        fx.store.delete(&inst.key()).await.unwrap();

        let stored = fx.store.get(&inst.key()).await.unwrap();
        let outcome = fx.reconciler.reconcile(stored, at(1_002)).await.unwrap();
        assert!(matches!(outcome, Outcome::Done));

        // Finalizers drained → the final update physically removed it.
        assert!(!fx.store.contains(&inst.key()).await);
        assert_eq!(
            fx.routine.calls.lock().unwrap().recovered.as_slice(),
            &[TargetKey::new("ns", "a")]
        );
    }

    #[tokio::test]
    async fn pause_recovers_and_resume_reinjects() {
        let fx = fixture(Kind::StressCpu, &["a"], &[]);
        let inst = seed(&fx, Kind::StressCpu, None).await;
        fx.reconciler.reconcile(inst.clone(), at(1_001)).await.unwrap();

        // Pause.
        let mut stored = fx.store.get(&inst.key()).await.unwrap();
        stored
            .meta
            .annotations
            .insert(crate::fault::ANNOTATION_PAUSE.into(), "true".into());
        let stored = fx.store.update(stored).await.unwrap();
        fx.reconciler.reconcile(stored, at(1_002)).await.unwrap();

        let stored = fx.store.get(&inst.key()).await.unwrap();
        assert_eq!(stored.status.phase, Phase::Paused);
        assert!(stored.finalizers.is_empty());
        assert_eq!(fx.routine.calls.lock().unwrap().recovered.len(), 1);

        // Resume.
        let mut resumed = stored;
        resumed.meta.annotations.remove(crate::fault::ANNOTATION_PAUSE);
        let resumed = fx.store.update(resumed).await.unwrap();
        fx.reconciler.reconcile(resumed, at(1_003)).await.unwrap();

        let stored = fx.store.get(&inst.key()).await.unwrap();
        assert_eq!(stored.status.phase, Phase::Running);
        assert_eq!(fx.routine.calls.lock().unwrap().applied.len(), 2);
    }

    #[tokio::test]
    async fn reconcile_survives_a_competing_writer() {
        let fx = fixture(Kind::StressCpu, &["a"], &[]);
        let inst = seed(&fx, Kind::StressCpu, None).await;

        // A competing writer bumps the version after our copy was loaded.
        let competing = fx.store.get(&inst.key()).await.unwrap();
        fx.store.update(competing).await.unwrap();

        // The stale copy still reconciles: persist retries on conflict.
        fx.reconciler.reconcile(inst.clone(), at(1_001)).await.unwrap();
        let stored = fx.store.get(&inst.key()).await.unwrap();
        assert!(stored.status.conditions.all_injected);
    }

    #[tokio::test]
    async fn finished_instances_are_left_alone() {
        let fx = fixture(Kind::StressCpu, &["a"], &[]);
        let mut inst = seed(&fx, Kind::StressCpu, None).await;
        inst.status.phase = Phase::Finished;
        let inst = fx.store.update(inst).await.unwrap();

        let outcome = fx.reconciler.reconcile(inst, at(1_001)).await.unwrap();
        assert!(matches!(outcome, Outcome::Done));
        assert!(fx.routine.calls.lock().unwrap().applied.is_empty());
    }
}
