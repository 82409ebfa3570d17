//! # The finalizer-backed recovery protocol.
//!
//! Every injected target leaves one finalizer key on its instance; this
//! module drains them. A key is removed only after a confirmed recovery
//! or a confirmed "target gone" — whatever survives the pass is retried
//! on the next reconcile, giving at-least-once recovery across process
//! crashes and partial failures.
//!
//! ## Strategies
//! ```text
//! RecoveryCoordinator::recover(instance)
//!   ├─ forced-cleanup annotation? ── clear everything, done
//!   ├─ finalizers empty?          ── no-op success
//!   └─ registry entry
//!        ├─ batchable == false ──► direct:  sequential per-target pass
//!        └─ batchable == true  ──► batched: stage keys in a per-source
//!                                  RecoveryManager, one commit(),
//!                                  benign responses clear silently
//! ```
//!
//! ## Rules
//! - Neither strategy short-circuits: a failing target never blocks the
//!   others in the same pass.
//! - Benign outcomes (`TargetGone`; for the batched path also
//!   `TargetNotReady`) clear the key without contributing to the
//!   aggregate error.
//! - Emits [`EventKind::FaultRecovered`] when a pass drains the set.
//! - Forced cleanup is the sole manual override; it is for cases where
//!   automatic recovery is known impossible (the node is gone for good).

mod direct;
mod manager;

use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use crate::error::RecoverError;
use crate::events::{Bus, Event, EventKind};
use crate::fault::FaultInstance;
use crate::kinds::KindRegistry;
use crate::target::TargetSelector;

pub use manager::{RecoveryManager, RecoveryResponse};

/// Annotation requesting unconditional finalizer cleanup.
pub const ANNOTATION_CLEAN_FINALIZER: &str = "chaosvisor.io/clean-finalizer";
/// Value of [`ANNOTATION_CLEAN_FINALIZER`] that triggers the override.
pub const CLEAN_FINALIZER_FORCED: &str = "forced";

/// Executes the recovery protocol for one instance.
pub struct RecoveryCoordinator {
    registry: Arc<KindRegistry>,
    selector: Arc<dyn TargetSelector>,
    bus: Bus,
    rpc_timeout: Duration,
}

impl RecoveryCoordinator {
    pub fn new(
        registry: Arc<KindRegistry>,
        selector: Arc<dyn TargetSelector>,
        bus: Bus,
        rpc_timeout: Duration,
    ) -> Self {
        Self {
            registry,
            selector,
            bus,
            rpc_timeout,
        }
    }

    /// One recovery pass. Mutates `instance.finalizers` in place; the
    /// caller persists the instance afterwards.
    pub async fn recover(&self, instance: &mut FaultInstance) -> Result<(), RecoverError> {
        let instance_key = instance.key().to_string();

        if instance
            .meta
            .annotations
            .get(ANNOTATION_CLEAN_FINALIZER)
            .map(|v| v == CLEAN_FINALIZER_FORCED)
            .unwrap_or(false)
        {
            warn!(instance = %instance_key, "forced cleanup, dropping all finalizers");
            instance.finalizers.clear();
            self.bus.publish(
                Event::now(EventKind::FaultRecovered).with_instance(instance_key),
            );
            return Ok(());
        }

        if instance.finalizers.is_empty() {
            return Ok(());
        }

        let entry = self.registry.lookup(instance.kind()).ok_or_else(|| {
            RecoverError::UnregisteredKind {
                kind: instance.kind().name().to_string(),
            }
        })?;

        let result = if entry.batchable {
            self.recover_batched(instance, &entry.routine).await
        } else {
            direct::recover_direct(
                &self.selector,
                &entry.routine,
                &self.bus,
                self.rpc_timeout,
                instance,
            )
            .await
        };

        match &result {
            Ok(()) if instance.finalizers.is_empty() => {
                info!(instance = %instance_key, "all finalizers drained");
                self.bus.publish(
                    Event::now(EventKind::FaultRecovered).with_instance(instance_key),
                );
            }
            Ok(()) => {}
            Err(err) => {
                self.bus.publish(
                    Event::now(EventKind::RecoverFailed)
                        .with_instance(instance_key)
                        .with_error(err.to_string()),
                );
            }
        }
        result
    }

    /// Batched strategy: stage every finalizer, commit once, sort the
    /// responses into cleared / kept.
    async fn recover_batched(
        &self,
        instance: &mut FaultInstance,
        routine: &Arc<dyn crate::kinds::FaultRoutine>,
    ) -> Result<(), RecoverError> {
        let instance_key = instance.key().to_string();
        let mut manager = RecoveryManager::new(
            instance_key.clone(),
            self.selector.clone(),
            routine.clone(),
            self.rpc_timeout,
        );
        for key in instance.finalizers.keys() {
            manager.with_init(key);
        }

        let snapshot = instance.clone();
        let responses = manager.commit(&snapshot).await;

        let mut failures = Vec::new();
        for response in responses {
            match response.err {
                None => {
                    instance.finalizers.remove(&response.key);
                    self.bus.publish(
                        Event::now(EventKind::FinalizerRemoved)
                            .with_instance(instance_key.clone())
                            .with_target(response.key.to_string()),
                    );
                }
                Some(err) if err.is_benign() => {
                    // Gone or not running: nothing to recover there.
                    info!(instance = %instance_key, target = %response.key, "target needs no recovery");
                    instance.finalizers.remove(&response.key);
                    self.bus.publish(
                        Event::now(EventKind::FinalizerRemoved)
                            .with_instance(instance_key.clone())
                            .with_target(response.key.to_string()),
                    );
                }
                Some(err) => {
                    warn!(instance = %instance_key, target = %response.key, error = %err, "batched recovery failed, keeping finalizer");
                    failures.push(err);
                }
            }
        }

        RecoverError::aggregate(failures)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{AgentError, SelectError};
    use crate::fault::FaultSpec;
    use crate::kinds::{FaultRoutine, Kind, KindEntry, KindRegistry};
    use crate::target::{Resolution, Selector, Target, TargetKey};
    use async_trait::async_trait;
    use chrono::Utc;
    use std::collections::{HashMap, HashSet};
    use std::sync::Mutex;

    struct MapSelector {
        map: HashMap<TargetKey, Resolution>,
    }

    #[async_trait]
    impl TargetSelector for MapSelector {
        async fn select(&self, _: &Selector) -> Result<Vec<Target>, SelectError> {
            Ok(Vec::new())
        }

        async fn resolve(&self, key: &TargetKey) -> Result<Resolution, SelectError> {
            Ok(self.map.get(key).cloned().unwrap_or(Resolution::Gone))
        }
    }

    struct ScriptedRoutine {
        recovered: Mutex<Vec<TargetKey>>,
        fail: HashSet<TargetKey>,
    }

    impl ScriptedRoutine {
        fn new(fail: impl IntoIterator<Item = TargetKey>) -> Arc<Self> {
            Arc::new(Self {
                recovered: Mutex::new(Vec::new()),
                fail: fail.into_iter().collect(),
            })
        }
    }

    #[async_trait]
    impl FaultRoutine for ScriptedRoutine {
        async fn apply_one(&self, _: &Target, _: &FaultInstance) -> Result<(), AgentError> {
            Ok(())
        }

        async fn recover_one(
            &self,
            target: &Target,
            _: &FaultInstance,
        ) -> Result<(), AgentError> {
            if self.fail.contains(&target.key) {
                return Err(AgentError::Unavailable {
                    message: "agent down".into(),
                });
            }
            self.recovered.lock().unwrap().push(target.key.clone());
            Ok(())
        }
    }

    fn key(name: &str) -> TargetKey {
        TargetKey::new("ns", name)
    }

    fn registry_with(
        kind: Kind,
        routine: Arc<dyn FaultRoutine>,
        batchable: bool,
    ) -> Arc<KindRegistry> {
        Arc::new(
            KindRegistry::builder()
                .register(KindEntry {
                    kind,
                    prototype: FaultSpec::prototype(kind),
                    routine,
                    batchable,
                    one_shot: false,
                })
                .build(),
        )
    }

    fn coordinator(
        selector: MapSelector,
        registry: Arc<KindRegistry>,
    ) -> RecoveryCoordinator {
        RecoveryCoordinator::new(
            registry,
            Arc::new(selector),
            Bus::new(64),
            Duration::from_secs(5),
        )
    }

    fn direct_instance(finalizers: &[&str]) -> FaultInstance {
        let mut inst = FaultInstance::new(
            "chaos",
            "stress",
            FaultSpec::prototype(Kind::StressCpu),
            Utc::now(),
        );
        for name in finalizers {
            inst.finalizers.insert(key(name));
        }
        inst
    }

    fn batched_instance(finalizers: &[&str]) -> FaultInstance {
        let mut inst = FaultInstance::new(
            "chaos",
            "partition",
            FaultSpec::prototype(Kind::NetworkPartition),
            Utc::now(),
        );
        for name in finalizers {
            inst.finalizers.insert(key(name));
        }
        inst
    }

    #[tokio::test]
    async fn empty_finalizers_is_a_noop_success() {
        let routine = ScriptedRoutine::new([]);
        let coord = coordinator(
            MapSelector { map: HashMap::new() },
            registry_with(Kind::StressCpu, routine.clone(), false),
        );
        let mut inst = direct_instance(&[]);

        coord.recover(&mut inst).await.unwrap();
        coord.recover(&mut inst).await.unwrap();
        assert!(inst.finalizers.is_empty());
        assert!(routine.recovered.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn direct_drops_gone_targets_without_error() {
        let routine = ScriptedRoutine::new([]);
        let selector = MapSelector {
            map: HashMap::from([(
                key("alive"),
                Resolution::Found(Target::new(key("alive"), "node-1")),
            )]),
            // "missing" resolves Gone by default
        };
        let coord = coordinator(selector, registry_with(Kind::StressCpu, routine.clone(), false));
        let mut inst = direct_instance(&["alive", "missing"]);

        coord.recover(&mut inst).await.unwrap();
        assert!(inst.finalizers.is_empty());
        assert_eq!(routine.recovered.lock().unwrap().as_slice(), &[key("alive")]);
    }

    #[tokio::test]
    async fn direct_keeps_failing_targets_and_continues_the_pass() {
        let routine = ScriptedRoutine::new([key("bad")]);
        let selector = MapSelector {
            map: HashMap::from([
                (key("bad"), Resolution::Found(Target::new(key("bad"), "n1"))),
                (key("ok"), Resolution::Found(Target::new(key("ok"), "n1"))),
            ]),
        };
        let coord = coordinator(selector, registry_with(Kind::StressCpu, routine.clone(), false));
        let mut inst = direct_instance(&["bad", "ok"]);

        let err = coord.recover(&mut inst).await.unwrap_err();
        assert!(matches!(err, RecoverError::Rpc { .. }));
        // The failing key survives; the healthy one was still recovered.
        assert!(inst.finalizers.contains(&key("bad")));
        assert!(!inst.finalizers.contains(&key("ok")));
        assert_eq!(routine.recovered.lock().unwrap().as_slice(), &[key("ok")]);
    }

    #[tokio::test]
    async fn recover_is_idempotent_after_success() {
        let routine = ScriptedRoutine::new([]);
        let selector = MapSelector {
            map: HashMap::from([(
                key("a"),
                Resolution::Found(Target::new(key("a"), "n1")),
            )]),
        };
        let coord = coordinator(selector, registry_with(Kind::StressCpu, routine, false));
        let mut inst = direct_instance(&["a"]);

        coord.recover(&mut inst).await.unwrap();
        assert!(inst.finalizers.is_empty());
        coord.recover(&mut inst).await.unwrap();
        assert!(inst.finalizers.is_empty());
    }

    #[tokio::test]
    async fn batched_clears_benign_responses_silently() {
        let routine = ScriptedRoutine::new([]);
        let selector = MapSelector {
            map: HashMap::from([
                (key("a"), Resolution::Found(Target::new(key("a"), "n1"))),
                (key("gone"), Resolution::Gone),
                (
                    key("stopped"),
                    Resolution::NotReady(Target::new(key("stopped"), "n2")),
                ),
            ]),
        };
        let coord = coordinator(
            selector,
            registry_with(Kind::NetworkPartition, routine.clone(), true),
        );
        let mut inst = batched_instance(&["a", "gone", "stopped"]);

        coord.recover(&mut inst).await.unwrap();
        assert!(inst.finalizers.is_empty());
        assert_eq!(routine.recovered.lock().unwrap().as_slice(), &[key("a")]);
    }

    #[tokio::test]
    async fn batched_keeps_real_failures_in_the_aggregate() {
        let routine = ScriptedRoutine::new([key("bad")]);
        let selector = MapSelector {
            map: HashMap::from([
                (key("bad"), Resolution::Found(Target::new(key("bad"), "n1"))),
                (key("gone"), Resolution::Gone),
            ]),
        };
        let coord = coordinator(
            selector,
            registry_with(Kind::NetworkPartition, routine, true),
        );
        let mut inst = batched_instance(&["bad", "gone"]);

        let err = coord.recover(&mut inst).await.unwrap_err();
        assert!(matches!(err, RecoverError::Rpc { .. }));
        assert!(inst.finalizers.contains(&key("bad")));
        assert!(!inst.finalizers.contains(&key("gone")));
    }

    #[tokio::test]
    async fn forced_cleanup_bypasses_everything() {
        // Selector and routine would both fail; forced cleanup must not
        // consult either.
        let routine = ScriptedRoutine::new([key("a"), key("b")]);
        let selector = MapSelector { map: HashMap::new() };
        let coord = coordinator(selector, registry_with(Kind::StressCpu, routine, false));

        let mut inst = direct_instance(&["a", "b"]);
        inst.meta.annotations.insert(
            ANNOTATION_CLEAN_FINALIZER.into(),
            CLEAN_FINALIZER_FORCED.into(),
        );

        coord.recover(&mut inst).await.unwrap();
        assert!(inst.finalizers.is_empty());
    }

    #[tokio::test]
    async fn unregistered_kind_is_an_error() {
        let registry = Arc::new(KindRegistry::builder().build());
        let coord = RecoveryCoordinator::new(
            registry,
            Arc::new(MapSelector { map: HashMap::new() }),
            Bus::new(8),
            Duration::from_secs(5),
        );
        let mut inst = direct_instance(&["a"]);
        let err = coord.recover(&mut inst).await.unwrap_err();
        assert!(matches!(err, RecoverError::UnregisteredKind { .. }));
    }

    #[tokio::test]
    async fn full_recovery_emits_an_observable_event() {
        let routine = ScriptedRoutine::new([]);
        let selector = MapSelector {
            map: HashMap::from([(
                key("a"),
                Resolution::Found(Target::new(key("a"), "n1")),
            )]),
        };
        let registry = registry_with(Kind::StressCpu, routine, false);
        let bus = Bus::new(64);
        let mut rx = bus.subscribe();
        let coord = RecoveryCoordinator::new(
            registry,
            Arc::new(selector),
            bus,
            Duration::from_secs(5),
        );

        let mut inst = direct_instance(&["a"]);
        coord.recover(&mut inst).await.unwrap();

        let mut kinds = Vec::new();
        while let Ok(ev) = rx.try_recv() {
            kinds.push(ev.kind);
        }
        assert!(kinds.contains(&EventKind::FinalizerRemoved));
        assert!(kinds.contains(&EventKind::FaultRecovered));
    }
}
