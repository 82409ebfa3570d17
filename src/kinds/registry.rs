//! # Kind registry: uniform treatment of heterogeneous fault kinds.
//!
//! The registry is the one table that makes ~a dozen unrelated fault
//! kinds look identical to the rest of the platform: each entry carries
//! the kind's prototype spec, its strategy object, and the flags the
//! reconcilers branch on. It is built **once** at startup through the
//! builder and passed by reference to every consumer — no global state,
//! no registration side effects scattered across modules.
//!
//! ## Rules
//! - Immutable after `build()`; concurrent reads need no locking.
//! - `spawn_object`/`spawn_list` allocate fresh zero-valued values for
//!   generic decode, list operations and cross-cutting watchers.
//! - `batchable` selects the recovery strategy (see the recover module);
//!   `one_shot` marks kinds that complete without a hold window.

use std::collections::HashMap;
use std::sync::Arc;

use crate::error::SpecError;
use crate::fault::{FaultInstance, FaultSpec};
use crate::kinds::kind::Kind;
use crate::kinds::routine::{AgentRoutine, FaultRoutine};

/// One registered kind.
pub struct KindEntry {
    pub kind: Kind,
    /// Zero-valued spec; cloned by the spawn paths.
    pub prototype: FaultSpec,
    /// The kind's injection/recovery strategy.
    pub routine: Arc<dyn FaultRoutine>,
    /// Recover through the batched per-source manager instead of the
    /// direct per-target path.
    pub batchable: bool,
    /// The fault completes immediately; no hold window, nothing to
    /// reverse on the target afterwards.
    pub one_shot: bool,
}

/// A freshly spawned, empty typed list of instances.
#[derive(Debug)]
pub struct FaultList {
    pub kind: Kind,
    pub items: Vec<FaultInstance>,
}

impl FaultList {
    fn new(kind: Kind) -> Self {
        Self {
            kind,
            items: Vec::new(),
        }
    }
}

/// Immutable table of every fault kind known to the engine.
pub struct KindRegistry {
    entries: HashMap<Kind, KindEntry>,
}

impl KindRegistry {
    /// Starts an empty registry. Registration happens only here, during
    /// startup wiring.
    pub fn builder() -> KindRegistryBuilder {
        KindRegistryBuilder {
            entries: HashMap::new(),
        }
    }

    /// The stock table: every [`Kind`], all routed through the given
    /// agent.
    ///
    /// Network- and io-level kinds recover through the batched manager
    /// (their reversal is a host-level rule change that must be
    /// coordinated per node); pod/container kills are one-shot.
    pub fn with_defaults(agent: Arc<dyn crate::agent::TargetAgent>) -> Self {
        let routine: Arc<dyn FaultRoutine> = Arc::new(AgentRoutine::new(agent));
        let mut builder = Self::builder();
        for kind in Kind::all() {
            let batchable = matches!(
                kind,
                Kind::NetworkPartition | Kind::NetworkDelay | Kind::IoDelay | Kind::DnsFault
            );
            let one_shot = matches!(kind, Kind::PodKill | Kind::ContainerKill);
            builder = builder.register(KindEntry {
                kind,
                prototype: FaultSpec::prototype(kind),
                routine: routine.clone(),
                batchable,
                one_shot,
            });
        }
        builder.build()
    }

    /// Looks a kind up by discriminant.
    pub fn lookup(&self, kind: Kind) -> Option<&KindEntry> {
        self.entries.get(&kind)
    }

    /// Looks a kind up by wire name (template tag).
    pub fn lookup_name(&self, tag: &str) -> Option<&KindEntry> {
        tag.parse::<Kind>().ok().and_then(|k| self.lookup(k))
    }

    /// Allocates a fresh zero-valued instance of the kind.
    pub fn spawn_object(&self, kind: Kind) -> Result<FaultInstance, SpecError> {
        let entry = self.lookup(kind).ok_or_else(|| SpecError::InvalidTemplateType {
            tag: kind.name().to_string(),
        })?;
        Ok(FaultInstance::prototype(entry.prototype.clone()))
    }

    /// Allocates a fresh empty typed list for the kind.
    pub fn spawn_list(&self, kind: Kind) -> Result<FaultList, SpecError> {
        self.lookup(kind)
            .map(|entry| FaultList::new(entry.kind))
            .ok_or_else(|| SpecError::InvalidTemplateType {
                tag: kind.name().to_string(),
            })
    }

    /// Iterates every registered kind, for consumers that treat all kinds
    /// uniformly (status aggregation, watch registration).
    pub fn all_kinds(&self) -> impl Iterator<Item = &KindEntry> {
        self.entries.values()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[cfg(test)]
    pub(crate) fn for_tests() -> Self {
        use crate::agent::TargetAgent;
        use crate::error::AgentError;
        use crate::target::Target;
        use async_trait::async_trait;

        struct NoopAgent;

        #[async_trait]
        impl TargetAgent for NoopAgent {
            async fn apply(&self, _: &Target, _: &FaultInstance) -> Result<(), AgentError> {
                Ok(())
            }
            async fn recover(&self, _: &Target, _: &FaultInstance) -> Result<(), AgentError> {
                Ok(())
            }
        }

        Self::with_defaults(Arc::new(NoopAgent))
    }
}

/// Startup-only registration surface.
pub struct KindRegistryBuilder {
    entries: HashMap<Kind, KindEntry>,
}

impl KindRegistryBuilder {
    /// Registers one kind. Last registration of a kind wins; duplicate
    /// registration is a wiring bug.
    pub fn register(mut self, entry: KindEntry) -> Self {
        debug_assert!(
            !self.entries.contains_key(&entry.kind),
            "kind {} registered twice",
            entry.kind
        );
        self.entries.insert(entry.kind, entry);
        self
    }

    /// Freezes the table.
    pub fn build(self) -> KindRegistry {
        KindRegistry {
            entries: self.entries,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_table_registers_every_kind() {
        let registry = KindRegistry::for_tests();
        assert_eq!(registry.len(), Kind::all().len());
        for kind in Kind::all() {
            assert!(registry.lookup(kind).is_some(), "{kind}");
        }
    }

    #[test]
    fn lookup_by_wire_name() {
        let registry = KindRegistry::for_tests();
        assert_eq!(
            registry.lookup_name("network-partition").map(|e| e.kind),
            Some(Kind::NetworkPartition)
        );
        assert!(registry.lookup_name("cpu-melt").is_none());
    }

    #[test]
    fn spawn_object_is_zero_valued() {
        let registry = KindRegistry::for_tests();
        let instance = registry.spawn_object(Kind::IoDelay).unwrap();
        assert_eq!(instance.kind(), Kind::IoDelay);
        assert!(instance.meta.name.is_empty());
        assert!(instance.finalizers.is_empty());
    }

    #[test]
    fn spawn_list_is_typed_and_empty() {
        let registry = KindRegistry::for_tests();
        let list = registry.spawn_list(Kind::TimeSkew).unwrap();
        assert_eq!(list.kind, Kind::TimeSkew);
        assert!(list.items.is_empty());
    }

    #[test]
    fn spawn_against_a_partial_registry_fails() {
        let registry = KindRegistry::builder().build();
        let err = registry.spawn_object(Kind::PodKill).unwrap_err();
        assert!(matches!(err, SpecError::InvalidTemplateType { .. }));
    }

    #[test]
    fn strategy_flags_follow_the_table() {
        let registry = KindRegistry::for_tests();
        assert!(registry.lookup(Kind::NetworkPartition).unwrap().batchable);
        assert!(!registry.lookup(Kind::PodKill).unwrap().batchable);
        assert!(registry.lookup(Kind::PodKill).unwrap().one_shot);
        assert!(!registry.lookup(Kind::StressCpu).unwrap().one_shot);
    }

    #[test]
    fn all_kinds_enumerates_everything() {
        let registry = KindRegistry::for_tests();
        let mut seen: Vec<Kind> = registry.all_kinds().map(|e| e.kind).collect();
        seen.sort_by_key(|k| k.name());
        let mut expected: Vec<Kind> = Kind::all().into();
        expected.sort_by_key(|k| k.name());
        assert_eq!(seen, expected);
    }
}
