//! The fault instance: one object describing a single fault experiment.
//!
//! An instance is created by an external actor (user, workflow, schedule),
//! injected and recovered by the reconcilers, and physically removed by
//! the store only once its finalizers are drained.
//!
//! ## Rules
//! - `scheduler` and `duration` are either both set or both unset.
//!   Validated at admission; re-checked defensively at reconcile time.
//! - A finalizer key is recorded **before** the injection RPC for its
//!   target is dispatched, and removed only after a confirmed recovery
//!   (or a confirmed "target gone").
//! - All writes go through the store's version-checked `update`.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::SpecError;
use crate::fault::scheduler::SchedulerSpec;
use crate::fault::spec::FaultSpec;
use crate::fault::status::FaultStatus;
use crate::kinds::Kind;
use crate::target::TargetKey;

/// Annotation that pauses a fault instance while set to `"true"`.
pub const ANNOTATION_PAUSE: &str = "chaosvisor.io/pause";

/// Identity of a fault instance: `namespace/name`.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct InstanceKey {
    pub namespace: String,
    pub name: String,
}

impl InstanceKey {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for InstanceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

impl FromStr for InstanceKey {
    type Err = SpecError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once('/') {
            Some((ns, name)) if !ns.is_empty() && !name.is_empty() && !name.contains('/') => {
                Ok(InstanceKey::new(ns, name))
            }
            _ => Err(SpecError::Parse {
                field: "instance key",
                message: format!("expected namespace/name, got {s:?}"),
            }),
        }
    }
}

impl TryFrom<String> for InstanceKey {
    type Error = SpecError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<InstanceKey> for String {
    fn from(key: InstanceKey) -> String {
        key.to_string()
    }
}

/// Object metadata shared by every instance.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Meta {
    pub namespace: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub creation_timestamp: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deletion_timestamp: Option<DateTime<Utc>>,
    /// Optimistic concurrency token, bumped by every successful update.
    #[serde(default)]
    pub resource_version: u64,
}

/// Ordered, de-duplicated set of pending-recovery work items.
///
/// Doubles as the deletion guard: while non-empty, the instance may not
/// be physically removed. Each key is a target that still needs a
/// recovery attempt.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Finalizers(Vec<TargetKey>);

impl Finalizers {
    /// Records a pending-recovery item. Returns `false` if already present.
    pub fn insert(&mut self, key: TargetKey) -> bool {
        if self.0.contains(&key) {
            return false;
        }
        self.0.push(key);
        true
    }

    /// Clears a pending-recovery item. Returns `false` if absent.
    pub fn remove(&mut self, key: &TargetKey) -> bool {
        let before = self.0.len();
        self.0.retain(|k| k != key);
        self.0.len() != before
    }

    pub fn contains(&self, key: &TargetKey) -> bool {
        self.0.contains(key)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Snapshot of the keys, for iteration while the set is mutated.
    pub fn keys(&self) -> Vec<TargetKey> {
        self.0.clone()
    }

    /// Drops every pending item. The forced-cleanup escape hatch.
    pub fn clear(&mut self) {
        self.0.clear();
    }
}

impl<'a> IntoIterator for &'a Finalizers {
    type Item = &'a TargetKey;
    type IntoIter = std::slice::Iter<'a, TargetKey>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

/// One fault experiment.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FaultInstance {
    pub meta: Meta,
    pub spec: FaultSpec,
    #[serde(default)]
    pub status: FaultStatus,
    #[serde(default, skip_serializing_if = "Finalizers::is_empty")]
    pub finalizers: Finalizers,
    /// Recurrence rule; set together with `duration` for scheduled
    /// instances, unset for one-shot ones.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scheduler: Option<SchedulerSpec>,
    /// How long injected state is held, e.g. `"30s"`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<String>,
}

impl FaultInstance {
    /// A new instance created at `now`.
    pub fn new(
        namespace: impl Into<String>,
        name: impl Into<String>,
        spec: FaultSpec,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            meta: Meta {
                namespace: namespace.into(),
                name: name.into(),
                creation_timestamp: Some(now),
                ..Meta::default()
            },
            spec,
            status: FaultStatus::default(),
            finalizers: Finalizers::default(),
            scheduler: None,
            duration: None,
        }
    }

    /// A zero-valued instance of the given spec, meta left blank.
    ///
    /// Used by the registry's generic spawn path; callers fill the meta
    /// before persisting.
    pub fn prototype(spec: FaultSpec) -> Self {
        Self {
            meta: Meta::default(),
            spec,
            status: FaultStatus::default(),
            finalizers: Finalizers::default(),
            scheduler: None,
            duration: None,
        }
    }

    pub fn key(&self) -> InstanceKey {
        InstanceKey::new(self.meta.namespace.clone(), self.meta.name.clone())
    }

    pub fn kind(&self) -> Kind {
        self.spec.kind()
    }

    /// Whether deletion has been requested.
    pub fn is_deleted(&self) -> bool {
        self.meta.deletion_timestamp.is_some()
    }

    /// Whether the pause annotation is in effect.
    pub fn is_paused(&self) -> bool {
        self.meta
            .annotations
            .get(ANNOTATION_PAUSE)
            .map(|v| v == "true")
            .unwrap_or(false)
    }

    /// Requests deletion; physical removal waits for the finalizers.
    pub fn mark_deleted(&mut self, now: DateTime<Utc>) {
        if self.meta.deletion_timestamp.is_none() {
            self.meta.deletion_timestamp = Some(now);
        }
    }

    /// Parses the `duration` field.
    pub fn duration(&self) -> Result<Option<Duration>, SpecError> {
        match &self.duration {
            None => Ok(None),
            Some(raw) => humantime::parse_duration(raw)
                .map(Some)
                .map_err(|e| SpecError::Parse {
                    field: "duration",
                    message: format!("bad duration {raw:?}: {e}"),
                }),
        }
    }

    /// Whether the hold window has elapsed at `now`.
    ///
    /// Returns `(true, 0)` once `creation + duration <= now`, otherwise
    /// `(false, remaining)`. Instances without a duration never elapse.
    pub fn duration_exceeded(&self, now: DateTime<Utc>) -> Result<(bool, Duration), SpecError> {
        let Some(duration) = self.duration()? else {
            return Ok((false, Duration::ZERO));
        };
        let since = match self.meta.creation_timestamp {
            Some(created) => (now - created).to_std().unwrap_or(Duration::ZERO),
            None => Duration::ZERO,
        };
        if since >= duration {
            Ok((true, Duration::ZERO))
        } else {
            Ok((false, duration - since))
        }
    }
}
