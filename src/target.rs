//! Targets and the selector seam.
//!
//! A [`Target`] is one concrete unit a fault acts on (a pod, a container,
//! a node-local process group). The engine never inspects targets beyond
//! their identity and placement; resolving a fault's [`Selector`] into
//! targets is the job of an external [`TargetSelector`] implementation.
//!
//! [`TargetKey`] is the durable identity: it is what gets recorded as a
//! finalizer before injection, and what recovery later resolves back into
//! a live target (or learns is gone).

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::{SelectError, SpecError};

/// Durable identity of a target: `namespace/name`.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TargetKey {
    pub namespace: String,
    pub name: String,
}

impl TargetKey {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for TargetKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

impl FromStr for TargetKey {
    type Err = SpecError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once('/') {
            Some((ns, name)) if !ns.is_empty() && !name.is_empty() && !name.contains('/') => {
                Ok(TargetKey::new(ns, name))
            }
            _ => Err(SpecError::Parse {
                field: "target key",
                message: format!("expected namespace/name, got {s:?}"),
            }),
        }
    }
}

impl TryFrom<String> for TargetKey {
    type Error = SpecError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<TargetKey> for String {
    fn from(key: TargetKey) -> String {
        key.to_string()
    }
}

/// A resolved target: identity plus the node hosting it.
///
/// The node matters to the batched recovery strategy, which serializes
/// host-level mutations per node.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Target {
    pub key: TargetKey,
    pub node: String,
}

impl Target {
    pub fn new(key: TargetKey, node: impl Into<String>) -> Self {
        Self {
            key,
            node: node.into(),
        }
    }
}

/// Outcome of resolving a [`TargetKey`] during recovery.
#[derive(Clone, Debug)]
pub enum Resolution {
    /// The target exists and is running.
    Found(Target),
    /// The target exists but is not running.
    NotReady(Target),
    /// The target no longer exists.
    Gone,
}

/// Selection mode: how many of the matched targets to act on.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SelectorMode {
    /// Every matched target.
    #[default]
    All,
    /// A single matched target.
    One,
    /// A fixed number of matched targets.
    Fixed(u32),
    /// A fixed percentage of matched targets.
    FixedPercent(u32),
}

/// Declarative description of which targets a fault acts on.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Selector {
    /// Namespaces to search; empty means all allowed namespaces.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub namespaces: Vec<String>,

    /// Label equality requirements.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,

    /// How many of the matched targets to act on.
    #[serde(default)]
    pub mode: SelectorMode,
}

impl Selector {
    /// Selector matching everything in the given namespace.
    pub fn namespace(ns: impl Into<String>) -> Self {
        Self {
            namespaces: vec![ns.into()],
            ..Self::default()
        }
    }
}

/// Resolves selectors into concrete targets and keys back into targets.
///
/// Implemented outside this crate (cluster inventory, service discovery,
/// a fixture in tests). Both methods are read-only.
#[async_trait]
pub trait TargetSelector: Send + Sync {
    /// Resolves a selector into the concrete targets it matches right now.
    async fn select(&self, selector: &Selector) -> Result<Vec<Target>, SelectError>;

    /// Resolves a recorded key back into a live target, or reports that
    /// the target is gone or not running.
    async fn resolve(&self, key: &TargetKey) -> Result<Resolution, SelectError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_display_round_trip() {
        let key = TargetKey::new("payments", "api-0");
        assert_eq!(key.to_string(), "payments/api-0");
        assert_eq!("payments/api-0".parse::<TargetKey>().unwrap(), key);
    }

    #[test]
    fn malformed_keys_rejected() {
        for bad in ["", "noslash", "/name", "ns/", "a/b/c"] {
            assert!(bad.parse::<TargetKey>().is_err(), "{bad:?} should fail");
        }
    }

    #[test]
    fn key_serde_is_a_plain_string() {
        let key = TargetKey::new("ns", "pod-1");
        assert_eq!(serde_json::to_string(&key).unwrap(), "\"ns/pod-1\"");
        let back: TargetKey = serde_json::from_str("\"ns/pod-1\"").unwrap();
        assert_eq!(back, key);
    }
}
