//! # Batched recovery: the per-source manager.
//!
//! Some kinds cannot be reversed target-by-target: their injected state
//! is a host-level rule (a traffic-shaping discipline, an io interposer
//! table) that must be mutated under coordinated, serialized access per
//! node. For those kinds recovery is staged and committed:
//!
//! ```text
//! RecoveryManager::new(source)
//!   ├─ with_init(key)   — stage one pending-recovery intent  (× N)
//!   └─ commit()         — resolve all keys, group by node,
//!                         recover serially per node / parallel across
//!                         nodes, one RecoveryResponse per staged key
//! ```
//!
//! ## Rules
//! - One manager per source instance per pass; never reused.
//! - Staging is idempotent: the same key staged twice yields one intent.
//! - `commit` never short-circuits — every staged key gets a response.
//! - Within one node responses are produced in staging order.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tokio::task::JoinSet;
use tracing::debug;

use crate::error::{AgentError, RecoverError};
use crate::fault::FaultInstance;
use crate::kinds::FaultRoutine;
use crate::target::{Resolution, Target, TargetKey, TargetSelector};

/// Outcome for one staged target, produced by [`RecoveryManager::commit`].
#[derive(Debug)]
pub struct RecoveryResponse {
    pub key: TargetKey,
    /// `None` means the target was recovered.
    pub err: Option<RecoverError>,
}

/// Per-source coordinator staging recovery intents for one commit.
pub struct RecoveryManager {
    /// Identity of the owning instance, for logs.
    source: String,
    staged: Vec<TargetKey>,
    selector: Arc<dyn TargetSelector>,
    routine: Arc<dyn FaultRoutine>,
    rpc_timeout: Duration,
}

impl RecoveryManager {
    pub fn new(
        source: impl Into<String>,
        selector: Arc<dyn TargetSelector>,
        routine: Arc<dyn FaultRoutine>,
        rpc_timeout: Duration,
    ) -> Self {
        Self {
            source: source.into(),
            staged: Vec::new(),
            selector,
            routine,
            rpc_timeout,
        }
    }

    /// Stages one pending-recovery intent. Duplicates collapse.
    pub fn with_init(&mut self, key: TargetKey) -> &mut Self {
        if !self.staged.contains(&key) {
            self.staged.push(key);
        }
        self
    }

    /// Number of staged intents.
    pub fn staged(&self) -> usize {
        self.staged.len()
    }

    /// Executes the whole batch and returns one response per staged key.
    ///
    /// Targets that are gone or not running come back with their benign
    /// error; the caller decides that those need no recovery. Resolution
    /// and RPC failures come back as retryable errors.
    pub async fn commit(self, instance: &FaultInstance) -> Vec<RecoveryResponse> {
        let mut responses = Vec::with_capacity(self.staged.len());
        // node → (staged order, key, target)
        let mut per_node: BTreeMap<String, Vec<(usize, TargetKey, Target)>> = BTreeMap::new();

        let resolutions = join_all(
            self.staged
                .iter()
                .map(|key| self.selector.resolve(key)),
        )
        .await;

        for ((order, key), resolution) in self.staged.into_iter().enumerate().zip(resolutions) {
            match resolution {
                Ok(Resolution::Found(target)) => {
                    per_node
                        .entry(target.node.clone())
                        .or_default()
                        .push((order, key, target));
                }
                Ok(Resolution::NotReady(_)) => {
                    responses.push(RecoveryResponse {
                        err: Some(RecoverError::TargetNotReady {
                            key: key.to_string(),
                        }),
                        key,
                    });
                }
                Ok(Resolution::Gone) => {
                    responses.push(RecoveryResponse {
                        err: Some(RecoverError::TargetGone {
                            key: key.to_string(),
                        }),
                        key,
                    });
                }
                Err(err) => {
                    responses.push(RecoveryResponse {
                        err: Some(RecoverError::Resolve {
                            key: key.to_string(),
                            source: err,
                        }),
                        key,
                    });
                }
            }
        }

        debug!(
            source = %self.source,
            nodes = per_node.len(),
            "committing batched recovery"
        );

        // The host-level mutation is serialized within each node and
        // parallel across nodes.
        let mut set: JoinSet<Vec<(usize, TargetKey, Option<RecoverError>)>> = JoinSet::new();
        for (_node, batch) in per_node {
            let routine = self.routine.clone();
            let inst = instance.clone();
            let rpc_timeout = self.rpc_timeout;
            set.spawn(async move {
                let mut out = Vec::with_capacity(batch.len());
                for (order, key, target) in batch {
                    let err = match tokio::time::timeout(
                        rpc_timeout,
                        routine.recover_one(&target, &inst),
                    )
                    .await
                    {
                        Ok(Ok(())) => None,
                        Ok(Err(err)) => Some(RecoverError::Rpc {
                            key: key.to_string(),
                            source: err,
                        }),
                        Err(_elapsed) => Some(RecoverError::Rpc {
                            key: key.to_string(),
                            source: AgentError::Timeout {
                                deadline: rpc_timeout,
                            },
                        }),
                    };
                    out.push((order, key, err));
                }
                out
            });
        }

        let mut committed = Vec::new();
        while let Some(joined) = set.join_next().await {
            if let Ok(batch) = joined {
                committed.extend(batch);
            }
        }
        committed.sort_by_key(|(order, _, _)| *order);
        responses.extend(
            committed
                .into_iter()
                .map(|(_, key, err)| RecoveryResponse { key, err }),
        );
        responses
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SelectError;
    use crate::fault::FaultSpec;
    use crate::kinds::Kind;
    use async_trait::async_trait;
    use chrono::Utc;
    use std::collections::HashMap;
    use std::sync::Mutex;

    struct MapSelector {
        map: HashMap<TargetKey, Resolution>,
    }

    #[async_trait]
    impl TargetSelector for MapSelector {
        async fn select(&self, _: &crate::target::Selector) -> Result<Vec<Target>, SelectError> {
            Ok(Vec::new())
        }

        async fn resolve(&self, key: &TargetKey) -> Result<Resolution, SelectError> {
            Ok(self.map.get(key).cloned().unwrap_or(Resolution::Gone))
        }
    }

    struct RecordingRoutine {
        recovered: Mutex<Vec<TargetKey>>,
        fail: Vec<TargetKey>,
    }

    #[async_trait]
    impl FaultRoutine for RecordingRoutine {
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

    fn instance() -> FaultInstance {
        FaultInstance::new(
            "chaos",
            "partition",
            FaultSpec::prototype(Kind::NetworkPartition),
            Utc::now(),
        )
    }

    fn key(name: &str) -> TargetKey {
        TargetKey::new("ns", name)
    }

    #[tokio::test]
    async fn commit_answers_every_staged_key() {
        let selector = Arc::new(MapSelector {
            map: HashMap::from([
                (key("a"), Resolution::Found(Target::new(key("a"), "node-1"))),
                (key("b"), Resolution::Gone),
                (
                    key("c"),
                    Resolution::NotReady(Target::new(key("c"), "node-2")),
                ),
            ]),
        });
        let routine = Arc::new(RecordingRoutine {
            recovered: Mutex::new(Vec::new()),
            fail: Vec::new(),
        });

        let mut m = RecoveryManager::new(
            "chaos/partition",
            selector,
            routine.clone(),
            Duration::from_secs(5),
        );
        m.with_init(key("a"));
        m.with_init(key("b"));
        m.with_init(key("c"));
        m.with_init(key("a")); // duplicate collapses
        assert_eq!(m.staged(), 3);

        let responses = m.commit(&instance()).await;
        assert_eq!(responses.len(), 3);

        let by_key: HashMap<String, &RecoveryResponse> = responses
            .iter()
            .map(|r| (r.key.to_string(), r))
            .collect();
        assert!(by_key["ns/a"].err.is_none());
        assert!(matches!(
            by_key["ns/b"].err,
            Some(RecoverError::TargetGone { .. })
        ));
        assert!(matches!(
            by_key["ns/c"].err,
            Some(RecoverError::TargetNotReady { .. })
        ));
        assert_eq!(routine.recovered.lock().unwrap().as_slice(), &[key("a")]);
    }

    #[tokio::test]
    async fn rpc_failures_do_not_block_other_nodes() {
        let selector = Arc::new(MapSelector {
            map: HashMap::from([
                (key("a"), Resolution::Found(Target::new(key("a"), "node-1"))),
                (key("b"), Resolution::Found(Target::new(key("b"), "node-2"))),
            ]),
        });
        let routine = Arc::new(RecordingRoutine {
            recovered: Mutex::new(Vec::new()),
            fail: vec![key("a")],
        });

        let mut m = RecoveryManager::new(
            "chaos/partition",
            selector,
            routine.clone(),
            Duration::from_secs(5),
        );
        m.with_init(key("a"));
        m.with_init(key("b"));

        let responses = m.commit(&instance()).await;
        assert_eq!(responses.len(), 2);
        let failed = responses.iter().find(|r| r.key == key("a")).unwrap();
        assert!(matches!(failed.err, Some(RecoverError::Rpc { .. })));
        let ok = responses.iter().find(|r| r.key == key("b")).unwrap();
        assert!(ok.err.is_none());
    }
}
