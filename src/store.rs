//! The instance store seam and an in-memory implementation.
//!
//! The store is the crate's view of the cluster API surface: get/list/
//! update/delete on fault instances with optimistic concurrency and the
//! finalizer-backed deferred-deletion contract.
//!
//! ## Deletion contract
//! `delete` never removes an instance outright: it stamps the deletion
//! timestamp and leaves the object in place until recovery drains the
//! finalizers. Physical removal happens inside `update` — the first
//! version-checked write that observes "deletion requested AND finalizers
//! empty" garbage-collects the object. That is exactly the cluster GC
//! behavior the recovery protocol relies on: intent recorded in the
//! finalizer list survives until confirmed completion.
//!
//! ## Concurrency
//! `update` compares the incoming `resource_version` with the stored one
//! and fails with [`StoreError::Conflict`] on mismatch; callers re-read
//! and retry ([`retry_on_conflict`]).

use std::collections::HashMap;
use std::future::Future;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::error::StoreError;
use crate::fault::{FaultInstance, InstanceKey};

/// Number of attempts [`retry_on_conflict`] makes by default.
pub const DEFAULT_CONFLICT_RETRIES: u32 = 5;

/// Get/list/update/delete on fault instances.
#[async_trait]
pub trait InstanceStore: Send + Sync {
    /// Fetches one instance.
    async fn get(&self, key: &InstanceKey) -> Result<FaultInstance, StoreError>;

    /// Lists every stored instance.
    async fn list(&self) -> Result<Vec<FaultInstance>, StoreError>;

    /// Version-checked write. Returns the stored copy (bumped version),
    /// or [`StoreError::Conflict`] when the caller's copy is stale.
    ///
    /// When the instance has a deletion timestamp and no finalizers left,
    /// the write garbage-collects it instead; the returned copy is the
    /// final state.
    async fn update(&self, instance: FaultInstance) -> Result<FaultInstance, StoreError>;

    /// Requests deletion: stamps the deletion timestamp. Physical removal
    /// is deferred until the finalizers drain.
    async fn delete(&self, key: &InstanceKey) -> Result<(), StoreError>;
}

/// Retries `op` while it fails with [`StoreError::Conflict`].
///
/// `op` must re-read the instance on every attempt; retrying a stale
/// closure would just conflict again.
pub async fn retry_on_conflict<T, F, Fut>(attempts: u32, mut op: F) -> Result<T, StoreError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, StoreError>>,
{
    let attempts = attempts.max(1);
    let mut last = None;
    for _ in 0..attempts {
        match op().await {
            Err(err) if err.is_conflict() => last = Some(err),
            other => return other,
        }
    }
    Err(last.expect("at least one attempt"))
}

/// In-memory store for tests and embedded use.
#[derive(Default)]
pub struct MemoryStore {
    items: RwLock<HashMap<InstanceKey, FaultInstance>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds an instance, assigning the initial version.
    pub async fn insert(&self, mut instance: FaultInstance) -> FaultInstance {
        let mut items = self.items.write().await;
        instance.meta.resource_version = 1;
        items.insert(instance.key(), instance.clone());
        instance
    }

    /// Whether the instance is still physically present.
    pub async fn contains(&self, key: &InstanceKey) -> bool {
        self.items.read().await.contains_key(key)
    }
}

#[async_trait]
impl InstanceStore for MemoryStore {
    async fn get(&self, key: &InstanceKey) -> Result<FaultInstance, StoreError> {
        self.items
            .read()
            .await
            .get(key)
            .cloned()
            .ok_or_else(|| StoreError::NotFound {
                key: key.to_string(),
            })
    }

    async fn list(&self) -> Result<Vec<FaultInstance>, StoreError> {
        Ok(self.items.read().await.values().cloned().collect())
    }

    async fn update(&self, mut instance: FaultInstance) -> Result<FaultInstance, StoreError> {
        let key = instance.key();
        let mut items = self.items.write().await;
        let stored = items.get(&key).ok_or_else(|| StoreError::NotFound {
            key: key.to_string(),
        })?;

        if stored.meta.resource_version != instance.meta.resource_version {
            return Err(StoreError::Conflict {
                key: key.to_string(),
            });
        }

        instance.meta.resource_version += 1;
        if instance.is_deleted() && instance.finalizers.is_empty() {
            items.remove(&key);
            return Ok(instance);
        }
        items.insert(key, instance.clone());
        Ok(instance)
    }

    async fn delete(&self, key: &InstanceKey) -> Result<(), StoreError> {
        let mut items = self.items.write().await;
        let stored = items.get_mut(key).ok_or_else(|| StoreError::NotFound {
            key: key.to_string(),
        })?;

        if stored.finalizers.is_empty() {
            items.remove(key);
        } else {
            stored.mark_deleted(chrono::Utc::now());
        }
        Ok(())
    }
}
