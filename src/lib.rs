//! # chaosvisor
//!
//! **chaosvisor** is the lifecycle engine of a fault-injection platform:
//! it makes heterogeneous fault kinds (process kills, network partitions,
//! io delays, clock skew, ...) behave identically to the layers above
//! them, and guarantees that every injected fault is eventually reversed
//! — across process crashes, target disappearance and partial failures.
//!
//! ## Architecture
//! ```text
//!     ┌─────────────┐  ┌─────────────┐  ┌─────────────┐
//!     │FaultInstance│  │FaultInstance│  │FaultInstance│   (store)
//!     └──────┬──────┘  └──────┬──────┘  └──────┬──────┘
//!            ▼                ▼                ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │  Supervisor                                                 │
//! │  - WorkQueue (per-key exclusive, worker pool)               │
//! │  - Bus (broadcast events) + SubscriberSet                   │
//! │  - Dispatcher: lifecycle vs scheduled path                  │
//! └──────┬──────────────────────┬───────────────────────────────┘
//!        ▼                      ▼
//! ┌──────────────────┐  ┌────────────────────┐
//! │LifecycleReconciler│ │ScheduledReconciler │     both delegate to
//! │ one-shot path     │ │ recurring cycles   │ ──► RecoveryCoordinator
//! └──────┬───────────┘  └────────┬───────────┘
//!        ▼                       ▼
//!   KindRegistry ──► FaultRoutine (per kind) ──► TargetAgent RPCs
//!   TargetSelector resolves selectors / finalizer keys
//! ```
//!
//! ## The recovery contract
//! Before any inject RPC is dispatched, the target's key is recorded in
//! the instance's finalizer list and persisted. The finalizer doubles as
//! a durable pending-recovery work item: the instance cannot be removed
//! while one remains, and every remaining key is retried on every
//! recovery pass until the target is confirmed clean or confirmed gone.
//! Target agents must treat recovery of a never-injected target as an
//! idempotent no-op.
//!
//! ## Collaborator seams
//! The engine consumes three traits supplied by the embedding platform:
//! [`TargetSelector`] (selector → targets), [`TargetAgent`]
//! (apply/recover RPCs) and [`InstanceStore`] (versioned instance
//! persistence). [`MemoryStore`] ships for tests and embedded use.
//!
//! ## Example
//! ```rust,no_run
//! use std::sync::Arc;
//! use chaosvisor::{Config, KindRegistry, Supervisor};
//! # use chaosvisor::{MemoryStore, FaultInstance, FaultSpec, Kind};
//! # use chaosvisor::{TargetSelector, TargetAgent, Selector, Target, TargetKey, Resolution};
//! # use chaosvisor::{SelectError, AgentError};
//! # use async_trait::async_trait;
//! # struct Inventory;
//! # #[async_trait]
//! # impl TargetSelector for Inventory {
//! #     async fn select(&self, _: &Selector) -> Result<Vec<Target>, SelectError> { Ok(vec![]) }
//! #     async fn resolve(&self, _: &TargetKey) -> Result<Resolution, SelectError> { Ok(Resolution::Gone) }
//! # }
//! # struct Agent;
//! # #[async_trait]
//! # impl TargetAgent for Agent {
//! #     async fn apply(&self, _: &Target, _: &FaultInstance) -> Result<(), AgentError> { Ok(()) }
//! #     async fn recover(&self, _: &Target, _: &FaultInstance) -> Result<(), AgentError> { Ok(()) }
//! # }
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let registry = Arc::new(KindRegistry::with_defaults(Arc::new(Agent)));
//!     let store = Arc::new(MemoryStore::new());
//!     let selector = Arc::new(Inventory);
//!
//!     let subscribers: Vec<Arc<dyn chaosvisor::Subscribe>> =
//!         vec![Arc::new(chaosvisor::LogWriter::new())];
//!     let sup = Supervisor::new(
//!         Config::default(),
//!         registry,
//!         selector,
//!         store.clone(),
//!         subscribers,
//!     );
//!
//!     // A watch layer enqueues keys; here we do it by hand.
//!     let inst = store
//!         .insert(FaultInstance::new(
//!             "chaos",
//!             "kill-api",
//!             FaultSpec::prototype(Kind::PodKill),
//!             chrono::Utc::now(),
//!         ))
//!         .await;
//!     sup.enqueue(inst.key());
//!
//!     sup.run().await?;
//!     Ok(())
//! }
//! ```

mod agent;
mod config;
mod error;
mod events;
mod fault;
mod kinds;
mod policies;
mod recover;
mod reconcile;
mod runtime;
mod store;
mod subscribers;
mod target;

// ---- Public re-exports ----

pub use agent::TargetAgent;
pub use config::Config;
pub use error::{
    AgentError, ReconcileError, RecoverError, RuntimeError, SelectError, SpecError, StoreError,
};
pub use events::{Bus, Event, EventKind};
pub use fault::{
    Conditions, ContainerKillSpec, Direction, DnsFaultSpec, EmbedFault, ExperimentWindow,
    FaultInstance, FaultSpec, FaultStatus, Finalizers, InstanceKey, IoDelaySpec, KernelFaultSpec,
    Meta, NetworkDelaySpec, NetworkPartitionSpec, Phase, PodFailureSpec, PodKillSpec,
    ScheduleStatus, SchedulerSpec, StressCpuSpec, TimeSkewSpec, ANNOTATION_PAUSE,
};
pub use kinds::{AgentRoutine, FaultList, FaultRoutine, Kind, KindEntry, KindRegistry,
    KindRegistryBuilder};
pub use policies::{BackoffPolicy, JitterPolicy};
pub use recover::{
    RecoveryCoordinator, RecoveryManager, RecoveryResponse, ANNOTATION_CLEAN_FINALIZER,
    CLEAN_FINALIZER_FORCED,
};
pub use reconcile::{Dispatcher, LifecycleReconciler, Outcome, ScheduledReconciler, WorkQueue};
pub use runtime::Supervisor;
pub use store::{retry_on_conflict, InstanceStore, MemoryStore, DEFAULT_CONFLICT_RETRIES};
pub use subscribers::{LogWriter, Subscribe, SubscriberSet};
pub use target::{Resolution, Selector, SelectorMode, Target, TargetKey, TargetSelector};
