//! Error types used by the chaosvisor runtime.
//!
//! Errors are layered the same way the crate is:
//!
//! - [`SpecError`] — malformed or inconsistent fault specifications
//!   (unknown kinds, missing payloads, unparseable durations). Hard
//!   failures: surfaced to the caller, never retried.
//! - [`AgentError`] — failures of Apply/Recover RPCs against a target
//!   agent. Retryable unless the agent rejected the call outright.
//! - [`SelectError`] — target selection/resolution failures.
//! - [`StoreError`] — instance store failures, including optimistic
//!   concurrency conflicts.
//! - [`RecoverError`] — per-target recovery outcomes and their aggregate.
//!   Benign variants (`TargetGone`, `TargetNotReady`) clear the pending
//!   work item instead of failing the pass.
//! - [`ReconcileError`] — everything a single reconcile can fail with.
//! - [`RuntimeError`] — failures of the orchestration runtime itself.

use std::time::Duration;

use thiserror::Error;

/// Errors in fault specifications and embedded templates.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum SpecError {
    /// The template tag is unknown, or its payload slot is empty.
    #[error("invalid template type {tag:?}")]
    InvalidTemplateType {
        /// The offending tag (kind name).
        tag: String,
    },

    /// The payload's dynamic kind does not match the expected one.
    #[error("type mismatch: expected {expected}, found {found}")]
    TypeMismatch {
        /// Kind demanded by the container tag or instance.
        expected: String,
        /// Kind actually present.
        found: String,
    },

    /// A duration or scheduler expression failed to parse.
    #[error("failed to parse {field}: {message}")]
    Parse {
        /// Which field was malformed (`"duration"`, `"scheduler"`, ...).
        field: &'static str,
        message: String,
    },
}

impl SpecError {
    /// Returns a short stable label (snake_case) for use in logs.
    pub fn as_label(&self) -> &'static str {
        match self {
            SpecError::InvalidTemplateType { .. } => "spec_invalid_template_type",
            SpecError::TypeMismatch { .. } => "spec_type_mismatch",
            SpecError::Parse { .. } => "spec_parse",
        }
    }
}

/// Errors produced by Apply/Recover RPCs against a target agent.
#[non_exhaustive]
#[derive(Error, Debug, Clone)]
pub enum AgentError {
    /// The call did not complete within its deadline.
    #[error("agent rpc timed out after {deadline:?}")]
    Timeout {
        /// The deadline that was exceeded.
        deadline: Duration,
    },

    /// The agent could not be reached.
    #[error("agent unavailable: {message}")]
    Unavailable { message: String },

    /// The agent refused the call (bad parameters, unsupported fault).
    #[error("agent rejected the call: {message}")]
    Rejected { message: String },
}

impl AgentError {
    /// Whether retrying the same call later can reasonably succeed.
    ///
    /// Timeouts and unreachable agents are transient; a rejection is not.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            AgentError::Timeout { .. } | AgentError::Unavailable { .. }
        )
    }
}

/// Errors produced while selecting or resolving targets.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum SelectError {
    /// The selector itself is malformed.
    #[error("invalid selector: {message}")]
    Invalid { message: String },

    /// The backing inventory could not answer.
    #[error("selector backend failure: {message}")]
    Backend { message: String },
}

/// Errors produced by the instance store.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum StoreError {
    /// No instance under the given key.
    #[error("instance {key} not found")]
    NotFound { key: String },

    /// Version-checked write lost the race; re-read and retry.
    #[error("conflicting write on instance {key}")]
    Conflict { key: String },

    /// The backing store failed.
    #[error("store failure: {message}")]
    Backend { message: String },
}

impl StoreError {
    /// True for [`StoreError::Conflict`], the only variant callers are
    /// expected to retry in a tight loop.
    pub fn is_conflict(&self) -> bool {
        matches!(self, StoreError::Conflict { .. })
    }
}

/// Per-target recovery outcomes.
///
/// The direct and batched strategies both fold individual failures into
/// [`RecoverError::Aggregate`] without short-circuiting: every pending
/// target is attempted in the same pass, so one stuck target never blocks
/// forward progress on the others.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum RecoverError {
    /// The target no longer exists; nothing to recover. Benign.
    #[error("target {key} is gone")]
    TargetGone { key: String },

    /// The target exists but is not running. Benign for the batched
    /// strategy (the host-level rule is already moot).
    #[error("target {key} is not running")]
    TargetNotReady { key: String },

    /// The recovery RPC failed; the work item is kept for the next pass.
    #[error("recovery rpc for {key} failed: {source}")]
    Rpc {
        key: String,
        #[source]
        source: AgentError,
    },

    /// Target resolution failed; the work item is kept for the next pass.
    #[error("failed to resolve {key}: {source}")]
    Resolve {
        key: String,
        #[source]
        source: SelectError,
    },

    /// The instance's kind is not present in the registry.
    #[error("kind {kind} is not registered")]
    UnregisteredKind { kind: String },

    /// Collection of per-target failures from a single pass.
    #[error("{} recovery failure(s): {}", .0.len(), format_aggregate(.0))]
    Aggregate(Vec<RecoverError>),
}

impl RecoverError {
    /// Benign errors mean the target needs no recovery: the pending work
    /// item is dropped and the error never joins the aggregate.
    pub fn is_benign(&self) -> bool {
        matches!(
            self,
            RecoverError::TargetGone { .. } | RecoverError::TargetNotReady { .. }
        )
    }

    /// Folds failures from one pass into a single result.
    ///
    /// Empty input means the pass fully succeeded.
    pub fn aggregate(failures: Vec<RecoverError>) -> Result<(), RecoverError> {
        match failures.len() {
            0 => Ok(()),
            1 => Err(failures.into_iter().next().expect("len checked")),
            _ => Err(RecoverError::Aggregate(failures)),
        }
    }
}

fn format_aggregate(errors: &[RecoverError]) -> String {
    errors
        .iter()
        .map(|e| e.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

/// Everything a single reconcile can fail with.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum ReconcileError {
    #[error(transparent)]
    Spec(#[from] SpecError),

    #[error(transparent)]
    Select(#[from] SelectError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Recover(#[from] RecoverError),

    /// An injection RPC failed during the apply fan-out.
    #[error("failed to inject {key}: {source}")]
    Apply {
        key: String,
        #[source]
        source: AgentError,
    },
}

impl ReconcileError {
    /// Whether the reconcile should be requeued with backoff.
    ///
    /// Spec-level errors are programmer/configuration mistakes; retrying
    /// them cannot help and only hides the defect.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, ReconcileError::Spec(_))
    }

    /// Returns a short stable label (snake_case) for use in logs.
    pub fn as_label(&self) -> &'static str {
        match self {
            ReconcileError::Spec(_) => "reconcile_spec",
            ReconcileError::Select(_) => "reconcile_select",
            ReconcileError::Store(_) => "reconcile_store",
            ReconcileError::Recover(_) => "reconcile_recover",
            ReconcileError::Apply { .. } => "reconcile_apply",
        }
    }
}

/// Errors produced by the orchestration runtime itself.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum RuntimeError {
    /// Shutdown grace period was exceeded; some reconciles were stuck.
    #[error("shutdown grace {grace:?} exceeded; {pending} reconcile(s) still in flight")]
    GraceExceeded {
        /// The configured grace duration.
        grace: Duration,
        /// Number of keys still being processed when the grace expired.
        pending: usize,
    },
}
