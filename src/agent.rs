//! The target-agent RPC seam.
//!
//! A target agent is a node-local service that physically applies and
//! reverses one fault on one target. This crate only consumes the RPC
//! contract; the mechanics live behind it.

use async_trait::async_trait;

use crate::error::AgentError;
use crate::fault::FaultInstance;
use crate::target::Target;

/// Apply/Recover RPCs exposed by a per-node agent.
///
/// ## Contract
/// - Both calls run under a deadline inherited from the reconcile; a
///   timeout is a retryable failure, never fatal.
/// - `recover` MUST be an idempotent no-op for a target that was never
///   actually injected. Finalizer keys are recorded before the inject
///   RPC is dispatched, so recovery can legitimately reach a target the
///   fault never touched (crash between record and dispatch, inject RPC
///   lost, sibling cancellation).
/// - `recover` called twice for the same target must succeed both times.
#[async_trait]
pub trait TargetAgent: Send + Sync {
    /// Applies the instance's fault to one target.
    async fn apply(&self, target: &Target, instance: &FaultInstance) -> Result<(), AgentError>;

    /// Reverses the instance's fault on one target.
    async fn recover(&self, target: &Target, instance: &FaultInstance) -> Result<(), AgentError>;
}
