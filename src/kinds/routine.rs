//! Per-kind injection/recovery strategy.
//!
//! Historically each fault kind carried its own near-identical apply and
//! recover plumbing. Here a kind supplies one small strategy object —
//! [`FaultRoutine`] — and the registry holds them as a table. The stock
//! [`AgentRoutine`] routes both calls to the node-local agent, which is
//! what every shipped kind does; a kind with bespoke mechanics registers
//! its own routine instead of generating code.

use std::sync::Arc;

use async_trait::async_trait;

use crate::agent::TargetAgent;
use crate::error::AgentError;
use crate::fault::FaultInstance;
use crate::target::Target;

/// Injection and recovery of one kind against a single target.
#[async_trait]
pub trait FaultRoutine: Send + Sync {
    /// Injects the fault into one target.
    async fn apply_one(&self, target: &Target, instance: &FaultInstance)
        -> Result<(), AgentError>;

    /// Reverses the fault on one target. Must be idempotent.
    async fn recover_one(
        &self,
        target: &Target,
        instance: &FaultInstance,
    ) -> Result<(), AgentError>;
}

/// The stock routine: both operations are agent RPCs.
pub struct AgentRoutine {
    agent: Arc<dyn TargetAgent>,
}

impl AgentRoutine {
    pub fn new(agent: Arc<dyn TargetAgent>) -> Self {
        Self { agent }
    }
}

#[async_trait]
impl FaultRoutine for AgentRoutine {
    async fn apply_one(
        &self,
        target: &Target,
        instance: &FaultInstance,
    ) -> Result<(), AgentError> {
        self.agent.apply(target, instance).await
    }

    async fn recover_one(
        &self,
        target: &Target,
        instance: &FaultInstance,
    ) -> Result<(), AgentError> {
        self.agent.recover(target, instance).await
    }
}
