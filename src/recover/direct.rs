//! Direct recovery: sequential, per target.
//!
//! The default strategy for kinds whose recovery is an independent
//! per-target call. Strictly sequential — bounded blast radius, simple
//! failure accounting — and never short-circuiting: every pending key is
//! attempted in the same pass, and whatever fails is retried on the next
//! reconcile.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use crate::error::{AgentError, RecoverError};
use crate::events::{Bus, Event, EventKind};
use crate::fault::FaultInstance;
use crate::kinds::FaultRoutine;
use crate::target::{Resolution, TargetSelector};

/// One direct recovery pass over the instance's finalizers.
///
/// Dropped keys are removed from `instance.finalizers` in place; the
/// caller persists the instance afterwards.
pub(crate) async fn recover_direct(
    selector: &Arc<dyn TargetSelector>,
    routine: &Arc<dyn FaultRoutine>,
    bus: &Bus,
    rpc_timeout: Duration,
    instance: &mut FaultInstance,
) -> Result<(), RecoverError> {
    let instance_key = instance.key().to_string();
    let mut failures = Vec::new();

    for key in instance.finalizers.keys() {
        let target = match selector.resolve(&key).await {
            Ok(Resolution::Gone) => {
                // Nothing left to recover; success, not an error.
                debug!(instance = %instance_key, target = %key, "target gone, clearing finalizer");
                instance.finalizers.remove(&key);
                bus.publish(
                    Event::now(EventKind::FinalizerRemoved)
                        .with_instance(instance_key.clone())
                        .with_target(key.to_string()),
                );
                continue;
            }
            // A not-running target can still hold injected state here;
            // attempt the RPC like any other.
            Ok(Resolution::Found(t)) | Ok(Resolution::NotReady(t)) => t,
            Err(err) => {
                warn!(instance = %instance_key, target = %key, error = %err, "failed to resolve target");
                failures.push(RecoverError::Resolve {
                    key: key.to_string(),
                    source: err,
                });
                continue;
            }
        };

        let outcome = tokio::time::timeout(rpc_timeout, routine.recover_one(&target, instance))
            .await
            .unwrap_or(Err(AgentError::Timeout {
                deadline: rpc_timeout,
            }));

        match outcome {
            Ok(()) => {
                instance.finalizers.remove(&key);
                bus.publish(
                    Event::now(EventKind::FinalizerRemoved)
                        .with_instance(instance_key.clone())
                        .with_target(key.to_string()),
                );
            }
            Err(err) => {
                warn!(instance = %instance_key, target = %key, error = %err, "recovery rpc failed, keeping finalizer");
                failures.push(RecoverError::Rpc {
                    key: key.to_string(),
                    source: err,
                });
            }
        }
    }

    RecoverError::aggregate(failures)
}
