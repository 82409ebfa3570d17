//! Global runtime configuration.
//!
//! ## Sentinel values
//! - `workers = 0` → one worker (clamped)
//! - `grace = 0s` → no wait, shutdown is immediate

use std::time::Duration;

use crate::policies::BackoffPolicy;

/// Configuration for the chaosvisor runtime.
#[derive(Clone, Debug)]
pub struct Config {
    /// Reconcile worker pool size.
    pub workers: usize,

    /// Event bus ring-buffer capacity (min 1).
    pub bus_capacity: usize,

    /// Maximum wait for in-flight reconciles on shutdown.
    pub grace: Duration,

    /// Deadline for every Apply/Recover RPC against a target agent.
    /// A timeout is a retryable failure, never fatal.
    pub rpc_timeout: Duration,

    /// Backoff for requeued reconciles.
    pub requeue: BackoffPolicy,

    /// Attempts for version-conflict retry loops around instance updates.
    pub update_retries: u32,
}

impl Config {
    /// Worker pool size clamped to a minimum of 1.
    #[inline]
    pub fn workers_clamped(&self) -> usize {
        self.workers.max(1)
    }

    /// Bus capacity clamped to a minimum of 1.
    #[inline]
    pub fn bus_capacity_clamped(&self) -> usize {
        self.bus_capacity.max(1)
    }
}

impl Default for Config {
    /// - `workers = 4`
    /// - `bus_capacity = 1024`
    /// - `grace = 30s`
    /// - `rpc_timeout = 30s`
    /// - `requeue = BackoffPolicy::default()`
    /// - `update_retries = 5`
    fn default() -> Self {
        Self {
            workers: 4,
            bus_capacity: 1024,
            grace: Duration::from_secs(30),
            rpc_timeout: Duration::from_secs(30),
            requeue: BackoffPolicy::default(),
            update_retries: 5,
        }
    }
}
