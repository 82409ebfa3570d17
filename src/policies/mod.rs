//! Requeue policies.
//!
//! ## Contents
//! - [`BackoffPolicy`] — how requeue delays evolve (first / factor / max)
//! - [`JitterPolicy`] — randomization to avoid thundering herds
//!
//! The supervisor keeps a per-instance attempt counter and asks
//! `backoff.next(attempt)` for the delay whenever a reconcile fails with
//! a retryable error; the counter resets on success.

mod backoff;
mod jitter;

pub use backoff::BackoffPolicy;
pub use jitter::JitterPolicy;
