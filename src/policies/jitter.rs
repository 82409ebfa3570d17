//! Jitter applied to requeue delays.

use std::time::Duration;

use rand::Rng;

/// Randomization applied to a computed backoff delay.
///
/// With many instances failing against the same unhealthy node, bare
/// exponential backoff re-synchronizes their retries; jitter breaks the
/// herd up.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum JitterPolicy {
    /// Use the computed delay as-is.
    None,
    /// Uniform in `[0, delay]`.
    Full,
    /// Uniform in `[delay/2, delay]` (default).
    #[default]
    Equal,
}

impl JitterPolicy {
    /// Applies the policy to a base delay.
    pub fn apply(self, base: Duration) -> Duration {
        if base.is_zero() {
            return base;
        }
        let mut rng = rand::thread_rng();
        match self {
            JitterPolicy::None => base,
            JitterPolicy::Full => base.mul_f64(rng.gen_range(0.0..=1.0)),
            JitterPolicy::Equal => base.mul_f64(rng.gen_range(0.5..=1.0)),
        }
    }
}
