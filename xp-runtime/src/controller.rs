//! The reconcile-driving primitives: `Action`, `Context`, and the backoff/
//! requeue machinery described in §5 ("Rate limiting").

use rand::Rng;
use std::sync::Arc;
use std::time::Duration;

/// Default poll interval for a successful reconcile (§5).
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(60);
/// Initial backoff after a reconcile error (§5).
pub const INITIAL_BACKOFF: Duration = Duration::from_secs(1);
/// Maximum backoff after repeated reconcile errors (§5).
pub const MAX_BACKOFF: Duration = Duration::from_secs(30);
/// Per-reconcile deadline (§5).
pub const RECONCILE_TIMEOUT: Duration = Duration::from_secs(120);
/// Default bounded concurrency per kind (§5).
pub const DEFAULT_CONCURRENCY: usize = 5;

/// The result of a reconciliation attempt.
#[derive(Debug, Clone, Copy)]
pub struct Action {
    requeue_after: Option<Duration>,
}

impl Action {
    /// Requeue after `duration`, jittered ±10% (§5's "poll frequency" rule).
    #[must_use]
    pub fn requeue(duration: Duration) -> Self {
        Self {
            requeue_after: Some(jitter(duration)),
        }
    }

    /// Requeue immediately, e.g. because a composed resource is not yet
    /// ready or synced (§4.H step 13).
    #[must_use]
    pub fn requeue_now() -> Self {
        Self {
            requeue_after: Some(Duration::ZERO),
        }
    }

    /// Do nothing until a watch event is observed.
    #[must_use]
    pub fn await_change() -> Self {
        Self { requeue_after: None }
    }

    /// The delay this action requests, if any.
    pub fn requeue_after(&self) -> Option<Duration> {
        self.requeue_after
    }
}

/// Apply ±10% jitter to a duration, per §5's poll-interval jitter rule.
pub fn jitter(base: Duration) -> Duration {
    let factor = rand::rng().random_range(0.9..=1.1);
    Duration::from_secs_f64(base.as_secs_f64() * factor)
}

/// Compute the next exponential backoff delay given the previous one,
/// capped at `MAX_BACKOFF` (§5).
pub fn next_backoff(previous: Duration) -> Duration {
    std::cmp::min(previous.saturating_mul(2).max(INITIAL_BACKOFF), MAX_BACKOFF)
}

/// A read-only, reference-counted view of shared reconciler state, passed
/// to both the reconciler and the error policy. Mirrors
/// `kube_runtime::controller::Context`.
#[derive(Debug)]
pub struct Context<T>(Arc<T>);

impl<T> Clone for Context<T> {
    fn clone(&self) -> Self {
        Self(Arc::clone(&self.0))
    }
}

impl<T> Context<T> {
    /// Wrap `state` in a new context.
    #[must_use]
    pub fn new(state: T) -> Self {
        Self(Arc::new(state))
    }

    /// Borrow the inner state.
    #[must_use]
    pub fn get_ref(&self) -> &T {
        self.0.as_ref()
    }

    /// Unwrap the inner `Arc`.
    #[must_use]
    pub fn into_inner(self) -> Arc<T> {
        self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_until_capped() {
        let mut delay = INITIAL_BACKOFF;
        for _ in 0..10 {
            delay = next_backoff(delay);
        }
        assert_eq!(delay, MAX_BACKOFF);
    }

    #[test]
    fn jitter_stays_within_ten_percent() {
        let base = Duration::from_secs(60);
        for _ in 0..100 {
            let j = jitter(base);
            assert!(j >= Duration::from_secs_f64(53.9));
            assert!(j <= Duration::from_secs_f64(66.1));
        }
    }

    #[test]
    fn context_shares_state_across_clones() {
        let ctx = Context::new(42u32);
        let ctx2 = ctx.clone();
        assert_eq!(*ctx.get_ref(), *ctx2.get_ref());
    }
}
