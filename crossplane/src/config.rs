//! Plain configuration structs carrying the defaults named in §5, the way
//! `kube_runtime::controller::Config` carries its defaults as a struct
//! rather than scattered constants.

use std::time::Duration;
use xp_runtime::controller::{DEFAULT_CONCURRENCY, DEFAULT_POLL_INTERVAL, RECONCILE_TIMEOUT};

/// Runtime tuning for a single kind's controller (§4.H, §5).
#[derive(Debug, Clone)]
pub struct ControllerConfig {
    /// How many reconciles of this kind may run concurrently.
    pub concurrency: usize,
    /// Requeue interval after a successful reconcile with everything ready.
    pub poll_interval: Duration,
    /// Deadline applied to a single reconcile attempt.
    pub reconcile_timeout: Duration,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            concurrency: DEFAULT_CONCURRENCY,
            poll_interval: DEFAULT_POLL_INTERVAL,
            reconcile_timeout: RECONCILE_TIMEOUT,
        }
    }
}

/// Tuning for the function-pipeline composer (§4.F).
#[derive(Debug, Clone)]
pub struct ComposerConfig {
    /// Maximum requirement-stabilization iterations per pipeline step
    /// before failing `FunctionMaxIterations` (§4.F step 3b).
    pub max_stabilization_iterations: u32,
}

impl Default for ComposerConfig {
    fn default() -> Self {
        Self {
            max_stabilization_iterations: 5,
        }
    }
}
