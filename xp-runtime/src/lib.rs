//! Crossplane's controller runtime: the per-reconcile driving loop, the
//! finalizer helper, and the dynamic controller/watch engine (component I).
//!
//! This plays the role `kube_runtime` plays for `kube_client`: it knows
//! nothing about composites or compositions, only how to drive a generic
//! `Fn(Arc<K>) -> Future<Output = Result<Action, E>>` reconciler to
//! convergence against an `xp_client::ObjectStore`.

pub mod controller;
pub mod events;
pub mod finalizer;
pub mod scheduler;
pub mod watch_registry;

pub use controller::{Action, Context};
pub use events::{Event, EventRecorder, EventType, LoggingRecorder};
pub use finalizer::{finalizer, Event as FinalizerEvent};
pub use scheduler::{debounced_scheduler, Scheduler, ScheduleRequest};
pub use watch_registry::{ControllerEngine, WatchId, WatchRegistry};
