//! Component I: per-kind controller lifecycle and refcounted dynamic watch
//! registration.
//!
//! The definition reconciler starts and stops a composite-kind controller
//! as XRDs are created, change their referenceable version, or are deleted
//! (§4.J). The composer discovers which composed kinds a running
//! composition touches only at render time, so watches on those kinds are
//! registered and torn down dynamically rather than declared up front the
//! way `kube_runtime::Controller::owns` does at startup.
//!
//! Both halves are adapted from the same idea `kube_runtime::Controller`
//! applies statically: a background task drives a kind's reconcile loop (or
//! its watch stream) for as long as something references it, identified
//! here by name/key rather than by type.

use std::collections::HashMap;
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use xp_core::gvk::GroupVersionKind;

/// Opaque handle to a dynamic watch registration, returned by
/// [`WatchRegistry::start_watch`] and required to [`WatchRegistry::
/// stop_watch`] it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WatchId(u64);

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct WatchKey {
    gvk: GroupVersionKind,
    namespace: Option<String>,
}

struct WatchSlot {
    key: WatchKey,
    refcount: usize,
    task: JoinHandle<()>,
}

/// Refcounted registry of dynamic watches, keyed by `(GroupVersionKind,
/// namespace)`. Multiple callers referencing the same kind/namespace share
/// one underlying watch task; the task is torn down only when the last
/// referencing caller releases it.
#[derive(Default)]
pub struct WatchRegistry {
    next_id: u64,
    by_id: HashMap<WatchId, WatchKey>,
    by_key: HashMap<WatchKey, WatchSlot>,
}

impl WatchRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register interest in watching `gvk` in `namespace`, spawning the
    /// underlying watch task (via `spawn`) if this is the first caller for
    /// this key, or incrementing a refcount if another caller is already
    /// watching it.
    ///
    /// `spawn` is called at most once per distinct `(gvk, namespace)` while
    /// any caller holds a reference to it.
    pub fn start_watch(
        &mut self,
        gvk: GroupVersionKind,
        namespace: Option<String>,
        spawn: impl FnOnce() -> JoinHandle<()>,
    ) -> WatchId {
        let key = WatchKey { gvk, namespace };
        self.next_id += 1;
        let id = WatchId(self.next_id);
        self.by_id.insert(id, key.clone());

        match self.by_key.get_mut(&key) {
            Some(slot) => {
                slot.refcount += 1;
                debug!(gvk = %slot.key.gvk, refcount = slot.refcount, "reusing existing watch");
            }
            None => {
                let task = spawn();
                debug!(gvk = %key.gvk, "started new watch");
                self.by_key.insert(key.clone(), WatchSlot { key, refcount: 1, task });
            }
        }
        id
    }

    /// Release a previously started watch reference. Aborts and removes
    /// the underlying watch task once its refcount reaches zero. Stopping
    /// an unknown or already-stopped `WatchId` is a no-op.
    pub fn stop_watch(&mut self, id: WatchId) {
        let Some(key) = self.by_id.remove(&id) else {
            return;
        };
        if let Some(slot) = self.by_key.get_mut(&key) {
            slot.refcount = slot.refcount.saturating_sub(1);
            if slot.refcount == 0 {
                if let Some(slot) = self.by_key.remove(&key) {
                    slot.task.abort();
                    debug!(gvk = %slot.key.gvk, "stopped watch, no remaining references");
                }
            }
        }
    }

    /// Number of distinct `(gvk, namespace)` keys currently watched.
    pub fn active_watch_count(&self) -> usize {
        self.by_key.len()
    }
}

impl Drop for WatchRegistry {
    fn drop(&mut self) {
        for (_, slot) in self.by_key.drain() {
            slot.task.abort();
        }
    }
}

/// Tracks one running controller (a composite kind's reconcile loop) per
/// name, the way the definition reconciler starts one controller per XRD
/// and stops it when the XRD is deleted or its storage version changes
/// (§4.J).
#[derive(Default)]
pub struct ControllerEngine {
    running: HashMap<String, JoinHandle<()>>,
}

impl ControllerEngine {
    /// Create an empty engine.
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a controller under `name` if one is not already running.
    /// Idempotent: calling this again for a name that is already running
    /// is a no-op and `spawn` is not invoked.
    pub fn start(&mut self, name: impl Into<String>, spawn: impl FnOnce() -> JoinHandle<()>) {
        let name = name.into();
        if self.running.contains_key(&name) {
            debug!(controller = %name, "controller already running");
            return;
        }
        let handle = spawn();
        self.running.insert(name, handle);
    }

    /// Stop the controller running under `name`, if any. Idempotent:
    /// stopping an unknown or already-stopped name is a no-op.
    pub fn stop(&mut self, name: &str) {
        if let Some(handle) = self.running.remove(name) {
            handle.abort();
        } else {
            warn!(controller = name, "stop requested for controller that is not running");
        }
    }

    /// Whether a controller is currently running under `name`.
    pub fn is_running(&self, name: &str) -> bool {
        self.running.contains_key(name)
    }

    /// Names of all currently running controllers.
    pub fn running_names(&self) -> Vec<String> {
        self.running.keys().cloned().collect()
    }
}

impl Drop for ControllerEngine {
    fn drop(&mut self) {
        for (_, handle) in self.running.drain() {
            handle.abort();
        }
    }
}
