//! Event recording, adapted from `kube_runtime::events::Recorder`.
//!
//! A real Kubernetes controller surfaces reconcile outcomes as `Event`
//! objects attached to the reconciled resource, visible via `kubectl
//! describe`. This system has no API server to post events to, so the
//! default implementation logs structured events instead; a future
//! integration can implement [`EventRecorder`] against a real event sink
//! without touching reconciler code.

use async_trait::async_trait;
use tracing::{info, warn};
use xp_core::gvk::GroupVersionKind;

/// Severity of a recorded event, mirroring `k8s_openapi`'s conventional
/// `Normal`/`Warning` event types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventType {
    /// A routine, expected occurrence.
    Normal,
    /// Something a cluster operator should notice.
    Warning,
}

/// A single event, attached to the object identified by `gvk`/`namespace`/
/// `name`.
#[derive(Debug, Clone)]
pub struct Event {
    /// Severity.
    pub type_: EventType,
    /// Short, machine-readable reason, e.g. `ComposeError`.
    pub reason: String,
    /// Human-readable detail.
    pub message: String,
    /// The kind of the object this event is about.
    pub gvk: GroupVersionKind,
    /// The object's namespace, if namespaced.
    pub namespace: Option<String>,
    /// The object's name.
    pub name: String,
}

/// Publishes reconcile-outcome events. Implementations must tolerate being
/// called from many concurrent reconciles and must not itself cause a
/// reconcile to fail if publishing an event fails.
#[async_trait]
pub trait EventRecorder: Send + Sync {
    /// Publish `event`. Errors are logged by the implementation, not
    /// propagated, matching `kube_runtime`'s "events are best-effort"
    /// stance.
    async fn publish(&self, event: Event);
}

/// Records events as structured log lines. Used in every environment that
/// has no cluster event sink to publish to, including all tests in this
/// workspace.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingRecorder;

#[async_trait]
impl EventRecorder for LoggingRecorder {
    async fn publish(&self, event: Event) {
        match event.type_ {
            EventType::Normal => info!(
                gvk = %event.gvk,
                namespace = event.namespace.as_deref().unwrap_or(""),
                name = %event.name,
                reason = %event.reason,
                "{}",
                event.message
            ),
            EventType::Warning => warn!(
                gvk = %event.gvk,
                namespace = event.namespace.as_deref().unwrap_or(""),
                name = %event.name,
                reason = %event.reason,
                "{}",
                event.message
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gvk() -> GroupVersionKind {
        GroupVersionKind {
            group: "example.org".into(),
            version: "v1alpha1".into(),
            kind: "XPostgreSQLInstance".into(),
        }
    }

    #[tokio::test]
    async fn logging_recorder_accepts_normal_and_warning_events() {
        let recorder = LoggingRecorder;
        recorder
            .publish(Event {
                type_: EventType::Normal,
                reason: "ComposeSuccess".into(),
                message: "composed 3 resources".into(),
                gvk: gvk(),
                namespace: Some("default".into()),
                name: "my-instance".into(),
            })
            .await;
        recorder
            .publish(Event {
                type_: EventType::Warning,
                reason: "ComposeError".into(),
                message: "function pipeline did not converge".into(),
                gvk: gvk(),
                namespace: Some("default".into()),
                name: "my-instance".into(),
            })
            .await;
    }
}
