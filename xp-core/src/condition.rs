//! Kubernetes-style status conditions.

use serde::{Deserialize, Serialize};

/// Tri-state condition status, as used by every Kubernetes `Condition`
/// struct in the wild.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConditionStatus {
    /// The condition holds.
    True,
    /// The condition does not hold.
    False,
    /// The condition's truth value is not currently known.
    Unknown,
}

/// A single status condition, following `metav1.Condition`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Condition {
    /// The condition's type, e.g. `Ready`, `Synced`.
    #[serde(rename = "type")]
    pub type_: String,
    /// Whether the condition currently holds.
    pub status: ConditionStatus,
    /// A short machine-readable reason for the current status.
    pub reason: String,
    /// A human-readable message elaborating on the reason.
    #[serde(default)]
    pub message: String,
    /// RFC3339 timestamp of the condition's last transition.
    #[serde(rename = "lastTransitionTime", skip_serializing_if = "Option::is_none")]
    pub last_transition_time: Option<String>,
}

impl Condition {
    /// Construct a condition, leaving the transition timestamp for the
    /// caller to stamp at apply time (this crate does not read the clock).
    pub fn new(type_: &str, status: ConditionStatus, reason: &str, message: impl Into<String>) -> Self {
        Self {
            type_: type_.to_string(),
            status,
            reason: reason.to_string(),
            message: message.into(),
            last_transition_time: None,
        }
    }

    /// The `Synced` condition reporting a successful reconcile (§7).
    pub fn reconcile_success() -> Self {
        Self::new("Synced", ConditionStatus::True, "ReconcileSuccess", "")
    }

    /// The `Synced` condition reporting a recoverable reconcile failure.
    /// The message must never embed an `Invalid`-kind error's text (§7).
    pub fn reconcile_error(message: impl Into<String>) -> Self {
        Self::new("Synced", ConditionStatus::False, "ReconcileError", message)
    }

    /// The `Synced` condition reporting that reconciliation is paused.
    pub fn reconcile_paused() -> Self {
        Self::new(
            "Synced",
            ConditionStatus::False,
            "ReconcilePaused",
            "Reconciliation is paused via the pause annotation",
        )
    }

    /// The `Ready` condition reporting every composed resource is ready.
    pub fn available() -> Self {
        Self::new("Ready", ConditionStatus::True, "Available", "")
    }

    /// The `Ready` condition reporting some composed resources are not yet
    /// ready, naming the first few by logical name.
    pub fn creating(unready: &[String]) -> Self {
        let message = if unready.is_empty() {
            "Unknown composed resources are not yet ready".to_string()
        } else {
            format!("Unready resources: {}", unready.join(", "))
        };
        Self::new("Ready", ConditionStatus::False, "Creating", message)
    }

    /// Force a not-yet-reported pipeline condition to `Unknown` after a
    /// fatal pipeline result, so stale status cannot mislead (§7).
    pub fn unknown_after_fatal(type_: &str) -> Self {
        Self::new(type_, ConditionStatus::Unknown, "FatalError", "")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn creating_lists_unready_names() {
        let c = Condition::creating(&["db".into(), "cache".into()]);
        assert_eq!(c.message, "Unready resources: db, cache");
        assert_eq!(c.status, ConditionStatus::False);
    }
}
