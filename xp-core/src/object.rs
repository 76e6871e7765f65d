//! The polymorphic composed-resource envelope (§9 Design Notes).
//!
//! Rather than a class hierarchy per composed kind, a composed resource is
//! represented as a tagged envelope carrying an opaque body; all code
//! branches on `gvk`, never on a Rust type. This is the same shape as
//! `kube_core::DynamicObject`, specialized to what the composer needs:
//! connection details and a three-valued readiness signal alongside the
//! body.

use crate::gvk::GroupVersionKind;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, OwnerReference};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

/// Three-valued readiness, mirroring the function-protocol's
/// `{unspecified, true, false}` enum (§6).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum Readiness {
    /// No readiness signal was returned; treated as not-ready for the
    /// purposes of the XR's `Available` computation, but does not block a
    /// fresh reconcile the way an explicit `false` does.
    #[default]
    Unknown,
    /// The resource is ready.
    True,
    /// The resource is explicitly not ready.
    False,
}

impl Readiness {
    /// Whether this readiness counts as "ready" for the XR-level
    /// `Available` computation, which requires every resource be exactly
    /// `true` (§4.H step 13).
    pub fn is_ready(self) -> bool {
        matches!(self, Readiness::True)
    }
}

/// A composed resource, observed or desired.
///
/// Identified by a stable logical `resource_name` (the
/// `composition-resource-name` annotation) in addition to its GVK+name(+
/// namespace). `body` is the rendered object minus metadata, kept opaque
/// (`serde_json::Value`) because its schema is whatever the pipeline
/// function decided to produce.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComposedObject {
    /// The logical name keying the observed/desired maps.
    pub resource_name: String,
    /// The kind of the rendered object.
    pub gvk: GroupVersionKind,
    /// Standard object metadata (name, namespace, labels, annotations,
    /// owner references).
    pub metadata: ObjectMeta,
    /// The rendered body, excluding `apiVersion`/`kind`/`metadata`.
    pub body: serde_json::Value,
    /// Connection details extracted from (for observed) or destined for
    /// (for desired) this resource.
    #[serde(default)]
    pub connection_details: BTreeMap<String, Vec<u8>>,
    /// Three-valued readiness.
    #[serde(default)]
    pub ready: Readiness,
}

impl ComposedObject {
    /// Whether `owner` is the controlling owner reference on this object.
    pub fn is_controlled_by(&self, owner_uid: &str) -> bool {
        self.metadata
            .owner_references
            .iter()
            .flatten()
            .any(|o| o.controller == Some(true) && o.uid == owner_uid)
    }

    /// Set (replacing any existing) controller owner reference.
    pub fn set_controller(&mut self, owner: OwnerReference) {
        let refs = self.metadata.owner_references.get_or_insert_with(Vec::new);
        refs.retain(|r| r.controller != Some(true));
        refs.push(owner);
    }
}

/// Compute the per-XR field-owner identity used when server-side-applying
/// composed resources (§4.F step 8, §9).
///
/// The hash input is deliberately just `xr_name + xr_group_kind`: UID is
/// excluded because it is non-deterministic across a restore, namespace is
/// excluded because XRs have none, and version is excluded so that a
/// composition can migrate a composed resource's apiVersion without losing
/// field ownership.
pub fn composed_field_owner(xr_name: &str, xr_group_kind: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(xr_name.as_bytes());
    hasher.update(xr_group_kind.as_bytes());
    let digest = hasher.finalize();
    let hex = hex_encode(&digest);
    format!("{}{}", crate::labels::FIELD_OWNER_COMPOSED_PREFIX, &hex[..32])
}

fn hex_encode(bytes: &[u8]) -> String {
    use std::fmt::Write;
    let mut s = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        let _ = write!(s, "{b:02x}");
    }
    s
}

/// Truncate a sha256 hex digest to the 63-character label-value maximum
/// (§9 "Revision hash truncation").
pub fn truncate_label_hash(full_hex: &str) -> String {
    full_hex.chars().take(63).collect()
}

/// Content hash of an arbitrary JSON-serializable spec, as used both for
/// composition-revision selection (§4.E) and anywhere else a deterministic
/// content fingerprint is needed.
pub fn content_hash(value: &serde_json::Value) -> String {
    // `serde_json::Value`'s `Display`/`to_string` is not guaranteed stable
    // key ordering for raw maps, but `serde_json::Map` is a `BTreeMap` by
    // default in this workspace's configuration, so canonical key order is
    // guaranteed without a separate canonicalization pass.
    let canonical = serde_json::to_vec(value).expect("JSON values are always serializable");
    let mut hasher = Sha256::new();
    hasher.update(&canonical);
    hex_encode(&hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn field_owner_is_deterministic_and_32_hex_chars() {
        let a = composed_field_owner("my-xr", "XPostgreSQLInstance.example.org");
        let b = composed_field_owner("my-xr", "XPostgreSQLInstance.example.org");
        assert_eq!(a, b);
        assert_eq!(a.len(), crate::labels::FIELD_OWNER_COMPOSED_PREFIX.len() + 32);
    }

    #[test]
    fn field_owner_differs_by_name() {
        let a = composed_field_owner("xr-a", "Foo.example.org");
        let b = composed_field_owner("xr-b", "Foo.example.org");
        assert_ne!(a, b);
    }

    #[test]
    fn readiness_default_is_unknown_and_not_ready() {
        assert_eq!(Readiness::default(), Readiness::Unknown);
        assert!(!Readiness::Unknown.is_ready());
        assert!(Readiness::True.is_ready());
    }

    #[test]
    fn content_hash_truncation_is_63_chars() {
        let long = "a".repeat(64);
        assert_eq!(truncate_label_hash(&long).len(), 63);
    }
}
