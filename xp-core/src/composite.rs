//! The composite resource (XR) type (§3).

use crate::condition::Condition;
use crate::gvk::GroupVersionKind;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use serde::{Deserialize, Serialize};

/// How a composite resource selects the composition it uses.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct CompositionReference {
    /// An explicit reference by composition name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub composition_ref: Option<String>,
    /// A label selector, used when no explicit/default/enforced ref
    /// applies.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub composition_selector: Option<std::collections::BTreeMap<String, String>>,
    /// A pinned revision name. Once set, fetches skip composition-hash
    /// resolution entirely unless the update policy is `Automatic`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub composition_revision_ref: Option<String>,
    /// Whether the revision reference should be kept current automatically.
    #[serde(default)]
    pub composition_update_policy: CompositionUpdatePolicy,
}

/// Update policy governing whether an XR's pinned revision is advanced
/// automatically.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum CompositionUpdatePolicy {
    /// Automatically move to the latest revision matching the referenced
    /// composition.
    #[default]
    Automatic,
    /// Never move the revision reference except by explicit user edit.
    Manual,
}

/// A persisted reference to a composed resource, stable across reconciles.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
pub struct ResourceRef {
    /// `apiVersion` of the referenced composed resource.
    pub api_version: String,
    /// Kind of the referenced composed resource.
    pub kind: String,
    /// Name of the referenced composed resource.
    pub name: String,
}

impl ResourceRef {
    /// Build from a `GroupVersionKind` and name; sorting key is
    /// `apiVersion+kind+name` per §3's ordering invariant, which the
    /// derived `Ord` on this struct's field order already implements.
    pub fn new(gvk: &GroupVersionKind, name: &str) -> Self {
        Self {
            api_version: gvk.api_version(),
            kind: gvk.kind.clone(),
            name: name.to_string(),
        }
    }
}

/// A reference to the claim that created this composite, if any.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClaimReference {
    /// Claim's `apiVersion`.
    pub api_version: String,
    /// Claim's kind.
    pub kind: String,
    /// Claim's name.
    pub name: String,
    /// Claim's namespace.
    pub namespace: String,
}

/// Where to publish connection details for this composite.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecretReference {
    /// Secret name.
    pub name: String,
    /// Secret namespace.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
}

/// The composite resource's status block.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct CompositeStatus {
    /// Status conditions.
    #[serde(default)]
    pub conditions: Vec<Condition>,
    /// Arbitrary user-schema status fields, opaque to the reconciler.
    #[serde(default)]
    pub extra: serde_json::Value,
}

impl CompositeStatus {
    /// Insert or replace the condition of the same type.
    pub fn set_condition(&mut self, condition: Condition) {
        if let Some(existing) = self.conditions.iter_mut().find(|c| c.type_ == condition.type_) {
            *existing = condition;
        } else {
            self.conditions.push(condition);
        }
    }

    /// Fetch a condition by type.
    pub fn condition(&self, type_: &str) -> Option<&Condition> {
        self.conditions.iter().find(|c| c.type_ == type_)
    }
}

/// A composite resource (XR): an instance of an XRD-defined kind.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompositeResource {
    /// The composite's kind identity.
    pub gvk: GroupVersionKind,
    /// Standard object metadata.
    pub metadata: ObjectMeta,
    /// How this composite selects/pins its composition.
    #[serde(default)]
    pub composition_reference: CompositionReference,
    /// Ordered, deterministically sorted references to this XR's composed
    /// resources.
    #[serde(default)]
    pub resource_refs: Vec<ResourceRef>,
    /// Reference to the claim that created this composite, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub claim_reference: Option<ClaimReference>,
    /// Where to publish this composite's connection details.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub write_connection_secret_to: Option<SecretReference>,
    /// User-defined spec fields, opaque to the reconciler.
    #[serde(default)]
    pub spec_extra: serde_json::Value,
    /// Status block.
    #[serde(default)]
    pub status: CompositeStatus,
}

impl CompositeResource {
    /// Sort and deduplicate `resource_refs`, preserving the determinism
    /// invariant from §3 ("the order of resourceRefs is stable across
    /// reconciles, sorted by apiVersion+kind+name").
    pub fn normalize_resource_refs(&mut self) {
        self.resource_refs.sort();
        self.resource_refs.dedup();
    }

    /// Whether the `crossplane.io/paused` annotation is set to `"true"`.
    pub fn is_paused(&self) -> bool {
        self.metadata
            .annotations
            .as_ref()
            .and_then(|a| a.get(crate::labels::ANNOTATION_PAUSED))
            .map(|v| v == crate::labels::PAUSED_TRUE)
            .unwrap_or(false)
    }

    /// The name-prefix label used to derive `generateName` for unnamed
    /// composed resources.
    pub fn name_prefix_label(&self) -> Option<&str> {
        self.metadata
            .labels
            .as_ref()
            .and_then(|l| l.get(crate::labels::LABEL_COMPOSITE_NAME_PREFIX))
            .map(|s| s.as_str())
    }

    /// `group/kind` string used as half the input to the composed
    /// field-owner hash.
    pub fn group_kind(&self) -> String {
        format!("{}.{}", self.gvk.kind, self.gvk.group)
    }
}
