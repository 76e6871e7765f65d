//! Composition and CompositionRevision types (§3).

use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A reference to the composite kind a composition produces instances of.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CompositeTypeRef {
    /// `apiVersion` of the composite kind.
    pub api_version: String,
    /// Kind name of the composite.
    pub kind: String,
}

/// A single step in a composition's function pipeline.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PipelineStep {
    /// The step's name, unique within the pipeline. Used for event/result
    /// attribution and as the RPC's logical step identity.
    pub step: String,
    /// The name of the function (an installed `Function` package) that
    /// implements this step.
    pub function_ref: String,
    /// Opaque input blob passed to the function verbatim.
    #[serde(default)]
    pub input: serde_json::Value,
}

/// A composition's immutable pipeline specification.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CompositionSpec {
    /// The composite kind this composition produces instances of.
    pub composite_type_ref: CompositeTypeRef,
    /// The ordered pipeline of functions.
    pub pipeline: Vec<PipelineStep>,
}

/// A `Composition`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Composition {
    /// The composition's name.
    pub name: String,
    /// A UID stable across the composition's lifetime (used as the owner
    /// reference target for its revisions).
    pub uid: String,
    /// Labels, consulted by a composite's `compositionSelector` when it has
    /// no explicit or enforced reference (§4.E).
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    /// Optional limit on how many historical revisions to retain before
    /// garbage-collecting the oldest.
    #[serde(default)]
    pub revision_history_limit: Option<u32>,
    /// The composition's spec.
    pub spec: CompositionSpec,
}

impl Composition {
    /// Content hash of `spec`, used to determine whether a new revision is
    /// needed (§4.E).
    pub fn content_hash(&self) -> String {
        let value = serde_json::to_value(&self.spec).expect("CompositionSpec is always serializable");
        crate::object::content_hash(&value)
    }

    /// Build an `OwnerReference` pointing at this composition, for
    /// revisions it owns.
    pub fn owner_reference(&self, api_version: &str, controller: bool) -> OwnerReference {
        OwnerReference {
            api_version: api_version.to_string(),
            kind: "Composition".to_string(),
            name: self.name.clone(),
            uid: self.uid.clone(),
            controller: Some(controller),
            block_owner_deletion: Some(true),
        }
    }
}

/// A content-addressed, immutable snapshot of a composition's spec.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompositionRevision {
    /// The revision's own name (typically `<composition>-<hash-prefix>`).
    pub name: String,
    /// Owner references; the owning composition is found via a controller
    /// reference among these.
    #[serde(default)]
    pub owner_references: Vec<OwnerReference>,
    /// The 63-char truncated content-hash label value.
    pub hash_label: String,
    /// Monotonically increasing revision number, scoped to the owning
    /// composition.
    pub revision: u64,
    /// Deep copy of the composition spec this revision snapshots.
    pub spec: CompositionSpec,
}

impl CompositionRevision {
    /// Whether `composition_uid` controls this revision.
    pub fn is_owned_by(&self, composition_uid: &str) -> bool {
        self.owner_references
            .iter()
            .any(|o| o.controller == Some(true) && o.uid == composition_uid)
    }
}
