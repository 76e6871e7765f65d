//! `CompositeResourceDefinition` (XRD) types (§3).

use crate::error::Error;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use serde::{Deserialize, Serialize};

/// Scope of the defined composite kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Scope {
    /// Namespaced composite resources.
    Namespaced,
    /// Cluster-scoped composite resources.
    Cluster,
}

/// A single served version of a composite kind.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct XrdVersion {
    /// Version name, e.g. `v1alpha1`.
    pub name: String,
    /// Whether this version is the storage version. At most one version
    /// may set this.
    #[serde(default)]
    pub served: bool,
    /// Whether this is the storage version.
    #[serde(default)]
    pub storage: bool,
    /// Whether this version may be referenced by a composition's
    /// `compositeTypeRef`. At most one version may set this.
    #[serde(default)]
    pub referenceable: bool,
    /// OpenAPI v3 schema for the composite's `spec`/`status`, as an opaque
    /// JSON value (parsing it further is the definition reconciler's job
    /// when rendering the CRD).
    pub schema: serde_json::Value,
}

/// Reference to a specific composition, by name.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompositionRef {
    /// The referenced composition's name.
    pub name: String,
}

/// Claim-level kind names, for XRDs that support a claim in addition to the
/// composite kind itself.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClaimNames {
    /// Singular claim kind.
    pub kind: String,
    /// Plural claim kind.
    pub plural: String,
}

/// The specification of an XRD.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct XrdSpec {
    /// API group of the defined composite kind.
    pub group: String,
    /// Plural/singular/kind names.
    pub names: XrdNames,
    /// Optional claim-level kind names.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub claim_names: Option<ClaimNames>,
    /// Scope of the defined composite kind.
    pub scope: Scope,
    /// Ordered set of served versions.
    pub versions: Vec<XrdVersion>,
    /// Default composition to use if the composite does not reference one
    /// explicitly, tried before falling back to the label selector.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_composition_ref: Option<CompositionRef>,
    /// Composition that overrides any composite-level reference.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enforced_composition_ref: Option<CompositionRef>,
    /// Keys that may be exported as connection secret entries. An empty
    /// list publishes all keys (§4.D, §9 Open Question).
    #[serde(default)]
    pub connection_secret_keys: Vec<String>,
}

/// The Kubernetes-style plural/singular/kind naming block.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct XrdNames {
    /// Plural form, used in URL paths.
    pub plural: String,
    /// Singular form.
    pub singular: String,
    /// CamelCase kind name.
    pub kind: String,
}

/// A `CompositeResourceDefinition`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompositeResourceDefinition {
    /// Resource name (`<plural>.<group>`, by Kubernetes convention).
    pub name: String,
    /// Standard object metadata: UID, finalizers, deletion timestamp.
    #[serde(default)]
    pub metadata: ObjectMeta,
    /// The XRD's specification.
    pub spec: XrdSpec,
}

impl CompositeResourceDefinition {
    /// Validate the invariants stated in §3: at most one storage version,
    /// at most one referenceable version, every schema non-empty.
    pub fn validate(&self) -> Result<(), Error> {
        if self.spec.versions.is_empty() {
            return Err(Error::Invalid(format!("{}: no versions declared", self.name)));
        }
        let storage_count = self.spec.versions.iter().filter(|v| v.storage).count();
        if storage_count != 1 {
            return Err(Error::Invalid(format!(
                "{}: exactly one version must be marked storage, found {}",
                self.name, storage_count
            )));
        }
        let referenceable_count = self.spec.versions.iter().filter(|v| v.referenceable).count();
        if referenceable_count > 1 {
            return Err(Error::Invalid(format!(
                "{}: at most one version may be marked referenceable, found {}",
                self.name, referenceable_count
            )));
        }
        for v in &self.spec.versions {
            if v.schema.is_null() {
                return Err(Error::Invalid(format!(
                    "{}: version {} has an empty schema",
                    self.name, v.name
                )));
            }
        }
        Ok(())
    }

    /// The version marked `storage: true`, if the XRD validates.
    pub fn storage_version(&self) -> Option<&XrdVersion> {
        self.spec.versions.iter().find(|v| v.storage)
    }

    /// The version marked `referenceable: true`, if any.
    pub fn referenceable_version(&self) -> Option<&XrdVersion> {
        self.spec.versions.iter().find(|v| v.referenceable)
    }

    /// The `GroupVersionKind` of the defined composite kind at its storage
    /// version.
    pub fn composite_gvk(&self) -> Option<crate::gvk::GroupVersionKind> {
        self.storage_version().map(|v| crate::gvk::GroupVersionKind {
            group: self.spec.group.clone(),
            version: v.name.clone(),
            kind: self.spec.names.kind.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn version(name: &str, storage: bool, referenceable: bool) -> XrdVersion {
        XrdVersion {
            name: name.into(),
            served: true,
            storage,
            referenceable,
            schema: json!({"type": "object"}),
        }
    }

    fn xrd(versions: Vec<XrdVersion>) -> CompositeResourceDefinition {
        CompositeResourceDefinition {
            name: "xpostgresqlinstances.example.org".into(),
            metadata: ObjectMeta::default(),
            spec: XrdSpec {
                group: "example.org".into(),
                names: XrdNames {
                    plural: "xpostgresqlinstances".into(),
                    singular: "xpostgresqlinstance".into(),
                    kind: "XPostgreSQLInstance".into(),
                },
                claim_names: None,
                scope: Scope::Namespaced,
                versions,
                default_composition_ref: None,
                enforced_composition_ref: None,
                connection_secret_keys: vec![],
            },
        }
    }

    #[test]
    fn rejects_multiple_storage_versions() {
        let x = xrd(vec![version("v1", true, true), version("v2", true, false)]);
        assert!(x.validate().is_err());
    }

    #[test]
    fn rejects_multiple_referenceable_versions() {
        let x = xrd(vec![version("v1", true, true), version("v2", false, true)]);
        assert!(x.validate().is_err());
    }

    #[test]
    fn accepts_single_storage_and_referenceable() {
        let x = xrd(vec![version("v1", true, true)]);
        assert!(x.validate().is_ok());
    }

    #[test]
    fn rejects_empty_schema() {
        let mut v = version("v1", true, true);
        v.schema = serde_json::Value::Null;
        let x = xrd(vec![v]);
        assert!(x.validate().is_err());
    }
}
