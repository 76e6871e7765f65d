//! The package document types extracted from a pulled OCI image (§3, §4.B).

use serde::{Deserialize, Serialize};
use xp_core::lock::PackageType;

/// The legacy dependency shapes a meta document's `spec.dependsOn` entries
/// may arrive in (§4.C `ConvertDependencies`).
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(untagged)]
pub enum RawDependency {
    /// Shape 1: explicit `{apiVersion, kind, package}`.
    Explicit {
        /// `apiVersion` of the dependency's meta document.
        #[serde(rename = "apiVersion")]
        api_version: String,
        /// Kind of the dependency (`Provider`|`Configuration`|`Function`).
        kind: String,
        /// The dependency's OCI source.
        package: String,
        /// The dependency's version constraint.
        #[serde(default)]
        version: String,
    },
    /// Shape 2: a single `provider|configuration|function` field naming the
    /// source, with the constraint alongside.
    Shorthand(std::collections::BTreeMap<String, String>),
}

/// A package's embedded `meta.yaml` document (§4.B, §4.C).
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PackageMeta {
    /// `apiVersion` of the meta document, e.g. `meta.pkg.crossplane.io/v1`.
    #[serde(rename = "apiVersion")]
    pub api_version: String,
    /// The meta document's kind: `Provider`, `Configuration`, or
    /// `Function`.
    pub kind: String,
    /// The package's own declared dependencies, in whatever legacy shape
    /// the document used.
    #[serde(default, rename = "dependsOn")]
    pub depends_on: Vec<RawDependency>,
}

impl PackageMeta {
    /// This meta document's package type, derived from `kind`.
    pub fn package_type(&self) -> Option<PackageType> {
        match self.kind.as_str() {
            "Provider" => Some(PackageType::Provider),
            "Configuration" => Some(PackageType::Configuration),
            "Function" => Some(PackageType::Function),
            _ => None,
        }
    }
}

/// A fetched OCI package.
#[derive(Debug, Clone)]
pub struct Package {
    /// The OCI source (repository, no tag/digest) this was pulled from.
    pub source: String,
    /// The full digest of the pulled image.
    pub digest: String,
    /// The parsed meta document.
    pub meta: PackageMeta,
    /// Any embedded CRD manifests (only present for `Configuration` and
    /// `Provider` packages), as raw YAML values.
    pub crds: Vec<serde_yaml::Value>,
}
