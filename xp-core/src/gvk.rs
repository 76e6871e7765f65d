//! Type information for resources whose schema is not known at compile time.
//!
//! Every composite and composed resource in this system is dynamic: the
//! kinds are declared at runtime by a `CompositeResourceDefinition` and by
//! whatever a composition function renders, so unlike `k8s_openapi` types we
//! cannot carry `GROUP`/`VERSION`/`KIND` as associated constants. This
//! mirrors `kube_core::gvk`.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Failed to parse a `group/version` string.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("failed to parse group version: {0}")]
pub struct ParseGroupVersionError(pub String);

/// API group and version, without a kind.
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GroupVersion {
    /// API group. Empty string denotes the legacy core group.
    pub group: String,
    /// API version, e.g. `v1`, `v1beta1`.
    pub version: String,
}

impl GroupVersion {
    /// Construct from explicit group and version.
    pub fn gv(group: &str, version: &str) -> Self {
        Self {
            group: group.to_string(),
            version: version.to_string(),
        }
    }

    /// Upgrade to a `GroupVersionKind`.
    pub fn with_kind(self, kind: &str) -> GroupVersionKind {
        GroupVersionKind {
            group: self.group,
            version: self.version,
            kind: kind.to_string(),
        }
    }

    /// The `apiVersion` string used in an object's YAML/JSON form.
    pub fn api_version(&self) -> String {
        if self.group.is_empty() {
            self.version.clone()
        } else {
            format!("{}/{}", self.group, self.version)
        }
    }
}

impl FromStr for GroupVersion {
    type Err = ParseGroupVersionError;

    fn from_str(gv: &str) -> Result<Self, Self::Err> {
        let parts = gv.splitn(2, '/').collect::<Vec<_>>();
        let (group, version) = match *parts.as_slice() {
            [g, v] => (g.to_string(), v.to_string()),
            [v] => (String::new(), v.to_string()),
            _ => return Err(ParseGroupVersionError(gv.into())),
        };
        Ok(Self { group, version })
    }
}

/// Full identity of a dynamic resource kind.
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GroupVersionKind {
    /// API group.
    pub group: String,
    /// API version.
    pub version: String,
    /// Kind name, e.g. `CompositeResourceDefinition`.
    pub kind: String,
}

impl GroupVersionKind {
    /// Construct from explicit group, version, and kind.
    pub fn gvk(group: &str, version: &str, kind: &str) -> Self {
        Self {
            group: group.to_string(),
            version: version.to_string(),
            kind: kind.to_string(),
        }
    }

    /// The `apiVersion` string used in an object's YAML/JSON form.
    pub fn api_version(&self) -> String {
        GroupVersion::gv(&self.group, &self.version).api_version()
    }

    /// Drop the kind, keeping just the group/version.
    pub fn group_version(&self) -> GroupVersion {
        GroupVersion::gv(&self.group, &self.version)
    }

    /// Parse an `apiVersion`/`kind` pair as they appear on any object.
    pub fn from_api_version_kind(api_version: &str, kind: &str) -> Result<Self, ParseGroupVersionError> {
        Ok(GroupVersion::from_str(api_version)?.with_kind(kind))
    }
}

impl fmt::Display for GroupVersionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.api_version(), self.kind)
    }
}
