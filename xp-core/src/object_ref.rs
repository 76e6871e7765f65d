//! A typed-by-value reference to an object in the store.
//!
//! Every resource kind in this system is dynamic (declared by an XRD or
//! rendered by a function at runtime), so unlike `kube_runtime::ObjectRef<K>`
//! this `ObjectRef` carries its `GroupVersionKind` as data rather than as a
//! generic parameter. It plays the same role: a hashable, comparable handle
//! used by the watch registry and the garbage collector.

use crate::gvk::GroupVersionKind;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use serde::{Deserialize, Serialize};
use std::fmt;

/// A namespaced (if relevant) reference to an object of a known kind.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ObjectRef {
    /// The kind of the referenced object.
    pub gvk: GroupVersionKind,
    /// The object's name.
    pub name: String,
    /// The object's namespace, if the kind is namespaced.
    pub namespace: Option<String>,
}

impl ObjectRef {
    /// Construct a cluster-scoped reference.
    pub fn new(gvk: GroupVersionKind, name: &str) -> Self {
        Self {
            gvk,
            name: name.to_string(),
            namespace: None,
        }
    }

    /// Attach a namespace.
    #[must_use]
    pub fn within(mut self, namespace: &str) -> Self {
        self.namespace = Some(namespace.to_string());
        self
    }

    /// Build a reference from an `OwnerReference`, given the namespace the
    /// owner must live in (owners are always in the same namespace as the
    /// owned object, or cluster-scoped).
    pub fn from_owner_ref(namespace: Option<&str>, owner: &OwnerReference) -> Option<Self> {
        let gvk = GroupVersionKind::from_api_version_kind(&owner.api_version, &owner.kind).ok()?;
        Some(Self {
            gvk,
            name: owner.name.clone(),
            namespace: namespace.map(String::from),
        })
    }
}

impl fmt::Display for ObjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.namespace {
            Some(ns) => write!(f, "{}.{}/{}/{}", self.gvk.kind, self.gvk.group, ns, self.name),
            None => write!(f, "{}.{}/{}", self.gvk.kind, self.gvk.group, self.name),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn different_kinds_with_same_name_are_distinct() {
        let a = ObjectRef::new(GroupVersionKind::gvk("", "v1", "Secret"), "x");
        let b = ObjectRef::new(GroupVersionKind::gvk("", "v1", "ConfigMap"), "x");
        assert_ne!(a, b);
    }

    #[test]
    fn namespace_participates_in_equality() {
        let a = ObjectRef::new(GroupVersionKind::gvk("", "v1", "Secret"), "x");
        let b = a.clone().within("default");
        assert_ne!(a, b);
    }

    #[test]
    fn from_owner_ref_rejects_unparseable_api_version() {
        let owner = OwnerReference {
            api_version: "a/b/c".into(),
            kind: "Thing".into(),
            name: "x".into(),
            uid: "u".into(),
            ..Default::default()
        };
        assert!(ObjectRef::from_owner_ref(None, &owner).is_none());
    }
}
