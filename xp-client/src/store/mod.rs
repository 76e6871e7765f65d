//! The generic, hierarchical object-store abstraction (§4.A).
//!
//! This plays the role `kube_client::Api<K>` plays for a real Kubernetes
//! client: typed CRUD, list, watch, and a server-side-apply patch mode, all
//! expressed against `xp_core::ComposedObject` (or any `Storable` type) so
//! that `xp-runtime` and `crossplane` never have to know whether the store
//! behind `ObjectStore` is a real API server or the in-memory double used in
//! this workspace's tests.

pub mod memory;

use async_trait::async_trait;
use serde::{de::DeserializeOwned, Serialize};
use std::fmt::Debug;
use thiserror::Error;
use xp_core::gvk::GroupVersionKind;

/// Errors distinguished by the object store (§4.A).
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// The object does not exist.
    #[error("not found: {0}")]
    NotFound(String),
    /// A write raced another writer (resource-version mismatch, or a
    /// server-side-apply field conflict without `force`).
    #[error("conflict: {0}")]
    Conflict(String),
    /// The object failed validation.
    #[error("invalid: {0}")]
    Invalid(String),
    /// No such kind is registered in the store (unknown CRD).
    #[error("no kind match: {0}")]
    NoKindMatch(String),
    /// Any other failure.
    #[error("{0}")]
    Other(String),
}

impl From<StoreError> for xp_core::Error {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound(s) => xp_core::Error::NotFound(s),
            StoreError::Conflict(s) => xp_core::Error::Conflict(s),
            StoreError::Invalid(s) => xp_core::Error::Invalid(s),
            StoreError::NoKindMatch(s) => xp_core::Error::NoKindMatch(s),
            StoreError::Other(s) => xp_core::Error::Other(s),
        }
    }
}

/// Selects objects to list or watch.
#[derive(Debug, Clone, Default)]
pub struct ListParams {
    /// Restrict to a namespace; `None` lists across all namespaces (or is
    /// meaningless for cluster-scoped kinds).
    pub namespace: Option<String>,
    /// An exact-match label selector, ANDed together.
    pub label_selector: std::collections::BTreeMap<String, String>,
    /// An opaque `resourceVersion` to resume a watch from.
    pub resource_version: Option<String>,
}

/// A single page of listed objects plus the store's resourceVersion for the
/// list, used to seed a subsequent watch.
#[derive(Debug, Clone)]
pub struct ObjectList<T> {
    /// The returned items.
    pub items: Vec<T>,
    /// The resourceVersion of the list, to resume a watch from.
    pub resource_version: String,
}

/// A single watch event.
#[derive(Debug)]
pub enum WatchEvent<T> {
    /// An object was added.
    Added(T),
    /// An object was modified.
    Modified(T),
    /// An object was deleted.
    Deleted(T),
    /// The watch desynced and must be restarted from a fresh list.
    Bookmark { resource_version: String },
}

/// A patch to apply to an object.
pub enum Patch<T> {
    /// A server-side apply patch: `obj` carries only the fields the caller
    /// intends to own.
    Apply {
        /// The partial object representing owned fields.
        obj: T,
        /// Identity of the field manager applying this patch.
        field_manager: String,
        /// Force acquisition of fields owned by a conflicting manager.
        force: bool,
    },
    /// A JSON merge patch.
    Merge(serde_json::Value),
    /// An RFC 6902 JSON patch, e.g. the `Test`+`Add`/`Remove` pairs the
    /// finalizer helper uses to safely mutate `metadata.finalizers`
    /// concurrently with other writers.
    Json(json_patch::Patch),
}

/// The generic, typed-CRUD-plus-watch-plus-apply contract every caller in
/// this workspace programs against (§4.A).
///
/// `T` is typically `xp_core::ComposedObject` for composed resources, or a
/// domain type (`xp_core::CompositeResource`, `xp_core::xrd::
/// CompositeResourceDefinition`, ...) for the well-known kinds the core
/// reconcilers manage directly.
#[async_trait]
pub trait ObjectStore<T>: Send + Sync
where
    T: Clone + Debug + Serialize + DeserializeOwned + Send + Sync + 'static,
{
    /// Fetch a single object by GVK/namespace/name.
    async fn get(&self, gvk: &GroupVersionKind, namespace: Option<&str>, name: &str) -> Result<T, StoreError>;

    /// Create a new, already-named object. Name resolution (including
    /// `generateName` expansion) happens client-side before this is called;
    /// see §4.F step 4's uniqueness-biased name generator.
    async fn create(&self, gvk: &GroupVersionKind, namespace: Option<&str>, name: &str, obj: T) -> Result<T, StoreError>;

    /// Dry-run resolution of a `generateName`-style candidate: reports
    /// whether `name` is free without creating or persisting anything.
    /// Mirrors a real API server's `--dry-run=All` create, which runs
    /// name-generation admission but never commits the object, so a caller
    /// resolving a name ahead of §4.F step 6 (persisting `resourceRefs`)
    /// can never leave behind a real, unreferenced orphan if it crashes
    /// before the step-8 apply that actually creates the object.
    async fn name_available(&self, gvk: &GroupVersionKind, namespace: Option<&str>, name: &str) -> Result<bool, StoreError>;

    /// Replace an existing object wholesale.
    async fn update(&self, gvk: &GroupVersionKind, namespace: Option<&str>, name: &str, obj: T) -> Result<T, StoreError>;

    /// Delete an object. Deleting an already-absent object is not an error
    /// at this layer (callers that need NotFound-as-success semantics, e.g.
    /// the composer's garbage collector, treat `StoreError::NotFound` from
    /// `delete` as success).
    async fn delete(&self, gvk: &GroupVersionKind, namespace: Option<&str>, name: &str) -> Result<(), StoreError>;

    /// List objects matching `params`.
    async fn list(&self, gvk: &GroupVersionKind, params: &ListParams) -> Result<ObjectList<T>, StoreError>;

    /// Watch objects matching `params`, starting from
    /// `params.resource_version` if set.
    async fn watch(
        &self,
        gvk: &GroupVersionKind,
        params: &ListParams,
    ) -> Result<tokio::sync::mpsc::Receiver<WatchEvent<T>>, StoreError>;

    /// Patch an object, including the server-side-apply mode.
    async fn patch(
        &self,
        gvk: &GroupVersionKind,
        namespace: Option<&str>,
        name: &str,
        patch: Patch<T>,
    ) -> Result<T, StoreError>;

    /// Patch only the status subresource, so status writes never collide
    /// with spec writes (§4.A).
    async fn patch_status(
        &self,
        gvk: &GroupVersionKind,
        namespace: Option<&str>,
        name: &str,
        patch: Patch<T>,
    ) -> Result<T, StoreError>;
}
