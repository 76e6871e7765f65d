//! Finalizer helper, adapted from `kube_runtime::finalizer` to drive
//! against an `xp_client::ObjectStore` instead of a concrete `kube_client::
//! Api<K>`.
//!
//! # Expected flow
//!
//! 1. User creates the object.
//! 2. Reconciler sees it; `finalizer` adds `finalizer_name` to
//!    `metadata.finalizers` and returns [`Action::await_change`] — the
//!    write itself triggers the next reconcile.
//! 3. Reconciler sees the updated object; `finalizer` runs
//!    [`Event::Apply`].
//! 4. User deletes the object; reconciler sees a deletion timestamp;
//!    `finalizer` runs [`Event::Cleanup`], then removes the finalizer.
//!
//! [`Event::Apply`] and [`Event::Cleanup`] must both be idempotent and
//! tolerate being called multiple times, including after a cancelled
//! previous attempt.

use crate::controller::Action;
use json_patch::{AddOperation, PatchOperation, RemoveOperation, TestOperation};
use serde::{de::DeserializeOwned, Serialize};
use std::fmt::Debug;
use std::str::FromStr;
use std::sync::Arc;
use thiserror::Error;
use xp_client::store::{ObjectStore, Patch, StoreError};
use xp_core::gvk::GroupVersionKind;
use xp_core::meta::{HasMeta, HasMetaExt};

/// Errors from the finalizer helper.
#[derive(Debug, Error)]
pub enum Error<ReconcileErr>
where
    ReconcileErr: std::error::Error + 'static,
{
    /// The `Apply` event handler failed.
    #[error("failed to apply object: {0}")]
    ApplyFailed(#[source] ReconcileErr),
    /// The `Cleanup` event handler failed.
    #[error("failed to clean up object: {0}")]
    CleanupFailed(#[source] ReconcileErr),
    /// Adding the finalizer failed.
    #[error("failed to add finalizer: {0}")]
    AddFinalizer(#[source] StoreError),
    /// Removing the finalizer failed.
    #[error("failed to remove finalizer: {0}")]
    RemoveFinalizer(#[source] StoreError),
    /// The object has no name, so it cannot be patched.
    #[error("object has no name")]
    UnnamedObject,
    /// The finalizer JSON pointer could not be constructed.
    #[error("invalid finalizer path")]
    InvalidFinalizer,
}

struct FinalizerState {
    finalizer_index: Option<usize>,
    is_deleting: bool,
}

impl FinalizerState {
    fn for_object<K: HasMeta>(obj: &K, finalizer_name: &str) -> Self {
        Self {
            finalizer_index: obj.finalizers().iter().position(|f| f == finalizer_name),
            is_deleting: obj.is_deleting(),
        }
    }
}

/// The event the reconciler's closure should handle.
pub enum Event<K> {
    /// Actual state should be made to match desired state. Must be
    /// idempotent.
    Apply(Arc<K>),
    /// The object is being deleted; release any resources it owns. Must be
    /// idempotent, and must tolerate `Apply` never having run.
    Cleanup(Arc<K>),
}

/// Drive finalizer-gated reconciliation for `obj`, of kind `gvk`, using
/// `store` to mutate `metadata.finalizers`.
pub async fn finalizer<K, S, ReconcileErr, ReconcileFut>(
    store: &S,
    gvk: &GroupVersionKind,
    namespace: Option<&str>,
    finalizer_name: &str,
    obj: Arc<K>,
    reconcile: impl FnOnce(Event<K>) -> ReconcileFut,
) -> Result<Action, Error<ReconcileErr>>
where
    K: HasMeta + Clone + Debug + Serialize + DeserializeOwned + Send + Sync + 'static,
    S: ObjectStore<K> + ?Sized,
    ReconcileErr: std::error::Error + 'static,
    ReconcileFut: std::future::Future<Output = Result<Action, ReconcileErr>>,
{
    match FinalizerState::for_object(&*obj, finalizer_name) {
        FinalizerState {
            finalizer_index: Some(_),
            is_deleting: false,
        } => reconcile(Event::Apply(obj)).await.map_err(Error::ApplyFailed),
        FinalizerState {
            finalizer_index: Some(i),
            is_deleting: true,
        } => {
            let name = obj.name().ok_or(Error::UnnamedObject)?.to_string();
            let action = reconcile(Event::Cleanup(obj)).await.map_err(Error::CleanupFailed)?;
            let path = format!("/metadata/finalizers/{i}");
            let ops = json_patch::Patch(vec![
                PatchOperation::Test(TestOperation {
                    path: jsonptr::PointerBuf::from_str(&path).map_err(|_| Error::InvalidFinalizer)?,
                    value: finalizer_name.into(),
                }),
                PatchOperation::Remove(RemoveOperation {
                    path: jsonptr::PointerBuf::from_str(&path).map_err(|_| Error::InvalidFinalizer)?,
                }),
            ]);
            store
                .patch(gvk, namespace, &name, Patch::Json(ops))
                .await
                .map_err(Error::RemoveFinalizer)?;
            Ok(action)
        }
        FinalizerState {
            finalizer_index: None,
            is_deleting: false,
        } => {
            let name = obj.name().ok_or(Error::UnnamedObject)?.to_string();
            let existing = obj.finalizers().to_vec();
            let ops = if existing.is_empty() {
                json_patch::Patch(vec![
                    PatchOperation::Test(TestOperation {
                        path: jsonptr::PointerBuf::from_str("/metadata/finalizers").map_err(|_| Error::InvalidFinalizer)?,
                        value: serde_json::Value::Null,
                    }),
                    PatchOperation::Add(AddOperation {
                        path: jsonptr::PointerBuf::from_str("/metadata/finalizers").map_err(|_| Error::InvalidFinalizer)?,
                        value: vec![finalizer_name].into(),
                    }),
                ])
            } else {
                json_patch::Patch(vec![
                    PatchOperation::Test(TestOperation {
                        path: jsonptr::PointerBuf::from_str("/metadata/finalizers").map_err(|_| Error::InvalidFinalizer)?,
                        value: existing.into(),
                    }),
                    PatchOperation::Add(AddOperation {
                        path: jsonptr::PointerBuf::from_str("/metadata/finalizers/-").map_err(|_| Error::InvalidFinalizer)?,
                        value: finalizer_name.into(),
                    }),
                ])
            };
            store
                .patch(gvk, namespace, &name, Patch::Json(ops))
                .await
                .map_err(Error::AddFinalizer)?;
            Ok(Action::await_change())
        }
        FinalizerState {
            finalizer_index: None,
            is_deleting: true,
        } => Ok(Action::await_change()),
    }
}
