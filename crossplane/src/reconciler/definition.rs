//! Component J: the XRD (`CompositeResourceDefinition`) reconciler (§4.J).
//!
//! Mirrors [`kube_runtime::wait::await_condition`]'s `is_crd_established`
//! pattern for waiting on a rendered CRD, and drives the composite
//! controller's start/stop lifecycle through
//! [`xp_runtime::watch_registry::ControllerEngine`] the way the composite
//! reconciler's own dynamic watches are refcounted through
//! [`xp_runtime::watch_registry::WatchRegistry`].

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
use thiserror::Error;
use tokio::task::JoinHandle;

use xp_client::secret::SecretStore;
use xp_client::store::{ListParams, ObjectStore, Patch, StoreError};
use xp_core::gvk::GroupVersionKind;
use xp_core::meta::HasMetaExt;
use xp_core::object::ComposedObject;
use xp_core::xrd::CompositeResourceDefinition as Xrd;
use xp_core::{CompositeResource, Composition, CompositionRevision};

use xp_runtime::controller::{Action, Context};
use xp_runtime::finalizer::{self, Event};
use xp_runtime::watch_registry::ControllerEngine;

use crate::composer::{ExtraResourceFetcher, FunctionRunner};
use crate::config::{ComposerConfig, ControllerConfig};
use crate::reconciler::composite::{self, CompositeContext};

/// Finalizer stamped on every XRD this reconciler manages, gating deletion
/// until every instance of the defined kind is gone and the rendered CRD
/// is removed.
pub const FINALIZER_NAME: &str = "definition.apiextensions.crossplane.io/finalizer";

const FIELD_OWNER_XRD: &str = "apiextensions.crossplane.io/definition";

/// How long to wait for a rendered CRD to report `Established` before
/// giving up and requeuing with backoff.
const ESTABLISH_TIMEOUT: Duration = Duration::from_secs(2);
const ESTABLISH_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Errors from one XRD reconcile attempt.
#[derive(Debug, Error)]
pub enum Error {
    /// Propagated from the shared error vocabulary.
    #[error(transparent)]
    Core(#[from] xp_core::Error),
    /// The rendered CRD never reported `Established`.
    #[error("crd {0} did not become established within the timeout")]
    Timeout(String),
    /// The finalizer helper's `Apply`/`Cleanup` event handler failed.
    #[error("finalizer handling failed: {0}")]
    Finalizer(String),
}

impl From<StoreError> for Error {
    fn from(e: StoreError) -> Self {
        Error::Core(e.into())
    }
}

/// The `GroupVersionKind` of `CustomResourceDefinition` itself.
pub fn crd_gvk() -> GroupVersionKind {
    GroupVersionKind {
        group: "apiextensions.k8s.io".to_string(),
        version: "v1".to_string(),
        kind: "CustomResourceDefinition".to_string(),
    }
}

/// Shared, read-only state for the XRD controller, plus the mutable
/// per-kind controller-lifecycle bookkeeping §4.J describes.
pub struct DefinitionContext {
    /// XRD store.
    pub xrds: Arc<dyn ObjectStore<Xrd>>,
    /// Rendered-CRD store.
    pub crds: Arc<dyn ObjectStore<CustomResourceDefinition>>,
    /// Composite resource store, shared across every kind's controller.
    pub composites: Arc<dyn ObjectStore<CompositeResource>>,
    /// Composed resource store, shared across every kind's controller.
    pub composed: Arc<dyn ObjectStore<ComposedObject>>,
    /// Composition store.
    pub compositions: Arc<dyn ObjectStore<Composition>>,
    /// Composition-revision store.
    pub revisions: Arc<dyn ObjectStore<CompositionRevision>>,
    /// Connection-secret store.
    pub secrets: Arc<dyn SecretStore>,
    /// Function pipeline runner, shared across every kind's controller.
    pub functions: Arc<dyn FunctionRunner>,
    /// Out-of-band extra-resource fetcher, shared across every kind's
    /// controller.
    pub extra_resources: Arc<dyn ExtraResourceFetcher>,
    /// Composer tuning passed through to every composite controller this
    /// reconciler starts.
    pub composer_config: ComposerConfig,
    /// Controller tuning passed through to every composite controller this
    /// reconciler starts.
    pub controller_config: ControllerConfig,
    engine: tokio::sync::Mutex<ControllerEngine>,
    running_versions: tokio::sync::Mutex<HashMap<String, String>>,
}

impl DefinitionContext {
    /// Build a context with an empty controller engine and default tuning.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        xrds: Arc<dyn ObjectStore<Xrd>>,
        crds: Arc<dyn ObjectStore<CustomResourceDefinition>>,
        composites: Arc<dyn ObjectStore<CompositeResource>>,
        composed: Arc<dyn ObjectStore<ComposedObject>>,
        compositions: Arc<dyn ObjectStore<Composition>>,
        revisions: Arc<dyn ObjectStore<CompositionRevision>>,
        secrets: Arc<dyn SecretStore>,
        functions: Arc<dyn FunctionRunner>,
        extra_resources: Arc<dyn ExtraResourceFetcher>,
    ) -> Self {
        Self {
            xrds,
            crds,
            composites,
            composed,
            compositions,
            revisions,
            secrets,
            functions,
            extra_resources,
            composer_config: ComposerConfig::default(),
            controller_config: ControllerConfig::default(),
            engine: tokio::sync::Mutex::new(ControllerEngine::new()),
            running_versions: tokio::sync::Mutex::new(HashMap::new()),
        }
    }
}

/// One reconcile attempt for `xrd`.
pub async fn reconcile(xrd: Arc<Xrd>, ctx: Context<DefinitionContext>) -> Result<Action, Error> {
    let state = ctx.get_ref();
    let xrd_name = xrd.name.clone();

    finalizer::finalizer(state.xrds.as_ref(), &xrd_gvk(), None, FINALIZER_NAME, xrd, |event| async {
        match event {
            Event::Apply(xrd) => apply(state, xrd).await,
            Event::Cleanup(xrd) => cleanup(state, &xrd_name, xrd).await,
        }
    })
    .await
    .map_err(|e| Error::Finalizer(e.to_string()))
}

/// The `GroupVersionKind` XRD objects live at. XRDs have no API group of
/// their own distinct from the well-known Crossplane one.
pub fn xrd_gvk() -> GroupVersionKind {
    GroupVersionKind {
        group: "apiextensions.crossplane.io".to_string(),
        version: "v1".to_string(),
        kind: "CompositeResourceDefinition".to_string(),
    }
}

/// `Event::Apply`: render + apply the CRD, wait for it to establish, then
/// (re)start the composite controller if its referenceable version
/// changed.
async fn apply(state: &DefinitionContext, xrd: Arc<Xrd>) -> Result<Action, Error> {
    xrd.validate()?;
    let uid = xrd.metadata.uid.clone().unwrap_or_default();
    let rendered = crate::crd::render_crd(&xrd, &uid)?;
    let crd_name = xrd.name.clone();

    match state.crds.get(&crd_gvk(), None, &crd_name).await {
        Ok(_) => {
            state
                .crds
                .patch(
                    &crd_gvk(),
                    None,
                    &crd_name,
                    Patch::Apply {
                        obj: rendered,
                        field_manager: FIELD_OWNER_XRD.to_string(),
                        force: true,
                    },
                )
                .await?;
        }
        Err(StoreError::NotFound(_)) => {
            state.crds.create(&crd_gvk(), None, &crd_name, rendered).await?;
        }
        Err(e) => return Err(e.into()),
    }

    wait_for_established(state, &crd_name).await?;

    let referenceable = xrd.referenceable_version().map(|v| v.name.clone());
    let Some(referenceable) = referenceable else {
        // No referenceable version yet: nothing compositions can target, so
        // there is no composite kind to start a controller for.
        return Ok(Action::requeue(state.controller_config.poll_interval));
    };

    let mut running_versions = state.running_versions.lock().await;
    let version_changed = running_versions.get(&crd_name) != Some(&referenceable);
    if version_changed {
        let mut engine = state.engine.lock().await;
        if engine.is_running(&crd_name) {
            engine.stop(&crd_name);
        }
        let Some(gvk) = xrd.composite_gvk() else {
            return Ok(Action::requeue(state.controller_config.poll_interval));
        };
        start_composite_controller(state, &mut engine, crd_name.clone(), gvk, (*xrd).clone());
        running_versions.insert(crd_name, referenceable);
    }

    Ok(Action::requeue(state.controller_config.poll_interval))
}

/// `Event::Cleanup`: force-delete every instance of the defined kind, wait
/// for the list to empty, stop the composite controller, then delete the
/// rendered CRD.
async fn cleanup(state: &DefinitionContext, xrd_name: &str, xrd: Arc<Xrd>) -> Result<Action, Error> {
    if let Some(gvk) = xrd.composite_gvk() {
        loop {
            let list = state.composites.list(&gvk, &ListParams::default()).await?;
            if list.items.is_empty() {
                break;
            }
            for item in list.items {
                if let Some(name) = item.name() {
                    match state.composites.delete(&gvk, item.metadata.namespace.as_deref(), name).await {
                        Ok(()) | Err(StoreError::NotFound(_)) => {}
                        Err(e) => return Err(e.into()),
                    }
                }
            }
            tokio::time::sleep(ESTABLISH_POLL_INTERVAL).await;
        }
    }

    {
        let mut engine = state.engine.lock().await;
        engine.stop(xrd_name);
    }
    state.running_versions.lock().await.remove(xrd_name);

    match state.crds.delete(&crd_gvk(), None, xrd_name).await {
        Ok(()) | Err(StoreError::NotFound(_)) => {}
        Err(e) => return Err(e.into()),
    }

    Ok(Action::await_change())
}

/// Poll the rendered CRD until its `Established` condition reports `True`
/// or `ESTABLISH_TIMEOUT` elapses, mirroring `kube_runtime::wait::
/// conditions::is_crd_established` without depending on a live watch
/// stream.
async fn wait_for_established(state: &DefinitionContext, name: &str) -> Result<(), Error> {
    let deadline = tokio::time::Instant::now() + ESTABLISH_TIMEOUT;
    loop {
        let crd = state.crds.get(&crd_gvk(), None, name).await?;
        if is_established(&crd) {
            return Ok(());
        }
        if tokio::time::Instant::now() >= deadline {
            return Err(Error::Timeout(name.to_string()));
        }
        tokio::time::sleep(ESTABLISH_POLL_INTERVAL).await;
    }
}

fn is_established(crd: &CustomResourceDefinition) -> bool {
    crd.status
        .as_ref()
        .and_then(|s| s.conditions.as_ref())
        .and_then(|conds| conds.iter().find(|c| c.type_ == "Established"))
        .is_some_and(|cond| cond.status == "True")
}

/// Spawn the composite controller for one XRD's storage-version kind under
/// [`ControllerEngine`], sharing every store/runner this reconciler was
/// built with.
fn start_composite_controller(state: &DefinitionContext, engine: &mut ControllerEngine, name: String, gvk: GroupVersionKind, xrd: Xrd) {
    let composites = Arc::clone(&state.composites);
    let composed = Arc::clone(&state.composed);
    let compositions = Arc::clone(&state.compositions);
    let revisions = Arc::clone(&state.revisions);
    let secrets = Arc::clone(&state.secrets);
    let functions = Arc::clone(&state.functions);
    let extra_resources = Arc::clone(&state.extra_resources);
    let composer_config = state.composer_config.clone();
    let controller_config = state.controller_config.clone();

    engine.start(name, move || -> JoinHandle<()> {
        let mut composite_ctx = CompositeContext::new(gvk, xrd, composites, composed, compositions, revisions, secrets, functions, extra_resources);
        composite_ctx.composer_config = composer_config;
        composite_ctx.controller_config = controller_config;
        tokio::spawn(async move {
            composite::run(Context::new(composite_ctx)).await;
        })
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinitionCondition;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
    use xp_client::store::memory::MemoryStore;
    use xp_core::xrd::{Scope, XrdNames, XrdSpec, XrdVersion};

    use crate::composer::{ExtraResourceFetcher, MockFunctionRunner, ResourceSelector};

    struct NoExtraResources;

    #[async_trait::async_trait]
    impl ExtraResourceFetcher for NoExtraResources {
        async fn fetch(&self, _selector: &ResourceSelector) -> Result<Vec<serde_json::Value>, xp_core::Error> {
            Ok(vec![])
        }
    }

    fn xrd() -> Xrd {
        Xrd {
            name: "xdatabases.example.org".into(),
            metadata: ObjectMeta {
                uid: Some("xrd-uid".into()),
                ..Default::default()
            },
            spec: XrdSpec {
                group: "example.org".into(),
                names: XrdNames {
                    plural: "xdatabases".into(),
                    singular: "xdatabase".into(),
                    kind: "XDatabase".into(),
                },
                claim_names: None,
                scope: Scope::Cluster,
                versions: vec![XrdVersion {
                    name: "v1alpha1".into(),
                    served: true,
                    storage: true,
                    referenceable: true,
                    schema: serde_json::json!({"type": "object"}),
                }],
                default_composition_ref: None,
                enforced_composition_ref: None,
                connection_secret_keys: vec![],
            },
        }
    }

    fn context() -> Context<DefinitionContext> {
        Context::new(DefinitionContext::new(
            Arc::new(MemoryStore::<Xrd>::new()),
            Arc::new(MemoryStore::<CustomResourceDefinition>::new()),
            Arc::new(MemoryStore::<CompositeResource>::new()),
            Arc::new(MemoryStore::<ComposedObject>::new()),
            Arc::new(MemoryStore::<Composition>::new()),
            Arc::new(MemoryStore::<CompositionRevision>::new()),
            Arc::new(xp_client::secret::MemorySecretStore::new()),
            Arc::new(MockFunctionRunner::new()),
            Arc::new(NoExtraResources),
        ))
    }

    fn empty_spec() -> k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinitionSpec {
        k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinitionSpec {
            group: "example.org".into(),
            names: k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinitionNames {
                plural: "xdatabases".into(),
                singular: None,
                kind: "XDatabase".into(),
                list_kind: None,
                short_names: None,
                categories: None,
            },
            scope: "Cluster".into(),
            versions: vec![],
            conversion: None,
            preserve_unknown_fields: None,
        }
    }

    #[test]
    fn not_established_without_conditions() {
        let crd = CustomResourceDefinition {
            metadata: ObjectMeta::default(),
            spec: empty_spec(),
            status: None,
        };
        assert!(!is_established(&crd));
    }

    #[test]
    fn established_when_condition_is_true() {
        let mut crd = CustomResourceDefinition {
            metadata: ObjectMeta::default(),
            spec: empty_spec(),
            status: None,
        };
        crd.status = Some(k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinitionStatus {
            accepted_names: None,
            conditions: Some(vec![CustomResourceDefinitionCondition {
                type_: "Established".to_string(),
                status: "True".to_string(),
                reason: None,
                message: None,
                last_transition_time: None,
            }]),
            stored_versions: None,
        });
        assert!(is_established(&crd));
    }

    #[tokio::test]
    async fn apply_times_out_when_the_crd_never_establishes() {
        let ctx = context();
        let state = ctx.get_ref();

        let result = apply(state, Arc::new(xrd())).await;
        assert!(matches!(result, Err(Error::Timeout(_))));
    }

    #[tokio::test]
    async fn cleanup_is_a_noop_with_no_instances_and_no_crd() {
        let ctx = context();
        let state = ctx.get_ref();
        let action = cleanup(state, "xdatabases.example.org", Arc::new(xrd())).await.unwrap();
        assert!(action.requeue_after().is_none());
    }
}
