//! The function-pipeline composer (§4.F): render a composite's desired
//! composed resources by running its composition's function pipeline, then
//! persist the result.
//!
//! `compose` is the single entry point the composite reconciler
//! (component H) calls once per reconcile. Everything else in this module
//! is a step of its 9-step algorithm, split out so each step can be tested
//! in isolation the way [`solver`](crate::solver) splits `BuildGraph` from
//! `SelectVersions`.

pub mod function_client;
pub mod render;

pub use function_client::{
    CompositeState, ExtraResourceFetcher, FunctionError, FunctionResult, FunctionRunner, MockFunctionRunner, PipelineState, Requirements, ResourceSelector,
    RunFunctionRequest, RunFunctionResponse, Severity,
};

use std::collections::BTreeMap;
use thiserror::Error;
use xp_client::secret::{SecretStore, SecretStoreError};
use xp_client::store::{ObjectStore, Patch, StoreError};
use xp_core::gvk::GroupVersionKind;
use xp_core::labels::FIELD_OWNER_COMPOSITE;
use xp_core::object::{composed_field_owner, ComposedObject, Readiness};
use xp_core::{CompositeResource, CompositeStatus, CompositionRevision, ResourceRef};

use crate::config::ComposerConfig;

/// Errors from running a composition's function pipeline.
#[derive(Debug, Error)]
pub enum Error {
    /// Propagated from the shared error vocabulary (store failures,
    /// `AnonymousComposedResource`, `MissingNamePrefixLabel`,
    /// `FunctionMaxIterations`, `FunctionFatal`).
    #[error(transparent)]
    Core(#[from] xp_core::Error),
    /// A composed resource's connection secret could not be read for a
    /// reason other than "not found" (tolerated).
    #[error(transparent)]
    Secret(#[from] SecretStoreError),
    /// A pipeline step failed at the transport layer.
    #[error(transparent)]
    Function(#[from] FunctionError),
}

impl From<StoreError> for Error {
    fn from(e: StoreError) -> Self {
        Error::Core(e.into())
    }
}

/// What became of one composed resource this reconcile.
#[derive(Debug, Clone)]
pub struct ComposedResourceOutcome {
    /// The resource's kind.
    pub gvk: GroupVersionKind,
    /// Namespace, if namespaced.
    pub namespace: Option<String>,
    /// The resource's resolved name.
    pub name: String,
    /// Its reported readiness.
    pub ready: Readiness,
    /// Whether this resource was already observed (and so already applied
    /// by some prior reconcile) before this `compose` call. A freshly
    /// created resource is not yet synced: nothing has confirmed the store
    /// actually holds what was just applied to it until the next observe.
    pub synced: bool,
}

/// The outcome of one `compose` call, used by the composite reconciler to
/// drive its own status/condition computation (§4.H).
#[derive(Debug, Clone, Default)]
pub struct ComposeResult {
    /// Per-logical-name outcomes for every resource still desired after
    /// this pipeline run.
    pub resources: BTreeMap<String, ComposedResourceOutcome>,
    /// The composite-level connection details the pipeline derived,
    /// unfiltered; the reconciler applies the XRD's
    /// `connection_secret_keys` filter before publishing.
    pub connection_details: BTreeMap<String, Vec<u8>>,
    /// Every result any pipeline step returned, most recent last.
    pub events: Vec<FunctionResult>,
    /// Whether a step returned a fatal result, stopping the pipeline short
    /// of materializing or applying any composed resource.
    pub fatal: bool,
}

impl ComposeResult {
    /// Whether every resource in this result reported `Readiness::True`.
    /// An empty result (no composed resources desired) counts as ready,
    /// matching §4.H step 13's `Available` computation.
    pub fn all_ready(&self) -> bool {
        !self.fatal && self.resources.values().all(|r| r.ready.is_ready())
    }

    /// Whether every resource in this result was already synced (observed
    /// to exist) before this reconcile, so none was freshly created.
    pub fn all_synced(&self) -> bool {
        !self.fatal && self.resources.values().all(|r| r.synced)
    }
}

/// Run `revision`'s function pipeline for `xr` and persist the result
/// (§4.F steps 1-9).
///
/// `composites` is used only to server-side-apply `xr.resource_refs` and
/// its status subresource (steps 6-7); the caller is responsible for any
/// further status bookkeeping (conditions, requeue scheduling) once this
/// returns.
#[allow(clippy::too_many_arguments)]
pub async fn compose(
    composites: &dyn ObjectStore<CompositeResource>,
    composed: &dyn ObjectStore<ComposedObject>,
    secrets: &dyn SecretStore,
    functions: &dyn FunctionRunner,
    extra_resources: &dyn ExtraResourceFetcher,
    config: &ComposerConfig,
    xr: &mut CompositeResource,
    revision: &CompositionRevision,
    environment: Option<serde_json::Value>,
) -> Result<ComposeResult, Error> {
    let xr_name = xr.metadata.name.clone().unwrap_or_default();

    // Step 1: observe previously-composed resources and their connection
    // details.
    let observed_resources = observe_resources(composed, secrets, xr).await?;

    // Step 2: the composite's own connection details, plus the seeded
    // pipeline context.
    let xr_connection_details = fetch_xr_connection_details(secrets, xr).await?;
    let mut context = serde_json::json!({});
    if let Some(env) = environment {
        context[xp_core::labels::CONTEXT_KEY_ENVIRONMENT] = env;
    }

    let composite_body = render_composite_body(xr)?;
    let observed = PipelineState {
        composite: CompositeState {
            resource: composite_body.clone(),
            connection_details: xr_connection_details.clone(),
        },
        resources: observed_resources.clone(),
    };
    let mut desired = PipelineState {
        composite: CompositeState {
            resource: composite_body,
            connection_details: xr_connection_details,
        },
        resources: BTreeMap::new(),
    };

    let mut events = Vec::new();
    let mut fatal = false;

    // Step 3: run the pipeline, one step at a time.
    'pipeline: for step in &revision.spec.pipeline {
        let mut request = RunFunctionRequest {
            observed: observed.clone(),
            desired: desired.clone(),
            context: context.clone(),
            input: step.input.clone(),
            extra_resources: BTreeMap::new(),
        };

        let response = stabilize(functions, extra_resources, &step.step, &step.function_ref, &mut request, config.max_stabilization_iterations).await?;

        desired = response.desired;
        context = response.context;

        for result in response.results {
            let is_fatal = matches!(result.severity, Severity::Fatal);
            events.push(result);
            if is_fatal {
                fatal = true;
                break 'pipeline;
            }
        }
    }

    if fatal {
        return Ok(ComposeResult {
            resources: BTreeMap::new(),
            connection_details: BTreeMap::new(),
            events,
            fatal: true,
        });
    }

    // Step 4: materialize desired composed resources: stamp render
    // metadata and resolve (but do not yet create) a name for anything
    // newly created. The name is only reserved here; step 8 is what
    // actually persists the object, after step 6 below has durably
    // recorded the name in the XR's resourceRefs.
    let mut materialized: BTreeMap<String, ComposedObject> = BTreeMap::new();
    for (name, mut object) in desired.resources {
        if let Some(existing) = observed_resources.get(&name) {
            // Group/version changes are allowed (they support migrations);
            // only a kind change is fatal.
            if existing.gvk.kind != object.gvk.kind {
                return Err(xp_core::Error::KindMismatch(name).into());
            }
            object.metadata.name = existing.metadata.name.clone();
            object.metadata.namespace = existing.metadata.namespace.clone();
        }
        render::stamp_render_metadata(xr, &name, &mut object)?;
        let gvk = object.gvk.clone();
        let namespace = object.metadata.namespace.clone();
        let allocated = render::allocate_name(composed, &gvk, namespace.as_deref(), object).await?;
        materialized.insert(name, allocated);
    }

    // Step 5: garbage collect composed resources no longer desired, as
    // long as this composite still controls them.
    let xr_uid = xr.metadata.uid.clone().unwrap_or_default();
    for (name, observed_obj) in &observed_resources {
        if materialized.contains_key(name) {
            continue;
        }
        if !observed_obj.is_controlled_by(&xr_uid) {
            continue;
        }
        let obj_name = observed_obj.metadata.name.as_deref().unwrap_or_default();
        match composed.delete(&observed_obj.gvk, observed_obj.metadata.namespace.as_deref(), obj_name).await {
            Ok(()) | Err(StoreError::NotFound(_)) => {}
            Err(e) => return Err(Error::from(e)),
        }
    }

    // Step 6: persist resourceRefs on the composite before applying any
    // composed resource, so a crash between the two never leaves an
    // orphaned, unreferenced composed resource.
    xr.resource_refs = materialized.values().map(|o| ResourceRef::new(&o.gvk, o.metadata.name.as_deref().unwrap_or_default())).collect();
    xr.normalize_resource_refs();
    composites
        .patch(
            &xr.gvk,
            xr.metadata.namespace.as_deref(),
            &xr_name,
            Patch::Apply {
                obj: xr.clone(),
                field_manager: FIELD_OWNER_COMPOSITE.to_string(),
                force: false,
            },
        )
        .await?;

    // Step 7: patch the composite's status subresource with whatever the
    // pipeline rendered, preserving its identity.
    if let Some(status) = extract_status(&desired.composite.resource) {
        xr.status = status;
        composites
            .patch_status(
                &xr.gvk,
                xr.metadata.namespace.as_deref(),
                &xr_name,
                Patch::Apply {
                    obj: xr.clone(),
                    field_manager: FIELD_OWNER_COMPOSITE.to_string(),
                    force: false,
                },
            )
            .await?;
    }

    // Step 8: server-side-apply every desired composed resource, scoped to
    // this composite's own field-owner identity so two composites can
    // never stomp each other's fields on a shared composed resource.
    let field_manager = composed_field_owner(&xr_name, &xr.group_kind());
    let mut resources = BTreeMap::new();
    for (name, object) in materialized {
        let gvk = object.gvk.clone();
        let namespace = object.metadata.namespace.clone();
        let obj_name = object.metadata.name.clone().unwrap_or_default();
        let ready = object.ready;
        let synced = observed_resources.contains_key(&name);
        composed
            .patch(
                &gvk,
                namespace.as_deref(),
                &obj_name,
                Patch::Apply {
                    obj: object,
                    field_manager: field_manager.clone(),
                    force: false,
                },
            )
            .await?;
        resources.insert(
            name,
            ComposedResourceOutcome {
                gvk,
                namespace,
                name: obj_name,
                ready,
                synced,
            },
        );
    }

    // Step 9: return the accumulated outcome.
    Ok(ComposeResult {
        resources,
        connection_details: desired.composite.connection_details,
        events,
        fatal: false,
    })
}

/// Run one pipeline step's requirement-stabilization loop (§4.F step 3b):
/// keep re-invoking the function, feeding back whatever extra resources it
/// asked for, until its declared requirements stop changing.
async fn stabilize(
    functions: &dyn FunctionRunner,
    extra_resources: &dyn ExtraResourceFetcher,
    step_name: &str,
    function_ref: &str,
    request: &mut RunFunctionRequest,
    max_iterations: u32,
) -> Result<RunFunctionResponse, Error> {
    let mut previous: Option<Requirements> = None;

    for _ in 0..max_iterations {
        let response = functions.run_function(function_ref, request.clone()).await?;

        if response.requirements.extra_resources.is_empty() || previous.as_ref() == Some(&response.requirements) {
            return Ok(response);
        }

        let mut fetched = BTreeMap::new();
        for (requirement_name, selector) in &response.requirements.extra_resources {
            fetched.insert(requirement_name.clone(), extra_resources.fetch(selector).await?);
        }
        request.extra_resources = fetched;
        request.context = response.context.clone();
        previous = Some(response.requirements);
    }

    Err(xp_core::Error::FunctionMaxIterations(step_name.to_string(), max_iterations).into())
}

/// Observe every composed resource the composite currently references,
/// skipping ones that have disappeared or that this composite no longer
/// controls (§4.F step 1).
async fn observe_resources(
    composed: &dyn ObjectStore<ComposedObject>,
    secrets: &dyn SecretStore,
    xr: &CompositeResource,
) -> Result<BTreeMap<String, ComposedObject>, Error> {
    let xr_uid = xr.metadata.uid.clone().unwrap_or_default();
    let mut observed = BTreeMap::new();

    for reference in &xr.resource_refs {
        if reference.name.is_empty() {
            continue;
        }
        let gvk = GroupVersionKind::from_api_version_kind(&reference.api_version, &reference.kind)
            .map_err(|e| xp_core::Error::Invalid(e.to_string()))?;

        let mut object = match composed.get(&gvk, xr.metadata.namespace.as_deref(), &reference.name).await {
            Ok(o) => o,
            Err(StoreError::NotFound(_)) => continue,
            Err(e) => return Err(Error::from(e)),
        };
        if !object.is_controlled_by(&xr_uid) {
            continue;
        }

        let resource_name = object
            .metadata
            .annotations
            .as_ref()
            .and_then(|a| a.get(xp_core::labels::ANNOTATION_COMPOSITION_RESOURCE_NAME))
            .cloned()
            .ok_or_else(|| xp_core::Error::AnonymousComposedResource(reference.name.clone()))?;

        if let Some((namespace, name)) = write_connection_secret_ref(&object.body) {
            object.connection_details = match secrets.get(&namespace, &name).await {
                Ok(data) => data,
                Err(SecretStoreError::NotFound(..)) => BTreeMap::new(),
                Err(e) => return Err(Error::from(e)),
            };
        }

        object.resource_name = resource_name.clone();
        observed.insert(resource_name, object);
    }

    Ok(observed)
}

/// Read a composed resource's own `spec.writeConnectionSecretToRef`, the
/// convention every Crossplane provider resource follows for declaring
/// where its connection secret lives.
fn write_connection_secret_ref(body: &serde_json::Value) -> Option<(String, String)> {
    let namespace = body.pointer("/spec/writeConnectionSecretToRef/namespace")?.as_str()?.to_string();
    let name = body.pointer("/spec/writeConnectionSecretToRef/name")?.as_str()?.to_string();
    Some((namespace, name))
}

/// Fetch the composite's own connection details from its declared sink, if
/// any (§4.F step 2).
async fn fetch_xr_connection_details(secrets: &dyn SecretStore, xr: &CompositeResource) -> Result<BTreeMap<String, Vec<u8>>, Error> {
    let Some(sink) = &xr.write_connection_secret_to else {
        return Ok(BTreeMap::new());
    };
    let namespace = sink.namespace.as_deref().or(xr.metadata.namespace.as_deref()).unwrap_or("default");
    match secrets.get(namespace, &sink.name).await {
        Ok(data) => Ok(data),
        Err(SecretStoreError::NotFound(..)) => Ok(BTreeMap::new()),
        Err(e) => Err(Error::from(e)),
    }
}

/// Render the composite's full body as a function would see it over the
/// wire: `apiVersion`/`kind`/`metadata` plus its opaque `spec`/`status`.
fn render_composite_body(xr: &CompositeResource) -> Result<serde_json::Value, Error> {
    Ok(serde_json::json!({
        "apiVersion": xr.gvk.api_version(),
        "kind": xr.gvk.kind,
        "metadata": {
            "name": xr.metadata.name,
            "namespace": xr.metadata.namespace,
            "uid": xr.metadata.uid,
        },
        "spec": xr.spec_extra,
        "status": serde_json::to_value(&xr.status).map_err(|e| xp_core::Error::Other(e.to_string()))?,
    }))
}

/// Pull the `status` block back out of a function-rendered composite body,
/// if the pipeline touched it.
fn extract_status(resource: &serde_json::Value) -> Option<CompositeStatus> {
    resource.get("status").and_then(|s| serde_json::from_value(s.clone()).ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
    use xp_client::store::memory::MemoryStore;
    use xp_core::composite::CompositionReference;
    use xp_core::composition::{CompositeTypeRef, CompositionSpec, PipelineStep};
    use xp_core::gvk::GroupVersionKind as Gvk;

    struct NoExtraResources;

    #[async_trait::async_trait]
    impl ExtraResourceFetcher for NoExtraResources {
        async fn fetch(&self, _selector: &ResourceSelector) -> Result<Vec<serde_json::Value>, xp_core::Error> {
            Ok(vec![])
        }
    }

    fn xr() -> CompositeResource {
        CompositeResource {
            gvk: Gvk::gvk("example.org", "v1alpha1", "XDatabase"),
            metadata: ObjectMeta {
                name: Some("my-xr".into()),
                uid: Some("xr-uid".into()),
                labels: Some([(xp_core::labels::LABEL_COMPOSITE_NAME_PREFIX.to_string(), "my-xr".to_string())].into_iter().collect()),
                ..Default::default()
            },
            composition_reference: CompositionReference::default(),
            resource_refs: vec![],
            claim_reference: None,
            write_connection_secret_to: None,
            spec_extra: serde_json::json!({}),
            status: Default::default(),
        }
    }

    fn revision_with(function_ref: &str) -> CompositionRevision {
        CompositionRevision {
            name: "cool-composition-abc".into(),
            owner_references: vec![],
            hash_label: "abc".into(),
            revision: 1,
            spec: CompositionSpec {
                composite_type_ref: CompositeTypeRef {
                    api_version: "example.org/v1alpha1".into(),
                    kind: "XDatabase".into(),
                },
                pipeline: vec![PipelineStep {
                    step: "compose".into(),
                    function_ref: function_ref.into(),
                    input: serde_json::json!({}),
                }],
            },
        }
    }

    fn rendered_instance(name: &str) -> ComposedObject {
        ComposedObject {
            resource_name: name.into(),
            gvk: Gvk::gvk("database.example.org", "v1", "RDSInstance"),
            metadata: ObjectMeta::default(),
            body: serde_json::json!({}),
            connection_details: Default::default(),
            ready: Readiness::True,
        }
    }

    #[tokio::test]
    async fn materializes_and_applies_a_single_desired_resource() {
        let composites = MemoryStore::<CompositeResource>::new();
        let composed = MemoryStore::<ComposedObject>::new();
        let secrets = xp_client::secret::MemorySecretStore::new();
        let functions = MockFunctionRunner::new().with_function("function-sql", |req| {
            let mut desired = req.desired;
            desired.resources.insert("instance".to_string(), rendered_instance("instance"));
            Ok(RunFunctionResponse {
                desired,
                context: req.context,
                results: vec![],
                requirements: Requirements::default(),
            })
        });

        let mut xr = xr();
        let revision = revision_with("function-sql");
        let config = ComposerConfig::default();

        let result = compose(&composites, &composed, &secrets, &functions, &NoExtraResources, &config, &mut xr, &revision, None)
            .await
            .unwrap();

        assert!(!result.fatal);
        assert_eq!(result.resources.len(), 1);
        let outcome = result.resources.get("instance").unwrap();
        assert!(outcome.name.starts_with("my-xr-"));
        assert_eq!(xr.resource_refs.len(), 1);
        assert!(composed.get(&outcome.gvk, None, &outcome.name).await.is_ok());
    }

    #[tokio::test]
    async fn fatal_result_stops_the_pipeline_without_touching_resources() {
        let composites = MemoryStore::<CompositeResource>::new();
        let composed = MemoryStore::<ComposedObject>::new();
        let secrets = xp_client::secret::MemorySecretStore::new();
        let functions = MockFunctionRunner::new().with_function("function-sql", |req| {
            Ok(RunFunctionResponse {
                desired: req.desired,
                context: req.context,
                results: vec![FunctionResult {
                    step: "compose".into(),
                    severity: Severity::Fatal,
                    message: "boom".into(),
                }],
                requirements: Requirements::default(),
            })
        });

        let mut xr = xr();
        let revision = revision_with("function-sql");
        let config = ComposerConfig::default();

        let result = compose(&composites, &composed, &secrets, &functions, &NoExtraResources, &config, &mut xr, &revision, None)
            .await
            .unwrap();

        assert!(result.fatal);
        assert!(result.resources.is_empty());
        assert!(xr.resource_refs.is_empty());
    }

    #[tokio::test]
    async fn requirement_stabilization_fetches_extra_resources_until_stable() {
        let composites = MemoryStore::<CompositeResource>::new();
        let composed = MemoryStore::<ComposedObject>::new();
        let secrets = xp_client::secret::MemorySecretStore::new();
        let call_count = std::sync::Arc::new(std::sync::atomic::AtomicU32::new(0));
        let counter = call_count.clone();
        let functions = MockFunctionRunner::new().with_function("function-extras", move |req| {
            let call = counter.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            if call == 0 {
                let mut requirements = Requirements::default();
                requirements.extra_resources.insert(
                    "configs".to_string(),
                    ResourceSelector {
                        api_version: "v1".into(),
                        kind: "ConfigMap".into(),
                        match_name: Some("cfg".into()),
                        match_labels: Default::default(),
                    },
                );
                return Ok(RunFunctionResponse {
                    desired: req.desired,
                    context: req.context,
                    results: vec![],
                    requirements,
                });
            }
            let mut desired = req.desired;
            desired.resources.insert("instance".to_string(), rendered_instance("instance"));
            Ok(RunFunctionResponse {
                desired,
                context: req.context,
                results: vec![],
                requirements: Requirements::default(),
            })
        });

        let mut xr = xr();
        let revision = revision_with("function-extras");
        let config = ComposerConfig::default();

        let result = compose(&composites, &composed, &secrets, &functions, &NoExtraResources, &config, &mut xr, &revision, None)
            .await
            .unwrap();

        assert_eq!(call_count.load(std::sync::atomic::Ordering::SeqCst), 2);
        assert_eq!(result.resources.len(), 1);
    }

    #[tokio::test]
    async fn stabilization_cap_fails_when_requirements_never_settle() {
        let composites = MemoryStore::<CompositeResource>::new();
        let composed = MemoryStore::<ComposedObject>::new();
        let secrets = xp_client::secret::MemorySecretStore::new();
        let call_count = std::sync::Arc::new(std::sync::atomic::AtomicU32::new(0));
        let counter = call_count.clone();
        let functions = MockFunctionRunner::new().with_function("function-flaky", move |req| {
            let call = counter.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            let mut requirements = Requirements::default();
            requirements.extra_resources.insert(
                format!("configs-{call}"),
                ResourceSelector {
                    api_version: "v1".into(),
                    kind: "ConfigMap".into(),
                    match_name: Some(format!("cfg-{call}")),
                    match_labels: Default::default(),
                },
            );
            Ok(RunFunctionResponse {
                desired: req.desired,
                context: req.context,
                results: vec![],
                requirements,
            })
        });

        let mut xr = xr();
        let revision = revision_with("function-flaky");
        let config = ComposerConfig { max_stabilization_iterations: 3 };

        let err = compose(&composites, &composed, &secrets, &functions, &NoExtraResources, &config, &mut xr, &revision, None)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Core(xp_core::Error::FunctionMaxIterations(_, 3))));
    }

    #[tokio::test]
    async fn a_composed_resource_owned_by_another_composite_is_never_touched() {
        let composites = MemoryStore::<CompositeResource>::new();
        let composed = MemoryStore::<ComposedObject>::new();
        let secrets = xp_client::secret::MemorySecretStore::new();

        let gvk = Gvk::gvk("database.example.org", "v1", "RDSInstance");
        let mut foreign = rendered_instance("instance");
        foreign.metadata.name = Some("foreign-instance".into());
        foreign.metadata.annotations = Some([(xp_core::labels::ANNOTATION_COMPOSITION_RESOURCE_NAME.to_string(), "instance".to_string())].into_iter().collect());
        foreign.set_controller(k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference {
            api_version: "example.org/v1alpha1".into(),
            kind: "XDatabase".into(),
            name: "someone-elses-xr".into(),
            uid: "someone-elses-uid".into(),
            controller: Some(true),
            block_owner_deletion: Some(true),
        });
        composed.seed(&gvk, None, "foreign-instance", foreign);

        // This composite references the foreign resource directly (as if
        // a stale `resourceRefs` entry survived a composition change) and
        // its pipeline desires nothing, which would normally
        // garbage-collect every no-longer-desired composed resource it
        // still observes and controls.
        let functions = MockFunctionRunner::new().with_function("function-sql", |req| {
            Ok(RunFunctionResponse {
                desired: req.desired,
                context: req.context,
                results: vec![],
                requirements: Requirements::default(),
            })
        });

        let mut xr = xr();
        xr.resource_refs = vec![xp_core::ResourceRef::new(&gvk, "foreign-instance")];
        let revision = revision_with("function-sql");
        let config = ComposerConfig::default();

        compose(&composites, &composed, &secrets, &functions, &NoExtraResources, &config, &mut xr, &revision, None)
            .await
            .unwrap();

        assert!(composed.get(&gvk, None, "foreign-instance").await.is_ok());
    }

    #[tokio::test]
    async fn a_second_compose_with_unchanged_inputs_produces_the_same_resource_set() {
        let composites = MemoryStore::<CompositeResource>::new();
        let composed = MemoryStore::<ComposedObject>::new();
        let secrets = xp_client::secret::MemorySecretStore::new();
        let functions = MockFunctionRunner::new().with_function("function-sql", |req| {
            let mut desired = req.desired;
            desired.resources.insert("instance".to_string(), rendered_instance("instance"));
            Ok(RunFunctionResponse {
                desired,
                context: req.context,
                results: vec![],
                requirements: Requirements::default(),
            })
        });

        let mut xr = xr();
        let revision = revision_with("function-sql");
        let config = ComposerConfig::default();

        let first = compose(&composites, &composed, &secrets, &functions, &NoExtraResources, &config, &mut xr, &revision, None)
            .await
            .unwrap();
        let second = compose(&composites, &composed, &secrets, &functions, &NoExtraResources, &config, &mut xr, &revision, None)
            .await
            .unwrap();

        let first_names: Vec<&str> = first.resources.values().map(|o| o.name.as_str()).collect();
        let second_names: Vec<&str> = second.resources.values().map(|o| o.name.as_str()).collect();
        assert_eq!(first_names, second_names);
        assert_eq!(xr.resource_refs.len(), 1);
    }

    #[tokio::test]
    async fn a_desired_resource_cannot_change_kind_across_reconciles() {
        let composites = MemoryStore::<CompositeResource>::new();
        let composed = MemoryStore::<ComposedObject>::new();
        let secrets = xp_client::secret::MemorySecretStore::new();
        let functions = MockFunctionRunner::new().with_function("function-sql", |req| {
            let mut desired = req.desired;
            desired.resources.insert("instance".to_string(), rendered_instance("instance"));
            Ok(RunFunctionResponse {
                desired,
                context: req.context,
                results: vec![],
                requirements: Requirements::default(),
            })
        });

        let mut xr = xr();
        let revision = revision_with("function-sql");
        let config = ComposerConfig::default();

        compose(&composites, &composed, &secrets, &functions, &NoExtraResources, &config, &mut xr, &revision, None)
            .await
            .unwrap();

        // Same resource name, different kind: the pipeline is misbehaving.
        let functions = MockFunctionRunner::new().with_function("function-sql", |req| {
            let mut desired = req.desired;
            let mut reshaped = rendered_instance("instance");
            reshaped.gvk = Gvk::gvk("database.example.org", "v1", "AuroraCluster");
            desired.resources.insert("instance".to_string(), reshaped);
            Ok(RunFunctionResponse {
                desired,
                context: req.context,
                results: vec![],
                requirements: Requirements::default(),
            })
        });

        let err = compose(&composites, &composed, &secrets, &functions, &NoExtraResources, &config, &mut xr, &revision, None)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Core(xp_core::Error::KindMismatch(name)) if name == "instance"));
    }
}
