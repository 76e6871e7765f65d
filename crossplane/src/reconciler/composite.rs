//! Component H: the composite-resource reconciler (§4.H).
//!
//! One [`CompositeContext`] backs a single composite kind's control loop,
//! the way `kube_runtime::Controller` is parameterized over one `K` at
//! construction time. [`reconcile`]/[`error_policy`] are the pure
//! attempt/backoff pair a driver calls per object, mirroring
//! `kube_runtime::Controller::run`'s contract; [`run`] is that driver,
//! spawned by the definition reconciler (§4.J) through
//! [`xp_runtime::watch_registry::ControllerEngine`].

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::StreamExt;
use thiserror::Error;
use tokio::sync::{mpsc, Semaphore};
use tracing::warn;

use xp_client::secret::SecretStore;
use xp_client::store::{ListParams, ObjectStore, Patch, StoreError, WatchEvent};
use xp_core::condition::Condition;
use xp_core::gvk::GroupVersionKind;
use xp_core::meta::HasMetaExt;
use xp_core::object::ComposedObject;
use xp_core::object_ref::ObjectRef;
use xp_core::xrd::CompositeResourceDefinition;
use xp_core::{CompositeResource, Composition, CompositionRevision};

use xp_runtime::controller::{next_backoff, Action, Context, INITIAL_BACKOFF};
use xp_runtime::events::{Event as RuntimeEvent, EventRecorder, EventType, LoggingRecorder};
use xp_runtime::finalizer::{self, Event};
use xp_runtime::scheduler::{debounced_scheduler, ScheduleRequest};
use xp_runtime::watch_registry::{WatchId, WatchRegistry};

use crate::composer::{self, ExtraResourceFetcher, FunctionRunner};
use crate::config::{ComposerConfig, ControllerConfig};
use crate::{propagator, revision};

/// Finalizer stamped on every composite this reconciler manages, gating
/// deletion until connection details are unpublished (§4.H step 3).
pub const FINALIZER_NAME: &str = "composite.apiextensions.crossplane.io/finalizer";

/// Errors from one composite reconcile attempt.
#[derive(Debug, Error)]
pub enum Error {
    /// Propagated from the shared error vocabulary.
    #[error(transparent)]
    Core(#[from] xp_core::Error),
    /// Resolving the composition or its revision failed.
    #[error(transparent)]
    Revision(#[from] revision::Error),
    /// Running the function pipeline failed.
    #[error(transparent)]
    Compose(#[from] composer::Error),
    /// Publishing connection details failed.
    #[error(transparent)]
    Propagate(#[from] propagator::Error),
    /// The finalizer helper's `Apply`/`Cleanup` event handler failed, or
    /// adding/removing the finalizer itself did.
    #[error("finalizer handling failed: {0}")]
    Finalizer(String),
}

impl From<StoreError> for Error {
    fn from(e: StoreError) -> Self {
        Error::Core(e.into())
    }
}

/// Shared, read-only state for one composite kind's controller, built once
/// when the definition reconciler starts this kind's loop (§4.J).
pub struct CompositeContext {
    /// The composite kind this context reconciles.
    pub gvk: GroupVersionKind,
    /// The XRD that defines this kind, consulted for composition
    /// resolution and the connection-secret-key filter.
    pub xrd: CompositeResourceDefinition,
    /// Composite resource store.
    pub composites: Arc<dyn ObjectStore<CompositeResource>>,
    /// Composed resource store.
    pub composed: Arc<dyn ObjectStore<ComposedObject>>,
    /// Composition store, consulted for label-selector resolution.
    pub compositions: Arc<dyn ObjectStore<Composition>>,
    /// Composition-revision store.
    pub revisions: Arc<dyn ObjectStore<CompositionRevision>>,
    /// Connection-secret store.
    pub secrets: Arc<dyn SecretStore>,
    /// Function pipeline runner.
    pub functions: Arc<dyn FunctionRunner>,
    /// Out-of-band extra-resource fetcher for the requirement-stabilization
    /// loop.
    pub extra_resources: Arc<dyn ExtraResourceFetcher>,
    /// Event publisher.
    pub events: Arc<dyn EventRecorder>,
    /// The environment blob seeded into the pipeline context, if this kind
    /// selects one (§4.F step 2, §9 Open Question: environment selection
    /// is a single static blob per kind rather than a ranked list of
    /// `EnvironmentConfig`s, since this workspace has no such store).
    pub environment: Option<serde_json::Value>,
    /// Composer tuning.
    pub composer_config: ComposerConfig,
    /// Controller tuning (poll interval, concurrency).
    pub controller_config: ControllerConfig,
    /// Dynamic watch registry shared across every composite kind's
    /// controller (§4.I).
    pub watches: tokio::sync::Mutex<WatchRegistry>,
    /// Watch ids this kind's controller currently holds, keyed by the
    /// composite's name, so a reconcile that stops desiring a composed
    /// kind releases the right reference.
    watched_by_xr: tokio::sync::Mutex<HashMap<String, Vec<WatchId>>>,
}

impl CompositeContext {
    /// Build a context with an empty watch-tracking table, a
    /// [`LoggingRecorder`], and default tuning.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        gvk: GroupVersionKind,
        xrd: CompositeResourceDefinition,
        composites: Arc<dyn ObjectStore<CompositeResource>>,
        composed: Arc<dyn ObjectStore<ComposedObject>>,
        compositions: Arc<dyn ObjectStore<Composition>>,
        revisions: Arc<dyn ObjectStore<CompositionRevision>>,
        secrets: Arc<dyn SecretStore>,
        functions: Arc<dyn FunctionRunner>,
        extra_resources: Arc<dyn ExtraResourceFetcher>,
    ) -> Self {
        Self {
            gvk,
            xrd,
            composites,
            composed,
            compositions,
            revisions,
            secrets,
            functions,
            extra_resources,
            events: Arc::new(LoggingRecorder),
            environment: None,
            composer_config: ComposerConfig::default(),
            controller_config: ControllerConfig::default(),
            watches: tokio::sync::Mutex::new(WatchRegistry::new()),
            watched_by_xr: tokio::sync::Mutex::new(HashMap::new()),
        }
    }
}

/// One reconcile attempt for `xr` (§4.H steps 2-13). The caller is
/// responsible for step 1 (fetching `xr`, treating `NotFound` as a no-op).
pub async fn reconcile(xr: Arc<CompositeResource>, ctx: Context<CompositeContext>) -> Result<Action, Error> {
    let state = ctx.get_ref();

    // Step 2: pause gate.
    if xr.is_paused() {
        set_condition(state, &xr, Condition::reconcile_paused()).await;
        return Ok(Action::await_change());
    }

    let xr_name = xr.name().unwrap_or_default().to_string();
    let namespace = xr.metadata.namespace.clone();

    finalizer::finalizer(state.composites.as_ref(), &state.gvk, namespace.as_deref(), FINALIZER_NAME, xr, |event| async {
        match event {
            Event::Apply(xr) => apply(state, xr).await,
            Event::Cleanup(xr) => cleanup(state, &xr_name, xr).await,
        }
    })
    .await
    .map_err(|e| Error::Finalizer(e.to_string()))
}

/// The reconcile policy the driving loop applies after a failed attempt:
/// record the failure as a `Synced=False/ReconcileError` condition (never
/// embedding an `Invalid`-class error's text, per §7) and emit a warning
/// event. The caller decides the actual requeue delay.
pub async fn handle_error(xr: &CompositeResource, error: &Error, ctx: &Context<CompositeContext>) {
    let state = ctx.get_ref();
    if !matches!(error, Error::Core(xp_core::Error::Invalid(_))) {
        set_condition(state, xr, Condition::reconcile_error(error.to_string())).await;
    }
    state
        .events
        .publish(RuntimeEvent {
            type_: EventType::Warning,
            reason: "ReconcileError".to_string(),
            message: error.to_string(),
            gvk: state.gvk.clone(),
            namespace: xr.metadata.namespace.clone(),
            name: xr.name().unwrap_or_default().to_string(),
        })
        .await;
}

/// `Event::Apply`: steps 4-12 of §4.H, run after the finalizer helper has
/// already ensured `metadata.finalizers` carries [`FINALIZER_NAME`].
async fn apply(state: &CompositeContext, xr: Arc<CompositeResource>) -> Result<Action, Error> {
    let mut xr = (*xr).clone();
    let xr_name = xr.name().unwrap_or_default().to_string();

    // Step 5: select composition.
    let composition_name = revision::resolve_composition_name(state.compositions.as_ref(), &state.xrd, &xr).await?;
    let composition = state.compositions.get(&revision::composition_gvk(), None, &composition_name).await?;

    // Step 6: fetch the revision to run against (§4.E).
    let chosen_revision = revision::fetch(state.revisions.as_ref(), &mut xr, &composition).await?;

    // Step 7: validate the revision against this kind's XRD.
    if chosen_revision.spec.composite_type_ref.kind != state.xrd.spec.names.kind {
        let message = format!(
            "composition {} targets {} but this controller reconciles {}",
            composition.name, chosen_revision.spec.composite_type_ref.kind, state.xrd.spec.names.kind
        );
        publish_invalid(state, &xr, &message).await;
        return Ok(Action::requeue(state.controller_config.poll_interval));
    }

    // Step 8: configure the XR (default connection-secret namespace,
    // naming label).
    configure_xr(state, &mut xr);

    // Step 9: this kind's static environment blob, if any.
    let environment = state.environment.clone();

    // Step 10: invoke the composer.
    let result = match composer::compose(
        state.composites.as_ref(),
        state.composed.as_ref(),
        state.secrets.as_ref(),
        state.functions.as_ref(),
        state.extra_resources.as_ref(),
        &state.composer_config,
        &mut xr,
        &chosen_revision,
        environment,
    )
    .await
    {
        Ok(result) => result,
        Err(composer::Error::Core(xp_core::Error::Invalid(message))) => {
            publish_invalid(state, &xr, &message).await;
            return Ok(Action::requeue(state.controller_config.poll_interval));
        }
        Err(e) => return Err(e.into()),
    };

    for event in &result.events {
        let type_ = match event.severity {
            composer::Severity::Fatal | composer::Severity::Warning => EventType::Warning,
            composer::Severity::Normal => EventType::Normal,
        };
        state
            .events
            .publish(RuntimeEvent {
                type_,
                reason: format!("Compose.{}", event.step),
                message: event.message.clone(),
                gvk: state.gvk.clone(),
                namespace: xr.metadata.namespace.clone(),
                name: xr_name.clone(),
            })
            .await;
    }

    if result.fatal {
        let mut status = xr.status.clone();
        status.set_condition(Condition::unknown_after_fatal("Ready"));
        status.set_condition(Condition::reconcile_error("the function pipeline returned a fatal result"));
        patch_status(state, &xr, status).await?;
        return Ok(Action::requeue(state.controller_config.poll_interval));
    }

    // Step 11: register dynamic watches for every composed kind this
    // reconcile still desires, releasing whatever this XR no longer needs.
    register_watches(state, &xr_name, &result).await;

    // Step 12: publish connection details.
    propagator::publish(state.secrets.as_ref(), &xr, FIELD_OWNER_XR, &result.connection_details, &state.xrd.spec.connection_secret_keys).await?;

    // Step 13: compute readiness and decide the requeue.
    let all_synced = result.all_synced();
    let ready = result.all_ready();
    let mut status = xr.status.clone();
    status.set_condition(Condition::reconcile_success());
    status.set_condition(if ready {
        Condition::available()
    } else {
        let unready: Vec<String> = result.resources.iter().filter(|(_, o)| !o.ready.is_ready()).map(|(name, _)| name.clone()).collect();
        Condition::creating(&unready)
    });
    patch_status(state, &xr, status).await?;

    if !ready || !all_synced {
        Ok(Action::requeue_now())
    } else {
        Ok(Action::requeue(state.controller_config.poll_interval))
    }
}

/// `Event::Cleanup` (§4.H step 3): unpublish connection details by wiping
/// the sink secret, then let the finalizer helper release the finalizer.
async fn cleanup(state: &CompositeContext, xr_name: &str, xr: Arc<CompositeResource>) -> Result<Action, Error> {
    propagator::publish(state.secrets.as_ref(), &xr, FIELD_OWNER_XR, &std::collections::BTreeMap::new(), &[]).await?;
    release_watches(state, xr_name).await;
    Ok(Action::await_change())
}

/// Fill in defaults the rest of the pipeline assumes are present: a
/// connection-secret namespace (defaulting to the XR's own), and the
/// name-prefix label used to derive composed-resource `generateName`s.
fn configure_xr(state: &CompositeContext, xr: &mut CompositeResource) {
    if let Some(sink) = &mut xr.write_connection_secret_to {
        if sink.namespace.is_none() {
            sink.namespace = xr.metadata.namespace.clone();
        }
    }
    let xr_name = xr.name().unwrap_or_default().to_string();
    let labels = xr.metadata.labels.get_or_insert_with(Default::default);
    labels.entry(xp_core::labels::LABEL_COMPOSITE_NAME_PREFIX.to_string()).or_insert(xr_name);
    labels.entry(xp_core::labels::LABEL_XRD.to_string()).or_insert_with(|| state.xrd.name.clone());
}

/// Register a watch for every composed kind this reconcile's result still
/// references, and release any this XR previously held but no longer does.
/// Registration failures degrade to polling rather than failing the
/// reconcile (§4.H step 11).
async fn register_watches(state: &CompositeContext, xr_name: &str, result: &composer::ComposeResult) {
    let mut wanted: Vec<(GroupVersionKind, Option<String>)> = result.resources.values().map(|o| (o.gvk.clone(), o.namespace.clone())).collect();
    wanted.sort_by(|a, b| (a.0.to_string(), &a.1).cmp(&(b.0.to_string(), &b.1)));
    wanted.dedup();

    let mut watches = state.watches.lock().await;
    let mut watched_by_xr = state.watched_by_xr.lock().await;

    if let Some(previous) = watched_by_xr.remove(xr_name) {
        for id in previous {
            watches.stop_watch(id);
        }
    }

    let mut new_ids = Vec::with_capacity(wanted.len());
    for (gvk, namespace) in wanted {
        let composed = Arc::clone(&state.composed);
        let id = watches.start_watch(gvk.clone(), namespace.clone(), move || {
            tokio::spawn(async move {
                match composed.watch(&gvk, &ListParams { namespace, ..Default::default() }).await {
                    Ok(mut events) => {
                        while events.recv().await.is_some() {
                            // The driving loop re-lists on its own poll cadence; this task
                            // exists only to hold the watch connection open.
                        }
                    }
                    Err(e) => warn!(error = %e, "composed resource watch failed, falling back to polling"),
                }
            })
        });
        new_ids.push(id);
    }
    watched_by_xr.insert(xr_name.to_string(), new_ids);
}

/// Release every watch this XR holds, e.g. once it is deleted.
async fn release_watches(state: &CompositeContext, xr_name: &str) {
    let mut watches = state.watches.lock().await;
    let mut watched_by_xr = state.watched_by_xr.lock().await;
    if let Some(ids) = watched_by_xr.remove(xr_name) {
        for id in ids {
            watches.stop_watch(id);
        }
    }
}

const FIELD_OWNER_XR: &str = "apiextensions.crossplane.io/composite";

async fn patch_status(state: &CompositeContext, xr: &CompositeResource, status: xp_core::CompositeStatus) -> Result<(), Error> {
    let mut patched = xr.clone();
    patched.status = status;
    state
        .composites
        .patch_status(
            &xr.gvk,
            xr.metadata.namespace.as_deref(),
            xr.name().unwrap_or_default(),
            Patch::Apply {
                obj: patched,
                field_manager: FIELD_OWNER_XR.to_string(),
                force: false,
            },
        )
        .await?;
    Ok(())
}

async fn set_condition(state: &CompositeContext, xr: &CompositeResource, condition: Condition) {
    let mut status = xr.status.clone();
    status.set_condition(condition);
    if let Err(e) = patch_status(state, xr, status).await {
        warn!(xr = xr.name().unwrap_or_default(), error = %e, "failed to patch status condition");
    }
}

/// Surface an `Invalid`-class failure via an event only, per §7: its text
/// is non-deterministic (it may embed a raw validation message) and must
/// never be written into a status condition.
async fn publish_invalid(state: &CompositeContext, xr: &CompositeResource, message: &str) {
    state
        .events
        .publish(RuntimeEvent {
            type_: EventType::Warning,
            reason: "Invalid".to_string(),
            message: message.to_string(),
            gvk: state.gvk.clone(),
            namespace: xr.metadata.namespace.clone(),
            name: xr.name().unwrap_or_default().to_string(),
        })
        .await;
}

/// The background driver that turns [`reconcile`]/[`handle_error`] into a
/// continuous loop: seeds from the current object list, reconciles on
/// every watch event, and requeues according to each attempt's returned
/// [`Action`] via the shared [`xp_runtime::scheduler`] debounce queue.
/// Spawned by the definition reconciler through
/// [`xp_runtime::watch_registry::ControllerEngine::start`] (§4.I); never
/// returns.
pub async fn run(ctx: Context<CompositeContext>) {
    let state = ctx.get_ref();
    let (schedule_tx, schedule_rx) = mpsc::channel::<ScheduleRequest<ObjectRef>>(1024);

    if let Ok(list) = state.composites.list(&state.gvk, &ListParams::default()).await {
        for xr in list.items {
            let Some(name) = xr.name() else { continue };
            let key = ObjectRef::new(state.gvk.clone(), name);
            let key = match &xr.metadata.namespace {
                Some(ns) => key.within(ns),
                None => key,
            };
            let _ = schedule_tx.send(ScheduleRequest { message: key, run_at: Instant::now() }).await;
        }
    }

    let watch_result = state.composites.watch(&state.gvk, &ListParams::default()).await;
    let mut watch = match watch_result {
        Ok(w) => Some(w),
        Err(e) => {
            warn!(gvk = %state.gvk, error = %e, "failed to start composite watch, relying on poll requeues only");
            None
        }
    };

    let mut schedule = Box::pin(debounced_scheduler(schedule_rx));
    let semaphore = Arc::new(Semaphore::new(state.controller_config.concurrency.max(1)));
    let backoffs: Arc<std::sync::Mutex<HashMap<ObjectRef, Duration>>> = Arc::new(std::sync::Mutex::new(HashMap::new()));

    loop {
        let next_watch = async {
            match &mut watch {
                Some(w) => w.recv().await,
                None => std::future::pending().await,
            }
        };

        tokio::select! {
            biased;
            maybe_event = next_watch => {
                if let Some(key) = watch_event_key(&state.gvk, maybe_event) {
                    let _ = schedule_tx.send(ScheduleRequest { message: key, run_at: Instant::now() }).await;
                }
            }
            Some(key) = schedule.next() => {
                let permit = Arc::clone(&semaphore).acquire_owned().await.expect("semaphore is never closed");
                let ctx = ctx.clone();
                let tx = schedule_tx.clone();
                let backoffs = Arc::clone(&backoffs);
                let key_for_task = key.clone();
                tokio::spawn(async move {
                    let _permit = permit;
                    let outcome = reconcile_key(&key_for_task, &ctx).await;
                    let requeue_after = match outcome {
                        Some(Ok(action)) => {
                            backoffs.lock().expect("backoff map mutex is never poisoned").remove(&key_for_task);
                            action.requeue_after()
                        }
                        Some(Err(e)) => {
                            warn!(xr = %key_for_task, error = %e, "composite reconcile failed");
                            let mut backoffs = backoffs.lock().expect("backoff map mutex is never poisoned");
                            let next = next_backoff(backoffs.get(&key_for_task).copied().unwrap_or(INITIAL_BACKOFF));
                            backoffs.insert(key_for_task.clone(), next);
                            Some(next)
                        }
                        None => None,
                    };
                    if let Some(delay) = requeue_after {
                        let _ = tx.send(ScheduleRequest { message: key_for_task, run_at: Instant::now() + delay }).await;
                    }
                });
            }
        }
    }
}

/// Fetch one composite by its object reference and run one reconcile
/// attempt, returning `None` for step 1's `NotFound`-is-a-no-op case.
async fn reconcile_key(key: &ObjectRef, ctx: &Context<CompositeContext>) -> Option<Result<Action, Error>> {
    let state = ctx.get_ref();
    let xr = match state.composites.get(&key.gvk, key.namespace.as_deref(), &key.name).await {
        Ok(xr) => Arc::new(xr),
        Err(StoreError::NotFound(_)) => return None,
        Err(e) => return Some(Err(e.into())),
    };
    let result = reconcile(Arc::clone(&xr), ctx.clone()).await;
    if let Err(e) = &result {
        handle_error(&xr, e, ctx).await;
    }
    Some(result)
}

fn watch_event_key(gvk: &GroupVersionKind, event: Option<WatchEvent<CompositeResource>>) -> Option<ObjectRef> {
    let xr = match event? {
        WatchEvent::Added(xr) | WatchEvent::Modified(xr) | WatchEvent::Deleted(xr) => xr,
        WatchEvent::Bookmark { .. } => return None,
    };
    let name = xr.name()?;
    let key = ObjectRef::new(gvk.clone(), name);
    Some(match &xr.metadata.namespace {
        Some(ns) => key.within(ns),
        None => key,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
    use xp_client::store::memory::MemoryStore;
    use xp_core::composite::CompositionReference;
    use xp_core::composition::{CompositeTypeRef, CompositionSpec, PipelineStep};
    use xp_core::gvk::GroupVersionKind as Gvk;
    use xp_core::object::Readiness;
    use xp_core::xrd::{Scope, XrdNames, XrdSpec, XrdVersion};

    use crate::composer::{ExtraResourceFetcher, MockFunctionRunner, RunFunctionResponse, Requirements, ResourceSelector};

    struct NoExtraResources;

    #[async_trait::async_trait]
    impl ExtraResourceFetcher for NoExtraResources {
        async fn fetch(&self, _selector: &ResourceSelector) -> Result<Vec<serde_json::Value>, xp_core::Error> {
            Ok(vec![])
        }
    }

    fn xrd() -> CompositeResourceDefinition {
        CompositeResourceDefinition {
            name: "xdatabases.example.org".into(),
            metadata: ObjectMeta::default(),
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

    fn xr() -> CompositeResource {
        CompositeResource {
            gvk: Gvk::gvk("example.org", "v1alpha1", "XDatabase"),
            metadata: ObjectMeta {
                name: Some("my-xr".into()),
                uid: Some("xr-uid".into()),
                ..Default::default()
            },
            composition_reference: CompositionReference {
                composition_ref: Some("cool-composition".into()),
                ..Default::default()
            },
            resource_refs: vec![],
            claim_reference: None,
            write_connection_secret_to: None,
            spec_extra: serde_json::json!({}),
            status: Default::default(),
        }
    }

    fn composition_and_revision() -> (Composition, CompositionRevision) {
        let spec = CompositionSpec {
            composite_type_ref: CompositeTypeRef {
                api_version: "example.org/v1alpha1".into(),
                kind: "XDatabase".into(),
            },
            pipeline: vec![PipelineStep {
                step: "compose".into(),
                function_ref: "function-sql".into(),
                input: serde_json::json!({}),
            }],
        };
        let composition = Composition {
            name: "cool-composition".into(),
            uid: "comp-uid".into(),
            labels: Default::default(),
            revision_history_limit: None,
            spec: spec.clone(),
        };
        let hash = xp_core::object::truncate_label_hash(&composition.content_hash());
        let rev = CompositionRevision {
            name: "cool-composition-abc".into(),
            owner_references: vec![composition.owner_reference(&revision::composition_gvk().api_version(), true)],
            hash_label: hash,
            revision: 1,
            spec,
        };
        (composition, rev)
    }

    fn context(functions: MockFunctionRunner) -> Context<CompositeContext> {
        let composites = MemoryStore::<CompositeResource>::new();
        let composed = MemoryStore::<ComposedObject>::new();
        let compositions = MemoryStore::<Composition>::new();
        let revisions = MemoryStore::<CompositionRevision>::new();
        let secrets = xp_client::secret::MemorySecretStore::new();

        let (composition, rev) = composition_and_revision();
        compositions.seed(&revision::composition_gvk(), None, &composition.name.clone(), composition);
        revisions.seed(&revision::revision_gvk(), None, &rev.name.clone(), rev);

        Context::new(CompositeContext::new(
            Gvk::gvk("example.org", "v1alpha1", "XDatabase"),
            xrd(),
            Arc::new(composites),
            Arc::new(composed),
            Arc::new(compositions),
            Arc::new(revisions),
            Arc::new(secrets),
            Arc::new(functions),
            Arc::new(NoExtraResources),
        ))
    }

    #[tokio::test]
    async fn paused_composite_sets_condition_and_awaits_change() {
        let ctx = context(MockFunctionRunner::new());
        ctx.get_ref().composites.create(&Gvk::gvk("example.org", "v1alpha1", "XDatabase"), None, "my-xr", xr()).await.unwrap();

        let mut paused = xr();
        paused.metadata.annotations = Some([(xp_core::labels::ANNOTATION_PAUSED.to_string(), "true".to_string())].into_iter().collect());

        let action = reconcile(Arc::new(paused), ctx).await.unwrap();
        assert!(action.requeue_after().is_none());
    }

    #[tokio::test]
    async fn first_reconcile_adds_the_finalizer_and_awaits_change() {
        let ctx = context(MockFunctionRunner::new());
        let action = reconcile(Arc::new(xr()), ctx.clone()).await.unwrap();
        assert!(action.requeue_after().is_none());
    }

    #[tokio::test]
    async fn apply_composes_and_reports_available_when_everything_is_ready() {
        let functions = MockFunctionRunner::new().with_function("function-sql", |req| {
            let mut desired = req.desired;
            desired.resources.insert(
                "instance".to_string(),
                ComposedObject {
                    resource_name: "instance".into(),
                    gvk: Gvk::gvk("database.example.org", "v1", "RDSInstance"),
                    metadata: ObjectMeta::default(),
                    body: serde_json::json!({}),
                    connection_details: Default::default(),
                    ready: Readiness::True,
                },
            );
            Ok(RunFunctionResponse {
                desired,
                context: req.context,
                results: vec![],
                requirements: Requirements::default(),
            })
        });
        let ctx = context(functions);

        let mut with_finalizer = xr();
        with_finalizer.metadata.finalizers = Some(vec![FINALIZER_NAME.to_string()]);

        let action = reconcile(Arc::new(with_finalizer), ctx.clone()).await.unwrap();
        assert!(action.requeue_after().is_some());

        let stored = ctx.get_ref().composites.get(&Gvk::gvk("example.org", "v1alpha1", "XDatabase"), None, "my-xr").await.unwrap();
        assert_eq!(stored.status.condition("Ready").map(|c| c.reason.as_str()), Some("Available"));
        assert_eq!(stored.status.condition("Synced").map(|c| c.reason.as_str()), Some("ReconcileSuccess"));
    }

    #[tokio::test]
    async fn a_freshly_created_resource_requeues_immediately_then_a_synced_one_waits_for_the_poll_interval() {
        let functions = MockFunctionRunner::new().with_function("function-sql", |req| {
            let mut desired = req.desired;
            desired.resources.insert(
                "instance".to_string(),
                ComposedObject {
                    resource_name: "instance".into(),
                    gvk: Gvk::gvk("database.example.org", "v1", "RDSInstance"),
                    metadata: ObjectMeta::default(),
                    body: serde_json::json!({}),
                    connection_details: Default::default(),
                    ready: Readiness::True,
                },
            );
            Ok(RunFunctionResponse {
                desired,
                context: req.context,
                results: vec![],
                requirements: Requirements::default(),
            })
        });
        let ctx = context(functions);

        let mut with_finalizer = xr();
        with_finalizer.metadata.finalizers = Some(vec![FINALIZER_NAME.to_string()]);

        // First reconcile creates "instance": not yet synced, so even
        // though it reports ready it must requeue immediately rather than
        // waiting out the poll interval.
        let first = reconcile(Arc::new(with_finalizer), ctx.clone()).await.unwrap();
        assert_eq!(first.requeue_after(), Some(std::time::Duration::ZERO));

        // Second reconcile observes the same resource: now synced and
        // ready, so it waits out the (jittered) poll interval instead.
        let reconciled = ctx.get_ref().composites.get(&Gvk::gvk("example.org", "v1alpha1", "XDatabase"), None, "my-xr").await.unwrap();
        let second = reconcile(Arc::new(reconciled), ctx.clone()).await.unwrap();
        assert!(second.requeue_after().unwrap() > std::time::Duration::ZERO);
    }

    #[tokio::test]
    async fn deletion_unpublishes_and_awaits_change() {
        let ctx = context(MockFunctionRunner::new());
        let mut deleting = xr();
        deleting.metadata.finalizers = Some(vec![FINALIZER_NAME.to_string()]);
        deleting.metadata.deletion_timestamp = Some(k8s_openapi::apimachinery::pkg::apis::meta::v1::Time(chrono::DateTime::<chrono::Utc>::from_timestamp(0, 0).unwrap()));

        let action = reconcile(Arc::new(deleting), ctx).await.unwrap();
        assert!(action.requeue_after().is_none());
    }
}
