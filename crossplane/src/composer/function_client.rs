//! The function pipeline's RPC contract (§4.F): a `tonic`-shaped async
//! trait so the composer can run against a real function pod or the
//! in-memory [`MockFunctionRunner`] test double without knowing which.
//! Transport wiring (the actual gRPC channel) is `external glue` and out
//! of scope for this workspace.

use async_trait::async_trait;
use std::collections::BTreeMap;
use thiserror::Error;
use xp_core::object::ComposedObject;

/// The composite half of a function request/response: its rendered body
/// plus whatever connection details are currently known about it.
#[derive(Debug, Clone, Default)]
pub struct CompositeState {
    /// The composite's full rendered body, including `apiVersion`/`kind`/
    /// `metadata`, exactly as a function would see it over the wire.
    pub resource: serde_json::Value,
    /// Connection details known about the composite at this point in the
    /// pipeline.
    pub connection_details: BTreeMap<String, Vec<u8>>,
}

/// One side (observed or desired) of a function request/response: the
/// composite plus every composed resource, keyed by logical name.
#[derive(Debug, Clone, Default)]
pub struct PipelineState {
    /// The composite.
    pub composite: CompositeState,
    /// Composed resources, keyed by composition-resource-name.
    pub resources: BTreeMap<String, ComposedObject>,
}

/// A selector a function uses to request an out-of-band "extra resource"
/// (§4.F step 3b).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ResourceSelector {
    /// `apiVersion` of the requested resource(s).
    pub api_version: String,
    /// Kind of the requested resource(s).
    pub kind: String,
    /// Match a single resource by name, if set.
    pub match_name: Option<String>,
    /// Match every resource whose labels are a superset of this map, when
    /// `match_name` is unset.
    pub match_labels: BTreeMap<String, String>,
}

/// The requirements a function declares for its *next* invocation, keyed
/// by a caller-chosen requirement name.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Requirements {
    /// Extra-resource selectors this step wants populated before it runs
    /// again.
    pub extra_resources: BTreeMap<String, ResourceSelector>,
}

/// Severity of a single function result, mirroring the function protocol's
/// three-valued severity (§4.F step 3c).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    /// Informational; does not affect the XR's conditions.
    Normal,
    /// Surfaced as a warning event/condition but does not stop the
    /// pipeline.
    Warning,
    /// Stops the pipeline; the XR's `ReconcileSuccess` condition is set to
    /// `False`.
    Fatal,
}

/// One result a pipeline step returned.
#[derive(Debug, Clone, PartialEq)]
pub struct FunctionResult {
    /// The step that produced this result.
    pub step: String,
    /// Its severity.
    pub severity: Severity,
    /// A human-readable message. Per §4.H step 10, fatal messages are
    /// surfaced via events, never written verbatim into a status
    /// condition (non-deterministic text would cause status churn).
    pub message: String,
}

/// A single pipeline step's request.
#[derive(Debug, Clone, Default)]
pub struct RunFunctionRequest {
    /// State observed before this reconcile's pipeline ran.
    pub observed: PipelineState,
    /// State accumulated by prior steps in this pipeline run.
    pub desired: PipelineState,
    /// Opaque context threaded between steps, seeded with the environment
    /// blob under the reserved environment key.
    pub context: serde_json::Value,
    /// This step's opaque input, from the composition spec.
    pub input: serde_json::Value,
    /// Extra resources fetched for a previous requirement-stabilization
    /// iteration, keyed by the requirement name that requested them. A
    /// present-but-empty entry means "selector matched nothing".
    pub extra_resources: BTreeMap<String, Vec<serde_json::Value>>,
}

/// A single pipeline step's response.
#[derive(Debug, Clone, Default)]
pub struct RunFunctionResponse {
    /// The accumulated desired state after this step.
    pub desired: PipelineState,
    /// The context to thread into the next step.
    pub context: serde_json::Value,
    /// This step's results (events).
    pub results: Vec<FunctionResult>,
    /// What this step additionally needs before it can finish rendering.
    pub requirements: Requirements,
}

/// The RPC failed at the transport layer (a `tonic::Status`-shaped error
/// in spirit, without depending on `tonic` since this workspace never
/// dials a real channel).
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("function {function_ref} rpc failed: {message}")]
pub struct FunctionError {
    /// The function that failed.
    pub function_ref: String,
    /// The transport-level failure message.
    pub message: String,
}

/// A function pipeline step runner.
#[async_trait]
pub trait FunctionRunner: Send + Sync {
    /// Invoke `function_ref` with `request`, returning its response or a
    /// transport-level failure. A fatal [`FunctionResult`] inside a
    /// successful response is not a transport failure; only an RPC-layer
    /// problem (unreachable pod, deadline, decode error) is.
    async fn run_function(&self, function_ref: &str, request: RunFunctionRequest) -> Result<RunFunctionResponse, FunctionError>;
}

/// Fetches the out-of-band resources a function's declared
/// [`Requirements`] ask for.
#[async_trait]
pub trait ExtraResourceFetcher: Send + Sync {
    /// Resolve `selector` to zero or more resource bodies. An empty vec
    /// means "matched nothing", which the requirement-stabilization loop
    /// still reports back to the function rather than treating as an
    /// error.
    async fn fetch(&self, selector: &ResourceSelector) -> Result<Vec<serde_json::Value>, xp_core::Error>;
}

/// An in-memory [`FunctionRunner`] test double, driven by a caller-supplied
/// closure per function name, the way this workspace's other RPC-shaped
/// traits (`SecretStore`, `OciClient`) ship a `Memory*`/`Fake*` double
/// rather than a real transport.
pub struct MockFunctionRunner {
    #[allow(clippy::type_complexity)]
    handlers: std::collections::HashMap<String, Box<dyn Fn(RunFunctionRequest) -> Result<RunFunctionResponse, FunctionError> + Send + Sync>>,
}

impl Default for MockFunctionRunner {
    fn default() -> Self {
        Self::new()
    }
}

impl MockFunctionRunner {
    /// An empty mock; every call to an unregistered function fails.
    pub fn new() -> Self {
        Self {
            handlers: std::collections::HashMap::new(),
        }
    }

    /// Register a handler for `function_ref`.
    pub fn with_function(
        mut self,
        function_ref: &str,
        handler: impl Fn(RunFunctionRequest) -> Result<RunFunctionResponse, FunctionError> + Send + Sync + 'static,
    ) -> Self {
        self.handlers.insert(function_ref.to_string(), Box::new(handler));
        self
    }
}

#[async_trait]
impl FunctionRunner for MockFunctionRunner {
    async fn run_function(&self, function_ref: &str, request: RunFunctionRequest) -> Result<RunFunctionResponse, FunctionError> {
        match self.handlers.get(function_ref) {
            Some(handler) => handler(request),
            None => Err(FunctionError {
                function_ref: function_ref.to_string(),
                message: "no handler registered".to_string(),
            }),
        }
    }
}
