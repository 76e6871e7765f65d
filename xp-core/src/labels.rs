//! Well-known label and annotation keys, as `kube_core` exposes e.g.
//! `LAST_APPLIED_CONFIG_ANNOTATION`.

/// 63-char truncated sha256 hex of a composition's content, stamped on the
/// revision that content hashes to.
pub const LABEL_COMPOSITION_HASH: &str = "crossplane.io/composition-hash";

/// Name of the composition a revision or composed resource was rendered
/// from.
pub const LABEL_COMPOSITION_NAME: &str = "crossplane.io/composition-name";

/// Name of the claim that owns a composite, when the composite was created
/// through a claim.
pub const LABEL_CLAIM_NAME: &str = "crossplane.io/claim-name";

/// Namespace of the claim that owns a composite.
pub const LABEL_CLAIM_NAMESPACE: &str = "crossplane.io/claim-namespace";

/// Name of the XRD that defines a composite's kind.
pub const LABEL_XRD: &str = "crossplane.io/xrd";

/// Name-prefix label used to derive `generateName` for composed resources
/// that the render step gives no explicit name.
pub const LABEL_COMPOSITE_NAME_PREFIX: &str = "crossplane.io/composite-resource-name";

/// The logical name (stable across reconciles) that keys the observed and
/// desired composed-resource maps. Written by the composer, read back on
/// the next observe.
pub const ANNOTATION_COMPOSITION_RESOURCE_NAME: &str = "crossplane.io/composition-resource-name";

/// When present with value `"true"`, reconciliation of the annotated object
/// is suspended.
pub const ANNOTATION_PAUSED: &str = "crossplane.io/paused";

/// Value that `ANNOTATION_PAUSED` must hold to suspend reconciliation.
pub const PAUSED_TRUE: &str = "true";

/// The reserved function-context key under which the environment blob is
/// preloaded before the first pipeline step runs.
pub const CONTEXT_KEY_ENVIRONMENT: &str = "apiextensions.crossplane.io/environment";

/// Field manager used when the composer persists `resourceRefs` on the
/// composite, ahead of applying any composed resource.
pub const FIELD_OWNER_COMPOSITE: &str = "apiextensions.crossplane.io/composite";

/// Prefix for the per-XR field-owner identity used when server-side-applying
/// composed resources. The full owner string appends a content-addressed
/// 32-hex-character suffix; see `crate::object::composed_field_owner`.
pub const FIELD_OWNER_COMPOSED_PREFIX: &str = "apiextensions.crossplane.io/composed/";
