use thiserror::Error;

/// The error kinds named in the specification's error-handling design.
///
/// These are kinds, not wrapped transport errors: `xp-client` and
/// `crossplane` each wrap this enum (or embed its variants) inside their own
/// richer error types the way `kube_core::Error` wraps `serde_json::Error`.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum Error {
    /// The requested object does not exist in the store.
    #[error("object not found: {0}")]
    NotFound(String),

    /// A server-side-apply or update raced another writer; always retried.
    #[error("conflict updating {0}")]
    Conflict(String),

    /// The object failed admission/validation. Surfaced via events only:
    /// its textual form is non-deterministic and must never be written into
    /// a status condition message.
    #[error("invalid object: {0}")]
    Invalid(String),

    /// No kind matches the requested group/version/kind in the store.
    #[error("no kind registered for {0}")]
    NoKindMatch(String),

    /// The package dependency graph contains a cycle.
    #[error("circular dependency at {0}")]
    Circular(String),

    /// Two edges into the same package disagree on constraint type
    /// (digest vs. semver) or specify different fixed digests.
    #[error("conflicting constraints for {0}: {1}")]
    ConflictingConstraints(String, String),

    /// No published version satisfies the accumulated semver constraints.
    #[error("no version of {0} satisfies {1}")]
    NoVersionSatisfies(String, String),

    /// A composed resource's kind changed between reconciles.
    #[error("composed resource {0} changed kind")]
    KindMismatch(String),

    /// An owned composed resource has no composition-resource-name
    /// annotation.
    #[error("composed resource {0} has no composition-resource-name annotation")]
    AnonymousComposedResource(String),

    /// The composite is missing the name-prefix label required to
    /// generate composed resource names.
    #[error("composite {0} is missing the name-prefix label")]
    MissingNamePrefixLabel(String),

    /// The requirement-stabilization loop did not converge within the
    /// configured number of iterations.
    #[error("function pipeline step {0} did not stabilize within {1} iterations")]
    FunctionMaxIterations(String, u32),

    /// A pipeline function returned a fatal result.
    #[error("function pipeline step {0} failed fatally: {1}")]
    FunctionFatal(String, String),

    /// No revision owned by the referenced composition matches.
    #[error("no compatible revision for composition {0}")]
    NoCompatibleRevision(String),

    /// The operation exceeded its deadline.
    #[error("operation timed out")]
    Timeout,

    /// Any other, non-distinguished failure (wraps transport errors).
    #[error("{0}")]
    Other(String),
}
