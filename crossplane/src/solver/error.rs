use thiserror::Error;
use xp_client::oci::OciError;

/// Errors from the dependency solver, wrapping the canonical kinds in
/// [`xp_core::Error`] plus the OCI-fetch failures the solver's graph walk
/// can hit.
#[derive(Debug, Error)]
pub enum Error {
    /// A canonical error kind (`Circular`, `ConflictingConstraints`,
    /// `NoVersionSatisfies`, ...).
    #[error(transparent)]
    Core(#[from] xp_core::Error),

    /// The OCI registry fetch needed to resolve a candidate failed.
    #[error(transparent)]
    Oci(#[from] OciError),

    /// `TighteningConstraintSolver`'s `ValidateVersion` precondition
    /// failed: an already-installed package's dependency on `source`
    /// excludes `candidate`.
    #[error("installing would conflict with an existing dependency on {conflicting_source}: {candidate} is excluded")]
    VersionConflict {
        /// The source whose constraint was violated.
        conflicting_source: String,
        /// The version that would have been installed.
        candidate: String,
    },
}
