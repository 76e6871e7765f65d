//! The package dependency solver (§4.C): Minimum Version Selection over
//! the OCI package dependency graph, producing a new lock file from a root
//! package reference and the current one.
//!
//! Two solvers are implemented, sharing [`convert::convert_dependencies`]
//! and the [`graph::Graph`] type:
//!
//! - [`two_pass`]: `BuildGraph` then `SelectVersions`. **Primary solver**
//!   used by [`solve`] (see DESIGN.md for why).
//! - [`tightening`]: the alternate worklist-based
//!   `TighteningConstraintSolver`, kept as a documented alternative.

pub mod convert;
pub mod error;
pub mod graph;
pub mod tightening;
pub mod two_pass;

pub use error::Error;
pub use graph::{friendly_id, Graph};

use xp_client::oci::client::OciClient;
use xp_core::lock::{Lock, LockPackage};

/// Resolve a new lock file for installing `root_source` on top of
/// `current_lock`, using the two-pass solver.
pub async fn solve(client: &dyn OciClient, root_source: &str, current_lock: &Lock) -> Result<Lock, Error> {
    let graph = two_pass::build_graph(client, root_source, current_lock).await?;
    let packages: Vec<LockPackage> = two_pass::select_versions(client, &graph, current_lock).await?;
    Ok(Lock { packages })
}
