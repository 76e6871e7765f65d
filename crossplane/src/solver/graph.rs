//! The dependency graph intermediate (§3 "Dependency graph (solver
//! intermediate)"): a map source → outgoing dependency edges, built by
//! [`super::two_pass::build_graph`] and [`super::tightening`] alike.

use std::collections::BTreeMap;
use xp_core::Dependency;

/// Source → its declared outgoing dependencies.
pub type Graph = BTreeMap<String, Vec<Dependency>>;

/// The "constraints view" of a graph (§4.C Pass 2): source → every
/// constraint string carried by an edge that targets it, obtained by
/// walking every edge in the graph.
pub fn constraints_view(graph: &Graph) -> BTreeMap<String, Vec<String>> {
    let mut view: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for deps in graph.values() {
        for dep in deps {
            view.entry(dep.package.clone()).or_default().push(dep.constraints.clone());
        }
    }
    view
}

/// `FriendlyID(source, digest)`: `<last path segment of source>-<first 8
/// hex chars of digest>` (§4.C, format resolved per SPEC_FULL.md since the
/// distilled spec left it open).
pub fn friendly_id(source: &str, digest: &str) -> String {
    let last_segment = source.rsplit('/').next().unwrap_or(source);
    let hex = digest.rsplit(':').next().unwrap_or(digest);
    let short = &hex[..hex.len().min(8)];
    format!("{last_segment}-{short}")
}

/// Whether `constraint` names an exact OCI digest rather than a semver
/// range (§4.C Pass 2 step 1).
pub fn is_digest_constraint(constraint: &str) -> bool {
    constraint.starts_with("sha256:")
}
