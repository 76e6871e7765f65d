//! The alternate single-pass `TighteningConstraintSolver` (§4.C, §9 Open
//! Question): a worklist resolver that accumulates constraints
//! incrementally and re-resolves a source when a later-discovered edge
//! tightens a constraint already satisfied by its current resolution.
//! Implemented alongside the [`super::two_pass`] solver, which this
//! workspace selects as primary (see DESIGN.md).

use super::convert::convert_dependencies;
use super::graph::{constraints_view, friendly_id, is_digest_constraint, Graph};
use super::Error;
use semver::{Version, VersionReq};
use std::collections::{BTreeMap, BTreeSet, HashSet, VecDeque};
use xp_client::oci::client::OciClient;
use xp_client::oci::package::Package;
use xp_core::lock::{Lock, LockPackage};

/// Resolve `root_source` against `current_lock`, honoring every other
/// currently-installed root in `existing_roots` for reachability pruning.
pub async fn solve(
    client: &dyn OciClient,
    root_source: &str,
    existing_roots: &[String],
    current_lock: &Lock,
) -> Result<Vec<LockPackage>, Error> {
    let mut graph: Graph = Graph::new();
    let mut resolved: BTreeMap<String, Resolved> = BTreeMap::new();
    let mut queue: VecDeque<String> = VecDeque::from([root_source.to_string()]);

    while let Some(source) = queue.pop_front() {
        let constraints = constraints_view(&graph).get(&source).cloned().unwrap_or_default();
        let still_satisfies = resolved
            .get(&source)
            .map(|r| version_satisfies(r, &constraints))
            .unwrap_or(false);
        if still_satisfies {
            continue;
        }

        let (pkg, version) = resolve_candidate(client, &source, &constraints).await?;
        validate_version(&source, &candidate_string(&pkg, &version), current_lock, &graph)?;

        let deps = convert_dependencies(&pkg.meta.depends_on);
        graph.insert(source.clone(), deps.clone());
        resolved.insert(source.clone(), Resolved { pkg, version });
        for dep in &deps {
            queue.push_back(dep.package.clone());
        }
    }

    let mut new_packages: BTreeMap<String, LockPackage> = resolved
        .iter()
        .map(|(source, r)| Ok((source.clone(), to_lock_package(source, &r.pkg, &graph)?)))
        .collect::<Result<_, Error>>()?;

    let reachable = reachable_from(&graph, root_source);
    let mut seen: HashSet<String> = HashSet::new();
    let mut result = Vec::new();

    for source in &reachable {
        if let Some(pkg) = new_packages.remove(source) {
            seen.insert(source.clone());
            result.push(pkg);
        }
    }

    let other_roots_reachability: BTreeMap<&str, BTreeSet<String>> = existing_roots
        .iter()
        .filter(|r| r.as_str() != root_source)
        .map(|r| (r.as_str(), reachable_from_lock(current_lock, r)))
        .collect();

    for pkg in &current_lock.packages {
        if seen.contains(&pkg.source) {
            continue;
        }
        let reachable_from_new_root = reachable.contains(&pkg.source);
        let reachable_from_other_root = other_roots_reachability.values().any(|r| r.contains(&pkg.source));
        if !reachable_from_new_root && !reachable_from_other_root {
            seen.insert(pkg.source.clone());
            result.push(pkg.clone());
        }
    }

    Ok(result)
}

/// A resolved candidate: the fetched package, plus the semver version it
/// was resolved from, when resolution went through the semver path rather
/// than an exact digest pin.
struct Resolved {
    pkg: Package,
    version: Option<Version>,
}

fn candidate_string(pkg: &Package, version: &Option<Version>) -> String {
    version.as_ref().map(|v| v.to_string()).unwrap_or_else(|| pkg.digest.clone())
}

async fn resolve_candidate(client: &dyn OciClient, source: &str, constraints: &[String]) -> Result<(Package, Option<Version>), Error> {
    let (digests, semvers): (Vec<&String>, Vec<&String>) = constraints
        .iter()
        .filter(|c| !c.is_empty())
        .partition(|c| is_digest_constraint(c));

    if digests.is_empty() && semvers.is_empty() {
        return Ok((client.get(source).await?, None));
    }

    if !digests.is_empty() && !semvers.is_empty() {
        return Err(xp_core::Error::ConflictingConstraints(
            source.to_string(),
            "mixes digest and semver constraints".to_string(),
        )
        .into());
    }
    if !digests.is_empty() {
        let distinct: HashSet<&&String> = digests.iter().collect();
        if distinct.len() > 1 {
            return Err(xp_core::Error::ConflictingConstraints(
                source.to_string(),
                "multiple distinct digests requested".to_string(),
            )
            .into());
        }
        return Ok((client.get(&format!("{source}@{}", digests[0])).await?, None));
    }
    let combined = semvers.iter().map(|c| strip_v_prefixes(c)).collect::<Vec<_>>().join(", ");
    let req = VersionReq::parse(&combined)
        .map_err(|e| xp_core::Error::NoVersionSatisfies(source.to_string(), format!("{combined} ({e})")))?;
    let mut versions = client.list_versions(source).await?;
    versions.sort();
    let chosen: Version = versions
        .into_iter()
        .find(|v| req.matches(v))
        .ok_or_else(|| xp_core::Error::NoVersionSatisfies(source.to_string(), combined.clone()))?;
    let pkg = client.get(&format!("{source}:v{chosen}")).await?;
    Ok((pkg, Some(chosen)))
}

/// Whether a previously resolved candidate still satisfies `constraints`,
/// i.e. whether a newly discovered edge genuinely tightens the source's
/// resolution.
fn version_satisfies(resolved: &Resolved, constraints: &[String]) -> bool {
    if constraints.is_empty() {
        return true;
    }
    let (digests, semvers): (Vec<&String>, Vec<&String>) = constraints
        .iter()
        .filter(|c| !c.is_empty())
        .partition(|c| is_digest_constraint(c));
    if digests.is_empty() && semvers.is_empty() {
        return true;
    }
    if !digests.is_empty() {
        return digests.iter().all(|d| d.as_str() == resolved.pkg.digest);
    }
    let Some(version) = &resolved.version else {
        return false;
    };
    let combined = semvers.iter().map(|c| strip_v_prefixes(c)).collect::<Vec<_>>().join(", ");
    VersionReq::parse(&combined).map(|req| req.matches(version)).unwrap_or(false)
}

/// `ValidateVersion(source, candidate)` (§4.C alternate design): fail
/// up-front if an existing locked package depends on `source` in a way
/// `candidate` cannot satisfy. Dependencies recorded in the graph being
/// built by this solve are exempt — only *other*, already-locked
/// dependents can veto.
fn validate_version(source: &str, candidate: &str, current_lock: &Lock, graph_in_progress: &Graph) -> Result<(), Error> {
    for pkg in &current_lock.packages {
        if graph_in_progress.contains_key(&pkg.source) {
            continue;
        }
        for dep in &pkg.dependencies {
            if dep.package != source || dep.constraints.is_empty() {
                continue;
            }
            let excludes = if is_digest_constraint(&dep.constraints) {
                is_digest_constraint(candidate) && dep.constraints != candidate
            } else if let Ok(req) = VersionReq::parse(&strip_v_prefixes(&dep.constraints)) {
                match Version::parse(strip_v_prefixes(candidate).trim_start_matches('v')) {
                    Ok(v) => !req.matches(&v),
                    Err(_) => false,
                }
            } else {
                false
            };
            if excludes {
                return Err(Error::VersionConflict {
                    conflicting_source: source.to_string(),
                    candidate: candidate.to_string(),
                });
            }
        }
    }
    Ok(())
}

fn to_lock_package(source: &str, pkg: &Package, graph: &Graph) -> Result<LockPackage, Error> {
    let kind = pkg
        .meta
        .package_type()
        .ok_or_else(|| xp_core::Error::Invalid(format!("{source}: unrecognized meta kind {}", pkg.meta.kind)))?;
    Ok(LockPackage {
        name: friendly_id(source, &pkg.digest),
        source: source.to_string(),
        version: pkg.digest.clone(),
        kind,
        dependencies: graph.get(source).cloned().unwrap_or_default(),
    })
}

/// The transitive closure of sources reachable from `root` by walking
/// `graph`'s outgoing edges.
fn reachable_from(graph: &Graph, root: &str) -> BTreeSet<String> {
    let mut seen = BTreeSet::new();
    let mut stack = vec![root.to_string()];
    while let Some(source) = stack.pop() {
        if !seen.insert(source.clone()) {
            continue;
        }
        if let Some(deps) = graph.get(&source) {
            for dep in deps {
                stack.push(dep.package.clone());
            }
        }
    }
    seen
}

/// The transitive closure of sources reachable from `root` using the
/// dependency edges already recorded in `lock`, for roots this solve did
/// not itself re-resolve.
fn reachable_from_lock(lock: &Lock, root: &str) -> BTreeSet<String> {
    let mut seen = BTreeSet::new();
    let mut stack = vec![root.to_string()];
    while let Some(source) = stack.pop() {
        if !seen.insert(source.clone()) {
            continue;
        }
        if let Some(pkg) = lock.get(&source) {
            for dep in &pkg.dependencies {
                stack.push(dep.package.clone());
            }
        }
    }
    seen
}

fn strip_v_prefixes(input: &str) -> String {
    let chars: Vec<char> = input.chars().collect();
    let mut out = String::with_capacity(chars.len());
    let mut i = 0;
    while i < chars.len() {
        if chars[i] == 'v' && chars.get(i + 1).is_some_and(|c| c.is_ascii_digit()) {
            i += 1;
            continue;
        }
        out.push(chars[i]);
        i += 1;
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use xp_core::lock::PackageType;

    fn pkg(source: &str, deps: Vec<&str>) -> LockPackage {
        LockPackage {
            name: format!("{source}-abcdef12"),
            source: source.into(),
            version: "sha256:aa".into(),
            kind: PackageType::Provider,
            dependencies: deps
                .into_iter()
                .map(|d| xp_core::Dependency {
                    package: d.into(),
                    constraints: String::new(),
                    kind: PackageType::Provider,
                    api_version: "meta.pkg.crossplane.io/v1".into(),
                })
                .collect(),
        }
    }

    #[test]
    fn reachable_from_lock_walks_dependency_edges() {
        let lock = Lock {
            packages: vec![pkg("a", vec!["b"]), pkg("b", vec!["c"]), pkg("c", vec![]), pkg("orphan", vec![])],
        };
        let reachable = reachable_from_lock(&lock, "a");
        assert!(reachable.contains("b"));
        assert!(reachable.contains("c"));
        assert!(!reachable.contains("orphan"));
    }
}
