//! The two-pass MVS solver (§4.C): `BuildGraph` then `SelectVersions`,
//! chosen as this implementation's primary solver (see DESIGN.md).

use super::convert::convert_dependencies;
use super::graph::{constraints_view, friendly_id, is_digest_constraint, Graph};
use super::Error;
use futures::future::BoxFuture;
use semver::{Version, VersionReq};
use std::collections::{BTreeSet, HashSet};
use xp_client::oci::client::OciClient;
use xp_client::oci::package::Package;
use xp_core::lock::{Lock, LockPackage};

/// Pass 1: DFS the dependency graph from `root_source`, seeded with every
/// edge already recorded in `current_lock`. Fails `Circular` if the walk
/// revisits a source still on the DFS stack.
pub async fn build_graph(client: &dyn OciClient, root_source: &str, current_lock: &Lock) -> Result<Graph, Error> {
    let mut graph: Graph = Graph::new();
    let mut visited: HashSet<String> = HashSet::new();
    for pkg in &current_lock.packages {
        graph.insert(pkg.source.clone(), pkg.dependencies.clone());
        visited.insert(pkg.source.clone());
    }
    let mut in_progress: HashSet<String> = HashSet::new();
    visit(client, root_source, &mut graph, &mut visited, &mut in_progress).await?;
    Ok(graph)
}

fn visit<'a>(
    client: &'a dyn OciClient,
    source: &'a str,
    graph: &'a mut Graph,
    visited: &'a mut HashSet<String>,
    in_progress: &'a mut HashSet<String>,
) -> BoxFuture<'a, Result<(), Error>> {
    Box::pin(async move {
        if in_progress.contains(source) {
            return Err(xp_core::Error::Circular(source.to_string()).into());
        }
        if visited.contains(source) {
            return Ok(());
        }
        in_progress.insert(source.to_string());
        let pkg = client.get(source).await?;
        let deps = convert_dependencies(&pkg.meta.depends_on);
        graph.insert(source.to_string(), deps.clone());
        visited.insert(source.to_string());
        for dep in &deps {
            visit(client, &dep.package, graph, visited, in_progress).await?;
        }
        in_progress.remove(source);
        Ok(())
    })
}

/// Pass 2: for every source with constraints in the new graph, resolve a
/// version satisfying them all; every other currently-locked source is
/// carried over unchanged.
pub async fn select_versions(client: &dyn OciClient, graph: &Graph, current_lock: &Lock) -> Result<Vec<LockPackage>, Error> {
    let constraints = constraints_view(graph);

    let mut sources: BTreeSet<String> = current_lock.packages.iter().map(|p| p.source.clone()).collect();
    sources.extend(constraints.keys().cloned());

    let mut resolved = Vec::with_capacity(sources.len());
    for source in sources {
        match constraints.get(&source) {
            None => {
                if let Some(existing) = current_lock.get(&source) {
                    resolved.push(existing.clone());
                }
            }
            Some(cs) => resolved.push(resolve_source(client, &source, cs, graph).await?),
        }
    }
    Ok(resolved)
}

async fn resolve_source(client: &dyn OciClient, source: &str, constraints: &[String], graph: &Graph) -> Result<LockPackage, Error> {
    let (digests, semvers): (Vec<&String>, Vec<&String>) = constraints
        .iter()
        .filter(|c| !c.is_empty())
        .partition(|c| is_digest_constraint(c));

    if digests.is_empty() && semvers.is_empty() {
        return to_lock_package(source, &client.get(source).await?, graph);
    }

    if !digests.is_empty() && !semvers.is_empty() {
        return Err(xp_core::Error::ConflictingConstraints(
            source.to_string(),
            "mixes digest and semver constraints".to_string(),
        )
        .into());
    }

    let pkg = if !digests.is_empty() {
        let distinct: HashSet<&&String> = digests.iter().collect();
        if distinct.len() > 1 {
            return Err(xp_core::Error::ConflictingConstraints(
                source.to_string(),
                "multiple distinct digests requested".to_string(),
            )
            .into());
        }
        let digest = digests[0];
        client.get(&format!("{source}@{digest}")).await?
    } else {
        resolve_semver(client, source, &semvers).await?
    };

    to_lock_package(source, &pkg, graph)
}

async fn resolve_semver(client: &dyn OciClient, source: &str, constraints: &[&String]) -> Result<Package, Error> {
    let combined = constraints
        .iter()
        .map(|c| strip_v_prefixes(c))
        .collect::<Vec<_>>()
        .join(", ");
    let req = VersionReq::parse(&combined)
        .map_err(|e| xp_core::Error::NoVersionSatisfies(source.to_string(), format!("{combined} ({e})")))?;

    let mut versions = client.list_versions(source).await?;
    versions.sort();
    let chosen: Version = versions
        .into_iter()
        .find(|v| req.matches(v))
        .ok_or_else(|| xp_core::Error::NoVersionSatisfies(source.to_string(), combined.clone()))?;

    client.get(&format!("{source}:v{chosen}")).await.map_err(Error::from)
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

/// Strip a `v` prefix directly preceding a digit, e.g. `>=v1.0.0` →
/// `>=1.0.0`, so constraint strings in Crossplane's conventional
/// `v`-prefixed semver can be fed to [`semver::VersionReq`].
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

    #[test]
    fn strips_v_prefix_from_each_bound() {
        assert_eq!(strip_v_prefixes(">=v1.0.0, <v2.0.0"), ">=1.0.0, <2.0.0");
    }

    #[test]
    fn leaves_already_bare_versions_alone() {
        assert_eq!(strip_v_prefixes(">=1.1.0"), ">=1.1.0");
    }
}
