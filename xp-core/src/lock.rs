//! Lock file and `LockPackage` types (§3), the durable state the dependency
//! solver reads and writes.

use serde::{Deserialize, Serialize};

/// The kind of an installed OCI package.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PackageType {
    /// A provider package (controller binary).
    Provider,
    /// A configuration package (a bundle of XRDs/compositions).
    Configuration,
    /// A composition-function package.
    Function,
}

/// One dependency edge recorded against a locked package.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Dependency {
    /// The OCI source (repository reference) of the depended-on package.
    pub package: String,
    /// The constraint text, passed through verbatim from the package's
    /// meta document (a semver range or an exact digest).
    pub constraints: String,
    /// The kind of package this dependency resolves to.
    pub kind: PackageType,
    /// `apiVersion` of the meta document this dependency was declared in,
    /// kept for forward compatibility with newer meta schemas.
    pub api_version: String,
}

/// A single pinned package in the lock file.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LockPackage {
    /// Deterministic friendly id derived from `source` + digest.
    pub name: String,
    /// The OCI repository (without tag/digest).
    pub source: String,
    /// Either a resolved digest (`sha256:...`) or, for carried-over unmanaged
    /// entries, a semver tag.
    pub version: String,
    /// The package's type.
    #[serde(rename = "type")]
    pub kind: PackageType,
    /// This package's own dependencies, as recorded in the graph at solve
    /// time.
    #[serde(default)]
    pub dependencies: Vec<Dependency>,
}

/// The full package lock: a flat list of pinned packages, unique by
/// `source` (§3 invariant).
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Lock {
    /// The locked packages.
    pub packages: Vec<LockPackage>,
}

impl Lock {
    /// Look up a locked package by source.
    pub fn get(&self, source: &str) -> Option<&LockPackage> {
        self.packages.iter().find(|p| p.source == source)
    }

    /// Validate the `source` uniqueness invariant and the "every
    /// dependency's dependent package is present" invariant from §3.
    pub fn validate(&self) -> Result<(), String> {
        let mut seen = std::collections::HashSet::new();
        for p in &self.packages {
            if !seen.insert(p.source.as_str()) {
                return Err(format!("duplicate source in lock: {}", p.source));
            }
        }
        for p in &self.packages {
            for dep in &p.dependencies {
                if self.get(&dep.package).is_none() {
                    return Err(format!(
                        "{} depends on {} which is not present in the lock",
                        p.source, dep.package
                    ));
                }
            }
        }
        Ok(())
    }
}
