//! `ConvertDependencies` (§4.C): normalize a package meta document's
//! `dependsOn` entries, which arrive in one of three legacy shapes, into
//! the canonical [`xp_core::Dependency`] shape.

use xp_client::oci::package::RawDependency;
use xp_core::lock::PackageType;
use xp_core::Dependency;

fn package_type_from_str(kind: &str) -> Option<PackageType> {
    match kind {
        "Provider" | "provider" => Some(PackageType::Provider),
        "Configuration" | "configuration" => Some(PackageType::Configuration),
        "Function" | "function" => Some(PackageType::Function),
        _ => None,
    }
}

/// Normalize one package's raw `dependsOn` list. Entries that match
/// neither legacy shape are silently dropped, per §4.C.
pub fn convert_dependencies(raw: &[RawDependency]) -> Vec<Dependency> {
    raw.iter().filter_map(convert_one).collect()
}

fn convert_one(raw: &RawDependency) -> Option<Dependency> {
    match raw {
        // Shape 1: explicit `{apiVersion, kind, package, version}`.
        RawDependency::Explicit {
            api_version,
            kind,
            package,
            version,
        } => {
            let kind = package_type_from_str(kind)?;
            Some(Dependency {
                package: package.clone(),
                constraints: version.clone(),
                kind,
                api_version: api_version.clone(),
            })
        }
        // Shape 2: a single `provider|configuration|function` field naming
        // the source, with the constraint under a `version` key alongside.
        RawDependency::Shorthand(fields) => {
            let (type_key, source) = fields
                .iter()
                .find(|(k, _)| package_type_from_str(k).is_some())?;
            let kind = package_type_from_str(type_key)?;
            let constraints = fields.get("version").cloned().unwrap_or_default();
            Some(Dependency {
                package: source.clone(),
                constraints,
                kind,
                api_version: String::new(),
            })
        }
    }
}
