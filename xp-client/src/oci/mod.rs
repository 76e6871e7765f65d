//! The OCI package client (§4.B).
//!
//! Pulls the OCI image at a package's reference, extracts its embedded
//! `meta.yaml`/`crd.yaml` layer, and reports the image digest. Built on top
//! of `oci-client` (the maintained fork of `oci-distribution`), the same
//! family of crate the `spin` OCI loader in this pack's reference corpus
//! uses to pull OCI artifacts for its own package format.

pub mod client;
pub mod package;

pub use client::{OciClient, OciPackageClient};
pub use package::{Package, PackageMeta};

use thiserror::Error;

/// Errors from the OCI package client.
#[derive(Debug, Error)]
pub enum OciError {
    /// The reference string could not be parsed.
    #[error("invalid OCI reference {0}: {1}")]
    InvalidReference(String, String),

    /// The registry could not be reached, or returned a transport-level
    /// error. Surfaced as-is per §4.B.
    #[error("registry error: {0}")]
    Registry(String),

    /// Authentication with the registry failed. Surfaced as-is per §4.B.
    #[error("authentication failed: {0}")]
    Auth(String),

    /// The pulled image's meta document does not match any known meta
    /// schema.
    #[error("invalid package: {0}")]
    InvalidPackage(String),

    /// No tags were found, or none parsed as valid semver.
    #[error("no versions found for {0}")]
    NoVersions(String),
}
