use super::package::{Package, PackageMeta};
use super::OciError;
use async_trait::async_trait;
use oci_client::{
    client::{ClientConfig, ImageLayer},
    secrets::RegistryAuth,
    Client, Reference,
};
use semver::Version;
use std::io::Read;
use std::str::FromStr;
use tar::Archive;

/// The two operations the rest of the control plane needs from an OCI
/// registry (§4.B).
#[async_trait]
pub trait OciClient: Send + Sync {
    /// Pull the image at `reference` (a tag or `@digest`), extract its meta
    /// document and any CRD manifests, and report the resolved digest.
    async fn get(&self, reference: &str) -> Result<Package, OciError>;

    /// List every tag of `source`, sorted ascending by semver. Tags that do
    /// not parse as semver are dropped, not errored on.
    async fn list_versions(&self, source: &str) -> Result<Vec<Version>, OciError>;
}

/// The media type crossplane packages use for the layer carrying the meta
/// and (optionally) CRD YAML documents.
const PACKAGE_LAYER_MEDIA_TYPE: &str = "application/vnd.crossplane.package.contents.v1+gzip";

/// An [`OciClient`] backed by a real registry, via `oci-client`.
pub struct OciPackageClient {
    client: Client,
    auth: RegistryAuth,
}

impl OciPackageClient {
    /// Construct a client using the registry's default authentication
    /// discovery (the local Docker/Podman keychain).
    pub fn new() -> Self {
        Self {
            client: Client::new(ClientConfig::default()),
            auth: RegistryAuth::Anonymous,
        }
    }

    /// Construct a client with explicit credentials.
    pub fn with_auth(username: String, password: String) -> Self {
        Self {
            client: Client::new(ClientConfig::default()),
            auth: RegistryAuth::Basic(username, password),
        }
    }

    fn parse_reference(reference: &str) -> Result<Reference, OciError> {
        Reference::from_str(reference).map_err(|e| OciError::InvalidReference(reference.to_string(), e.to_string()))
    }

    fn extract_contents(layers: &[ImageLayer]) -> Result<(PackageMeta, Vec<serde_yaml::Value>), OciError> {
        for layer in layers {
            if layer.media_type != PACKAGE_LAYER_MEDIA_TYPE {
                continue;
            }
            let decoder = flate2::read::GzDecoder::new(layer.data.as_slice());
            let mut archive = Archive::new(decoder);
            let mut documents = Vec::new();
            for entry in archive
                .entries()
                .map_err(|e| OciError::InvalidPackage(e.to_string()))?
            {
                let mut entry = entry.map_err(|e| OciError::InvalidPackage(e.to_string()))?;
                let mut contents = String::new();
                entry
                    .read_to_string(&mut contents)
                    .map_err(|e| OciError::InvalidPackage(e.to_string()))?;
                for doc in serde_yaml::Deserializer::from_str(&contents) {
                    let value = serde_yaml::Value::deserialize(doc)
                        .map_err(|e| OciError::InvalidPackage(e.to_string()))?;
                    if !value.is_null() {
                        documents.push(value);
                    }
                }
            }
            let mut meta = None;
            let mut crds = Vec::new();
            for doc in documents {
                match doc.get("kind").and_then(|k| k.as_str()) {
                    Some("Provider") | Some("Configuration") | Some("Function") => {
                        meta = Some(
                            serde_yaml::from_value::<PackageMeta>(doc)
                                .map_err(|e| OciError::InvalidPackage(e.to_string()))?,
                        );
                    }
                    Some("CustomResourceDefinition") => crds.push(doc),
                    _ => {}
                }
            }
            let meta = meta.ok_or_else(|| {
                OciError::InvalidPackage("package layer contained no recognized meta document".into())
            })?;
            return Ok((meta, crds));
        }
        Err(OciError::InvalidPackage(
            "image had no crossplane package contents layer".into(),
        ))
    }
}

impl Default for OciPackageClient {
    fn default() -> Self {
        Self::new()
    }
}

use serde::Deserialize;

#[async_trait]
impl OciClient for OciPackageClient {
    async fn get(&self, reference: &str) -> Result<Package, OciError> {
        let reference = Self::parse_reference(reference)?;
        let image_data = self
            .client
            .pull(&reference, &self.auth, vec![PACKAGE_LAYER_MEDIA_TYPE])
            .await
            .map_err(|e| OciError::Registry(e.to_string()))?;
        let digest = image_data
            .digest
            .clone()
            .ok_or_else(|| OciError::Registry("registry did not return a digest".into()))?;
        let (meta, crds) = Self::extract_contents(&image_data.layers)?;
        Ok(Package {
            source: reference.repository().to_string(),
            digest,
            meta,
            crds,
        })
    }

    async fn list_versions(&self, source: &str) -> Result<Vec<Version>, OciError> {
        let reference = Self::parse_reference(&format!("{source}:latest"))?;
        let tags = self
            .client
            .list_tags(&reference, &self.auth, None, None)
            .await
            .map_err(|e| OciError::Registry(e.to_string()))?;
        let mut versions: Vec<Version> = tags
            .tags
            .iter()
            .filter_map(|t| Version::parse(t.trim_start_matches('v')).ok())
            .collect();
        versions.sort();
        Ok(versions)
    }
}
