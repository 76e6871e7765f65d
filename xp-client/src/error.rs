use thiserror::Error;

/// Errors that can occur anywhere in this crate.
#[derive(Debug, Error)]
pub enum Error {
    /// The object store reported an error.
    #[error("object store error: {0}")]
    Store(#[from] crate::store::StoreError),

    /// An OCI registry operation failed.
    #[error("OCI registry error: {0}")]
    Oci(#[from] crate::oci::OciError),

    /// JSON (de)serialization failed.
    #[error("serde error: {0}")]
    Serde(#[from] serde_json::Error),
}
