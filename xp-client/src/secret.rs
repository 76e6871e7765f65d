//! The secret store abstraction (§6): opaque key→bytes maps at
//! `(namespace, name)` locations, written with server-side-apply semantics.

use async_trait::async_trait;
use std::collections::BTreeMap;
use thiserror::Error;

/// Errors from the secret store.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SecretStoreError {
    /// No secret exists at that location.
    #[error("secret not found: {0}/{1}")]
    NotFound(String, String),
    /// Any other failure.
    #[error("{0}")]
    Other(String),
}

/// A secret store: read/write of opaque key→bytes maps.
#[async_trait]
pub trait SecretStore: Send + Sync {
    /// Read the full key→bytes map at `(namespace, name)`.
    async fn get(&self, namespace: &str, name: &str) -> Result<BTreeMap<String, Vec<u8>>, SecretStoreError>;

    /// Server-side-apply `data` into `(namespace, name)`, owned by
    /// `field_manager`. Implementations should make this a no-op apply
    /// (skip the write) when `data` already matches what is stored, as
    /// §4.D requires of the composite's outbound publisher.
    async fn apply(
        &self,
        namespace: &str,
        name: &str,
        data: BTreeMap<String, Vec<u8>>,
        field_manager: &str,
    ) -> Result<(), SecretStoreError>;
}

/// An in-memory secret store, this workspace's test double for
/// [`SecretStore`].
#[derive(Default)]
pub struct MemorySecretStore {
    secrets: parking_lot::Mutex<std::collections::HashMap<(String, String), BTreeMap<String, Vec<u8>>>>,
    /// Number of `apply` calls that actually wrote (i.e. were not
    /// suppressed as a no-op), for tests asserting idempotence.
    pub write_count: std::sync::atomic::AtomicU64,
}

impl MemorySecretStore {
    /// Construct an empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SecretStore for MemorySecretStore {
    async fn get(&self, namespace: &str, name: &str) -> Result<BTreeMap<String, Vec<u8>>, SecretStoreError> {
        self.secrets
            .lock()
            .get(&(namespace.to_string(), name.to_string()))
            .cloned()
            .ok_or_else(|| SecretStoreError::NotFound(namespace.to_string(), name.to_string()))
    }

    async fn apply(
        &self,
        namespace: &str,
        name: &str,
        data: BTreeMap<String, Vec<u8>>,
        _field_manager: &str,
    ) -> Result<(), SecretStoreError> {
        let key = (namespace.to_string(), name.to_string());
        let mut secrets = self.secrets.lock();
        if secrets.get(&key) == Some(&data) {
            return Ok(());
        }
        self.write_count.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        secrets.insert(key, data);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn apply_is_a_noop_when_unchanged() {
        let store = MemorySecretStore::new();
        let mut data = BTreeMap::new();
        data.insert("user".to_string(), b"admin".to_vec());
        store.apply("default", "conn", data.clone(), "xr").await.unwrap();
        store.apply("default", "conn", data, "xr").await.unwrap();
        assert_eq!(store.write_count.load(std::sync::atomic::Ordering::SeqCst), 1);
    }
}
