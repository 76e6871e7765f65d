//! The connection-detail propagator (§4.D): derive a composite's
//! connection-secret contents from its composed resources, then publish a
//! filtered view to the composite's declared sink.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::str::FromStr;
use thiserror::Error;
use xp_client::secret::{SecretStore, SecretStoreError};
use xp_core::CompositeResource;

/// One entry in a composed template's connection-detail list.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConnectionDetail {
    /// The key this entry contributes to the merged connection-details map.
    pub name: String,
    /// How to derive the value.
    #[serde(flatten)]
    pub rule: ConnectionDetailRule,
}

/// The four derivation rules a connection-detail entry can use.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type")]
pub enum ConnectionDetailRule {
    /// Copy a key verbatim out of the composed resource's connection
    /// secret, optionally under the entry's own `name` rather than the
    /// source key.
    FromConnectionSecretKey {
        /// The key to read from the composed resource's connection
        /// secret.
        key: String,
    },
    /// Extract a value from the composed resource's rendered body via a
    /// JSON pointer. Scalars are stringified; objects and arrays are
    /// JSON-encoded.
    FromFieldPath {
        /// An RFC 6901 JSON pointer into the composed body.
        field_path: String,
    },
    /// A constant value, independent of the composed resource's state.
    Value {
        /// The literal value.
        value: String,
    },
    /// No derivation; this entry contributes nothing. Exists so a
    /// composition author can disable an inherited entry without deleting
    /// it.
    Unknown,
}

/// Errors from fetching or publishing connection details.
#[derive(Debug, Error)]
pub enum Error {
    /// The composed resource's connection secret could not be read for a
    /// reason other than "not found" (which is tolerated).
    #[error("reading connection secret {0}/{1}: {2}")]
    SecretRead(String, String, SecretStoreError),
    /// Publishing the composite's connection secret failed.
    #[error("publishing connection secret {0}/{1}: {2}")]
    SecretPublish(String, String, SecretStoreError),
}

/// `FetchConnectionDetails` (§4.D): read the composed resource's
/// connection secret once, then derive one key/value pair per template
/// entry.
///
/// `connection_secret` identifies the composed resource's own secret
/// sink, as `(namespace, name)`; `None` means the composed resource has no
/// connection secret of its own, in which case every
/// `FromConnectionSecretKey` entry is skipped as "missing" rather than
/// erroring.
pub async fn fetch_connection_details(
    store: &dyn SecretStore,
    connection_secret: Option<(&str, &str)>,
    body: &serde_json::Value,
    templates: &[ConnectionDetail],
) -> Result<BTreeMap<String, Vec<u8>>, Error> {
    let source = match connection_secret {
        Some((namespace, name)) => match store.get(namespace, name).await {
            Ok(data) => data,
            Err(SecretStoreError::NotFound(..)) => BTreeMap::new(),
            Err(e) => return Err(Error::SecretRead(namespace.to_string(), name.to_string(), e)),
        },
        None => BTreeMap::new(),
    };

    let mut out = BTreeMap::new();
    for detail in templates {
        let value = match &detail.rule {
            ConnectionDetailRule::FromConnectionSecretKey { key } => match source.get(key) {
                Some(v) => v.clone(),
                None => continue,
            },
            ConnectionDetailRule::FromFieldPath { field_path } => match extract_field(body, field_path) {
                Some(v) => v,
                None => continue,
            },
            ConnectionDetailRule::Value { value } => value.clone().into_bytes(),
            ConnectionDetailRule::Unknown => continue,
        };
        out.insert(detail.name.clone(), value);
    }
    Ok(out)
}

/// Resolve a JSON pointer against `body`, stringifying scalars and
/// JSON-encoding objects/arrays.
fn extract_field(body: &serde_json::Value, field_path: &str) -> Option<Vec<u8>> {
    let ptr = jsonptr::PointerBuf::from_str(field_path).ok()?;
    let found = ptr.resolve(body).ok()?;
    Some(match found {
        serde_json::Value::String(s) => s.clone().into_bytes(),
        serde_json::Value::Null => return None,
        scalar @ (serde_json::Value::Bool(_) | serde_json::Value::Number(_)) => scalar.to_string().into_bytes(),
        compound => serde_json::to_vec(compound).expect("JSON values are always serializable"),
    })
}

/// The composite's outbound publisher: merge connection details from every
/// composed resource, filter to `filter_keys` (an empty filter publishes
/// everything), and server-side-apply the result to the composite's
/// declared sink.
pub async fn publish(
    store: &dyn SecretStore,
    xr: &CompositeResource,
    field_manager: &str,
    merged: &BTreeMap<String, Vec<u8>>,
    filter_keys: &[String],
) -> Result<(), Error> {
    let Some(sink) = &xr.write_connection_secret_to else {
        return Ok(());
    };
    let namespace = sink.namespace.as_deref().unwrap_or_else(|| xr.metadata.namespace.as_deref().unwrap_or("default"));

    let filtered: BTreeMap<String, Vec<u8>> = if filter_keys.is_empty() {
        merged.clone()
    } else {
        merged.iter().filter(|(k, _)| filter_keys.contains(k)).map(|(k, v)| (k.clone(), v.clone())).collect()
    };

    store
        .apply(namespace, &sink.name, filtered, field_manager)
        .await
        .map_err(|e| Error::SecretPublish(namespace.to_string(), sink.name.clone(), e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use xp_client::secret::MemorySecretStore;
    use xp_core::composite::SecretReference;
    use xp_core::gvk::GroupVersionKind;

    fn xr(sink: Option<SecretReference>) -> CompositeResource {
        CompositeResource {
            gvk: GroupVersionKind::gvk("example.org", "v1alpha1", "XDatabase"),
            metadata: k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta {
                name: Some("my-xr".into()),
                namespace: None,
                ..Default::default()
            },
            composition_reference: Default::default(),
            resource_refs: vec![],
            claim_reference: None,
            write_connection_secret_to: sink,
            spec_extra: serde_json::Value::Null,
            status: Default::default(),
        }
    }

    #[tokio::test]
    async fn missing_connection_secret_key_is_skipped_not_errored() {
        let store = MemorySecretStore::new();
        store.apply("default", "composed-conn", BTreeMap::from([("user".to_string(), b"admin".to_vec())]), "test").await.unwrap();

        let templates = vec![
            ConnectionDetail {
                name: "username".into(),
                rule: ConnectionDetailRule::FromConnectionSecretKey { key: "user".into() },
            },
            ConnectionDetail {
                name: "password".into(),
                rule: ConnectionDetailRule::FromConnectionSecretKey { key: "pass".into() },
            },
        ];

        let details = fetch_connection_details(&store, Some(("default", "composed-conn")), &serde_json::json!({}), &templates)
            .await
            .unwrap();
        assert_eq!(details.get("username"), Some(&b"admin".to_vec()));
        assert!(!details.contains_key("password"));
    }

    #[tokio::test]
    async fn from_field_path_stringifies_scalars_and_encodes_objects() {
        let store = MemorySecretStore::new();
        let body = serde_json::json!({"status": {"atProvider": {"port": 5432, "tags": {"env": "prod"}}}});
        let templates = vec![
            ConnectionDetail {
                name: "port".into(),
                rule: ConnectionDetailRule::FromFieldPath { field_path: "/status/atProvider/port".into() },
            },
            ConnectionDetail {
                name: "tags".into(),
                rule: ConnectionDetailRule::FromFieldPath { field_path: "/status/atProvider/tags".into() },
            },
            ConnectionDetail {
                name: "missing".into(),
                rule: ConnectionDetailRule::FromFieldPath { field_path: "/status/atProvider/nope".into() },
            },
        ];

        let details = fetch_connection_details(&store, None, &body, &templates).await.unwrap();
        assert_eq!(details.get("port"), Some(&b"5432".to_vec()));
        assert_eq!(details.get("tags"), Some(&br#"{"env":"prod"}"#.to_vec()));
        assert!(!details.contains_key("missing"));
    }

    #[tokio::test]
    async fn value_rule_is_constant_and_unknown_rule_is_skipped() {
        let store = MemorySecretStore::new();
        let templates = vec![
            ConnectionDetail { name: "engine".into(), rule: ConnectionDetailRule::Value { value: "postgres".into() } },
            ConnectionDetail { name: "ignored".into(), rule: ConnectionDetailRule::Unknown },
        ];
        let details = fetch_connection_details(&store, None, &serde_json::json!({}), &templates).await.unwrap();
        assert_eq!(details.get("engine"), Some(&b"postgres".to_vec()));
        assert!(!details.contains_key("ignored"));
    }

    #[tokio::test]
    async fn empty_filter_publishes_every_key() {
        let store = MemorySecretStore::new();
        let merged = BTreeMap::from([("a".to_string(), b"1".to_vec()), ("b".to_string(), b"2".to_vec())]);
        publish(&store, &xr(Some(SecretReference { name: "xr-conn".into(), namespace: Some("default".into()) })), "xr", &merged, &[])
            .await
            .unwrap();
        let written = store.get("default", "xr-conn").await.unwrap();
        assert_eq!(written, merged);
    }

    #[tokio::test]
    async fn non_empty_filter_publishes_only_listed_keys() {
        let store = MemorySecretStore::new();
        let merged = BTreeMap::from([("a".to_string(), b"1".to_vec()), ("b".to_string(), b"2".to_vec())]);
        publish(
            &store,
            &xr(Some(SecretReference { name: "xr-conn".into(), namespace: Some("default".into()) })),
            "xr",
            &merged,
            &["a".to_string()],
        )
        .await
        .unwrap();
        let written = store.get("default", "xr-conn").await.unwrap();
        assert_eq!(written.len(), 1);
        assert_eq!(written.get("a"), Some(&b"1".to_vec()));
    }

    #[tokio::test]
    async fn no_sink_is_a_noop() {
        let store = MemorySecretStore::new();
        let merged = BTreeMap::from([("a".to_string(), b"1".to_vec())]);
        publish(&store, &xr(None), "xr", &merged, &[]).await.unwrap();
        assert!(store.get("default", "xr-conn").await.is_err());
    }
}
