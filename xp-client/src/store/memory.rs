//! An in-memory [`ObjectStore`] used as this workspace's test double, the
//! way `kube-client`'s own test suite drives `Api` over a `tower-test`
//! mock service instead of a live API server.
//!
//! Server-side-apply here is simplified to a JSON merge of the applied
//! object's top-level fields into whatever is stored, without tracking
//! per-field ownership. `force` is accepted but has no effect, since this
//! store never records a conflicting owner to force past. This is enough to
//! exercise every reconciler code path in this workspace's test suite
//! (idempotent re-apply, no-op detection, create-on-first-apply) without
//! reimplementing a full field-manager ledger.

use super::{ListParams, ObjectList, ObjectStore, Patch, StoreError, WatchEvent};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{de::DeserializeOwned, Serialize};
use std::collections::HashMap;
use std::fmt::Debug;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::mpsc;
use xp_core::gvk::GroupVersionKind;

#[derive(Debug, Clone, Hash, PartialEq, Eq)]
struct Key {
    gvk: GroupVersionKind,
    namespace: Option<String>,
    name: String,
}

/// An in-memory object store covering every kind, keyed by GVK+namespace+
/// name.
pub struct MemoryStore<T> {
    objects: Mutex<HashMap<Key, T>>,
    watchers: Mutex<Vec<mpsc::Sender<(Key, WatchEvent<T>)>>>,
    resource_version: AtomicU64,
}

impl<T> Default for MemoryStore<T> {
    fn default() -> Self {
        Self {
            objects: Mutex::new(HashMap::new()),
            watchers: Mutex::new(Vec::new()),
            resource_version: AtomicU64::new(0),
        }
    }
}

impl<T> MemoryStore<T>
where
    T: Clone + Debug + Serialize + DeserializeOwned + Send + Sync + 'static,
{
    /// Construct an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed the store with an object, bypassing the `create` path. Useful
    /// for test setup that needs an object to already exist.
    pub fn seed(&self, gvk: &GroupVersionKind, namespace: Option<&str>, name: &str, obj: T) {
        let key = Key {
            gvk: gvk.clone(),
            namespace: namespace.map(String::from),
            name: name.to_string(),
        };
        self.objects.lock().insert(key, obj);
    }

    fn next_resource_version(&self) -> String {
        self.resource_version.fetch_add(1, Ordering::SeqCst).to_string()
    }

    fn notify(&self, key: &Key, event: WatchEvent<T>) {
        let mut watchers = self.watchers.lock();
        watchers.retain(|tx| tx.try_send((key.clone(), event.clone())).is_ok());
    }

    fn merge(existing: &T, patch_obj: &T) -> Result<T, StoreError> {
        let mut base = serde_json::to_value(existing).map_err(|e| StoreError::Other(e.to_string()))?;
        let overlay = serde_json::to_value(patch_obj).map_err(|e| StoreError::Other(e.to_string()))?;
        json_merge(&mut base, overlay);
        serde_json::from_value(base).map_err(|e| StoreError::Other(e.to_string()))
    }
}

fn json_merge(base: &mut serde_json::Value, overlay: serde_json::Value) {
    match (base, overlay) {
        (serde_json::Value::Object(base_map), serde_json::Value::Object(overlay_map)) => {
            for (k, v) in overlay_map {
                json_merge(base_map.entry(k).or_insert(serde_json::Value::Null), v);
            }
        }
        (base_slot, overlay_value) => *base_slot = overlay_value,
    }
}

impl<T> Clone for WatchEvent<T>
where
    T: Clone,
{
    fn clone(&self) -> Self {
        match self {
            WatchEvent::Added(t) => WatchEvent::Added(t.clone()),
            WatchEvent::Modified(t) => WatchEvent::Modified(t.clone()),
            WatchEvent::Deleted(t) => WatchEvent::Deleted(t.clone()),
            WatchEvent::Bookmark { resource_version } => WatchEvent::Bookmark {
                resource_version: resource_version.clone(),
            },
        }
    }
}

#[async_trait]
impl<T> ObjectStore<T> for MemoryStore<T>
where
    T: Clone + Debug + Serialize + DeserializeOwned + Send + Sync + 'static,
{
    async fn get(&self, gvk: &GroupVersionKind, namespace: Option<&str>, name: &str) -> Result<T, StoreError> {
        let key = Key {
            gvk: gvk.clone(),
            namespace: namespace.map(String::from),
            name: name.to_string(),
        };
        self.objects
            .lock()
            .get(&key)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(name.to_string()))
    }

    async fn create(&self, gvk: &GroupVersionKind, namespace: Option<&str>, name: &str, obj: T) -> Result<T, StoreError> {
        self.create_named(gvk, namespace, name, obj).await
    }

    async fn name_available(&self, gvk: &GroupVersionKind, namespace: Option<&str>, name: &str) -> Result<bool, StoreError> {
        let key = Key {
            gvk: gvk.clone(),
            namespace: namespace.map(String::from),
            name: name.to_string(),
        };
        Ok(!self.objects.lock().contains_key(&key))
    }

    async fn update(&self, gvk: &GroupVersionKind, namespace: Option<&str>, name: &str, obj: T) -> Result<T, StoreError> {
        self.update_named(gvk, namespace, name, obj).await
    }

    async fn delete(&self, gvk: &GroupVersionKind, namespace: Option<&str>, name: &str) -> Result<(), StoreError> {
        let key = Key {
            gvk: gvk.clone(),
            namespace: namespace.map(String::from),
            name: name.to_string(),
        };
        let removed = self.objects.lock().remove(&key);
        match removed {
            Some(obj) => {
                self.notify(&key, WatchEvent::Deleted(obj));
                Ok(())
            }
            None => Err(StoreError::NotFound(name.to_string())),
        }
    }

    async fn list(&self, gvk: &GroupVersionKind, params: &ListParams) -> Result<ObjectList<T>, StoreError> {
        let objects = self.objects.lock();
        let items = objects
            .iter()
            .filter(|(k, _)| &k.gvk == gvk)
            .filter(|(k, _)| params.namespace.is_none() || k.namespace.as_deref() == params.namespace.as_deref())
            .map(|(_, v)| v.clone())
            .collect();
        Ok(ObjectList {
            items,
            resource_version: self.next_resource_version(),
        })
    }

    async fn watch(
        &self,
        gvk: &GroupVersionKind,
        _params: &ListParams,
    ) -> Result<mpsc::Receiver<WatchEvent<T>>, StoreError> {
        let (raw_tx, mut raw_rx) = mpsc::channel(128);
        self.watchers.lock().push(raw_tx);
        let (tx, rx) = mpsc::channel(128);
        let gvk = gvk.clone();
        tokio::spawn(async move {
            while let Some((key, event)) = raw_rx.recv().await {
                if key.gvk == gvk && tx.send(event).await.is_err() {
                    break;
                }
            }
        });
        Ok(rx)
    }

    async fn patch(
        &self,
        gvk: &GroupVersionKind,
        namespace: Option<&str>,
        name: &str,
        patch: Patch<T>,
    ) -> Result<T, StoreError> {
        self.patch_inner(gvk, namespace, name, patch)
    }

    async fn patch_status(
        &self,
        gvk: &GroupVersionKind,
        namespace: Option<&str>,
        name: &str,
        patch: Patch<T>,
    ) -> Result<T, StoreError> {
        // The in-memory double does not distinguish subresources from the
        // main object; real stores route this to `/status` so it can never
        // race a concurrent spec write.
        self.patch_inner(gvk, namespace, name, patch)
    }
}

impl<T> MemoryStore<T>
where
    T: Clone + Debug + Serialize + DeserializeOwned + Send + Sync + 'static,
{
    /// Create a named object (the real entry point; `ObjectStore::create`
    /// is unreachable because creation always needs a resolved name).
    pub async fn create_named(&self, gvk: &GroupVersionKind, namespace: Option<&str>, name: &str, obj: T) -> Result<T, StoreError> {
        let key = Key {
            gvk: gvk.clone(),
            namespace: namespace.map(String::from),
            name: name.to_string(),
        };
        let mut objects = self.objects.lock();
        if objects.contains_key(&key) {
            return Err(StoreError::Conflict(format!("{name} already exists")));
        }
        objects.insert(key.clone(), obj.clone());
        drop(objects);
        self.notify(&key, WatchEvent::Added(obj.clone()));
        Ok(obj)
    }

    /// Replace an existing named object wholesale.
    pub async fn update_named(&self, gvk: &GroupVersionKind, namespace: Option<&str>, name: &str, obj: T) -> Result<T, StoreError> {
        let key = Key {
            gvk: gvk.clone(),
            namespace: namespace.map(String::from),
            name: name.to_string(),
        };
        let mut objects = self.objects.lock();
        if !objects.contains_key(&key) {
            return Err(StoreError::NotFound(name.to_string()));
        }
        objects.insert(key.clone(), obj.clone());
        drop(objects);
        self.notify(&key, WatchEvent::Modified(obj.clone()));
        Ok(obj)
    }

    fn patch_inner(&self, gvk: &GroupVersionKind, namespace: Option<&str>, name: &str, patch: Patch<T>) -> Result<T, StoreError> {
        let key = Key {
            gvk: gvk.clone(),
            namespace: namespace.map(String::from),
            name: name.to_string(),
        };
        let mut objects = self.objects.lock();
        let (merged, existed) = match patch {
            Patch::Apply { obj, .. } => match objects.get(&key) {
                Some(existing) => (Self::merge(existing, &obj)?, true),
                None => (obj, false),
            },
            Patch::Merge(value) => {
                let existing = objects
                    .get(&key)
                    .ok_or_else(|| StoreError::NotFound(name.to_string()))?;
                let mut base = serde_json::to_value(existing).map_err(|e| StoreError::Other(e.to_string()))?;
                json_merge(&mut base, value);
                (
                    serde_json::from_value(base).map_err(|e| StoreError::Other(e.to_string()))?,
                    true,
                )
            }
            Patch::Json(ops) => {
                let existing = objects
                    .get(&key)
                    .ok_or_else(|| StoreError::NotFound(name.to_string()))?;
                let mut base = serde_json::to_value(existing).map_err(|e| StoreError::Other(e.to_string()))?;
                // A failed `Test` operation means another writer raced us
                // (e.g. two finalizers being added concurrently); surface
                // it the same way a real apiserver's patch conflict would.
                json_patch::patch(&mut base, &ops).map_err(|e| StoreError::Conflict(e.to_string()))?;
                (
                    serde_json::from_value(base).map_err(|e| StoreError::Other(e.to_string()))?,
                    true,
                )
            }
        };
        objects.insert(key.clone(), merged.clone());
        drop(objects);
        self.notify(
            &key,
            if existed {
                WatchEvent::Modified(merged.clone())
            } else {
                WatchEvent::Added(merged.clone())
            },
        );
        Ok(merged)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
    struct Doc {
        a: Option<String>,
        b: Option<String>,
    }

    fn gvk() -> GroupVersionKind {
        GroupVersionKind::gvk("example.org", "v1", "Doc")
    }

    #[tokio::test]
    async fn apply_creates_when_absent() {
        let store: MemoryStore<Doc> = MemoryStore::new();
        let out = store
            .patch(
                &gvk(),
                None,
                "x",
                Patch::Apply {
                    obj: Doc {
                        a: Some("1".into()),
                        b: None,
                    },
                    field_manager: "test".into(),
                    force: false,
                },
            )
            .await
            .unwrap();
        assert_eq!(out.a, Some("1".into()));
    }

    #[tokio::test]
    async fn apply_merges_disjoint_fields() {
        let store: MemoryStore<Doc> = MemoryStore::new();
        store.create_named(&gvk(), None, "x", Doc { a: Some("1".into()), b: None }).await.unwrap();
        let out = store
            .patch(
                &gvk(),
                None,
                "x",
                Patch::Apply {
                    obj: Doc {
                        a: None,
                        b: Some("2".into()),
                    },
                    field_manager: "test".into(),
                    force: false,
                },
            )
            .await
            .unwrap();
        assert_eq!(out.a, Some("1".into()));
        assert_eq!(out.b, Some("2".into()));
    }

    #[tokio::test]
    async fn delete_of_missing_object_is_not_found() {
        let store: MemoryStore<Doc> = MemoryStore::new();
        let err = store.delete(&gvk(), None, "missing").await.unwrap_err();
        assert_eq!(err, StoreError::NotFound("missing".into()));
    }

    #[tokio::test]
    async fn create_named_rejects_duplicates() {
        let store: MemoryStore<Doc> = MemoryStore::new();
        store.create_named(&gvk(), None, "x", Doc { a: None, b: None }).await.unwrap();
        let err = store.create_named(&gvk(), None, "x", Doc { a: None, b: None }).await.unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));
    }
}
