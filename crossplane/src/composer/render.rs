//! Render metadata stamping and name allocation for desired composed
//! resources (§4.F step 4).

use rand::distr::Alphanumeric;
use rand::Rng;
use xp_client::store::{ObjectStore, StoreError};
use xp_core::gvk::GroupVersionKind;
use xp_core::labels::{ANNOTATION_COMPOSITION_RESOURCE_NAME, LABEL_CLAIM_NAME, LABEL_CLAIM_NAMESPACE};
use xp_core::object::ComposedObject;
use xp_core::CompositeResource;

use super::Error;

/// Stamp an XR's identity onto a desired composed resource: owner
/// reference, namespace, claim labels, and the composition-resource-name
/// annotation that lets the next Observe find it again. Sets
/// `generateName` (not `name`) when the object has no name yet; callers
/// resolve an actual name via [`allocate_name`] before creating it.
pub fn stamp_render_metadata(xr: &CompositeResource, resource_name: &str, composed: &mut ComposedObject) -> Result<(), Error> {
    let xr_name = xr.metadata.name.as_deref().ok_or_else(|| xp_core::Error::Invalid("composite has no name".to_string()))?;
    let xr_uid = xr.metadata.uid.clone().unwrap_or_default();

    if composed.metadata.name.is_none() {
        let prefix = xr
            .name_prefix_label()
            .ok_or_else(|| xp_core::Error::MissingNamePrefixLabel(xr_name.to_string()))?;
        composed.metadata.generate_name = Some(format!("{prefix}-"));
    }

    if let Some(namespace) = &xr.metadata.namespace {
        composed.metadata.namespace = Some(namespace.clone());
    }

    if let Some(claim) = &xr.claim_reference {
        let labels = composed.metadata.labels.get_or_insert_with(Default::default);
        labels.insert(LABEL_CLAIM_NAME.to_string(), claim.name.clone());
        labels.insert(LABEL_CLAIM_NAMESPACE.to_string(), claim.namespace.clone());
    }

    composed.set_controller(k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference {
        api_version: xr.gvk.api_version(),
        kind: xr.gvk.kind.clone(),
        name: xr_name.to_string(),
        uid: xr_uid,
        controller: Some(true),
        block_owner_deletion: Some(true),
    });

    let annotations = composed.metadata.annotations.get_or_insert_with(Default::default);
    annotations.insert(ANNOTATION_COMPOSITION_RESOURCE_NAME.to_string(), resource_name.to_string());

    Ok(())
}

/// Resolve, but do not persist, a name for a composed object that only
/// carries `generateName`, the way a real API server's `--dry-run=All`
/// create runs name-generation admission without committing the object.
/// Objects that already have a name are returned unchanged. The actual
/// create happens later, at §4.F step 8's server-side apply pass, once
/// step 6 has durably persisted this name in the XR's `resourceRefs` — so
/// a crash between resolving a name and applying it leaves at worst a
/// dangling reference, never a real, unreferenced orphan object.
pub async fn allocate_name(
    store: &dyn ObjectStore<ComposedObject>,
    gvk: &GroupVersionKind,
    namespace: Option<&str>,
    mut composed: ComposedObject,
) -> Result<ComposedObject, Error> {
    if composed.metadata.name.is_some() {
        return Ok(composed);
    }
    let prefix = composed.metadata.generate_name.clone().unwrap_or_default();

    const MAX_ATTEMPTS: u8 = 8;
    for _ in 0..MAX_ATTEMPTS {
        let suffix: String = rand::rng().sample_iter(&Alphanumeric).take(5).map(char::from).map(|c| c.to_ascii_lowercase()).collect();
        let candidate_name = format!("{prefix}{suffix}");
        match store.name_available(gvk, namespace, &candidate_name).await {
            Ok(true) => {
                composed.metadata.name = Some(candidate_name);
                return Ok(composed);
            }
            Ok(false) => continue,
            Err(StoreError::Conflict(_)) => continue,
            Err(e) => return Err(xp_core::Error::from(e).into()),
        }
    }
    Err(xp_core::Error::Other(format!("could not allocate a unique name under generateName {prefix:?} after {MAX_ATTEMPTS} attempts")).into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
    use xp_client::store::memory::MemoryStore;
    use xp_core::composite::{ClaimReference, CompositionReference};
    use xp_core::gvk::GroupVersionKind as Gvk;
    use xp_core::object::Readiness;

    fn xr() -> CompositeResource {
        CompositeResource {
            gvk: Gvk::gvk("example.org", "v1alpha1", "XDatabase"),
            metadata: ObjectMeta {
                name: Some("my-xr".into()),
                uid: Some("xr-uid".into()),
                namespace: None,
                labels: Some([("crossplane.io/composite-resource-name".to_string(), "my-xr".to_string())].into_iter().collect()),
                ..Default::default()
            },
            composition_reference: CompositionReference::default(),
            resource_refs: vec![],
            claim_reference: Some(ClaimReference {
                api_version: "example.org/v1alpha1".into(),
                kind: "Database".into(),
                name: "claim-a".into(),
                namespace: "team-a".into(),
            }),
            write_connection_secret_to: None,
            spec_extra: serde_json::Value::Null,
            status: Default::default(),
        }
    }

    fn composed() -> ComposedObject {
        ComposedObject {
            resource_name: "db".into(),
            gvk: Gvk::gvk("database.example.org", "v1", "RDSInstance"),
            metadata: ObjectMeta::default(),
            body: serde_json::json!({}),
            connection_details: Default::default(),
            ready: Readiness::Unknown,
        }
    }

    #[test]
    fn stamps_owner_reference_annotation_and_claim_labels() {
        let xr = xr();
        let mut obj = composed();
        stamp_render_metadata(&xr, "db", &mut obj).unwrap();

        assert!(obj.is_controlled_by("xr-uid"));
        assert_eq!(
            obj.metadata.annotations.as_ref().unwrap().get("crossplane.io/composition-resource-name"),
            Some(&"db".to_string())
        );
        assert_eq!(obj.metadata.labels.as_ref().unwrap().get("crossplane.io/claim-name"), Some(&"claim-a".to_string()));
        assert_eq!(obj.metadata.generate_name, Some("my-xr-".to_string()));
    }

    #[test]
    fn missing_name_prefix_label_is_fatal() {
        let mut xr = xr();
        xr.metadata.labels = None;
        let mut obj = composed();
        let err = stamp_render_metadata(&xr, "db", &mut obj).unwrap_err();
        assert!(matches!(err, Error::Core(xp_core::Error::MissingNamePrefixLabel(_))));
    }

    #[tokio::test]
    async fn allocate_name_resolves_without_persisting() {
        let store = MemoryStore::<ComposedObject>::new();
        let gvk = Gvk::gvk("database.example.org", "v1", "RDSInstance");
        let mut obj = composed();
        obj.metadata.generate_name = Some("my-xr-".into());

        let allocated = allocate_name(&store, &gvk, None, obj).await.unwrap();
        let name = allocated.metadata.name.clone().unwrap();
        assert!(name.starts_with("my-xr-"));
        // Only reserved, not created: nothing is in the store yet.
        assert!(store.get(&gvk, None, &name).await.is_err());
    }

    #[tokio::test]
    async fn allocate_name_is_a_noop_when_already_named() {
        let store = MemoryStore::<ComposedObject>::new();
        let gvk = Gvk::gvk("database.example.org", "v1", "RDSInstance");
        let mut obj = composed();
        obj.metadata.name = Some("already-named".into());

        let allocated = allocate_name(&store, &gvk, None, obj).await.unwrap();
        assert_eq!(allocated.metadata.name, Some("already-named".to_string()));
        assert!(store.get(&gvk, None, "already-named").await.is_err());
    }
}
