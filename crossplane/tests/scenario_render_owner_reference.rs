//! End-to-end scenario 6: stamping render metadata onto a composed
//! resource that has no name or `generateName` yet.

use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use xp_core::composite::{ClaimReference, CompositionReference};
use xp_core::gvk::GroupVersionKind;
use xp_core::labels::{LABEL_CLAIM_NAME, LABEL_CLAIM_NAMESPACE, LABEL_COMPOSITE_NAME_PREFIX};
use xp_core::object::{ComposedObject, Readiness};
use xp_core::CompositeResource;

#[test]
fn composed_resource_without_a_name_is_stamped_from_the_xr() {
    let xr = CompositeResource {
        gvk: GroupVersionKind::gvk("example.org", "v1alpha1", "XDatabase"),
        metadata: ObjectMeta {
            name: Some("ola".into()),
            uid: Some("xr-uid".into()),
            namespace: None,
            labels: Some([(LABEL_COMPOSITE_NAME_PREFIX.to_string(), "ola".to_string())].into_iter().collect()),
            ..Default::default()
        },
        composition_reference: CompositionReference::default(),
        resource_refs: vec![],
        claim_reference: Some(ClaimReference {
            api_version: "example.org/v1alpha1".into(),
            kind: "Database".into(),
            name: "rola".into(),
            namespace: "rolans".into(),
        }),
        write_connection_secret_to: None,
        spec_extra: serde_json::Value::Null,
        status: Default::default(),
    };

    let mut composed = ComposedObject {
        resource_name: "instance".into(),
        gvk: GroupVersionKind::gvk("database.example.org", "v1", "RDSInstance"),
        metadata: ObjectMeta::default(),
        body: serde_json::json!({}),
        connection_details: Default::default(),
        ready: Readiness::Unknown,
    };

    crossplane::composer::render::stamp_render_metadata(&xr, "instance", &mut composed).unwrap();

    assert_eq!(composed.metadata.generate_name.as_deref(), Some("ola-"));
    assert_eq!(composed.metadata.name, None);
    let labels = composed.metadata.labels.clone().unwrap();
    assert_eq!(labels.get(LABEL_CLAIM_NAME).map(String::as_str), Some("rola"));
    assert_eq!(labels.get(LABEL_CLAIM_NAMESPACE).map(String::as_str), Some("rolans"));
    assert!(composed.is_controlled_by("xr-uid"));
}
