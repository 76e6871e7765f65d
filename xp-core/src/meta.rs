//! A minimal accessor trait for objects carrying [`ObjectMeta`], the way
//! `kube_core::Resource` abstracts over `.metadata` for compile-time-typed
//! resources. Every kind this system manages directly (composites, XRDs,
//! composed resources) is dynamic, so this trait carries no
//! `DynamicType`/GVK association — identity is tracked separately via
//! `ObjectRef`.

use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

/// An accessor trait for any type carrying standard object metadata.
pub trait HasMeta {
    /// Borrow this object's metadata.
    fn meta(&self) -> &ObjectMeta;
    /// Mutably borrow this object's metadata.
    fn meta_mut(&mut self) -> &mut ObjectMeta;
}

/// Helper methods built on [`HasMeta`], mirroring `kube_core::ResourceExt`.
pub trait HasMetaExt: HasMeta {
    /// This object's finalizers, or an empty slice if none are set.
    fn finalizers(&self) -> &[String] {
        self.meta().finalizers.as_deref().unwrap_or(&[])
    }

    /// Whether a deletion timestamp has been set.
    fn is_deleting(&self) -> bool {
        self.meta().deletion_timestamp.is_some()
    }

    /// This object's name, if set.
    fn name(&self) -> Option<&str> {
        self.meta().name.as_deref()
    }

    /// This object's UID, if set.
    fn uid(&self) -> Option<&str> {
        self.meta().uid.as_deref()
    }
}

impl<T: HasMeta> HasMetaExt for T {}

impl HasMeta for crate::composite::CompositeResource {
    fn meta(&self) -> &ObjectMeta {
        &self.metadata
    }

    fn meta_mut(&mut self) -> &mut ObjectMeta {
        &mut self.metadata
    }
}

impl HasMeta for crate::xrd::CompositeResourceDefinition {
    fn meta(&self) -> &ObjectMeta {
        &self.metadata
    }

    fn meta_mut(&mut self) -> &mut ObjectMeta {
        &mut self.metadata
    }
}

impl HasMeta for crate::object::ComposedObject {
    fn meta(&self) -> &ObjectMeta {
        &self.metadata
    }

    fn meta_mut(&mut self) -> &mut ObjectMeta {
        &mut self.metadata
    }
}
