//! Shared types and client-less behavior for the crossplane control plane.
//!
//! This crate has no knowledge of how objects are actually stored or
//! transported; it only defines the data model described by the composite
//! resource and package-management subsystems, plus the small amount of
//! pure logic (content hashing, label/annotation keys, CRD rendering
//! primitives) that both `xp-client` and `crossplane` need.

pub mod composite;
pub mod composition;
pub mod condition;
pub mod error;
pub mod gvk;
pub mod labels;
pub mod lock;
pub mod meta;
pub mod object;
pub mod object_ref;
pub mod xrd;

pub use composite::{CompositeResource, CompositeStatus, CompositionReference, ResourceRef};
pub use composition::{Composition, CompositionRevision, PipelineStep};
pub use condition::Condition;
pub use error::Error;
pub use gvk::{GroupVersion, GroupVersionKind};
pub use lock::{Dependency, Lock, LockPackage, PackageType};
pub use meta::{HasMeta, HasMetaExt};
pub use object::{ComposedObject, Readiness};
pub use object_ref::ObjectRef;
pub use xrd::CompositeResourceDefinition;

/// Crate-wide result alias, following `kube_core::Result`.
pub type Result<T, E = Error> = std::result::Result<T, E>;
