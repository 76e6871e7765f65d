//! Clients used by the crossplane control plane to reach its two external
//! systems: the host object store (§4.A) and OCI registries (§4.B).
//!
//! Neither client knows anything about composites, compositions, or the
//! dependency solver; those live in the `crossplane` crate and are built on
//! top of the traits exposed here, the way `kube_runtime` is built on top of
//! `kube_client::Api`.

pub mod error;
pub mod oci;
pub mod secret;
pub mod store;

pub use error::Error;
pub use store::{ObjectStore, StoreError};

/// Crate-wide result alias.
pub type Result<T, E = Error> = std::result::Result<T, E>;
