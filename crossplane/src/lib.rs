//! The crossplane control plane's domain logic: the package dependency
//! solver, the connection-detail propagator, the composition-revision
//! store, the function-pipeline composer, and the two top-level
//! reconcilers (composite and definition).
//!
//! This plays the role the top-level `kube` crate plays for `kube-core`/
//! `kube-client`/`kube-runtime`: it is the facade a binary entrypoint
//! depends on, built entirely out of `xp-core` types driven through
//! `xp-client`/`xp-runtime` abstractions.

pub mod composer;
pub mod config;
pub mod crd;
pub mod propagator;
pub mod reconciler;
pub mod revision;
pub mod solver;

pub use config::{ComposerConfig, ControllerConfig};
