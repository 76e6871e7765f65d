//! The two top-level reconcilers: composites (§4.H) and XRDs (§4.J).

pub mod composite;
pub mod definition;
