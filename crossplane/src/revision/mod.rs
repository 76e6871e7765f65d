//! The composition-revision store (§4.E): resolve which
//! `CompositionRevision` a composite should run against, and keep a
//! composition's owned revisions in sync with its current content hash.
//!
//! This splits the specification's single `Fetch(xr)` description into two
//! entry points, matching how the real system separates concerns:
//!
//! - [`fetch`] is the read path the composite reconciler (component H)
//!   calls every reconcile: it looks up the latest owned revision matching
//!   the composition's current hash and fails
//!   [`xp_core::Error::NoCompatibleRevision`] if none matches. It never
//!   creates a revision itself.
//! - [`ensure_revision_for_composition`] is the write path a composition
//!   watcher runs whenever a composition's spec changes: create a new
//!   revision when the current hash has none, and garbage-collect
//!   historical ones beyond the configured limit.
//!
//! See DESIGN.md for why the specification's single `Fetch` description is
//! split this way.

use thiserror::Error;
use xp_client::store::{ListParams, ObjectStore, StoreError};
use xp_core::composite::CompositionUpdatePolicy;
use xp_core::gvk::GroupVersionKind;
use xp_core::object::truncate_label_hash;
use xp_core::xrd::CompositeResourceDefinition;
use xp_core::{Composition, CompositeResource, CompositionRevision};

/// Errors from the revision store.
#[derive(Debug, Error)]
pub enum Error {
    /// Propagated from the shared error vocabulary (store failures,
    /// `NoCompatibleRevision`).
    #[error(transparent)]
    Core(#[from] xp_core::Error),
}

impl From<StoreError> for Error {
    fn from(e: StoreError) -> Self {
        Error::Core(e.into())
    }
}

/// The well-known GVK for `Composition`, a cluster-scoped kind whose
/// schema is fixed at compile time in this workspace rather than rendered
/// from an XRD.
pub fn composition_gvk() -> GroupVersionKind {
    GroupVersionKind::gvk("apiextensions.crossplane.io", "v1", "Composition")
}

/// The well-known GVK for `CompositionRevision`.
pub fn revision_gvk() -> GroupVersionKind {
    GroupVersionKind::gvk("apiextensions.crossplane.io", "v1", "CompositionRevision")
}

/// Resolve which composition a composite should use, in precedence order:
/// the XRD's enforced reference, then the XR's explicit reference, then the
/// XRD's default reference, then its label selector (ties broken by the
/// lexicographically smallest matching composition name).
pub async fn resolve_composition_name(
    compositions: &dyn ObjectStore<Composition>,
    xrd: &CompositeResourceDefinition,
    xr: &CompositeResource,
) -> Result<String, Error> {
    if let Some(enforced) = &xrd.spec.enforced_composition_ref {
        return Ok(enforced.name.clone());
    }
    if let Some(name) = &xr.composition_reference.composition_ref {
        return Ok(name.clone());
    }
    if let Some(default) = &xrd.spec.default_composition_ref {
        return Ok(default.name.clone());
    }
    if let Some(selector) = &xr.composition_reference.composition_selector {
        let list = compositions.list(&composition_gvk(), &ListParams::default()).await?;
        if let Some(matched) = list
            .items
            .into_iter()
            .filter(|c| selector.iter().all(|(k, v)| c.labels.get(k) == Some(v)))
            .min_by(|a, b| a.name.cmp(&b.name))
        {
            return Ok(matched.name);
        }
    }
    Err(xp_core::Error::NoCompatibleRevision("no composition reference could be resolved for the composite".to_string()).into())
}

/// `Fetch(xr) → CompositionRevision` (§4.E): look up the revision a
/// composite should run against, advancing its pinned revision reference
/// when appropriate. Mutates `xr.composition_reference.composition_revision_ref`
/// in place; callers are responsible for persisting that change.
pub async fn fetch(
    revisions: &dyn ObjectStore<CompositionRevision>,
    xr: &mut CompositeResource,
    composition: &Composition,
) -> Result<CompositionRevision, Error> {
    let manual = xr.composition_reference.composition_update_policy == CompositionUpdatePolicy::Manual;

    if manual {
        if let Some(pinned) = xr.composition_reference.composition_revision_ref.clone() {
            return Ok(revisions.get(&revision_gvk(), None, &pinned).await?);
        }
    }

    let owned = list_owned_revisions(revisions, composition).await?;
    let hash = truncate_label_hash(&composition.content_hash());
    let chosen = owned
        .into_iter()
        .filter(|r| r.hash_label == hash)
        .max_by_key(|r| r.revision)
        .ok_or_else(|| xp_core::Error::NoCompatibleRevision(composition.name.clone()))?;

    let should_advance = match &xr.composition_reference.composition_revision_ref {
        None => true,
        Some(current) => !manual && *current != chosen.name,
    };
    if should_advance {
        xr.composition_reference.composition_revision_ref = Some(chosen.name.clone());
    }

    Ok(chosen)
}

/// Ensure `composition`'s current content hash has a matching owned
/// revision, creating one if needed, then garbage-collect historical
/// revisions beyond `composition.revision_history_limit`.
pub async fn ensure_revision_for_composition(
    revisions: &dyn ObjectStore<CompositionRevision>,
    composition: &Composition,
) -> Result<CompositionRevision, Error> {
    let owned = list_owned_revisions(revisions, composition).await?;
    let hash = truncate_label_hash(&composition.content_hash());

    let existing = owned.iter().filter(|r| r.hash_label == hash).max_by_key(|r| r.revision).cloned();

    let chosen = match existing {
        Some(r) => r,
        None => {
            let next_revision = owned.iter().map(|r| r.revision).max().unwrap_or(0) + 1;
            let name = format!("{}-{}", composition.name, &hash[..hash.len().min(8)]);
            let new_revision = CompositionRevision {
                name: name.clone(),
                owner_references: vec![composition.owner_reference(&composition_gvk().api_version(), true)],
                hash_label: hash,
                revision: next_revision,
                spec: composition.spec.clone(),
            };
            revisions.create(&revision_gvk(), None, &name, new_revision).await?
        }
    };

    gc_outdated(revisions, composition).await?;
    Ok(chosen)
}

async fn list_owned_revisions(revisions: &dyn ObjectStore<CompositionRevision>, composition: &Composition) -> Result<Vec<CompositionRevision>, Error> {
    let list = revisions.list(&revision_gvk(), &ListParams::default()).await?;
    Ok(list.items.into_iter().filter(|r| r.is_owned_by(&composition.uid)).collect())
}

/// Delete historical (non-current-hash) revisions beyond
/// `composition.revision_history_limit`, oldest-first.
async fn gc_outdated(revisions: &dyn ObjectStore<CompositionRevision>, composition: &Composition) -> Result<(), Error> {
    let Some(limit) = composition.revision_history_limit else {
        return Ok(());
    };
    let hash = truncate_label_hash(&composition.content_hash());
    let mut historical: Vec<CompositionRevision> = list_owned_revisions(revisions, composition).await?.into_iter().filter(|r| r.hash_label != hash).collect();
    historical.sort_by_key(|r| r.revision);

    let excess = historical.len().saturating_sub(limit as usize);
    for revision in historical.into_iter().take(excess) {
        revisions.delete(&revision_gvk(), None, &revision.name).await?;
    }
    Ok(())
}
