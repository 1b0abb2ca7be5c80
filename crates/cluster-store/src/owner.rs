//! Controller owner references
//!
//! Links a child to the object that controls its lifecycle. The API server's
//! garbage collector deletes children whose controller is gone, and the
//! controller's ownership index resolves child events through the same link.
//! The collector only honours an owner in the child's own namespace.

use crate::error::StoreError;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, OwnerReference};
use kube::Resource;

/// Stamps a controller owner reference pointing at `owner` onto `child`.
///
/// Re-stamping the same owner is a no-op. Fails with
/// [`StoreError::AlreadyOwned`] if a different object already controls the
/// child, and with [`StoreError::InvalidObject`] if the owner has not been
/// persisted yet (no name or uid).
pub fn set_controller_owner<K>(child: &mut ObjectMeta, owner: &K) -> Result<(), StoreError>
where
    K: Resource<DynamicType = ()>,
{
    let reference = owner.controller_owner_ref(&())
        .ok_or_else(|| StoreError::InvalidObject(format!(
            "{} owner has no name or uid",
            K::kind(&())
        )))?;

    let references = child.owner_references.get_or_insert_with(Vec::new);
    if let Some(existing) = references.iter().find(|r| r.controller == Some(true)) {
        if existing.uid != reference.uid {
            return Err(StoreError::AlreadyOwned(format!(
                "{} is already controlled by {} {}",
                child.name.as_deref().unwrap_or("<unknown>"),
                existing.kind,
                existing.name
            )));
        }
    }

    references.retain(|r| r.uid != reference.uid);
    references.push(reference);
    Ok(())
}

/// Returns the owner reference marked as controller, if any.
pub fn controller_owner_of(meta: &ObjectMeta) -> Option<&OwnerReference> {
    meta.owner_references
        .as_ref()?
        .iter()
        .find(|r| r.controller == Some(true))
}
