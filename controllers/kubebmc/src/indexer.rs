//! Ownership index.
//!
//! Maps emulator pods and services back to the KubeBMC that controls them so a
//! child event can requeue its owner. The index is a cache rebuilt from watch
//! events and never consulted for anything the cluster could contradict.
//!
//! Workers only read it; the watch dispatcher is the only writer. Entries for
//! different kinds are independent, so a relist of pods never disturbs the
//! service entries.

use cluster_store::{controller_owner_of, ObjectKey};
use crds::labels::{MANAGED_BY_LABEL, MANAGED_BY_VALUE, OWNER_NAME_LABEL, OWNER_NAMESPACE_ANNOTATION};
use crds::KubeBMC;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::Resource;
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::debug;

/// Child resource kinds the controller owns
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ChildKind {
    Pod,
    Service,
}

impl fmt::Display for ChildKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pod => write!(f, "Pod"),
            Self::Service => write!(f, "Service"),
        }
    }
}

/// Identity of one child
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChildRef {
    pub kind: ChildKind,
    pub key: ObjectKey,
}

impl ChildRef {
    pub fn new(kind: ChildKind, key: ObjectKey) -> Self {
        Self { kind, key }
    }
}

impl fmt::Display for ChildRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.kind, self.key)
    }
}

/// Resolves the KubeBMC controlling a child.
///
/// Returns `None` when the controller owner reference points at anything other
/// than a KubeBMC. Children without any controller reference fall back to the
/// `owner-name` label, but only if they carry our managed-by label. The owner
/// namespace comes from the owner-namespace annotation, defaulting to the
/// child's own namespace.
pub fn resolve_owner(meta: &ObjectMeta) -> Option<ObjectKey> {
    let owner_name = match controller_owner_of(meta) {
        Some(owner) => {
            if owner.api_version != KubeBMC::api_version(&()) || owner.kind != KubeBMC::kind(&()) {
                return None;
            }
            owner.name.clone()
        }
        None => {
            let labels = meta.labels.as_ref()?;
            if labels.get(MANAGED_BY_LABEL).map(String::as_str) != Some(MANAGED_BY_VALUE) {
                return None;
            }
            labels.get(OWNER_NAME_LABEL)?.clone()
        }
    };

    let namespace = meta.annotations.as_ref()
        .and_then(|a| a.get(OWNER_NAMESPACE_ANNOTATION))
        .cloned()
        .or_else(|| meta.namespace.clone())?;

    Some(ObjectKey::new(namespace, owner_name))
}

#[derive(Debug, Default)]
struct IndexState {
    owners: HashMap<ChildRef, ObjectKey>,
    children: HashMap<ObjectKey, BTreeSet<ChildRef>>,
}

impl IndexState {
    fn unlink(&mut self, child: &ChildRef) -> Option<ObjectKey> {
        let owner = self.owners.remove(child)?;
        if let Some(set) = self.children.get_mut(&owner) {
            set.remove(child);
            if set.is_empty() {
                self.children.remove(&owner);
            }
        }
        Some(owner)
    }

    fn link(&mut self, child: ChildRef, owner: ObjectKey) {
        self.children.entry(owner.clone()).or_default().insert(child.clone());
        self.owners.insert(child, owner);
    }
}

/// Reader/writer guarded child ↔ owner index
#[derive(Debug, Default)]
pub struct OwnershipIndex {
    state: RwLock<IndexState>,
}

impl OwnershipIndex {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, IndexState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, IndexState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Records the latest observed state of a child.
    ///
    /// Returns the owner it resolves to now, or `None` if it is not ours, in
    /// which case any stale entry for it is dropped.
    pub fn upsert(&self, kind: ChildKind, meta: &ObjectMeta) -> Option<ObjectKey> {
        let child = ChildRef::new(kind, ObjectKey::from_meta(meta)?);
        let owner = resolve_owner(meta);

        let mut state = self.write();
        state.unlink(&child);
        if let Some(owner) = &owner {
            debug!("Indexed {} -> KubeBMC {}", child, owner);
            state.link(child, owner.clone());
        }
        owner
    }

    /// Forgets a deleted child, returning the owner it was indexed under.
    pub fn remove(&self, kind: ChildKind, key: &ObjectKey) -> Option<ObjectKey> {
        let child = ChildRef::new(kind, key.clone());
        self.write().unlink(&child)
    }

    /// Replaces every entry of `kind` with a freshly listed set of children.
    ///
    /// Entries of other kinds are untouched. Returns the owners of children
    /// that were indexed before but are missing from the listing, i.e. whose
    /// deletion the watch did not report.
    pub fn replace_kind<'a>(
        &self,
        kind: ChildKind,
        listed: impl IntoIterator<Item = &'a ObjectMeta>,
    ) -> BTreeSet<ObjectKey> {
        let resolved: Vec<(ChildRef, ObjectKey)> = listed
            .into_iter()
            .filter_map(|meta| {
                let child = ChildRef::new(kind, ObjectKey::from_meta(meta)?);
                Some((child, resolve_owner(meta)?))
            })
            .collect();

        let mut state = self.write();
        let previous: Vec<(ChildRef, ObjectKey)> = state.owners.iter()
            .filter(|(child, _)| child.kind == kind)
            .map(|(child, owner)| (child.clone(), owner.clone()))
            .collect();
        for (child, _) in &previous {
            state.unlink(child);
        }
        let count = resolved.len();
        for (child, owner) in resolved {
            state.link(child, owner);
        }
        debug!("Rebuilt {} index: {} owned children", kind, count);

        previous.into_iter()
            .filter(|(child, _)| !state.owners.contains_key(child))
            .map(|(_, owner)| owner)
            .collect()
    }

    /// Children currently attributed to `owner`, in stable order.
    pub fn children_of(&self, owner: &ObjectKey) -> Vec<ChildRef> {
        self.read().children.get(owner)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Owner a child is indexed under.
    pub fn owner_of(&self, kind: ChildKind, key: &ObjectKey) -> Option<ObjectKey> {
        self.read().owners.get(&ChildRef::new(kind, key.clone())).cloned()
    }

    /// Number of indexed children.
    pub fn len(&self) -> usize {
        self.read().owners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
