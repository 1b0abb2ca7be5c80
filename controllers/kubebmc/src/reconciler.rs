//! Reconciliation logic for KubeBMC resources.
//!
//! One pass drives a declaration's children to the state its spec implies:
//! fetch, build, stamp ownership, create whatever is missing, project status.
//! Passes are level-triggered and idempotent; once both children exist a pass
//! performs no writes.
//!
//! Controller owner references are only stamped when the KubeBMC lives in the
//! system namespace. Other children are attributed through their labels and
//! owner-namespace annotation and deleted by the controller once the KubeBMC
//! is gone.

use crate::builder::{build, child_name, DesiredChildren};
use crate::config::ControllerConfig;
use crate::error::ControllerError;
use crate::indexer::{resolve_owner, ChildKind, OwnershipIndex};
use crate::status::{failure_status, project_status};
use cluster_store::{controller_owner_of, set_controller_owner, ObjectKey, ResourceStore, StoreError};
use crds::{KubeBMC, KubeBMCStatus};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::{Resource, ResourceExt};
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Result of a successful reconciliation pass
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// Both children exist; `ready` mirrors the projected status
    Converged { ready: bool },
    /// The declaration is gone and nothing was deleted
    Absent,
    /// The declaration is gone and this many indexed children were deleted
    CleanedUp(usize),
}

/// Reconciles KubeBMC resources.
pub struct Reconciler {
    pub(crate) store: Box<dyn ResourceStore + Send + Sync>,
    pub(crate) config: Arc<ControllerConfig>,
    pub(crate) index: Arc<OwnershipIndex>,
}

impl Reconciler {
    /// Creates a new reconciler over any [`ResourceStore`] implementation.
    pub fn new(
        store: impl ResourceStore + 'static,
        config: Arc<ControllerConfig>,
        index: Arc<OwnershipIndex>,
    ) -> Self {
        Self {
            store: Box::new(store),
            config,
            index,
        }
    }

    /// Runs one reconciliation pass for the declaration at `key`.
    ///
    /// A missing declaration is not an error. Failures after the declaration
    /// was fetched are recorded in its `status.error` before being returned.
    pub async fn reconcile(&self, key: &ObjectKey) -> Result<ReconcileOutcome, ControllerError> {
        let declaration = match self.store.get_kube_bmc(&key.namespace, &key.name).await {
            Ok(declaration) => declaration,
            Err(e) if e.is_not_found() => return self.reconcile_absent(key).await,
            Err(e) => return Err(e.into()),
        };

        if declaration.meta().deletion_timestamp.is_some() {
            debug!("KubeBMC {} is being deleted, waiting for its removal", key);
            return Ok(ReconcileOutcome::Absent);
        }

        match self.converge(key, &declaration).await {
            Ok(status) => {
                let ready = status.ready;
                self.publish_status(key, &declaration, status).await?;
                Ok(ReconcileOutcome::Converged { ready })
            }
            Err(e) => {
                self.record_failure(key, &declaration, &e).await;
                Err(e)
            }
        }
    }

    /// Creates missing children and projects the status they imply.
    async fn converge(&self, key: &ObjectKey, declaration: &KubeBMC) -> Result<KubeBMCStatus, ControllerError> {
        validate(declaration)?;

        let DesiredChildren { mut pod, mut service } = build(declaration, &self.config);
        if self.config.owner_references_apply(&key.namespace) {
            set_controller_owner(&mut pod.metadata, declaration)?;
            set_controller_owner(&mut service.metadata, declaration)?;
        }
        let uid = declaration.uid();
        let owner = Owner { key, uid: uid.as_deref() };

        let (namespace, name) = child_identity(&pod.metadata)?;
        let pod_result = ensure_child(
            ChildKind::Pod,
            owner,
            || self.store.get_pod(namespace, name),
            || self.store.create_pod(&pod),
        );
        let (namespace, name) = child_identity(&service.metadata)?;
        let service_result = ensure_child(
            ChildKind::Service,
            owner,
            || self.store.get_service(namespace, name),
            || self.store.create_service(&service),
        );

        // Independent children: a failed service never undoes the pod
        let (pod, service) = tokio::join!(pod_result, service_result);
        let (pod, service) = (pod?, service?);

        Ok(project_status(pod.as_ref(), service.as_ref()))
    }

    /// Declaration is gone: nothing to do unless its children are cleaned up
    /// explicitly.
    async fn reconcile_absent(&self, key: &ObjectKey) -> Result<ReconcileOutcome, ControllerError> {
        if !self.config.cleans_up_explicitly(&key.namespace) {
            debug!("KubeBMC {} not found, nothing to reconcile", key);
            return Ok(ReconcileOutcome::Absent);
        }

        let children = self.index.children_of(key);
        if children.is_empty() {
            debug!("KubeBMC {} not found and owns no indexed children", key);
            return Ok(ReconcileOutcome::Absent);
        }

        let mut deleted = 0;
        for child in children {
            let ObjectKey { namespace, name } = &child.key;
            let result = match child.kind {
                ChildKind::Pod => self.store.delete_pod(namespace, name).await,
                ChildKind::Service => self.store.delete_service(namespace, name).await,
            };
            match result {
                Ok(()) => {
                    info!("Deleted {} of removed KubeBMC {}", child, key);
                    deleted += 1;
                }
                Err(e) if e.is_not_found() => debug!("{} already gone", child),
                Err(e) => return Err(e.into()),
            }
        }
        Ok(ReconcileOutcome::CleanedUp(deleted))
    }

    /// Writes `status` unless the declaration already carries it.
    async fn publish_status(
        &self,
        key: &ObjectKey,
        declaration: &KubeBMC,
        status: KubeBMCStatus,
    ) -> Result<(), ControllerError> {
        if declaration.status.as_ref() == Some(&status) {
            debug!("KubeBMC {} status unchanged", key);
            return Ok(());
        }
        info!(
            "Updating KubeBMC {} status: ready={}, serviceIP={}",
            key,
            status.ready,
            if status.service_ip.is_empty() { "<pending>" } else { status.service_ip.as_str() }
        );
        self.store
            .patch_kube_bmc_status(&key.namespace, &key.name, &status)
            .await?;
        Ok(())
    }

    /// Surfaces `error` on the declaration. Best effort: the returned error
    /// is what the caller acts on.
    async fn record_failure(&self, key: &ObjectKey, declaration: &KubeBMC, error: &ControllerError) {
        let status = failure_status(declaration.status.as_ref(), &error.to_string());
        if declaration.status.as_ref() == Some(&status) {
            return;
        }
        if let Err(e) = self
            .store
            .patch_kube_bmc_status(&key.namespace, &key.name, &status)
            .await
        {
            warn!("Failed to record error on KubeBMC {}: {}", key, e);
        }
    }
}

/// Rejects declarations the builder cannot turn into a working emulator.
///
/// Children are named after the declaration and a Service name must be a
/// DNS-1035 label, which rules out long and dotted declaration names.
fn validate(declaration: &KubeBMC) -> Result<(), ControllerError> {
    let spec = &declaration.spec;
    let name = declaration.meta().name.as_deref().unwrap_or_default();
    if name.is_empty() {
        return Err(ControllerError::InvalidDeclaration("metadata.name is empty".to_string()));
    }
    let child = child_name(name);
    if !is_dns1035_label(&child) {
        return Err(ControllerError::InvalidDeclaration(format!(
            "child name '{}' is not a DNS-1035 label (at most {} lowercase alphanumerics or '-', starting with a letter)",
            child, DNS1035_LABEL_MAX
        )));
    }
    if spec.vm_namespace.is_empty() {
        return Err(ControllerError::InvalidDeclaration("spec.vmNamespace is empty".to_string()));
    }
    if spec.vm_name.is_empty() {
        return Err(ControllerError::InvalidDeclaration("spec.vmName is empty".to_string()));
    }
    Ok(())
}

const DNS1035_LABEL_MAX: usize = 63;

fn is_dns1035_label(value: &str) -> bool {
    let bytes = value.as_bytes();
    bytes.len() <= DNS1035_LABEL_MAX
        && bytes.first().is_some_and(|b| b.is_ascii_lowercase())
        && bytes.last().is_some_and(|b| b.is_ascii_lowercase() || b.is_ascii_digit())
        && bytes.iter().all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || *b == b'-')
}

fn child_identity(meta: &ObjectMeta) -> Result<(&str, &str), ControllerError> {
    match (meta.namespace.as_deref(), meta.name.as_deref()) {
        (Some(namespace), Some(name)) => Ok((namespace, name)),
        _ => Err(StoreError::InvalidObject("built child has no name or namespace".to_string()).into()),
    }
}

/// Get-then-create for one child.
///
/// An existing child is kept as is. A create that collides with a child the
/// read did not see counts as success; the collided object is re-read and
/// `None` is returned if it is still not visible. A child controlled by, or
/// labelled for, a different object is an ownership conflict.
async fn ensure_child<T, G, GF, C, CF>(
    kind: ChildKind,
    owner: Owner<'_>,
    get: G,
    create: C,
) -> Result<Option<T>, ControllerError>
where
    T: Resource,
    G: Fn() -> GF,
    GF: Future<Output = Result<T, StoreError>>,
    C: FnOnce() -> CF,
    CF: Future<Output = Result<T, StoreError>>,
{
    match get().await {
        Ok(existing) => {
            check_owner(kind, &existing, owner)?;
            debug!("{} {} exists", kind, existing.meta().name.as_deref().unwrap_or_default());
            return Ok(Some(existing));
        }
        Err(e) if e.is_not_found() => {}
        Err(e) => return Err(e.into()),
    }

    match create().await {
        Ok(created) => {
            info!("Created {} {}", kind, created.meta().name.as_deref().unwrap_or_default());
            Ok(Some(created))
        }
        Err(e) if e.is_already_exists() => {
            debug!("{} already exists: {}", kind, e);
            match get().await {
                Ok(existing) => {
                    check_owner(kind, &existing, owner)?;
                    Ok(Some(existing))
                }
                Err(e) if e.is_not_found() => Ok(None),
                Err(e) => Err(e.into()),
            }
        }
        Err(e) => Err(e.into()),
    }
}

/// The declaration a child must belong to
#[derive(Clone, Copy)]
struct Owner<'a> {
    key: &'a ObjectKey,
    uid: Option<&'a str>,
}

fn check_owner<T: Resource>(kind: ChildKind, child: &T, owner: Owner<'_>) -> Result<(), ControllerError> {
    let name = child.meta().name.as_deref().unwrap_or_default();
    if let Some(controller) = controller_owner_of(child.meta()) {
        if Some(controller.uid.as_str()) != owner.uid {
            return Err(StoreError::AlreadyOwned(format!(
                "{} {} is controlled by {} {}",
                kind, name, controller.kind, controller.name
            ))
            .into());
        }
        return Ok(());
    }
    // Unowned children are attributed by label, e.g. same-named KubeBMCs in two namespaces
    match resolve_owner(child.meta()) {
        Some(labelled) if labelled != *owner.key => Err(StoreError::AlreadyOwned(format!(
            "{} {} belongs to KubeBMC {}",
            kind, name, labelled
        ))
        .into()),
        _ => Ok(()),
    }
}
