//! Unit tests for the KubeBMC reconciler

use crate::backoff::ExponentialBackoff;
use crate::builder::build;
use crate::config::CascadeMode;
use crate::error::ControllerError;
use crate::indexer::{resolve_owner, ChildKind};
use crate::reconciler::ReconcileOutcome;
use crate::test_utils::*;
use crate::watcher::EventDispatcher;
use crate::work_queue::WorkQueue;
use cluster_store::{controller_owner_of, MockOp, ObjectKey, StoreError};
use crds::labels::{MANAGED_BY_LABEL, OWNER_NAME_LABEL, TARGET_NAME_LABEL};
use k8s_openapi::api::core::v1::Pod;
use kube_runtime::watcher;
use std::sync::Arc;
use std::time::Duration;

const SYSTEM_NS: &str = "kubebmc-system";

fn key() -> ObjectKey {
    ObjectKey::new("default", "vm1-bmc")
}

#[tokio::test]
async fn test_converges_from_zero() {
    let h = create_test_harness(CascadeMode::OwnerReferences);
    let bmc = create_test_kube_bmc("vm1-bmc", "default", "default", "vm1");
    h.store.add_kube_bmc(bmc);

    let outcome = h.reconciler.reconcile(&key()).await.unwrap();
    assert_eq!(outcome, ReconcileOutcome::Converged { ready: true });

    assert_eq!(h.store.pod_count(), 1);
    assert_eq!(h.store.service_count(), 1);

    let pod = h.store.pod(SYSTEM_NS, "vm1-bmc-kbmc").expect("pod created");
    let service = h.store.service(SYSTEM_NS, "vm1-bmc-kbmc").expect("service created");
    for meta in [&pod.metadata, &service.metadata] {
        // The owner lives in another namespace: attributed by label only
        assert!(controller_owner_of(meta).is_none());
        assert_eq!(resolve_owner(meta), Some(key()));

        let labels = meta.labels.as_ref().unwrap();
        assert_eq!(labels[MANAGED_BY_LABEL], "kbmc");
        assert_eq!(labels[OWNER_NAME_LABEL], "vm1-bmc");
        assert_eq!(labels[TARGET_NAME_LABEL], "vm1");
    }

    let status = h.store.kube_bmc("default", "vm1-bmc").unwrap().status.unwrap();
    assert!(status.ready);
    assert!(!status.service_ip.is_empty());
    assert_eq!(status.error, None);

    // Two creates and one status patch
    assert_eq!(h.store.writes(), 3);
}

#[tokio::test]
async fn test_same_namespace_children_carry_controller_reference() {
    let h = create_test_harness(CascadeMode::OwnerReferences);
    let bmc = create_test_kube_bmc("vm1-bmc", SYSTEM_NS, "default", "vm1");
    h.store.add_kube_bmc(bmc.clone());
    let key = ObjectKey::new(SYSTEM_NS, "vm1-bmc");

    h.reconciler.reconcile(&key).await.unwrap();

    let pod = h.store.pod(SYSTEM_NS, "vm1-bmc-kbmc").unwrap();
    let service = h.store.service(SYSTEM_NS, "vm1-bmc-kbmc").unwrap();
    for meta in [&pod.metadata, &service.metadata] {
        let owner = controller_owner_of(meta).expect("controller reference");
        assert_eq!(owner.kind, "KubeBMC");
        assert_eq!(Some(&owner.uid), bmc.metadata.uid.as_ref());
        assert_eq!(resolve_owner(meta), Some(key.clone()));
    }
}

#[tokio::test]
async fn test_second_pass_performs_no_writes() {
    let h = create_test_harness(CascadeMode::OwnerReferences);
    h.store.add_kube_bmc(create_test_kube_bmc("vm1-bmc", "default", "default", "vm1"));

    h.reconciler.reconcile(&key()).await.unwrap();
    let writes = h.store.writes();
    let creates = h.store.create_calls();

    let outcome = h.reconciler.reconcile(&key()).await.unwrap();
    assert_eq!(outcome, ReconcileOutcome::Converged { ready: true });
    assert_eq!(h.store.writes(), writes);
    assert_eq!(h.store.create_calls(), creates);
}

#[tokio::test]
async fn test_missing_declaration_is_a_no_op() {
    let h = create_test_harness(CascadeMode::OwnerReferences);

    let outcome = h.reconciler.reconcile(&key()).await.unwrap();
    assert_eq!(outcome, ReconcileOutcome::Absent);
    assert_eq!(h.store.writes(), 0);
    assert_eq!(h.store.create_calls(), 0);
}

#[tokio::test]
async fn test_deleted_declaration_leaves_children_to_garbage_collection() {
    let h = create_test_harness(CascadeMode::OwnerReferences);
    let key = ObjectKey::new(SYSTEM_NS, "vm1-bmc");
    h.store.add_kube_bmc(create_test_kube_bmc("vm1-bmc", SYSTEM_NS, "default", "vm1"));
    h.reconciler.reconcile(&key).await.unwrap();
    let pod = h.store.pod(SYSTEM_NS, "vm1-bmc-kbmc").unwrap();
    h.index.upsert(ChildKind::Pod, &pod.metadata);

    h.store.remove_kube_bmc(SYSTEM_NS, "vm1-bmc");
    let writes = h.store.writes();

    let outcome = h.reconciler.reconcile(&key).await.unwrap();
    assert_eq!(outcome, ReconcileOutcome::Absent);
    assert_eq!(h.store.writes(), writes);
    assert_eq!(h.store.pod_count(), 1);
}

#[tokio::test]
async fn test_deleted_cross_namespace_declaration_is_cleaned_up() {
    let h = create_test_harness(CascadeMode::OwnerReferences);
    h.store.add_kube_bmc(create_test_kube_bmc("vm1-bmc", "default", "default", "vm1"));
    h.reconciler.reconcile(&key()).await.unwrap();
    let pod = h.store.pod(SYSTEM_NS, "vm1-bmc-kbmc").unwrap();
    let service = h.store.service(SYSTEM_NS, "vm1-bmc-kbmc").unwrap();
    h.index.upsert(ChildKind::Pod, &pod.metadata);
    h.index.upsert(ChildKind::Service, &service.metadata);

    h.store.remove_kube_bmc("default", "vm1-bmc");

    let outcome = h.reconciler.reconcile(&key()).await.unwrap();
    assert_eq!(outcome, ReconcileOutcome::CleanedUp(2));
    assert_eq!(h.store.pod_count(), 0);
    assert_eq!(h.store.service_count(), 0);
}

#[tokio::test]
async fn test_existing_pod_is_not_recreated() {
    let h = create_test_harness(CascadeMode::OwnerReferences);
    let bmc = create_test_kube_bmc("vm1-bmc", "default", "default", "vm1");
    h.store.add_kube_bmc(bmc.clone());
    // Left behind by a pass that crashed after creating the pod
    h.store.add_pod(build(&bmc, &h.config).pod);

    let outcome = h.reconciler.reconcile(&key()).await.unwrap();
    assert_eq!(outcome, ReconcileOutcome::Converged { ready: true });
    assert_eq!(h.store.pod_count(), 1);
    assert_eq!(h.store.service_count(), 1);
    // Only the service was created
    assert_eq!(h.store.create_calls(), 1);
}

#[tokio::test]
async fn test_already_exists_on_create_is_success() {
    let h = create_test_harness(CascadeMode::OwnerReferences);
    let bmc = create_test_kube_bmc("vm1-bmc", "default", "default", "vm1");
    h.store.add_kube_bmc(bmc.clone());
    h.store.add_pod(build(&bmc, &h.config).pod);
    // The read misses the pod, so the create collides with it
    h.store.set_stale_child_reads(true);

    let outcome = h.reconciler.reconcile(&key()).await.unwrap();
    assert_eq!(outcome, ReconcileOutcome::Converged { ready: false });
    assert_eq!(h.store.pod_count(), 1);
    assert_eq!(h.store.service_count(), 1);

    // Once reads catch up the pass reports ready without creating anything
    h.store.set_stale_child_reads(false);
    let creates = h.store.create_calls();
    let outcome = h.reconciler.reconcile(&key()).await.unwrap();
    assert_eq!(outcome, ReconcileOutcome::Converged { ready: true });
    assert_eq!(h.store.create_calls(), creates);
}

#[tokio::test]
async fn test_transient_failure_retries_only_missing_child() {
    let h = create_test_harness(CascadeMode::OwnerReferences);
    h.store.add_kube_bmc(create_test_kube_bmc("vm1-bmc", "default", "default", "vm1"));
    h.store.fail_next(MockOp::CreateService, 1);

    let err = h.reconciler.reconcile(&key()).await.unwrap_err();
    assert!(err.is_retryable(), "unexpected error: {}", err);
    // The pod is kept, not rolled back
    assert_eq!(h.store.pod_count(), 1);
    assert_eq!(h.store.service_count(), 0);
    let status = h.store.kube_bmc("default", "vm1-bmc").unwrap().status.unwrap();
    assert!(status.error.is_some());
    assert!(!status.ready);

    let outcome = h.reconciler.reconcile(&key()).await.unwrap();
    assert_eq!(outcome, ReconcileOutcome::Converged { ready: true });
    assert_eq!(h.store.pod_count(), 1);
    assert_eq!(h.store.service_count(), 1);
    // pod + failed service, then only the service
    assert_eq!(h.store.create_calls(), 3);

    let status = h.store.kube_bmc("default", "vm1-bmc").unwrap().status.unwrap();
    assert_eq!(status.error, None);
    assert!(status.ready);
}

#[tokio::test]
async fn test_recovery_clears_recorded_error_and_settles() {
    let h = create_test_harness(CascadeMode::OwnerReferences);
    h.store.add_kube_bmc(create_test_kube_bmc("vm1-bmc", "default", "default", "vm1"));
    h.store.fail_next(MockOp::GetPod, 1);

    h.reconciler.reconcile(&key()).await.unwrap_err();
    let recorded = h.store.kube_bmc("default", "vm1-bmc").unwrap().status.unwrap();
    assert!(recorded.error.is_some());

    h.reconciler.reconcile(&key()).await.unwrap();
    let status = h.store.kube_bmc("default", "vm1-bmc").unwrap().status.unwrap();
    assert_eq!(status.error, None, "status patch must remove the recorded error");
    assert!(status.ready);

    // The stored status now equals the projection, so nothing is rewritten
    let writes = h.store.writes();
    h.reconciler.reconcile(&key()).await.unwrap();
    assert_eq!(h.store.writes(), writes);
}

#[tokio::test]
async fn test_fetch_failure_attempts_no_children() {
    let h = create_test_harness(CascadeMode::OwnerReferences);
    h.store.add_kube_bmc(create_test_kube_bmc("vm1-bmc", "default", "default", "vm1"));
    h.store.fail_next(MockOp::GetKubeBMC, 1);

    let err = h.reconciler.reconcile(&key()).await.unwrap_err();
    assert!(err.is_retryable());
    assert_eq!(h.store.create_calls(), 0);
    assert_eq!(h.store.writes(), 0);
}

#[tokio::test]
async fn test_invalid_declaration_is_permanent() {
    let h = create_test_harness(CascadeMode::OwnerReferences);
    h.store.add_kube_bmc(create_test_kube_bmc("vm1-bmc", "default", "default", ""));

    let err = h.reconciler.reconcile(&key()).await.unwrap_err();
    assert!(matches!(err, ControllerError::InvalidDeclaration(_)));
    assert!(!err.is_retryable());
    assert_eq!(h.store.create_calls(), 0);

    let status = h.store.kube_bmc("default", "vm1-bmc").unwrap().status.unwrap();
    assert!(status.error.unwrap().contains("vmName"));
}

#[tokio::test]
async fn test_names_unusable_for_a_service_are_rejected() {
    let h = create_test_harness(CascadeMode::OwnerReferences);
    // 59 characters plus the child suffix exceeds a DNS-1035 label
    let too_long = "a".repeat(59);
    for name in [too_long.as_str(), "vm1.bmc", "1vm-bmc"] {
        h.store.add_kube_bmc(create_test_kube_bmc(name, "default", "default", "vm1"));

        let err = h.reconciler.reconcile(&ObjectKey::new("default", name)).await.unwrap_err();
        assert!(matches!(err, ControllerError::InvalidDeclaration(_)), "{}: {}", name, err);
        assert!(!err.is_retryable());
    }
    assert_eq!(h.store.create_calls(), 0);

    let longest = "a".repeat(58);
    h.store.add_kube_bmc(create_test_kube_bmc(&longest, "default", "default", "vm1"));
    let outcome = h.reconciler.reconcile(&ObjectKey::new("default", &longest)).await.unwrap();
    assert_eq!(outcome, ReconcileOutcome::Converged { ready: true });
}

#[tokio::test]
async fn test_child_controlled_by_another_owner_is_a_conflict() {
    let h = create_test_harness(CascadeMode::OwnerReferences);
    h.store.add_kube_bmc(create_test_kube_bmc("vm1-bmc", "default", "default", "vm1"));
    // Same child name, different controller uid
    let mut impostor = create_test_kube_bmc("vm1-bmc", "default", "default", "vm1");
    impostor.metadata.uid = Some("some-other-uid".to_string());
    h.store.add_pod(owned_children(&impostor, &h.config).pod);

    let err = h.reconciler.reconcile(&key()).await.unwrap_err();
    assert!(matches!(err, ControllerError::Store(StoreError::AlreadyOwned(_))));
    assert!(!err.is_retryable());
}

#[tokio::test]
async fn test_same_name_in_another_namespace_is_a_conflict() {
    let h = create_test_harness(CascadeMode::OwnerReferences);
    h.store.add_kube_bmc(create_test_kube_bmc("vm1-bmc", "default", "default", "vm1"));
    h.store.add_kube_bmc(create_test_kube_bmc("vm1-bmc", "lab", "lab", "vm1"));
    h.reconciler.reconcile(&key()).await.unwrap();

    let err = h.reconciler.reconcile(&ObjectKey::new("lab", "vm1-bmc")).await.unwrap_err();
    assert!(matches!(err, ControllerError::Store(StoreError::AlreadyOwned(_))));
    assert_eq!(h.store.pod_count(), 1);
    assert_eq!(resolve_owner(&h.store.pod(SYSTEM_NS, "vm1-bmc-kbmc").unwrap().metadata), Some(key()));
}

#[tokio::test]
async fn test_explicit_cascade_deletes_indexed_children() {
    let h = create_test_harness(CascadeMode::Explicit);
    h.store.add_kube_bmc(create_test_kube_bmc("vm1-bmc", "default", "default", "vm1"));
    h.reconciler.reconcile(&key()).await.unwrap();

    // What the child watches would have recorded
    let pod = h.store.pod(SYSTEM_NS, "vm1-bmc-kbmc").unwrap();
    let service = h.store.service(SYSTEM_NS, "vm1-bmc-kbmc").unwrap();
    h.index.upsert(ChildKind::Pod, &pod.metadata);
    h.index.upsert(ChildKind::Service, &service.metadata);

    h.store.remove_kube_bmc("default", "vm1-bmc");
    let outcome = h.reconciler.reconcile(&key()).await.unwrap();
    assert_eq!(outcome, ReconcileOutcome::CleanedUp(2));
    assert_eq!(h.store.pod_count(), 0);
    assert_eq!(h.store.service_count(), 0);

    // Children already gone: nothing left to delete
    let writes = h.store.writes();
    let outcome = h.reconciler.reconcile(&key()).await.unwrap();
    assert_eq!(outcome, ReconcileOutcome::CleanedUp(0));
    assert_eq!(h.store.writes(), writes);
}

#[tokio::test]
async fn test_explicit_cascade_without_children_is_a_no_op() {
    let h = create_test_harness(CascadeMode::Explicit);

    let outcome = h.reconciler.reconcile(&key()).await.unwrap();
    assert_eq!(outcome, ReconcileOutcome::Absent);
    assert_eq!(h.store.writes(), 0);
}

#[tokio::test]
async fn test_child_listed_on_startup_is_cleaned_up_before_relist_completes() {
    let h = create_test_harness(CascadeMode::Explicit);
    let queue = WorkQueue::new(ExponentialBackoff::new(Duration::from_millis(10), Duration::from_secs(1)));
    let dispatcher = EventDispatcher::new(Arc::clone(&h.index), queue.clone());
    // The KubeBMC was deleted while the controller was down
    let bmc = create_test_kube_bmc("vm1-bmc", "default", "default", "vm1");
    let pod = build(&bmc, &h.config).pod;
    h.store.add_pod(pod.clone());

    dispatcher.on_child_event::<Pod>(ChildKind::Pod, watcher::Event::Init);
    dispatcher.on_child_event(ChildKind::Pod, watcher::Event::InitApply(pod));

    // A worker picks the owner up while the relist is still in progress
    let queued = queue.get().await.unwrap();
    assert_eq!(queued, key());
    let outcome = h.reconciler.reconcile(&queued).await.unwrap();
    queue.done(&queued);
    assert_eq!(outcome, ReconcileOutcome::CleanedUp(1));
    assert_eq!(h.store.pod_count(), 0);
}
