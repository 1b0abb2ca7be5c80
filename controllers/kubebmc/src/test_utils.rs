//! Test utilities for unit testing reconcilers
//!
//! This module provides helpers for creating test data and setting up test scenarios.

use crate::builder::{build, DesiredChildren};
use crate::config::{CascadeMode, ControllerConfig};
use crate::indexer::OwnershipIndex;
use crate::reconciler::Reconciler;
use cluster_store::{set_controller_owner, MockResourceStore};
use crds::{KubeBMC, KubeBMCSpec};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use std::sync::Arc;

/// Helper to create a test KubeBMC with a uid, as the API server would return it
pub fn create_test_kube_bmc(name: &str, namespace: &str, vm_namespace: &str, vm_name: &str) -> KubeBMC {
    KubeBMC {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            uid: Some(format!("uid-{}-{}", namespace, name)),
            ..Default::default()
        },
        spec: KubeBMCSpec {
            username: None,
            password: None,
            vm_namespace: vm_namespace.to_string(),
            vm_name: vm_name.to_string(),
        },
        status: None,
    }
}

/// Helper to build the children of `bmc` with its controller reference stamped
pub fn owned_children(bmc: &KubeBMC, config: &ControllerConfig) -> DesiredChildren {
    let mut children = build(bmc, config);
    set_controller_owner(&mut children.pod.metadata, bmc).unwrap();
    set_controller_owner(&mut children.service.metadata, bmc).unwrap();
    children
}

/// Test scenario: a reconciler wired to a mock store
pub struct TestHarness {
    pub store: MockResourceStore,
    pub index: Arc<OwnershipIndex>,
    pub config: Arc<ControllerConfig>,
    pub reconciler: Arc<Reconciler>,
}

/// Helper to create a reconciler over an empty mock store
pub fn create_test_harness(cascade: CascadeMode) -> TestHarness {
    let store = MockResourceStore::new();
    let index = Arc::new(OwnershipIndex::new());
    let config = Arc::new(ControllerConfig {
        cascade,
        ..ControllerConfig::default()
    });
    let reconciler = Arc::new(Reconciler::new(
        store.clone(),
        Arc::clone(&config),
        Arc::clone(&index),
    ));
    TestHarness {
        store,
        index,
        config,
        reconciler,
    }
}
