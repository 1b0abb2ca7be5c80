//! ResourceStore trait for mocking
//!
//! This trait abstracts the Kubernetes API calls made by the reconciler so
//! that reconciliation can be tested against an in-memory store.

use crate::error::StoreError;
use async_trait::async_trait;
use crds::{KubeBMC, KubeBMCStatus};
use k8s_openapi::api::core::v1::{Pod, Service};

/// Trait for backing resource store operations
///
/// `get_*` returns [`StoreError::NotFound`] for missing objects and `create_*`
/// returns [`StoreError::AlreadyExists`] on a name collision; callers decide
/// whether either is an error. All methods must be `Send` to work with
/// Tokio's work-stealing runtime.
#[async_trait]
pub trait ResourceStore: Send + Sync {
    // Declarations
    async fn get_kube_bmc(&self, namespace: &str, name: &str) -> Result<KubeBMC, StoreError>;
    async fn patch_kube_bmc_status(&self, namespace: &str, name: &str, status: &KubeBMCStatus) -> Result<(), StoreError>;

    // Emulator pods
    async fn get_pod(&self, namespace: &str, name: &str) -> Result<Pod, StoreError>;
    async fn create_pod(&self, pod: &Pod) -> Result<Pod, StoreError>;
    async fn delete_pod(&self, namespace: &str, name: &str) -> Result<(), StoreError>;

    // Emulator services
    async fn get_service(&self, namespace: &str, name: &str) -> Result<Service, StoreError>;
    async fn create_service(&self, service: &Service) -> Result<Service, StoreError>;
    async fn delete_service(&self, namespace: &str, name: &str) -> Result<(), StoreError>;
}
