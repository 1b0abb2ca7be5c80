//! Mock ResourceStore for unit testing
//!
//! Stores resources in memory, counts successful writes, and can be told to
//! fail specific calls, serve stale reads, or stall, so reconciliation can be
//! exercised without an API server.

use crate::error::StoreError;
use crate::key::ObjectKey;
use crate::patch::{merge_patch, status_patch};
use crate::store_trait::ResourceStore;
use async_trait::async_trait;
use crds::{KubeBMC, KubeBMCStatus};
use k8s_openapi::api::core::v1::{Pod, Service, ServiceSpec};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

/// Store operations that can be made to fail
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MockOp {
    GetKubeBMC,
    PatchStatus,
    GetPod,
    CreatePod,
    DeletePod,
    GetService,
    CreateService,
    DeleteService,
}

/// Mock ResourceStore for testing
#[derive(Clone, Default)]
pub struct MockResourceStore {
    pub(crate) kube_bmcs: Arc<Mutex<HashMap<ObjectKey, KubeBMC>>>,
    pub(crate) pods: Arc<Mutex<HashMap<ObjectKey, Pod>>>,
    pub(crate) services: Arc<Mutex<HashMap<ObjectKey, Service>>>,
    // Pending injected failures per operation
    pub(crate) failures: Arc<Mutex<HashMap<MockOp, u32>>>,
    pub(crate) stale_child_reads: Arc<AtomicBool>,
    pub(crate) latency: Arc<Mutex<Option<Duration>>>,
    pub(crate) writes: Arc<AtomicUsize>,
    pub(crate) create_calls: Arc<AtomicUsize>,
    pub(crate) next_ip: Arc<AtomicU32>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn key_of(meta: &k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta, kind: &str) -> Result<ObjectKey, StoreError> {
    ObjectKey::from_meta(meta)
        .ok_or_else(|| StoreError::InvalidObject(format!("{} has no name or namespace", kind)))
}

impl MockResourceStore {
    /// Create an empty mock store
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a KubeBMC to the mock store, assigning a uid if it has none (for test setup)
    pub fn add_kube_bmc(&self, mut bmc: KubeBMC) {
        if bmc.metadata.uid.is_none() {
            bmc.metadata.uid = Some(uuid::Uuid::new_v4().to_string());
        }
        if let Ok(key) = key_of(&bmc.metadata, "KubeBMC") {
            lock(&self.kube_bmcs).insert(key, bmc);
        }
    }

    /// Remove a KubeBMC from the mock store without counting a write (for test setup)
    pub fn remove_kube_bmc(&self, namespace: &str, name: &str) {
        lock(&self.kube_bmcs).remove(&ObjectKey::new(namespace, name));
    }

    /// Add a pod to the mock store (for test setup)
    pub fn add_pod(&self, pod: Pod) {
        if let Ok(key) = key_of(&pod.metadata, "Pod") {
            lock(&self.pods).insert(key, pod);
        }
    }

    /// Add a service to the mock store (for test setup)
    pub fn add_service(&self, service: Service) {
        if let Ok(key) = key_of(&service.metadata, "Service") {
            lock(&self.services).insert(key, service);
        }
    }

    /// Make the next `times` calls of `op` fail with [`StoreError::Unavailable`]
    pub fn fail_next(&self, op: MockOp, times: u32) {
        *lock(&self.failures).entry(op).or_insert(0) += times;
    }

    /// Make pod and service reads report NotFound regardless of contents
    pub fn set_stale_child_reads(&self, stale: bool) {
        self.stale_child_reads.store(stale, Ordering::SeqCst);
    }

    /// Delay every call by `latency`
    pub fn set_latency(&self, latency: Option<Duration>) {
        *lock(&self.latency) = latency;
    }

    pub fn kube_bmc(&self, namespace: &str, name: &str) -> Option<KubeBMC> {
        lock(&self.kube_bmcs).get(&ObjectKey::new(namespace, name)).cloned()
    }

    pub fn pod(&self, namespace: &str, name: &str) -> Option<Pod> {
        lock(&self.pods).get(&ObjectKey::new(namespace, name)).cloned()
    }

    pub fn service(&self, namespace: &str, name: &str) -> Option<Service> {
        lock(&self.services).get(&ObjectKey::new(namespace, name)).cloned()
    }

    pub fn pod_count(&self) -> usize {
        lock(&self.pods).len()
    }

    pub fn service_count(&self) -> usize {
        lock(&self.services).len()
    }

    /// Number of successful mutations (creates, deletes, status patches)
    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    /// Number of create calls, successful or not
    pub fn create_calls(&self) -> usize {
        self.create_calls.load(Ordering::SeqCst)
    }

    async fn enter(&self, op: MockOp) -> Result<(), StoreError> {
        let latency = *lock(&self.latency);
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
        let mut failures = lock(&self.failures);
        match failures.get_mut(&op) {
            Some(remaining) if *remaining > 0 => {
                *remaining -= 1;
                Err(StoreError::Unavailable(format!("injected failure for {:?}", op)))
            }
            _ => Ok(()),
        }
    }

    fn record_write(&self) {
        self.writes.fetch_add(1, Ordering::SeqCst);
    }

    fn stale(&self) -> bool {
        self.stale_child_reads.load(Ordering::SeqCst)
    }

    fn next_cluster_ip(&self) -> String {
        let n = self.next_ip.fetch_add(1, Ordering::SeqCst) + 10;
        format!("10.96.{}.{}", n / 256, n % 256)
    }
}

#[async_trait]
impl ResourceStore for MockResourceStore {
    async fn get_kube_bmc(&self, namespace: &str, name: &str) -> Result<KubeBMC, StoreError> {
        self.enter(MockOp::GetKubeBMC).await?;
        self.kube_bmc(namespace, name)
            .ok_or_else(|| StoreError::NotFound(format!("KubeBMC {}/{}", namespace, name)))
    }

    async fn patch_kube_bmc_status(&self, namespace: &str, name: &str, status: &KubeBMCStatus) -> Result<(), StoreError> {
        self.enter(MockOp::PatchStatus).await?;
        let mut bmcs = lock(&self.kube_bmcs);
        let bmc = bmcs.get_mut(&ObjectKey::new(namespace, name))
            .ok_or_else(|| StoreError::NotFound(format!("KubeBMC {}/{}", namespace, name)))?;
        // Same merge semantics as the API server's status subresource
        let mut live = serde_json::json!({ "status": bmc.status });
        merge_patch(&mut live, &status_patch(status));
        bmc.status = serde_json::from_value(live["status"].take())?;
        self.record_write();
        Ok(())
    }

    async fn get_pod(&self, namespace: &str, name: &str) -> Result<Pod, StoreError> {
        self.enter(MockOp::GetPod).await?;
        let found = if self.stale() { None } else { self.pod(namespace, name) };
        found.ok_or_else(|| StoreError::NotFound(format!("Pod {}/{}", namespace, name)))
    }

    async fn create_pod(&self, pod: &Pod) -> Result<Pod, StoreError> {
        self.create_calls.fetch_add(1, Ordering::SeqCst);
        self.enter(MockOp::CreatePod).await?;
        let key = key_of(&pod.metadata, "Pod")?;
        let mut pods = lock(&self.pods);
        if pods.contains_key(&key) {
            return Err(StoreError::AlreadyExists(format!("Pod {}", key)));
        }
        let mut created = pod.clone();
        created.metadata.uid = Some(uuid::Uuid::new_v4().to_string());
        pods.insert(key, created.clone());
        self.record_write();
        Ok(created)
    }

    async fn delete_pod(&self, namespace: &str, name: &str) -> Result<(), StoreError> {
        self.enter(MockOp::DeletePod).await?;
        lock(&self.pods).remove(&ObjectKey::new(namespace, name))
            .ok_or_else(|| StoreError::NotFound(format!("Pod {}/{}", namespace, name)))?;
        self.record_write();
        Ok(())
    }

    async fn get_service(&self, namespace: &str, name: &str) -> Result<Service, StoreError> {
        self.enter(MockOp::GetService).await?;
        let found = if self.stale() { None } else { self.service(namespace, name) };
        found.ok_or_else(|| StoreError::NotFound(format!("Service {}/{}", namespace, name)))
    }

    async fn create_service(&self, service: &Service) -> Result<Service, StoreError> {
        self.create_calls.fetch_add(1, Ordering::SeqCst);
        self.enter(MockOp::CreateService).await?;
        let key = key_of(&service.metadata, "Service")?;
        let mut services = lock(&self.services);
        if services.contains_key(&key) {
            return Err(StoreError::AlreadyExists(format!("Service {}", key)));
        }
        let mut created = service.clone();
        created.metadata.uid = Some(uuid::Uuid::new_v4().to_string());
        // The API server allocates a cluster IP on creation
        let spec = created.spec.get_or_insert_with(ServiceSpec::default);
        if spec.cluster_ip.is_none() {
            spec.cluster_ip = Some(self.next_cluster_ip());
        }
        services.insert(key, created.clone());
        self.record_write();
        Ok(created)
    }

    async fn delete_service(&self, namespace: &str, name: &str) -> Result<(), StoreError> {
        self.enter(MockOp::DeleteService).await?;
        lock(&self.services).remove(&ObjectKey::new(namespace, name))
            .ok_or_else(|| StoreError::NotFound(format!("Service {}/{}", namespace, name)))?;
        self.record_write();
        Ok(())
    }
}
