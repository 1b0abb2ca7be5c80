//! Kubernetes API backed store

use crate::error::StoreError;
use crate::patch::status_patch;
use crate::store_trait::ResourceStore;
use async_trait::async_trait;
use crds::{KubeBMC, KubeBMCStatus};
use k8s_openapi::api::core::v1::{Pod, Service};
use kube::api::{Api, DeleteParams, Patch, PatchParams, PostParams};
use kube::Client;
use tracing::debug;

/// Resource store talking to the Kubernetes API server.
///
/// Cloning is cheap: `kube::Client` shares its connection pool.
#[derive(Clone)]
pub struct KubeResourceStore {
    client: Client,
}

impl KubeResourceStore {
    /// Create a new store from a connected client
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

/// Maps an API error onto the store taxonomy.
///
/// 409 only means "already exists" for creates, so callers that create pass
/// `on_create = true`. A 400 or 422 rejects the object itself and is never
/// retried.
fn map_api_error(err: kube::Error, what: String, on_create: bool) -> StoreError {
    let code = match &err {
        kube::Error::Api(response) => Some(response.code),
        _ => None,
    };
    match code {
        Some(404) => StoreError::NotFound(what),
        Some(409) if on_create => StoreError::AlreadyExists(what),
        Some(400) | Some(422) => StoreError::InvalidObject(format!("{}: {}", what, err)),
        Some(401) | Some(403) => StoreError::Unauthorized(format!("{}: {}", what, err)),
        Some(429) => StoreError::Unavailable(format!("{}: throttled: {}", what, err)),
        Some(code) if code >= 500 => StoreError::Unavailable(format!("{}: {}", what, err)),
        _ => StoreError::Kube(err),
    }
}

fn target_of(meta: &k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta, kind: &str) -> Result<(String, String), StoreError> {
    let namespace = meta.namespace.clone()
        .ok_or_else(|| StoreError::InvalidObject(format!("{} has no namespace", kind)))?;
    let name = meta.name.clone()
        .ok_or_else(|| StoreError::InvalidObject(format!("{} in {} has no name", kind, namespace)))?;
    Ok((namespace, name))
}

#[async_trait]
impl ResourceStore for KubeResourceStore {
    async fn get_kube_bmc(&self, namespace: &str, name: &str) -> Result<KubeBMC, StoreError> {
        let api: Api<KubeBMC> = Api::namespaced(self.client.clone(), namespace);
        api.get(name).await
            .map_err(|e| map_api_error(e, format!("KubeBMC {}/{}", namespace, name), false))
    }

    async fn patch_kube_bmc_status(&self, namespace: &str, name: &str, status: &KubeBMCStatus) -> Result<(), StoreError> {
        let api: Api<KubeBMC> = Api::namespaced(self.client.clone(), namespace);
        let patch = status_patch(status);
        api.patch_status(name, &PatchParams::default(), &Patch::Merge(&patch))
            .await
            .map_err(|e| map_api_error(e, format!("KubeBMC {}/{} status", namespace, name), false))?;
        debug!("Patched KubeBMC {}/{} status", namespace, name);
        Ok(())
    }

    async fn get_pod(&self, namespace: &str, name: &str) -> Result<Pod, StoreError> {
        let api: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        api.get(name).await
            .map_err(|e| map_api_error(e, format!("Pod {}/{}", namespace, name), false))
    }

    async fn create_pod(&self, pod: &Pod) -> Result<Pod, StoreError> {
        let (namespace, name) = target_of(&pod.metadata, "Pod")?;
        let api: Api<Pod> = Api::namespaced(self.client.clone(), &namespace);
        api.create(&PostParams::default(), pod).await
            .map_err(|e| map_api_error(e, format!("Pod {}/{}", namespace, name), true))
    }

    async fn delete_pod(&self, namespace: &str, name: &str) -> Result<(), StoreError> {
        let api: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        api.delete(name, &DeleteParams::background()).await
            .map(|_| ())
            .map_err(|e| map_api_error(e, format!("Pod {}/{}", namespace, name), false))
    }

    async fn get_service(&self, namespace: &str, name: &str) -> Result<Service, StoreError> {
        let api: Api<Service> = Api::namespaced(self.client.clone(), namespace);
        api.get(name).await
            .map_err(|e| map_api_error(e, format!("Service {}/{}", namespace, name), false))
    }

    async fn create_service(&self, service: &Service) -> Result<Service, StoreError> {
        let (namespace, name) = target_of(&service.metadata, "Service")?;
        let api: Api<Service> = Api::namespaced(self.client.clone(), &namespace);
        api.create(&PostParams::default(), service).await
            .map_err(|e| map_api_error(e, format!("Service {}/{}", namespace, name), true))
    }

    async fn delete_service(&self, namespace: &str, name: &str) -> Result<(), StoreError> {
        let api: Api<Service> = Api::namespaced(self.client.clone(), namespace);
        api.delete(name, &DeleteParams::background()).await
            .map(|_| ())
            .map_err(|e| map_api_error(e, format!("Service {}/{}", namespace, name), false))
    }
}
