//! Main controller implementation.
//!
//! This module contains the `Controller` struct that wires the watchers, the
//! work queue and the worker pool together and owns their tasks.

use crate::backoff::ExponentialBackoff;
use crate::config::ControllerConfig;
use crate::error::ControllerError;
use crate::indexer::OwnershipIndex;
use crate::reconciler::Reconciler;
use crate::watcher::{EventDispatcher, Watcher};
use crate::work_queue::WorkQueue;
use crate::worker::run_worker;
use cluster_store::{KubeResourceStore, ObjectKey};
use crds::KubeBMC;
use k8s_openapi::api::core::v1::{Pod, Service};
use kube::{Api, Client};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// Main controller for KubeBMC resources.
pub struct Controller {
    kube_bmc_watcher: JoinHandle<Result<(), ControllerError>>,
    pod_watcher: JoinHandle<Result<(), ControllerError>>,
    service_watcher: JoinHandle<Result<(), ControllerError>>,
    workers: Vec<JoinHandle<()>>,
    queue: WorkQueue<ObjectKey>,
    cancel: CancellationToken,
}

impl Controller {
    /// Creates a new controller instance and starts its tasks.
    pub async fn new(config: Arc<ControllerConfig>) -> Result<Self, ControllerError> {
        info!("Initializing KubeBMC Controller");

        let client = Client::try_default().await?;

        let kube_bmc_api: Api<KubeBMC> = match config.watch_namespace.as_deref() {
            Some(ns) => Api::namespaced(client.clone(), ns),
            None => Api::all(client.clone()),
        };
        let pod_api: Api<Pod> = Api::namespaced(client.clone(), &config.system_namespace);
        let service_api: Api<Service> = Api::namespaced(client.clone(), &config.system_namespace);

        let index = Arc::new(OwnershipIndex::new());
        let queue = WorkQueue::new(ExponentialBackoff::new(config.backoff_base, config.backoff_max));
        let reconciler = Arc::new(Reconciler::new(
            KubeResourceStore::new(client),
            Arc::clone(&config),
            Arc::clone(&index),
        ));

        let dispatcher = Arc::new(EventDispatcher::new(index, queue.clone()));
        let watcher_instance = Arc::new(Watcher::new(dispatcher, kube_bmc_api, pod_api, service_api));

        let kube_bmc_watcher = {
            let watcher = Arc::clone(&watcher_instance);
            tokio::spawn(async move { watcher.watch_kube_bmcs().await })
        };

        let pod_watcher = {
            let watcher = Arc::clone(&watcher_instance);
            tokio::spawn(async move { watcher.watch_pods().await })
        };

        let service_watcher = {
            let watcher = watcher_instance;
            tokio::spawn(async move { watcher.watch_services().await })
        };

        let cancel = CancellationToken::new();
        let workers = (0..config.workers)
            .map(|id| {
                tokio::spawn(run_worker(
                    id,
                    queue.clone(),
                    Arc::clone(&reconciler),
                    config.reconcile_timeout,
                    cancel.clone(),
                ))
            })
            .collect();
        info!("Started {} reconciliation workers", config.workers);

        Ok(Self {
            kube_bmc_watcher,
            pod_watcher,
            service_watcher,
            workers,
            queue,
            cancel,
        })
    }

    /// Runs the controller until shutdown.
    ///
    /// Returns when ctrl-c is received or a watcher exits; in both cases the
    /// workers are cancelled and awaited before returning.
    pub async fn run(mut self) -> Result<(), ControllerError> {
        info!("KubeBMC Controller running");

        let result = tokio::select! {
            signal = tokio::signal::ctrl_c() => {
                match signal {
                    Ok(()) => info!("Shutdown signal received"),
                    Err(e) => error!("Failed to listen for shutdown signal: {}", e),
                }
                Ok(())
            }
            result = &mut self.kube_bmc_watcher => watcher_exit("KubeBMC", result),
            result = &mut self.pod_watcher => watcher_exit("Pod", result),
            result = &mut self.service_watcher => watcher_exit("Service", result),
        };

        self.shutdown().await;
        result
    }

    async fn shutdown(self) {
        self.cancel.cancel();
        self.queue.shutdown();
        self.kube_bmc_watcher.abort();
        self.pod_watcher.abort();
        self.service_watcher.abort();

        for worker in self.workers {
            if let Err(e) = worker.await {
                error!("Worker task failed: {}", e);
            }
        }
        info!("KubeBMC Controller stopped");
    }
}

fn watcher_exit(
    resource: &str,
    result: Result<Result<(), ControllerError>, tokio::task::JoinError>,
) -> Result<(), ControllerError> {
    let result = result
        .map_err(|e| ControllerError::Watch(format!("{} watcher panicked: {}", resource, e)))
        .and_then(|inner| inner);
    if let Err(e) = &result {
        error!("{} watcher exited: {}", resource, e);
    }
    result
}
