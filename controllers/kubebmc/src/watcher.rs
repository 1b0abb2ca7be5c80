//! Kubernetes resource watchers.
//!
//! This module watches KubeBMC declarations and the pods and services the
//! controller creates, and turns every event into a declaration key on the
//! work queue. Child events go through the ownership index; watchers never
//! reconcile anything themselves.

use crate::error::ControllerError;
use crate::indexer::{resolve_owner, ChildKind, OwnershipIndex};
use crate::work_queue::WorkQueue;
use cluster_store::ObjectKey;
use crds::labels::{MANAGED_BY_LABEL, MANAGED_BY_VALUE};
use crds::KubeBMC;
use futures::StreamExt;
use k8s_openapi::api::core::v1::{Pod, Service};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::{Api, Resource};
use kube_runtime::{watcher, WatchStreamExt};
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::fmt::Debug;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, info, warn};

/// Translates watch events into queue keys and index updates.
///
/// The dispatcher is the only writer of the ownership index.
pub struct EventDispatcher {
    index: Arc<OwnershipIndex>,
    queue: WorkQueue<ObjectKey>,
    /// Children seen since the last `Init` of each kind's relist
    relists: Mutex<HashMap<ChildKind, Vec<ObjectMeta>>>,
}

impl EventDispatcher {
    pub fn new(index: Arc<OwnershipIndex>, queue: WorkQueue<ObjectKey>) -> Self {
        Self {
            index,
            queue,
            relists: Mutex::new(HashMap::new()),
        }
    }

    fn enqueue(&self, key: ObjectKey, cause: &str) {
        debug!("Enqueue KubeBMC {} ({})", key, cause);
        self.queue.add(key);
    }

    /// Handles a KubeBMC event. Every event, deletion included, enqueues the
    /// declaration; the reconciler works out what it means.
    pub fn on_declaration_event(&self, event: watcher::Event<KubeBMC>) {
        match event {
            watcher::Event::Apply(bmc) | watcher::Event::InitApply(bmc) | watcher::Event::Delete(bmc) => {
                match ObjectKey::from_meta(bmc.meta()) {
                    Some(key) => self.enqueue(key, "KubeBMC event"),
                    None => warn!("Ignoring KubeBMC event without name or namespace"),
                }
            }
            watcher::Event::Init => info!("KubeBMC watcher (re)listing"),
            watcher::Event::InitDone => info!("KubeBMC watcher initialization complete"),
        }
    }

    /// Handles a pod or service event.
    pub fn on_child_event<K>(&self, kind: ChildKind, event: watcher::Event<K>)
    where
        K: Resource,
    {
        match event {
            watcher::Event::Apply(child) => {
                if let Some(owner) = self.index.upsert(kind, child.meta()) {
                    self.enqueue(owner, "child changed");
                }
            }
            watcher::Event::Delete(child) => {
                let meta = child.meta();
                let indexed = ObjectKey::from_meta(meta).and_then(|key| self.index.remove(kind, &key));
                // Deleted before it was ever indexed: fall back to its own metadata
                if let Some(owner) = indexed.or_else(|| resolve_owner(meta)) {
                    self.enqueue(owner, "child deleted");
                }
            }
            watcher::Event::Init => {
                debug!("{} watcher (re)listing", kind);
                self.relist_buffer().insert(kind, Vec::new());
            }
            watcher::Event::InitApply(child) => {
                // Indexed before the owner is queued so a worker sees the child
                if let Some(owner) = self.index.upsert(kind, child.meta()) {
                    self.enqueue(owner, "child listed");
                }
                self.relist_buffer().entry(kind).or_default().push(child.meta().clone());
            }
            watcher::Event::InitDone => {
                let listed = self.relist_buffer().remove(&kind).unwrap_or_default();
                for owner in self.index.replace_kind(kind, &listed) {
                    self.enqueue(owner, "child vanished during relist");
                }
                info!("{} watcher initialization complete ({} listed)", kind, listed.len());
            }
        }
    }

    fn relist_buffer(&self) -> std::sync::MutexGuard<'_, HashMap<ChildKind, Vec<ObjectMeta>>> {
        self.relists.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Watches Kubernetes resources for changes.
pub struct Watcher {
    dispatcher: Arc<EventDispatcher>,
    kube_bmc_api: Api<KubeBMC>,
    pod_api: Api<Pod>,
    service_api: Api<Service>,
}

impl Watcher {
    /// Creates a new watcher instance.
    pub fn new(
        dispatcher: Arc<EventDispatcher>,
        kube_bmc_api: Api<KubeBMC>,
        pod_api: Api<Pod>,
        service_api: Api<Service>,
    ) -> Self {
        Self {
            dispatcher,
            kube_bmc_api,
            pod_api,
            service_api,
        }
    }

    /// Starts watching KubeBMC resources.
    pub async fn watch_kube_bmcs(&self) -> Result<(), ControllerError> {
        info!("Starting KubeBMC watcher");

        let mut stream = Box::pin(
            watcher(self.kube_bmc_api.clone(), watcher::Config::default()).default_backoff(),
        );
        while let Some(event) = stream.next().await {
            match event {
                Ok(event) => self.dispatcher.on_declaration_event(event),
                Err(e) => warn!("KubeBMC watch error (retrying): {}", e),
            }
        }

        Err(ControllerError::Watch("KubeBMC watch stream ended".to_string()))
    }

    /// Starts watching emulator pods.
    pub async fn watch_pods(&self) -> Result<(), ControllerError> {
        self.watch_children(self.pod_api.clone(), ChildKind::Pod).await
    }

    /// Starts watching emulator services.
    pub async fn watch_services(&self) -> Result<(), ControllerError> {
        self.watch_children(self.service_api.clone(), ChildKind::Service).await
    }

    async fn watch_children<K>(&self, api: Api<K>, kind: ChildKind) -> Result<(), ControllerError>
    where
        K: Resource + Clone + Debug + DeserializeOwned + Send + 'static,
    {
        info!("Starting {} watcher", kind);

        let selector = format!("{}={}", MANAGED_BY_LABEL, MANAGED_BY_VALUE);
        let config = watcher::Config::default().labels(&selector);
        let mut stream = Box::pin(watcher(api, config).default_backoff());
        while let Some(event) = stream.next().await {
            match event {
                Ok(event) => self.dispatcher.on_child_event(kind, event),
                Err(e) => warn!("{} watch error (retrying): {}", kind, e),
            }
        }

        Err(ControllerError::Watch(format!("{} watch stream ended", kind)))
    }
}
