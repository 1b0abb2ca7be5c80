//! Status projection.
//!
//! Derives a KubeBMC's status from the children observed in the cluster.

use crds::KubeBMCStatus;
use k8s_openapi::api::core::v1::{Pod, Service};

/// A child counts as live when it exists and is not being deleted.
fn is_live(meta: &k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta) -> bool {
    meta.deletion_timestamp.is_none()
}

/// Cluster IP of `service`, or `None` while unassigned or headless.
pub fn service_ip(service: &Service) -> Option<&str> {
    service
        .spec
        .as_ref()
        .and_then(|spec| spec.cluster_ip.as_deref())
        .filter(|ip| !ip.is_empty() && *ip != "None")
}

/// Projects the observed children into a status.
///
/// `ready` requires both children live. `serviceIP` is reported whenever the
/// service has one, even if the pod is missing.
pub fn project_status(pod: Option<&Pod>, service: Option<&Service>) -> KubeBMCStatus {
    let pod_live = pod.is_some_and(|pod| is_live(&pod.metadata));
    let service_live = service.is_some_and(|service| is_live(&service.metadata));

    KubeBMCStatus {
        service_ip: service
            .and_then(service_ip)
            .map(str::to_string)
            .unwrap_or_default(),
        ready: pod_live && service_live,
        error: None,
    }
}

/// Status after a failed reconciliation: keeps what was last observed and
/// records the failure.
pub fn failure_status(previous: Option<&KubeBMCStatus>, error: &str) -> KubeBMCStatus {
    KubeBMCStatus {
        error: Some(error.to_string()),
        ..previous.cloned().unwrap_or_default()
    }
}
