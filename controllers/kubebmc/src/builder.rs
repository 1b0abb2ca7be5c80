//! Desired-state builder.
//!
//! Pure mapping from a KubeBMC to the emulator pod and service it implies.
//! Same input, same manifests: label maps are `BTreeMap`s and nothing here
//! reads the clock, the environment or the cluster.

use crate::config::ControllerConfig;
use crds::labels::{
    CHILD_NAME_SUFFIX, MANAGED_BY_LABEL, MANAGED_BY_VALUE, OWNER_NAME_LABEL,
    OWNER_NAMESPACE_ANNOTATION, TARGET_NAME_LABEL,
};
use crds::KubeBMC;
use k8s_openapi::api::core::v1::{
    Container, ContainerPort, EnvVar, Pod, PodSpec, Service, ServicePort, ServiceSpec,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use kube::ResourceExt;
use std::collections::BTreeMap;

/// Children a KubeBMC should have.
#[derive(Debug, Clone, PartialEq)]
pub struct DesiredChildren {
    pub pod: Pod,
    pub service: Service,
}

/// Name shared by the pod and the service of a KubeBMC.
pub fn child_name(declaration_name: &str) -> String {
    format!("{}{}", declaration_name, CHILD_NAME_SUFFIX)
}

/// Builds the emulator pod and service for `declaration`.
///
/// Never fails: the CRD schema rejects declarations without VM identifiers at
/// admission, and the reconciler checks for empty values before calling this.
pub fn build(declaration: &KubeBMC, config: &ControllerConfig) -> DesiredChildren {
    DesiredChildren {
        pod: build_pod(declaration, config),
        service: build_service(declaration, config),
    }
}

/// Labels on both children: enough to map a child back to its KubeBMC
/// without the ownership index.
fn child_labels(declaration: &KubeBMC) -> BTreeMap<String, String> {
    let mut labels = selector_labels(declaration);
    labels.insert(TARGET_NAME_LABEL.to_string(), declaration.spec.vm_name.clone());
    labels
}

/// Labels the service selects pods by.
fn selector_labels(declaration: &KubeBMC) -> BTreeMap<String, String> {
    BTreeMap::from([
        (MANAGED_BY_LABEL.to_string(), MANAGED_BY_VALUE.to_string()),
        (OWNER_NAME_LABEL.to_string(), declaration.name_any()),
    ])
}

fn child_meta(declaration: &KubeBMC, config: &ControllerConfig) -> ObjectMeta {
    let mut annotations = BTreeMap::new();
    if let Some(namespace) = declaration.namespace() {
        annotations.insert(OWNER_NAMESPACE_ANNOTATION.to_string(), namespace);
    }
    ObjectMeta {
        name: Some(child_name(&declaration.name_any())),
        namespace: Some(config.system_namespace.clone()),
        labels: Some(child_labels(declaration)),
        annotations: Some(annotations),
        ..Default::default()
    }
}

fn build_pod(declaration: &KubeBMC, config: &ControllerConfig) -> Pod {
    let spec = &declaration.spec;
    // The emulator's command line is positional: flags first, then the VM
    Pod {
        metadata: child_meta(declaration, config),
        spec: Some(PodSpec {
            containers: vec![Container {
                name: config.container_name.clone(),
                image: Some(config.image.clone()),
                args: Some(vec![
                    "--address".to_string(),
                    "0.0.0.0".to_string(),
                    "--port".to_string(),
                    config.ipmi_port.to_string(),
                    spec.vm_namespace.clone(),
                    spec.vm_name.clone(),
                ]),
                env: Some(vec![
                    EnvVar {
                        name: "KBMC_USERNAME".to_string(),
                        value: Some(spec.username_or(&config.default_username).to_string()),
                        ..Default::default()
                    },
                    EnvVar {
                        name: "KBMC_PASSWORD".to_string(),
                        value: Some(spec.password_or(&config.default_password).to_string()),
                        ..Default::default()
                    },
                ]),
                ports: Some(vec![ContainerPort {
                    name: Some(config.port_name.clone()),
                    container_port: i32::from(config.ipmi_port),
                    protocol: Some("UDP".to_string()),
                    ..Default::default()
                }]),
                ..Default::default()
            }],
            service_account_name: Some(config.service_account.clone()),
            ..Default::default()
        }),
        status: None,
    }
}

fn build_service(declaration: &KubeBMC, config: &ControllerConfig) -> Service {
    Service {
        metadata: child_meta(declaration, config),
        spec: Some(ServiceSpec {
            selector: Some(selector_labels(declaration)),
            ports: Some(vec![ServicePort {
                name: Some(config.port_name.clone()),
                protocol: Some("UDP".to_string()),
                port: i32::from(config.ipmi_port),
                target_port: Some(IntOrString::String(config.port_name.clone())),
                ..Default::default()
            }]),
            ..Default::default()
        }),
        status: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::create_test_kube_bmc;

    #[test]
    fn test_example_declaration() {
        let bmc = create_test_kube_bmc("vm1-bmc", "default", "default", "vm1");
        let children = build(&bmc, &ControllerConfig::default());

        let pod = &children.pod;
        assert_eq!(pod.metadata.name.as_deref(), Some("vm1-bmc-kbmc"));
        assert_eq!(pod.metadata.namespace.as_deref(), Some("kubebmc-system"));
        let container = &pod.spec.as_ref().unwrap().containers[0];
        assert_eq!(container.name, "kbmc");
        assert_eq!(container.image.as_deref(), Some("starbops/kbmc:v0.0.1"));
        assert_eq!(
            container.args.as_deref().unwrap(),
            ["--address", "0.0.0.0", "--port", "623", "default", "vm1"]
        );
        let port = &container.ports.as_ref().unwrap()[0];
        assert_eq!(port.container_port, 623);
        assert_eq!(port.name.as_deref(), Some("ipmi"));
        assert_eq!(port.protocol.as_deref(), Some("UDP"));
        assert_eq!(
            pod.spec.as_ref().unwrap().service_account_name.as_deref(),
            Some("kubebmc-kbmc")
        );

        let service = &children.service;
        assert_eq!(service.metadata.name.as_deref(), Some("vm1-bmc-kbmc"));
        let spec = service.spec.as_ref().unwrap();
        let svc_port = &spec.ports.as_ref().unwrap()[0];
        assert_eq!(svc_port.port, 623);
        assert_eq!(svc_port.name.as_deref(), Some("ipmi"));
        assert_eq!(svc_port.protocol.as_deref(), Some("UDP"));
        assert_eq!(svc_port.target_port, Some(IntOrString::String("ipmi".to_string())));
        let selector = spec.selector.as_ref().unwrap();
        assert_eq!(selector.get(OWNER_NAME_LABEL).map(String::as_str), Some("vm1-bmc"));
        assert_eq!(selector.get(MANAGED_BY_LABEL).map(String::as_str), Some("kbmc"));
        assert!(!selector.contains_key(TARGET_NAME_LABEL));
    }

    #[test]
    fn test_labels_reverse_map_to_declaration() {
        let bmc = create_test_kube_bmc("vm1-bmc", "tenant-a", "vms", "vm1");
        let children = build(&bmc, &ControllerConfig::default());

        for meta in [&children.pod.metadata, &children.service.metadata] {
            let labels = meta.labels.as_ref().unwrap();
            assert_eq!(labels.get(MANAGED_BY_LABEL).map(String::as_str), Some("kbmc"));
            assert_eq!(labels.get(OWNER_NAME_LABEL).map(String::as_str), Some("vm1-bmc"));
            assert_eq!(labels.get(TARGET_NAME_LABEL).map(String::as_str), Some("vm1"));
            let annotations = meta.annotations.as_ref().unwrap();
            assert_eq!(
                annotations.get(OWNER_NAMESPACE_ANNOTATION).map(String::as_str),
                Some("tenant-a")
            );
        }
    }

    #[test]
    fn test_build_is_deterministic() {
        let bmc = create_test_kube_bmc("vm1-bmc", "default", "default", "vm1");
        let config = ControllerConfig::default();

        let first = build(&bmc, &config);
        let second = build(&bmc, &config);

        assert_eq!(first, second);
        assert_eq!(
            serde_json::to_vec(&first.pod).unwrap(),
            serde_json::to_vec(&second.pod).unwrap()
        );
        assert_eq!(
            serde_json::to_vec(&first.service).unwrap(),
            serde_json::to_vec(&second.service).unwrap()
        );
    }

    #[test]
    fn test_credentials_fall_back_to_configured_defaults() {
        let mut bmc = create_test_kube_bmc("vm1-bmc", "default", "default", "vm1");
        let config = ControllerConfig::default();

        let env_of = |bmc: &KubeBMC| {
            build(bmc, &config).pod.spec.unwrap().containers[0]
                .env
                .clone()
                .unwrap()
                .into_iter()
                .map(|e| (e.name, e.value.unwrap_or_default()))
                .collect::<BTreeMap<_, _>>()
        };

        let env = env_of(&bmc);
        assert_eq!(env["KBMC_USERNAME"], "admin");
        assert_eq!(env["KBMC_PASSWORD"], "password");

        bmc.spec.username = Some("operator".to_string());
        bmc.spec.password = Some("s3cret".to_string());
        let env = env_of(&bmc);
        assert_eq!(env["KBMC_USERNAME"], "operator");
        assert_eq!(env["KBMC_PASSWORD"], "s3cret");

        // Credentials never leak into the positional arguments
        let args = build(&bmc, &config).pod.spec.unwrap().containers[0].args.clone().unwrap();
        assert!(!args.iter().any(|a| a == "s3cret"));
    }

    #[test]
    fn test_children_follow_configured_namespace_and_port() {
        let bmc = create_test_kube_bmc("vm1-bmc", "default", "default", "vm1");
        let config = ControllerConfig {
            system_namespace: "bmc".to_string(),
            ipmi_port: 6230,
            ..ControllerConfig::default()
        };
        let children = build(&bmc, &config);

        assert_eq!(children.pod.metadata.namespace.as_deref(), Some("bmc"));
        assert_eq!(children.service.metadata.namespace.as_deref(), Some("bmc"));
        let args = children.pod.spec.unwrap().containers[0].args.clone().unwrap();
        assert_eq!(args[3], "6230");
    }
}
