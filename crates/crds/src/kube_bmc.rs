//! KubeBMC CRD
//!
//! Declares a virtual BMC endpoint for one virtual machine. The controller
//! turns each declaration into an IPMI emulator pod plus a UDP service in the
//! system namespace.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[kube(
    group = "virtualmachine.zespre.com",
    version = "v1",
    kind = "KubeBMC",
    plural = "kubebmcs",
    shortname = "kbmc",
    namespaced,
    status = "KubeBMCStatus",
    printcolumn = r#"{"name":"VM-Namespace","type":"string","jsonPath":".spec.vmNamespace"}"#,
    printcolumn = r#"{"name":"VM-Name","type":"string","jsonPath":".spec.vmName"}"#,
    printcolumn = r#"{"name":"Service-IP","type":"string","jsonPath":".status.serviceIP"}"#,
    printcolumn = r#"{"name":"Ready","type":"boolean","jsonPath":".status.ready"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct KubeBMCSpec {
    /// IPMI user name (defaults to the controller-wide credential)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,

    /// IPMI password (defaults to the controller-wide credential)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,

    /// Namespace of the virtual machine
    pub vm_namespace: String,

    /// Name of the virtual machine this BMC controls
    pub vm_name: String,
}

impl KubeBMCSpec {
    /// Returns the user name, falling back to `default` when unset or empty.
    pub fn username_or<'a>(&'a self, default: &'a str) -> &'a str {
        non_empty(self.username.as_deref()).unwrap_or(default)
    }

    /// Returns the password, falling back to `default` when unset or empty.
    pub fn password_or<'a>(&'a self, default: &'a str) -> &'a str {
        non_empty(self.password.as_deref()).unwrap_or(default)
    }
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.filter(|v| !v.is_empty())
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct KubeBMCStatus {
    /// Cluster address of the IPMI service, empty until assigned
    #[serde(rename = "serviceIP", default)]
    pub service_ip: String,

    /// Whether both the emulator pod and its service are live
    #[serde(default)]
    pub ready: bool,

    /// Last reconciliation failure, cleared on success
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}
