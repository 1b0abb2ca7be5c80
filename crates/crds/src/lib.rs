//! KubeBMC CRD Definitions
//!
//! Kubernetes Custom Resource Definition for the KubeBMC controller, plus the
//! label and annotation keys stamped on the resources it derives.

pub mod kube_bmc;
pub mod labels;

pub use kube_bmc::*;
