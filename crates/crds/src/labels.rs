//! Label and annotation keys stamped on every resource derived from a KubeBMC.
//!
//! The emulator image and existing deployments select on these exact keys, so
//! they are part of the resource contract rather than an implementation detail.

/// Standard label naming the tool that manages the resource
pub const MANAGED_BY_LABEL: &str = "app.kubernetes.io/managed-by";

/// Label carrying the name of the owning KubeBMC
pub const OWNER_NAME_LABEL: &str = "zespre.com/kubebmc-name";

/// Label carrying the name of the controlled virtual machine
pub const TARGET_NAME_LABEL: &str = "zespre.com/vm-name";

/// Annotation carrying the namespace of the owning KubeBMC.
///
/// Owner references have no namespace field and children live in the system
/// namespace, so the owner's namespace is recorded here.
pub const OWNER_NAMESPACE_ANNOTATION: &str = "zespre.com/kubebmc-namespace";

/// Value of [`MANAGED_BY_LABEL`] on resources created by this controller
pub const MANAGED_BY_VALUE: &str = "kbmc";

/// Suffix appended to the KubeBMC name to form the child resource name
pub const CHILD_NAME_SUFFIX: &str = "-kbmc";
