//! Controller configuration.
//!
//! Everything the builder and the control loop treat as a constant lives in
//! one immutable `ControllerConfig`, loaded once at start-up from environment
//! variables and shared as `Arc<ControllerConfig>`.

use crate::error::ControllerError;
use std::env;
use std::str::FromStr;
use std::time::Duration;

/// How children are removed once their KubeBMC is gone.
///
/// The garbage collector only follows owner references within a namespace, so
/// children of a KubeBMC outside the system namespace are always deleted by
/// the controller, whatever the mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CascadeMode {
    /// Rely on the API server garbage collector where owner references apply
    #[default]
    OwnerReferences,
    /// Delete every indexed child when reconciling a missing KubeBMC
    Explicit,
}

impl FromStr for CascadeMode {
    type Err = ControllerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "owner-references" => Ok(Self::OwnerReferences),
            "explicit" => Ok(Self::Explicit),
            other => Err(ControllerError::InvalidConfig(format!(
                "unknown cascade mode '{}' (expected 'owner-references' or 'explicit')",
                other
            ))),
        }
    }
}

/// Immutable controller configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControllerConfig {
    /// Namespace to watch for KubeBMCs (`None` = all namespaces)
    pub watch_namespace: Option<String>,
    /// Namespace the emulator pods and services are created in
    pub system_namespace: String,
    /// Emulator image reference
    pub image: String,
    pub container_name: String,
    pub service_account: String,
    /// IPMI port, used for the container, the service and the `--port` argument
    pub ipmi_port: u16,
    pub port_name: String,
    pub default_username: String,
    pub default_password: String,
    /// Concurrent reconciliation workers
    pub workers: usize,
    /// Upper bound on a single reconciliation
    pub reconcile_timeout: Duration,
    pub backoff_base: Duration,
    pub backoff_max: Duration,
    pub cascade: CascadeMode,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            watch_namespace: None,
            system_namespace: "kubebmc-system".to_string(),
            image: "starbops/kbmc:v0.0.1".to_string(),
            container_name: "kbmc".to_string(),
            service_account: "kubebmc-kbmc".to_string(),
            ipmi_port: 623,
            port_name: "ipmi".to_string(),
            default_username: "admin".to_string(),
            default_password: "password".to_string(),
            workers: 2,
            reconcile_timeout: Duration::from_secs(30),
            backoff_base: Duration::from_millis(1000),
            backoff_max: Duration::from_secs(300),
            cascade: CascadeMode::OwnerReferences,
        }
    }
}

impl ControllerConfig {
    /// True when a KubeBMC in `owner_namespace` can be the controller owner
    /// of its children. A cross-namespace owner is treated as absent by the
    /// garbage collector, which would delete the child.
    pub fn owner_references_apply(&self, owner_namespace: &str) -> bool {
        owner_namespace == self.system_namespace
    }

    /// True when the controller itself deletes the children of a removed
    /// KubeBMC in `owner_namespace`.
    pub fn cleans_up_explicitly(&self, owner_namespace: &str) -> bool {
        self.cascade == CascadeMode::Explicit || !self.owner_references_apply(owner_namespace)
    }

    /// Loads configuration from the process environment.
    pub fn from_env() -> Result<Self, ControllerError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Loads configuration through `lookup`, falling back to defaults for
    /// unset variables.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ControllerError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let string = |key: &str, default: String| lookup(key).unwrap_or(default);

        let workers = parse(&lookup, "KUBEBMC_WORKERS", defaults.workers)?;
        if workers == 0 {
            return Err(ControllerError::InvalidConfig(
                "KUBEBMC_WORKERS must be at least 1".to_string(),
            ));
        }
        let backoff_base = Duration::from_millis(parse(
            &lookup,
            "KUBEBMC_BACKOFF_BASE_MS",
            u64::try_from(defaults.backoff_base.as_millis()).unwrap_or(u64::MAX),
        )?);
        let backoff_max = Duration::from_secs(parse(
            &lookup,
            "KUBEBMC_BACKOFF_MAX_SECS",
            defaults.backoff_max.as_secs(),
        )?);
        if backoff_base > backoff_max {
            return Err(ControllerError::InvalidConfig(format!(
                "backoff base {:?} exceeds backoff max {:?}",
                backoff_base, backoff_max
            )));
        }

        Ok(Self {
            watch_namespace: lookup("WATCH_NAMESPACE").filter(|ns| !ns.is_empty()),
            system_namespace: string("KUBEBMC_SYSTEM_NAMESPACE", defaults.system_namespace),
            image: string("KUBEBMC_IMAGE", defaults.image),
            container_name: defaults.container_name,
            service_account: string("KUBEBMC_SERVICE_ACCOUNT", defaults.service_account),
            ipmi_port: defaults.ipmi_port,
            port_name: defaults.port_name,
            default_username: string("KUBEBMC_DEFAULT_USERNAME", defaults.default_username),
            default_password: string("KUBEBMC_DEFAULT_PASSWORD", defaults.default_password),
            workers,
            reconcile_timeout: Duration::from_secs(parse(
                &lookup,
                "KUBEBMC_RECONCILE_TIMEOUT_SECS",
                defaults.reconcile_timeout.as_secs(),
            )?),
            backoff_base,
            backoff_max,
            cascade: match lookup("KUBEBMC_CASCADE") {
                Some(mode) => mode.parse()?,
                None => defaults.cascade,
            },
        })
    }
}

fn parse<F, T>(lookup: &F, key: &str, default: T) -> Result<T, ControllerError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(key) {
        Some(raw) => raw.trim().parse().map_err(|e| {
            ControllerError::InvalidConfig(format!("{}='{}': {}", key, raw, e))
        }),
        None => Ok(default),
    }
}
