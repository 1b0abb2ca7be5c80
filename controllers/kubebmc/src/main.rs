//! KubeBMC Controller
//!
//! Gives every KubeBMC resource a virtual BMC: an IPMI emulator pod bound to
//! the addressed virtual machine, reachable through a UDP service on port 623.
//!
//! The controller watches KubeBMC declarations and the emulator pods and
//! services it owns, and reconciles each declaration through a deduplicating
//! work queue drained by a pool of workers.

mod backoff;
mod builder;
mod config;
mod controller;
mod error;
mod indexer;
mod reconciler;
mod status;
mod watcher;
mod work_queue;
mod worker;

#[cfg(test)]
mod test_utils;
#[cfg(test)]
mod reconciler_test;

use crate::config::ControllerConfig;
use crate::error::ControllerError;
use controller::Controller;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), ControllerError> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    if rustls::crypto::ring::default_provider().install_default().is_err() {
        warn!("A rustls crypto provider was already installed");
    }

    info!("Starting KubeBMC Controller");

    let config = ControllerConfig::from_env()?;

    info!("Configuration:");
    info!("  Watch namespace: {}", config.watch_namespace.as_deref().unwrap_or("all namespaces"));
    info!("  System namespace: {}", config.system_namespace);
    info!("  Emulator image: {}", config.image);
    info!("  Workers: {}", config.workers);
    info!("  Cascade: {:?}", config.cascade);

    // Initialize and run controller
    let controller = Controller::new(Arc::new(config)).await?;
    controller.run().await?;

    Ok(())
}
