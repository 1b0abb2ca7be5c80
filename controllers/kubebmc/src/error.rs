//! Controller-specific error types.
//!
//! This module defines error types specific to the KubeBMC Controller
//! that are not covered by the backing store errors.

use cluster_store::StoreError;
use kube::Error as KubeError;
use std::time::Duration;
use thiserror::Error;

/// Errors that can occur in the KubeBMC Controller.
#[derive(Debug, Error)]
pub enum ControllerError {
    /// Kubernetes client error (client construction)
    #[error("Kubernetes error: {0}")]
    Kube(#[from] KubeError),

    /// Backing store error
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// Declaration cannot be turned into children
    #[error("Invalid KubeBMC: {0}")]
    InvalidDeclaration(String),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Reconciliation exceeded its deadline
    #[error("Reconciliation timed out after {0:?}")]
    Timeout(Duration),

    /// Resource watch failed
    #[error("Resource watch failed: {0}")]
    Watch(String),
}

impl ControllerError {
    /// Whether the key should be requeued with backoff.
    ///
    /// Malformed declarations and ownership conflicts fail identically on
    /// every attempt and are surfaced on the declaration instead.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Store(e) => e.is_transient(),
            Self::Kube(_) | Self::Timeout(_) | Self::Watch(_) => true,
            Self::InvalidDeclaration(_) | Self::InvalidConfig(_) => false,
        }
    }
}
