//! Backing store errors

use thiserror::Error;

/// Errors that can occur when talking to the backing resource store
#[derive(Debug, Error)]
pub enum StoreError {
    /// Kubernetes API error not covered by a more specific variant
    #[error("Kubernetes API error: {0}")]
    Kube(#[from] kube::Error),

    /// Resource not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Resource with the same name already exists
    #[error("Already exists: {0}")]
    AlreadyExists(String),

    /// Object is missing metadata the store needs (name, namespace, uid)
    #[error("Invalid object: {0}")]
    InvalidObject(String),

    /// Child already has a different controlling owner
    #[error("Already owned: {0}")]
    AlreadyOwned(String),

    /// Credentials rejected or RBAC denies the call (401/403)
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// Store temporarily unavailable (throttling, connection loss)
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    /// JSON serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl StoreError {
    /// True when the object does not exist.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }

    /// True when a create collided with an existing object.
    pub fn is_already_exists(&self) -> bool {
        matches!(self, Self::AlreadyExists(_))
    }

    /// True when retrying the same call later may succeed.
    ///
    /// Malformed objects and ownership conflicts fail the same way every time.
    pub fn is_transient(&self) -> bool {
        !matches!(
            self,
            Self::InvalidObject(_) | Self::AlreadyOwned(_) | Self::Serialization(_)
        )
    }
}
