//! Backing Resource Store
//!
//! The narrow slice of the Kubernetes API the KubeBMC controller depends on:
//! fetching declarations, creating and deleting the pods and services derived
//! from them, writing declaration status, and linking children to their owner.
//!
//! # Example
//!
//! ```no_run
//! use cluster_store::{KubeResourceStore, ResourceStore};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let client = kube::Client::try_default().await?;
//! let store = KubeResourceStore::new(client);
//!
//! match store.get_kube_bmc("default", "vm1-bmc").await {
//!     Ok(bmc) => println!("target: {}", bmc.spec.vm_name),
//!     Err(e) if e.is_not_found() => println!("gone"),
//!     Err(e) => return Err(e.into()),
//! }
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod error;
pub mod key;
pub mod owner;
pub mod patch;
#[path = "trait.rs"]
pub mod store_trait;
#[cfg(feature = "test-util")]
pub mod mock;

pub use client::KubeResourceStore;
pub use error::StoreError;
pub use key::ObjectKey;
pub use owner::{controller_owner_of, set_controller_owner};
pub use patch::status_patch;
pub use store_trait::ResourceStore;
#[cfg(feature = "test-util")]
pub use mock::{MockOp, MockResourceStore};
