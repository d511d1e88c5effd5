//! Remote store abstraction
//!
//! Everything above this module talks to the shared remote container through
//! the [`RemoteStore`] trait: flat object keys, recursive listing, put,
//! conditional create, delete. One implementation ([`ObjectStoreClient`])
//! wraps the `object_store` crate and covers the in-memory store (tests),
//! a local directory (a mounted persistent volume), and Google Cloud
//! Storage. The backend is chosen once at construction time; nothing above
//! this layer branches on backend identity.

pub mod error;
pub mod types;

mod object;

pub use error::{StoreError, StoreResult};
pub use object::ObjectStoreClient;
pub use types::{
    ContainerId, ContainerInfo, DataClass, RemoteObject, RemotePrefix, StoreUsage,
    CONTAINER_MARKER,
};

use async_trait::async_trait;
use bytes::Bytes;

/// Unified interface to the shared remote container.
///
/// Implementors must be `Send + Sync`; the scheduler issues a bounded number
/// of concurrent calls against one shared instance.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Recursively list all objects under `prefix`.
    async fn list(&self, prefix: &str) -> StoreResult<Vec<RemoteObject>>;

    /// Get metadata for a single object.
    ///
    /// Returns `StoreError::NotFound` if the key does not exist.
    async fn head(&self, key: &str) -> StoreResult<RemoteObject>;

    /// Fetch the full contents of an object.
    async fn get(&self, key: &str) -> StoreResult<Bytes>;

    /// Write an object, replacing any existing one.
    async fn put(&self, key: &str, data: Bytes) -> StoreResult<()>;

    /// Write an object only if the key does not already exist.
    ///
    /// Returns `StoreError::AlreadyExists` when the conditional create loses.
    /// This is the primitive behind the writer lease.
    async fn put_if_absent(&self, key: &str, data: Bytes) -> StoreResult<()>;

    /// Delete a single object.
    async fn delete(&self, key: &str) -> StoreResult<()>;

    /// Aggregate object count and byte total under `prefix`.
    async fn usage(&self, prefix: &str) -> StoreResult<StoreUsage> {
        let objects = self.list(prefix).await?;
        Ok(StoreUsage {
            objects: objects.len() as u64,
            bytes: objects.iter().map(|o| o.size).sum(),
        })
    }

    /// Discover containers: top-level prefixes carrying the container
    /// marker, ordered by marker creation time, then name.
    async fn list_containers(&self) -> StoreResult<Vec<ContainerInfo>>;

    /// Create a container by writing its marker object.
    async fn create_container(&self, id: &ContainerId) -> StoreResult<()>;

    /// Backend identifier ("memory", "local", "gcs").
    fn store_name(&self) -> &str;
}
