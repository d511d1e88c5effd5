//! `object_store`-backed implementation of [`RemoteStore`]
//!
//! One client type covers every supported backend:
//! - in-memory (tests and dry runs)
//! - local directory (remote container on a mounted persistent volume)
//! - Google Cloud Storage (service-account key file or OAuth bearer token)

use super::error::{StoreError, StoreResult};
use super::types::{ContainerId, ContainerInfo, RemoteObject, CONTAINER_MARKER};
use super::RemoteStore;
use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use object_store::gcp::{GcpCredential, GoogleCloudStorageBuilder};
use object_store::local::LocalFileSystem;
use object_store::memory::InMemory;
use object_store::path::Path as ObjectPath;
use object_store::{ObjectMeta, ObjectStore, PutMode, PutOptions, StaticCredentialProvider};
use std::path::Path;
use std::sync::Arc;

/// Remote store client wrapping an `object_store` backend.
pub struct ObjectStoreClient {
    store: Arc<dyn ObjectStore>,
    name: &'static str,
}

impl ObjectStoreClient {
    /// In-memory store. Contents vanish with the process.
    pub fn memory() -> Self {
        Self {
            store: Arc::new(InMemory::new()),
            name: "memory",
        }
    }

    /// Store rooted at a local directory, typically a mounted persistent
    /// volume shared across nodes.
    pub fn local_dir(root: &Path) -> StoreResult<Self> {
        std::fs::create_dir_all(root)?;
        let store = LocalFileSystem::new_with_prefix(root).map_err(|e| {
            StoreError::InvalidConfig {
                store: "local".to_string(),
                message: format!("failed to open store root {}: {}", root.display(), e),
            }
        })?;
        Ok(Self {
            store: Arc::new(store),
            name: "local",
        })
    }

    /// Google Cloud Storage authenticated with a service-account key file.
    pub fn gcs_with_service_account(bucket: &str, key_path: &Path) -> StoreResult<Self> {
        let store = GoogleCloudStorageBuilder::new()
            .with_bucket_name(bucket)
            .with_service_account_path(key_path.to_string_lossy().as_ref())
            .build()
            .map_err(|e| StoreError::InvalidConfig {
                store: "gcs".to_string(),
                message: format!("failed to create GCS client: {}", e),
            })?;
        Ok(Self {
            store: Arc::new(store),
            name: "gcs",
        })
    }

    /// Google Cloud Storage authenticated with a pre-issued OAuth bearer
    /// token.
    pub fn gcs_with_bearer_token(bucket: &str, token: &str) -> StoreResult<Self> {
        let credentials = StaticCredentialProvider::new(GcpCredential {
            bearer: token.to_string(),
        });
        let store = GoogleCloudStorageBuilder::new()
            .with_bucket_name(bucket)
            .with_credentials(Arc::new(credentials))
            .build()
            .map_err(|e| StoreError::InvalidConfig {
                store: "gcs".to_string(),
                message: format!("failed to create GCS client: {}", e),
            })?;
        Ok(Self {
            store: Arc::new(store),
            name: "gcs",
        })
    }

    fn convert_meta(meta: &ObjectMeta) -> RemoteObject {
        RemoteObject {
            key: meta.location.to_string(),
            size: meta.size as u64,
            last_modified: Some(meta.last_modified),
        }
    }

    /// Map `object_store` errors onto the store taxonomy. Cloud backends
    /// surface permission and quota failures as generic errors with an HTTP
    /// status in the message, so those are matched by text.
    fn map_err(&self, key: &str, err: object_store::Error) -> StoreError {
        match err {
            object_store::Error::NotFound { .. } => StoreError::NotFound {
                key: key.to_string(),
                store: self.name.to_string(),
            },
            object_store::Error::AlreadyExists { .. } => StoreError::AlreadyExists {
                key: key.to_string(),
            },
            other => {
                let message = other.to_string();
                if message.contains("403")
                    || message.contains("Forbidden")
                    || message.contains("quota")
                    || message.contains("Quota")
                {
                    StoreError::AccessDenied {
                        key: key.to_string(),
                        message,
                    }
                } else if message.contains("timed out")
                    || message.contains("connection")
                    || message.contains("dns")
                {
                    StoreError::Network {
                        message,
                        source: Some(Box::new(other)),
                    }
                } else {
                    StoreError::Other {
                        store: self.name.to_string(),
                        message,
                    }
                }
            }
        }
    }
}

#[async_trait]
impl RemoteStore for ObjectStoreClient {
    async fn list(&self, prefix: &str) -> StoreResult<Vec<RemoteObject>> {
        let path = ObjectPath::from(prefix);
        let mut stream = self.store.list(Some(&path));
        let mut objects = Vec::new();
        while let Some(item) = stream.next().await {
            let meta = item.map_err(|e| self.map_err(prefix, e))?;
            objects.push(Self::convert_meta(&meta));
        }
        Ok(objects)
    }

    async fn head(&self, key: &str) -> StoreResult<RemoteObject> {
        let path = ObjectPath::from(key);
        let meta = self
            .store
            .head(&path)
            .await
            .map_err(|e| self.map_err(key, e))?;
        Ok(Self::convert_meta(&meta))
    }

    async fn get(&self, key: &str) -> StoreResult<Bytes> {
        let path = ObjectPath::from(key);
        let result = self
            .store
            .get(&path)
            .await
            .map_err(|e| self.map_err(key, e))?;
        result.bytes().await.map_err(|e| self.map_err(key, e))
    }

    async fn put(&self, key: &str, data: Bytes) -> StoreResult<()> {
        let path = ObjectPath::from(key);
        self.store
            .put(&path, data.into())
            .await
            .map_err(|e| self.map_err(key, e))?;
        Ok(())
    }

    async fn put_if_absent(&self, key: &str, data: Bytes) -> StoreResult<()> {
        let path = ObjectPath::from(key);
        let options = PutOptions {
            mode: PutMode::Create,
            ..Default::default()
        };
        self.store
            .put_opts(&path, data.into(), options)
            .await
            .map_err(|e| self.map_err(key, e))?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> StoreResult<()> {
        let path = ObjectPath::from(key);
        self.store
            .delete(&path)
            .await
            .map_err(|e| self.map_err(key, e))?;
        Ok(())
    }

    async fn list_containers(&self) -> StoreResult<Vec<ContainerInfo>> {
        let listing = self
            .store
            .list_with_delimiter(None)
            .await
            .map_err(|e| self.map_err("/", e))?;

        let mut containers = Vec::new();
        for prefix in listing.common_prefixes {
            let id = ContainerId::new(prefix.to_string());
            let marker_key = format!("{}/{}", id.as_str(), CONTAINER_MARKER);
            match self.head(&marker_key).await {
                Ok(marker) => containers.push(ContainerInfo {
                    id,
                    created: marker.last_modified,
                }),
                Err(e) if e.is_not_found() => {
                    // Unmarked top-level prefix: not a sync container.
                }
                Err(e) => return Err(e),
            }
        }

        containers.sort_by(|a, b| {
            a.created
                .cmp(&b.created)
                .then_with(|| a.id.as_str().cmp(b.id.as_str()))
        });
        Ok(containers)
    }

    async fn create_container(&self, id: &ContainerId) -> StoreResult<()> {
        let marker_key = format!("{}/{}", id.as_str(), CONTAINER_MARKER);
        match self.put_if_absent(&marker_key, Bytes::new()).await {
            Ok(()) => Ok(()),
            Err(e) if e.is_already_exists() => Ok(()),
            Err(e) => Err(e),
        }
    }

    fn store_name(&self) -> &str {
        self.name
    }
}
