//! Configuration resolution and self-repair
//!
//! Produces a `SyncConfig` whose container ID is known writable, or fails
//! with a [`ConfigError`]. The container field is always rendered back to
//! the empty sentinel before discovery runs, so a stale non-empty value can
//! never be silently preserved; whatever survives resolution has passed a
//! writability probe in this invocation.

use crate::config::{CredentialMaterial, RemoteBackend, StateLayout, SyncConfig};
use crate::error::Result;
use crate::store::{ContainerId, RemoteStore, StoreError};
use rand::Rng;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Resolution failure taxonomy.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// No credential material present. Fatal for the whole subsystem;
    /// nothing retries this.
    #[error("no credential material present")]
    NoCredentials,

    /// Discovery returned zero writable containers for this credential.
    #[error("no writable container available for this credential")]
    NoContainerAvailable,

    /// The resolved container failed its writability probe.
    #[error("writability probe failed for container {container}: {message}")]
    ProbeFailed { container: String, message: String },

    /// Backend failure during resolution.
    #[error("store error during resolution: {0}")]
    Store(#[from] StoreError),
}

/// Upper bound on re-resolution backoff.
const MAX_BACKOFF_SECS: u64 = 900;

/// Backoff before re-resolution attempt `attempt` (1-based): exponential
/// from 5s, capped, with jitter so a fleet of watchdogs does not thunder.
pub fn reresolve_backoff(attempt: u32) -> Duration {
    let base = 5u64.saturating_mul(2u64.saturating_pow(attempt.saturating_sub(1).min(16)));
    let capped = base.min(MAX_BACKOFF_SECS);
    let jitter_ms = rand::rng().random_range(0..=capped * 250);
    Duration::from_secs(capped) + Duration::from_millis(jitter_ms)
}

/// Resolves and persists a known-writable `SyncConfig`.
pub struct ConfigResolver {
    layout: StateLayout,
}

impl ConfigResolver {
    pub fn new(layout: StateLayout) -> Self {
        Self { layout }
    }

    /// Select credential material: service-account key if present, else
    /// OAuth token, else fail. Backends without credentials (memory, local
    /// volume) resolve to `None` material.
    pub fn detect_credentials(
        remote_backend: &RemoteBackend,
        service_account_key: Option<&std::path::Path>,
        oauth_token_file: Option<&std::path::Path>,
    ) -> std::result::Result<CredentialMaterial, ConfigError> {
        match remote_backend {
            RemoteBackend::Memory | RemoteBackend::Local { .. } => Ok(CredentialMaterial::None),
            RemoteBackend::Gcs { .. } => {
                if let Some(key_path) = service_account_key {
                    if key_path.exists() {
                        return Ok(CredentialMaterial::ServiceAccountKey(key_path.to_path_buf()));
                    }
                }
                if let Some(token_path) = oauth_token_file {
                    if token_path.exists() {
                        let token = read_bearer_token(token_path)?;
                        return Ok(CredentialMaterial::OAuthToken(token));
                    }
                }
                Err(ConfigError::NoCredentials)
            }
        }
    }

    /// Run one full resolution pass against an already-open store:
    /// discover, select, probe, persist. Mutates `config` in place and
    /// returns the resolved container.
    pub async fn resolve_with_store(
        &self,
        config: &mut SyncConfig,
        store: &Arc<dyn RemoteStore>,
    ) -> std::result::Result<ContainerId, ConfigError> {
        // Render with the explicit empty sentinel first. Never trust a
        // previously-cached value, empty or not.
        config.remote.container_id = ContainerId::unresolved();

        let containers = store.list_containers().await?;
        let selected = match containers.len() {
            0 => return Err(ConfigError::NoContainerAvailable),
            1 => containers.into_iter().next().expect("length checked"),
            n => {
                let first = containers.into_iter().next().expect("length checked");
                warn!(
                    candidates = n,
                    selected = %first.id,
                    "multiple writable containers; selecting oldest by creation order"
                );
                first
            }
        };

        // No-op writability probe: a list call under the candidate prefix.
        if let Err(e) = store.list(selected.id.as_str()).await {
            return Err(ConfigError::ProbeFailed {
                container: selected.id.to_string(),
                message: e.to_string(),
            });
        }
        debug!(container = %selected.id, "writability probe passed");

        config.remote.container_id = selected.id.clone();
        config
            .save(&self.layout.config_path())
            .map_err(|e| ConfigError::Store(StoreError::Other {
                store: store.store_name().to_string(),
                message: format!("failed to persist resolved config: {}", e),
            }))?;

        info!(container = %selected.id, "configuration resolved and persisted");
        Ok(selected.id)
    }

    /// Full resolution: detect credentials, open the backend, resolve.
    /// Returns the opened store so callers do not reconnect.
    pub async fn resolve(&self, config: &mut SyncConfig) -> Result<Arc<dyn RemoteStore>> {
        let credentials = Self::detect_credentials(
            &config.remote.backend,
            config.remote.service_account_key.as_deref(),
            config.remote.oauth_token_file.as_deref(),
        )?;
        let store = config.remote.open_store(&credentials)?;
        self.resolve_with_store(config, &store).await?;
        Ok(store)
    }
}

/// Extract a bearer token from an OAuth token JSON file. Accepts the flat
/// `{"access_token": ...}` shape and the nested `{"token": {...}}` shape
/// older provisioning tooling writes.
fn read_bearer_token(path: &std::path::Path) -> std::result::Result<String, ConfigError> {
    let raw = std::fs::read_to_string(path).map_err(|_| ConfigError::NoCredentials)?;
    let value: serde_json::Value =
        serde_json::from_str(&raw).map_err(|_| ConfigError::NoCredentials)?;

    let token = value
        .get("access_token")
        .and_then(|v| v.as_str())
        .or_else(|| value.get("token").and_then(|v| v.as_str()))
        .or_else(|| {
            value
                .get("token")
                .and_then(|t| t.get("access_token"))
                .and_then(|v| v.as_str())
        });

    match token {
        Some(t) if !t.is_empty() => Ok(t.to_string()),
        _ => Err(ConfigError::NoCredentials),
    }
}
