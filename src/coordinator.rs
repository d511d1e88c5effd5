//! Single-writer coordination
//!
//! The primary mechanism is topology: producer nodes are provisioned with
//! the writer disabled, and exactly one node per shared container runs a
//! scheduler. Layered on top is an optional protocol lease, a marker object
//! created with conditional-create semantics, so a misprovisioned second
//! writer declines loudly at startup instead of silently interleaving
//! mirror deletes with another node's uploads.

use crate::config::WriterPolicy;
use crate::error::{Result, SyncError};
use crate::store::{ContainerId, RemoteStore};
use bytes::Bytes;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};

/// Lease object key under the container.
pub const WRITER_LEASE: &str = ".updraft-writer";

/// A lease older than this many scheduler intervals is considered
/// abandoned and may be reclaimed.
pub const LEASE_STALE_INTERVALS: u32 = 3;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct LeaseRecord {
    node_id: String,
    renewed: DateTime<Utc>,
}

/// Outcome of writer-role acquisition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriterRole {
    /// This node is the writer for the container.
    Active,
    /// Provisioning disables the scheduler on this node entirely.
    Disabled,
}

/// Enforces the single-writer invariant for one container.
pub struct SingleWriterCoordinator {
    store: Arc<dyn RemoteStore>,
    container: ContainerId,
    node_id: String,
    lease_enabled: bool,
    writer_enabled: bool,
    interval_secs: u64,
}

impl SingleWriterCoordinator {
    pub fn new(
        store: Arc<dyn RemoteStore>,
        container: ContainerId,
        policy: &WriterPolicy,
        interval_secs: u64,
    ) -> Self {
        let node_id = if policy.node_id.is_empty() {
            format!("node-{}", std::process::id())
        } else {
            policy.node_id.clone()
        };
        Self {
            store,
            container,
            node_id,
            lease_enabled: policy.lease,
            writer_enabled: policy.enabled,
            interval_secs,
        }
    }

    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    /// Point the lease at a newly resolved container. A coordinator built
    /// before resolution succeeded would otherwise keep deferring the
    /// lease forever.
    pub fn set_container(&mut self, container: ContainerId) {
        self.container = container;
    }

    fn lease_key(&self) -> String {
        format!("{}/{}", self.container.as_str(), WRITER_LEASE)
    }

    fn stale_threshold(&self) -> Duration {
        Duration::seconds((self.interval_secs * LEASE_STALE_INTERVALS as u64) as i64)
    }

    fn record_bytes(&self) -> Result<Bytes> {
        let record = LeaseRecord {
            node_id: self.node_id.clone(),
            renewed: Utc::now(),
        };
        Ok(Bytes::from(serde_json::to_vec(&record)?))
    }

    /// Acquire the writer role for this node, or decline.
    pub async fn acquire(&self) -> Result<WriterRole> {
        if !self.writer_enabled {
            info!("writer disabled on this node by provisioning policy");
            return Ok(WriterRole::Disabled);
        }
        if !self.lease_enabled {
            return Ok(WriterRole::Active);
        }
        if self.container.is_unresolved() {
            // No container to plant the lease in yet; the flag is the only
            // guard until resolution succeeds.
            warn!("container unresolved; writer lease deferred");
            return Ok(WriterRole::Active);
        }

        let key = self.lease_key();
        match self.store.put_if_absent(&key, self.record_bytes()?).await {
            Ok(()) => {
                info!(node = %self.node_id, "writer lease acquired");
                Ok(WriterRole::Active)
            }
            Err(e) if e.is_already_exists() => self.contend(&key).await,
            Err(e) => Err(e.into()),
        }
    }

    /// Lease exists: renew if ours, reclaim if stale, otherwise decline.
    async fn contend(&self, key: &str) -> Result<WriterRole> {
        let current: LeaseRecord = match self.store.get(key).await {
            Ok(raw) => serde_json::from_slice(&raw)
                .map_err(|e| SyncError::Other(format!("corrupt writer lease: {}", e)))?,
            // Holder released between our create attempt and this read.
            Err(e) if e.is_not_found() => {
                self.store.put_if_absent(key, self.record_bytes()?).await?;
                return Ok(WriterRole::Active);
            }
            Err(e) => return Err(e.into()),
        };

        if current.node_id == self.node_id {
            self.store.put(key, self.record_bytes()?).await?;
            return Ok(WriterRole::Active);
        }

        let age = Utc::now() - current.renewed;
        if age > self.stale_threshold() {
            warn!(
                holder = %current.node_id,
                age_secs = age.num_seconds(),
                "reclaiming stale writer lease"
            );
            self.store.delete(key).await?;
            match self.store.put_if_absent(key, self.record_bytes()?).await {
                Ok(()) => Ok(WriterRole::Active),
                // Lost the reclaim race to another contender.
                Err(e) if e.is_already_exists() => Err(SyncError::LeaseHeld {
                    holder: current.node_id,
                }),
                Err(e) => Err(e.into()),
            }
        } else {
            Err(SyncError::LeaseHeld {
                holder: current.node_id,
            })
        }
    }

    /// Renew the lease; called once per completed cycle.
    pub async fn renew(&self) -> Result<()> {
        if !self.lease_enabled || !self.writer_enabled || self.container.is_unresolved() {
            return Ok(());
        }
        let key = self.lease_key();
        match self.store.get(&key).await {
            Ok(raw) => {
                let current: LeaseRecord = serde_json::from_slice(&raw)
                    .map_err(|e| SyncError::Other(format!("corrupt writer lease: {}", e)))?;
                if current.node_id != self.node_id {
                    return Err(SyncError::LeaseHeld {
                        holder: current.node_id,
                    });
                }
                self.store.put(&key, self.record_bytes()?).await?;
                Ok(())
            }
            Err(e) if e.is_not_found() => {
                // Someone deleted our lease; take it back.
                self.store.put_if_absent(&key, self.record_bytes()?).await?;
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Drop the lease on clean shutdown so a successor need not wait out
    /// the staleness window.
    pub async fn release(&self) -> Result<()> {
        if !self.lease_enabled || !self.writer_enabled || self.container.is_unresolved() {
            return Ok(());
        }
        let key = self.lease_key();
        match self.store.get(&key).await {
            Ok(raw) => {
                let current: LeaseRecord = match serde_json::from_slice(&raw) {
                    Ok(r) => r,
                    Err(_) => return Ok(()),
                };
                if current.node_id == self.node_id {
                    self.store.delete(&key).await?;
                }
                Ok(())
            }
            Err(e) if e.is_not_found() => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
