/*!
 * Configuration types for updraft
 *
 * `SyncConfig` is the single shared resource between the resolver (writes)
 * and the scheduler (reads). It is persisted as TOML under the durable
 * state directory and replaced atomically, never edited in place.
 */

use crate::error::{Result, SyncError};
use crate::store::{ContainerId, DataClass, ObjectStoreClient, RemoteStore, StoreResult};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Which object-store backend holds the shared container.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", tag = "backend")]
pub enum RemoteBackend {
    /// In-process store, for tests and dry runs
    Memory,
    /// Directory on a mounted persistent volume
    Local { root: PathBuf },
    /// Google Cloud Storage bucket
    Gcs { bucket: String },
}

/// Credential material actually found on disk, selected by whichever shape
/// is present.
#[derive(Debug, Clone, PartialEq)]
pub enum CredentialMaterial {
    /// Service-account key JSON (path passed through to the backend)
    ServiceAccountKey(PathBuf),
    /// Pre-issued OAuth bearer token
    OAuthToken(String),
    /// Backend needs no credentials (memory, local volume)
    None,
}

/// Remote target: backend, container, credential locations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteConfig {
    #[serde(flatten)]
    pub backend: RemoteBackend,

    /// Resolved container ID. Rendered as the empty sentinel; only the
    /// resolver fills it, and only after a successful writability probe.
    #[serde(default)]
    pub container_id: ContainerId,

    /// Path to a service-account key JSON, if provisioned
    #[serde(default)]
    pub service_account_key: Option<PathBuf>,

    /// Path to an OAuth token JSON ({"token": "..."}), if provisioned
    #[serde(default)]
    pub oauth_token_file: Option<PathBuf>,
}

impl RemoteConfig {
    /// Open the configured backend with the given credential material.
    pub fn open_store(&self, credentials: &CredentialMaterial) -> StoreResult<Arc<dyn RemoteStore>> {
        let client = match (&self.backend, credentials) {
            (RemoteBackend::Memory, _) => ObjectStoreClient::memory(),
            (RemoteBackend::Local { root }, _) => ObjectStoreClient::local_dir(root)?,
            (RemoteBackend::Gcs { bucket }, CredentialMaterial::ServiceAccountKey(path)) => {
                ObjectStoreClient::gcs_with_service_account(bucket, path)?
            }
            (RemoteBackend::Gcs { bucket }, CredentialMaterial::OAuthToken(token)) => {
                ObjectStoreClient::gcs_with_bearer_token(bucket, token)?
            }
            (RemoteBackend::Gcs { .. }, CredentialMaterial::None) => {
                return Err(crate::store::StoreError::InvalidConfig {
                    store: "gcs".to_string(),
                    message: "GCS backend requires credential material".to_string(),
                })
            }
        };
        Ok(Arc::new(client))
    }
}

/// One local tenant root: a directory whose immediate subdirectories are
/// tenants, synced under `<container>/<segment>/<tenant>`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RootConfig {
    /// Local directory containing one subdirectory per tenant
    pub local: PathBuf,

    /// Data class deciding mirror vs append-only semantics
    pub class: DataClass,

    /// Remote path segment for this root ("output", "input", "workflow")
    pub segment: String,
}

fn default_interval_secs() -> u64 {
    60
}

fn default_min_age_secs() -> u64 {
    30
}

fn default_max_transfers() -> usize {
    2
}

fn default_exclude() -> Vec<String> {
    vec!["*.tmp".to_string(), "*.partial".to_string()]
}

fn default_alert_after_failures() -> u32 {
    5
}

/// Scheduler tuning parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tuning {
    /// Reconciliation interval in seconds
    ///
    /// **Default:** 60
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,

    /// Minimum file age before a file is eligible for transfer, so an
    /// in-progress producer write is never raced
    ///
    /// **Default:** 30
    #[serde(default = "default_min_age_secs")]
    pub min_age_secs: u64,

    /// Maximum simultaneous transfers per cycle
    ///
    /// **Default:** 2
    #[serde(default = "default_max_transfers")]
    pub max_transfers: usize,

    /// Glob patterns never eligible for transfer
    ///
    /// **Default:** `*.tmp`, `*.partial`
    #[serde(default = "default_exclude")]
    pub exclude: Vec<String>,

    /// Consecutive failing cycles before health flips to alert
    ///
    /// **Default:** 5
    #[serde(default = "default_alert_after_failures")]
    pub alert_after_failures: u32,
}

impl Default for Tuning {
    fn default() -> Self {
        Self {
            interval_secs: default_interval_secs(),
            min_age_secs: default_min_age_secs(),
            max_transfers: default_max_transfers(),
            exclude: default_exclude(),
            alert_after_failures: default_alert_after_failures(),
        }
    }
}

impl Tuning {
    pub fn validate(&self) -> std::result::Result<(), String> {
        if self.interval_secs == 0 {
            return Err("interval_secs must be greater than 0".to_string());
        }
        if self.max_transfers == 0 {
            return Err("max_transfers must be at least 1".to_string());
        }
        Ok(())
    }
}

fn default_lease() -> bool {
    true
}

/// Single-writer topology policy for this node.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WriterPolicy {
    /// Whether this node runs a scheduler at all. Producer nodes are
    /// provisioned with this off; exactly one node per container has it on.
    pub enabled: bool,

    /// Stable identifier for this node, recorded in the writer lease
    #[serde(default)]
    pub node_id: String,

    /// Also hold a protocol-level lease object in the container, so a
    /// misprovisioned second writer declines instead of corrupting
    ///
    /// **Default:** true
    #[serde(default = "default_lease")]
    pub lease: bool,
}

impl Default for WriterPolicy {
    fn default() -> Self {
        Self {
            enabled: false,
            node_id: String::new(),
            lease: default_lease(),
        }
    }
}

/// Top-level sync configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    pub remote: RemoteConfig,

    #[serde(default)]
    pub tuning: Tuning,

    #[serde(default)]
    pub writer: WriterPolicy,

    #[serde(default)]
    pub roots: Vec<RootConfig>,
}

impl SyncConfig {
    /// Default tenant roots for a workspace directory: mirrored outputs,
    /// append-only inputs and workflows.
    pub fn default_roots(workspace: &Path) -> Vec<RootConfig> {
        vec![
            RootConfig {
                local: workspace.join("output"),
                class: DataClass::Mirrored,
                segment: "output".to_string(),
            },
            RootConfig {
                local: workspace.join("input"),
                class: DataClass::AppendOnly,
                segment: "input".to_string(),
            },
            RootConfig {
                local: workspace.join("workflows"),
                class: DataClass::AppendOnly,
                segment: "workflow".to_string(),
            },
        ]
    }

    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| SyncError::Config(format!("cannot read {}: {}", path.display(), e)))?;
        let config: SyncConfig = toml::from_str(&raw)
            .map_err(|e| SyncError::Config(format!("cannot parse {}: {}", path.display(), e)))?;
        config
            .tuning
            .validate()
            .map_err(SyncError::Config)?;
        Ok(config)
    }

    /// Persist atomically: write to a temp file in the same directory, then
    /// rename over the target, so a crash mid-write cannot leave a
    /// half-written config.
    pub fn save(&self, path: &Path) -> Result<()> {
        let rendered = toml::to_string_pretty(self)
            .map_err(|e| SyncError::Config(format!("cannot serialize config: {}", e)))?;
        atomic_write(path, rendered.as_bytes())
    }
}

/// Write-to-temp-then-rename. Shared by config, heartbeat, and health
/// persistence.
pub fn atomic_write(path: &Path, data: &[u8]) -> Result<()> {
    use std::io::Write;

    let parent = path
        .parent()
        .ok_or_else(|| SyncError::Config(format!("no parent directory for {}", path.display())))?;
    std::fs::create_dir_all(parent)?;

    let mut tmp = tempfile::NamedTempFile::new_in(parent)?;
    tmp.write_all(data)?;
    tmp.flush()?;
    tmp.persist(path)
        .map_err(|e| SyncError::Io(e.error))?;
    Ok(())
}

/// Durable state layout: everything the scheduler and watchdog share lives
/// under one directory that survives process and node restarts.
#[derive(Debug, Clone)]
pub struct StateLayout {
    dir: PathBuf,
}

impl StateLayout {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn config_path(&self) -> PathBuf {
        self.dir.join("sync.toml")
    }

    pub fn heartbeat_path(&self) -> PathBuf {
        self.dir.join("heartbeat.json")
    }

    pub fn health_path(&self) -> PathBuf {
        self.dir.join("health.json")
    }

    pub fn outcomes_path(&self) -> PathBuf {
        self.dir.join("outcomes.log")
    }

    pub fn launch_spec_path(&self) -> PathBuf {
        self.dir.join("scheduler.json")
    }

    pub fn pid_path(&self) -> PathBuf {
        self.dir.join("updraft.pid")
    }

    pub fn stop_marker_path(&self) -> PathBuf {
        self.dir.join("stop")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_config() -> SyncConfig {
        SyncConfig {
            remote: RemoteConfig {
                backend: RemoteBackend::Memory,
                container_id: ContainerId::unresolved(),
                service_account_key: None,
                oauth_token_file: None,
            },
            tuning: Tuning::default(),
            writer: WriterPolicy {
                enabled: true,
                node_id: "node-test".to_string(),
                lease: true,
            },
            roots: SyncConfig::default_roots(Path::new("/workspace")),
        }
    }

    #[test]
    fn test_defaults() {
        let tuning = Tuning::default();
        assert_eq!(tuning.interval_secs, 60);
        assert_eq!(tuning.min_age_secs, 30);
        assert_eq!(tuning.max_transfers, 2);
        assert_eq!(tuning.exclude, vec!["*.tmp", "*.partial"]);
        assert_eq!(tuning.alert_after_failures, 5);
        assert!(tuning.validate().is_ok());
    }

    #[test]
    fn test_validation_failures() {
        let mut tuning = Tuning::default();
        tuning.interval_secs = 0;
        assert!(tuning.validate().is_err());

        tuning = Tuning::default();
        tuning.max_transfers = 0;
        assert!(tuning.validate().is_err());
    }

    #[test]
    fn test_save_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sync.toml");

        let config = sample_config();
        config.save(&path).unwrap();

        let loaded = SyncConfig::load(&path).unwrap();
        assert!(loaded.remote.container_id.is_unresolved());
        assert_eq!(loaded.writer.node_id, "node-test");
        assert_eq!(loaded.roots.len(), 3);
        assert_eq!(loaded.roots[0].class, DataClass::Mirrored);
        assert_eq!(loaded.roots[1].class, DataClass::AppendOnly);
    }

    #[test]
    fn test_load_rejects_bad_toml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sync.toml");
        std::fs::write(&path, "this is not toml = = =").unwrap();

        let err = SyncConfig::load(&path).unwrap_err();
        assert!(err.is_fatal());
    }

    #[test]
    fn test_default_roots_layout() {
        let roots = SyncConfig::default_roots(Path::new("/workspace"));
        let segments: Vec<&str> = roots.iter().map(|r| r.segment.as_str()).collect();
        assert_eq!(segments, vec!["output", "input", "workflow"]);
        assert!(roots
            .iter()
            .filter(|r| r.class == DataClass::Mirrored)
            .all(|r| r.segment == "output"));
    }

    #[test]
    fn test_atomic_write_creates_parent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/state/file.json");
        atomic_write(&path, b"{}").unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), b"{}");
    }

    #[test]
    fn test_state_layout_paths() {
        let layout = StateLayout::new("/data/updraft");
        assert_eq!(layout.config_path(), PathBuf::from("/data/updraft/sync.toml"));
        assert_eq!(
            layout.heartbeat_path(),
            PathBuf::from("/data/updraft/heartbeat.json")
        );
        assert_eq!(layout.stop_marker_path(), PathBuf::from("/data/updraft/stop"));
    }
}
