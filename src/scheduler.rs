//! Tenant mirror reconciliation loop
//!
//! On a fixed interval, for every tenant directory discovered under each
//! local root, reconciles local state against that tenant's remote prefix.
//! Mirrored roots converge the remote to exactly match local state,
//! deletions included; append-only roots only gain objects. The loop is
//! deliberately memoryless: a cycle killed at any point leaves nothing to
//! clean up, because the next cycle recomputes the full difference.

use crate::config::{RootConfig, StateLayout, SyncConfig};
use crate::coordinator::SingleWriterCoordinator;
use crate::error::{Result, SyncError};
use crate::health::HealthReporter;
use crate::heartbeat::Heartbeat;
use crate::resolver::{reresolve_backoff, ConfigResolver};
use crate::store::{DataClass, RemotePrefix, RemoteStore};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

/// Per-tenant, per-cycle outcome record, appended to the outcome log.
/// Written for humans and monitoring; the engine never reads it back.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncOutcome {
    pub at: DateTime<Utc>,
    pub tenant: String,
    pub class: DataClass,
    pub segment: String,
    pub considered: u64,
    pub transferred: u64,
    pub deleted: u64,
    pub errors: Vec<String>,
}

/// Summary of one reconciliation cycle.
#[derive(Debug, Default)]
pub struct CycleReport {
    pub outcomes: Vec<SyncOutcome>,

    /// Set when configuration prevented any remote operation this cycle.
    pub config_failure: Option<String>,
}

impl CycleReport {
    pub fn transferred(&self) -> u64 {
        self.outcomes.iter().map(|o| o.transferred).sum()
    }

    pub fn deleted(&self) -> u64 {
        self.outcomes.iter().map(|o| o.deleted).sum()
    }

    pub fn tenant_errors(&self) -> usize {
        self.outcomes.iter().filter(|o| !o.errors.is_empty()).count()
    }

    pub fn is_clean(&self) -> bool {
        self.config_failure.is_none() && self.tenant_errors() == 0
    }
}

/// One local file observed during a tenant scan.
#[derive(Debug, Clone)]
struct LocalFile {
    /// Path relative to the tenant directory, `/`-separated
    relative: String,
    size: u64,
    modified: Option<SystemTime>,
    /// Old enough and not excluded, so eligible for transfer this cycle
    eligible: bool,
}

/// The reconciliation scheduler for one node.
pub struct MirrorScheduler {
    store: Arc<dyn RemoteStore>,
    config: SyncConfig,
    layout: StateLayout,
    semaphore: Arc<Semaphore>,
    exclude: Vec<glob::Pattern>,
    reporter: HealthReporter,
    coordinator: Option<SingleWriterCoordinator>,
    cycle: u64,
}

impl MirrorScheduler {
    pub fn new(
        store: Arc<dyn RemoteStore>,
        config: SyncConfig,
        layout: StateLayout,
    ) -> Result<Self> {
        config.tuning.validate().map_err(SyncError::Config)?;
        let exclude = config
            .tuning
            .exclude
            .iter()
            .map(|p| {
                glob::Pattern::new(p)
                    .map_err(|e| SyncError::Config(format!("bad exclude pattern {:?}: {}", p, e)))
            })
            .collect::<Result<Vec<_>>>()?;
        let reporter = HealthReporter::new(layout.clone(), config.tuning.alert_after_failures);
        let semaphore = Arc::new(Semaphore::new(config.tuning.max_transfers));
        Ok(Self {
            store,
            config,
            layout,
            semaphore,
            exclude,
            reporter,
            coordinator: None,
            cycle: 0,
        })
    }

    /// Attach the writer coordinator so the lease is renewed each cycle.
    pub fn with_coordinator(mut self, coordinator: SingleWriterCoordinator) -> Self {
        self.coordinator = Some(coordinator);
        self
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Main loop. Ticks on the configured interval until the stop marker
    /// appears. Each tick runs one cycle; a failing cycle never exits the
    /// loop, it is retried by the next tick.
    pub async fn run(mut self) -> Result<()> {
        let interval_secs = self.config.tuning.interval_secs;
        info!(
            interval_secs,
            min_age_secs = self.config.tuning.min_age_secs,
            max_transfers = self.config.tuning.max_transfers,
            roots = self.config.roots.len(),
            "mirror scheduler active"
        );

        crate::config::atomic_write(
            &self.layout.pid_path(),
            std::process::id().to_string().as_bytes(),
        )?;
        // A leftover stop marker from a previous shutdown must not kill a
        // freshly started scheduler.
        let _ = std::fs::remove_file(self.layout.stop_marker_path());

        let mut interval = tokio::time::interval(Duration::from_secs(interval_secs));
        // A stalled node must not burst catch-up cycles back to back.
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        let mut resolve_attempts: u32 = 0;
        let mut next_resolve_at: Option<DateTime<Utc>> = None;

        loop {
            interval.tick().await;

            if self.layout.stop_marker_path().exists() {
                info!("stop requested; shutting down after completed cycle");
                let _ = std::fs::remove_file(self.layout.stop_marker_path());
                break;
            }

            // Bounded-backoff re-resolution when the container ID has been
            // invalidated, never a tight loop.
            if self.config.remote.container_id.is_unresolved() {
                let now = Utc::now();
                let due = next_resolve_at.map(|at| now >= at).unwrap_or(true);
                if due {
                    resolve_attempts += 1;
                    let resolver = ConfigResolver::new(self.layout.clone());
                    match resolver
                        .resolve_with_store(&mut self.config, &self.store)
                        .await
                    {
                        Ok(container) => {
                            info!(%container, "container re-resolved");
                            // The lease must follow the container, or the
                            // protocol guard silently degrades to the
                            // provisioning flag.
                            if let Some(coord) = &mut self.coordinator {
                                coord.set_container(container.clone());
                            }
                            resolve_attempts = 0;
                            next_resolve_at = None;
                        }
                        Err(e) => {
                            let backoff = reresolve_backoff(resolve_attempts);
                            next_resolve_at = Some(
                                now + chrono::Duration::from_std(backoff)
                                    .unwrap_or_else(|_| chrono::Duration::seconds(60)),
                            );
                            // The cycle below records this tick's failure;
                            // recording here too would double-count the
                            // streak and trip the alert threshold early.
                            warn!(error = %e, attempt = resolve_attempts, "re-resolution failed");
                        }
                    }
                }
            }

            match self.run_cycle().await {
                Ok(report) => {
                    if let Some(reason) = &report.config_failure {
                        if let Some(coord) = &self.coordinator {
                            // Hold the lease while we retry resolution.
                            let _ = coord.renew().await;
                        }
                        debug!(reason, "cycle skipped remote operations");
                    }
                }
                Err(e) if e.is_fatal() => return Err(e),
                // Lease stolen: another writer is active, stop mirroring.
                Err(e @ SyncError::LeaseHeld { .. }) => return Err(e),
                // State-directory trouble; the next tick retries.
                Err(e) => warn!(error = %e, "cycle failed"),
            }
        }

        if let Some(coord) = &self.coordinator {
            coord.release().await?;
        }
        let _ = std::fs::remove_file(self.layout.pid_path());
        Ok(())
    }

    /// Execute one reconciliation cycle across all roots and tenants.
    ///
    /// Errors inside a tenant's slice are contained in its outcome record;
    /// only state-directory I/O failures propagate.
    pub async fn run_cycle(&mut self) -> Result<CycleReport> {
        self.cycle += 1;
        let mut report = CycleReport::default();

        if self.config.remote.container_id.is_unresolved() {
            report.config_failure = Some("container unresolved".to_string());
            self.reporter
                .record_failure("container unresolved", false)?;
            Heartbeat::beat(&self.layout, self.cycle)?;
            return Ok(report);
        }

        let roots = self.config.roots.clone();
        for root in &roots {
            let tenants = discover_tenants(&root.local);
            for tenant in tenants {
                let TenantResult {
                    outcome,
                    access_denied,
                } = self.sync_tenant(root, &tenant).await;

                // A quota/permission failure invalidates the container;
                // re-resolution happens on a later tick with backoff.
                if access_denied {
                    warn!(tenant = %tenant, "access denied; invalidating resolved container");
                    self.config.remote.container_id =
                        crate::store::ContainerId::unresolved();
                }

                info!(
                    tenant = %outcome.tenant,
                    class = %outcome.class,
                    considered = outcome.considered,
                    transferred = outcome.transferred,
                    deleted = outcome.deleted,
                    errors = outcome.errors.len(),
                    "tenant cycle complete"
                );
                report.outcomes.push(outcome);
            }
        }

        self.append_outcomes(&report.outcomes)?;
        Heartbeat::beat(&self.layout, self.cycle)?;

        if report.is_clean() {
            self.reporter.record_success()?;
        } else {
            let reason = report
                .config_failure
                .clone()
                .unwrap_or_else(|| format!("{} tenants reported errors", report.tenant_errors()));
            self.reporter.record_failure(&reason, false)?;
        }

        if let Some(coord) = &self.coordinator {
            coord.renew().await?;
        }

        Ok(report)
    }

    /// Reconcile one tenant under one root. Never returns an error: every
    /// failure lands in the outcome record so sibling tenants proceed.
    async fn sync_tenant(&self, root: &RootConfig, tenant: &str) -> TenantResult {
        let mut access_denied = false;
        let mut outcome = SyncOutcome {
            at: Utc::now(),
            tenant: tenant.to_string(),
            class: root.class,
            segment: root.segment.clone(),
            considered: 0,
            transferred: 0,
            deleted: 0,
            errors: Vec::new(),
        };

        let prefix = match RemotePrefix::new(
            &self.config.remote.container_id,
            &root.segment,
            tenant,
        ) {
            Some(p) => p,
            None => {
                outcome
                    .errors
                    .push(format!("cannot form remote prefix for tenant {:?}", tenant));
                return TenantResult {
                    outcome,
                    access_denied,
                };
            }
        };

        let tenant_dir = root.local.join(tenant);
        let local = match self.scan_local(&tenant_dir) {
            Ok(files) => files,
            Err(e) => {
                outcome.errors.push(format!("local scan failed: {}", e));
                return TenantResult {
                    outcome,
                    access_denied,
                };
            }
        };
        outcome.considered = local.len() as u64;

        let remote = match self.store.list(prefix.as_str()).await {
            Ok(objects) => objects,
            Err(e) => {
                access_denied = e.is_access_denied();
                outcome.errors.push(e.to_string());
                return TenantResult {
                    outcome,
                    access_denied,
                };
            }
        };
        let remote_by_relative: HashMap<&str, &crate::store::RemoteObject> = remote
            .iter()
            .filter_map(|o| prefix.relative_of(&o.key).map(|rel| (rel, o)))
            .collect();

        // Uploads: eligible local files missing or changed remotely.
        // Append-only trees never re-verify an existing remote object.
        let mut uploads: Vec<&LocalFile> = Vec::new();
        for file in local.iter().filter(|f| f.eligible) {
            match remote_by_relative.get(file.relative.as_str()) {
                None => uploads.push(file),
                Some(existing) if root.class == DataClass::Mirrored => {
                    if self.differs(file, existing) {
                        uploads.push(file);
                    }
                }
                Some(_) => {}
            }
        }

        // Deletions: mirrored trees drop remote objects with no local
        // counterpart. Presence is judged against the full local listing,
        // so a file merely too young to transfer is not deleted remotely.
        let mut deletions: Vec<String> = Vec::new();
        if root.class.propagates_deletions() {
            let local_set: std::collections::HashSet<&str> =
                local.iter().map(|f| f.relative.as_str()).collect();
            for (relative, object) in &remote_by_relative {
                if !local_set.contains(relative) {
                    deletions.push(object.key.clone());
                }
            }
        }

        // Bounded concurrency: transfers and deletes share one semaphore
        // sized to stay under the backend's rate limits.
        let mut tasks = tokio::task::JoinSet::new();
        for file in &uploads {
            let permit_source = self.semaphore.clone();
            let store = self.store.clone();
            let key = prefix.key_for(&file.relative);
            let path = tenant_dir.join(file.relative.replace('/', std::path::MAIN_SEPARATOR_STR));
            tasks.spawn(async move {
                let _permit = permit_source
                    .acquire_owned()
                    .await
                    .expect("semaphore never closed");
                let data = tokio::fs::read(&path).await.map_err(|e| TaskFailure {
                    message: format!("read {}: {}", path.display(), e),
                    access_denied: false,
                })?;
                store.put(&key, data.into()).await.map_err(|e| TaskFailure {
                    access_denied: e.is_access_denied(),
                    message: e.to_string(),
                })?;
                Ok::<Transfer, TaskFailure>(Transfer::Upload)
            });
        }
        for key in deletions {
            let permit_source = self.semaphore.clone();
            let store = self.store.clone();
            tasks.spawn(async move {
                let _permit = permit_source
                    .acquire_owned()
                    .await
                    .expect("semaphore never closed");
                store.delete(&key).await.map_err(|e| TaskFailure {
                    access_denied: e.is_access_denied(),
                    message: e.to_string(),
                })?;
                Ok::<Transfer, TaskFailure>(Transfer::Delete)
            });
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(Ok(Transfer::Upload)) => outcome.transferred += 1,
                Ok(Ok(Transfer::Delete)) => outcome.deleted += 1,
                Ok(Err(failure)) => {
                    access_denied = access_denied || failure.access_denied;
                    outcome.errors.push(failure.message);
                }
                Err(e) => outcome.errors.push(format!("transfer task failed: {}", e)),
            }
        }

        TenantResult {
            outcome,
            access_denied,
        }
    }

    /// True when a mirrored local file and its remote object have diverged.
    fn differs(&self, file: &LocalFile, remote: &crate::store::RemoteObject) -> bool {
        if file.size != remote.size {
            return true;
        }
        match (file.modified, remote.last_modified) {
            (Some(local_mtime), Some(remote_mtime)) => {
                let local: DateTime<Utc> = local_mtime.into();
                local > remote_mtime
            }
            _ => false,
        }
    }

    /// Walk a tenant directory. Returns every regular file with its
    /// eligibility flag; ineligible files still count as present for
    /// deletion decisions.
    fn scan_local(&self, dir: &Path) -> std::io::Result<Vec<LocalFile>> {
        if !dir.is_dir() {
            return Ok(Vec::new());
        }
        let min_age = Duration::from_secs(self.config.tuning.min_age_secs);
        let now = SystemTime::now();
        let mut files = Vec::new();

        for entry in WalkDir::new(dir).follow_links(false) {
            let entry = entry.map_err(|e| {
                std::io::Error::other(format!("walk {}: {}", dir.display(), e))
            })?;
            if !entry.file_type().is_file() {
                continue;
            }
            let relative = entry
                .path()
                .strip_prefix(dir)
                .expect("walkdir yields children of its root")
                .to_string_lossy()
                .replace('\\', "/");

            let excluded = self.exclude.iter().any(|p| {
                p.matches(&relative)
                    || entry
                        .file_name()
                        .to_str()
                        .map(|name| p.matches(name))
                        .unwrap_or(false)
            });

            let metadata = entry.metadata().map_err(|e| {
                std::io::Error::other(format!("stat {}: {}", entry.path().display(), e))
            })?;
            let modified = metadata.modified().ok();
            let old_enough = modified
                .and_then(|m| now.duration_since(m).ok())
                .map(|age| age >= min_age)
                .unwrap_or(false);

            files.push(LocalFile {
                relative,
                size: metadata.len(),
                modified,
                eligible: !excluded && old_enough,
            });
        }
        Ok(files)
    }

    /// Append outcome records as JSON lines. Append-only by contract;
    /// rotation is external.
    fn append_outcomes(&self, outcomes: &[SyncOutcome]) -> Result<()> {
        use std::io::Write;
        if outcomes.is_empty() {
            return Ok(());
        }
        std::fs::create_dir_all(self.layout.dir())?;
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.layout.outcomes_path())?;
        for outcome in outcomes {
            serde_json::to_writer(&mut file, outcome)?;
            file.write_all(b"\n")?;
        }
        Ok(())
    }
}

enum Transfer {
    Upload,
    Delete,
}

struct TaskFailure {
    message: String,
    access_denied: bool,
}

struct TenantResult {
    outcome: SyncOutcome,
    access_denied: bool,
}

/// Tenants are the immediate subdirectories of a root; they come into
/// existence when their directory first appears and are never deleted by
/// this subsystem.
fn discover_tenants(root: &Path) -> Vec<String> {
    let mut tenants = Vec::new();
    let entries = match std::fs::read_dir(root) {
        Ok(entries) => entries,
        Err(_) => return tenants,
    };
    for entry in entries.flatten() {
        if entry.file_type().map(|t| t.is_dir()).unwrap_or(false) {
            if let Ok(name) = entry.file_name().into_string() {
                tenants.push(name);
            }
        }
    }
    tenants.sort();
    tenants
}
