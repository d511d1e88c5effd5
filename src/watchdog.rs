//! Scheduler supervision and restart
//!
//! The watchdog judges scheduler liveness by heartbeat staleness alone, so
//! a wedged-but-running process and a dead one repair identically. Repair
//! regenerates the launch spec from the running binary, refreshes the
//! resolved configuration, and relaunches through the [`Launcher`] seam.

use crate::config::{StateLayout, SyncConfig};
use crate::error::{Result, SyncError};
use crate::heartbeat::Heartbeat;
use crate::resolver::ConfigResolver;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Seconds between supervision passes.
pub const CHECK_INTERVAL_SECS: u64 = 300;

/// How the scheduler is to be launched. Persisted as `scheduler.json` for
/// operator inspection; the watchdog rewrites it from its own binary path
/// on every repair, so a deleted or corrupted spec self-heals.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LaunchSpec {
    pub program: PathBuf,
    pub args: Vec<String>,

    /// Restarts performed since the spec was first written
    #[serde(default)]
    pub restarts: u64,

    /// Reason recorded at the most recent restart
    #[serde(default)]
    pub last_restart_reason: Option<String>,

    #[serde(default)]
    pub last_restart_at: Option<DateTime<Utc>>,
}

impl LaunchSpec {
    /// Build the canonical spec for this binary and state directory.
    pub fn current(layout: &StateLayout) -> Result<Self> {
        let program = std::env::current_exe()?;
        Ok(Self {
            program,
            args: vec![
                "run".to_string(),
                "--state-dir".to_string(),
                layout.dir().display().to_string(),
            ],
            restarts: 0,
            last_restart_reason: None,
            last_restart_at: None,
        })
    }

    pub fn load(layout: &StateLayout) -> Result<Option<Self>> {
        let path = layout.launch_spec_path();
        if !path.exists() {
            return Ok(None);
        }
        let raw = std::fs::read(&path)?;
        match serde_json::from_slice(&raw) {
            Ok(spec) => Ok(Some(spec)),
            // A corrupt spec is treated as missing and regenerated.
            Err(e) => {
                warn!(error = %e, "launch spec unreadable; will regenerate");
                Ok(None)
            }
        }
    }

    pub fn save(&self, layout: &StateLayout) -> Result<()> {
        crate::config::atomic_write(
            &layout.launch_spec_path(),
            serde_json::to_vec_pretty(self)?.as_slice(),
        )
    }
}

/// Seam between repair logic and actual process creation.
#[async_trait]
pub trait Launcher: Send + Sync {
    /// Start the scheduler process described by `spec`; returns its PID.
    async fn launch(&self, spec: &LaunchSpec) -> Result<u32>;
}

/// Launches the scheduler as a detached child process.
pub struct ProcessLauncher;

#[async_trait]
impl Launcher for ProcessLauncher {
    async fn launch(&self, spec: &LaunchSpec) -> Result<u32> {
        let child = tokio::process::Command::new(&spec.program)
            .args(&spec.args)
            .stdin(std::process::Stdio::null())
            .spawn()
            .map_err(|e| SyncError::SchedulerDown {
                reason: format!("failed to spawn {}: {}", spec.program.display(), e),
            })?;
        child.id().ok_or_else(|| SyncError::SchedulerDown {
            reason: "spawned scheduler exited before reporting a pid".to_string(),
        })
    }
}

/// Outcome of one watchdog pass.
#[derive(Debug, PartialEq, Eq)]
pub enum WatchdogAction {
    /// Heartbeat fresh; nothing done.
    Healthy,
    /// Stop marker present; supervision suspended.
    StopRequested,
    /// Scheduler declared dead and relaunched.
    Restarted { reason: String, pid: u32 },
}

/// Monitors the scheduler heartbeat and repairs on staleness.
pub struct WatchdogSupervisor {
    layout: StateLayout,
    launcher: Box<dyn Launcher>,
}

impl WatchdogSupervisor {
    pub fn new(layout: StateLayout, launcher: Box<dyn Launcher>) -> Self {
        Self { layout, launcher }
    }

    /// One supervision pass: judge liveness, repair if dead.
    pub async fn check_and_repair(&self) -> Result<WatchdogAction> {
        if self.layout.stop_marker_path().exists() {
            debug!("stop marker present; skipping supervision");
            return Ok(WatchdogAction::StopRequested);
        }

        let mut config = SyncConfig::load(&self.layout.config_path())?;
        let interval_secs = config.tuning.interval_secs;

        let reason = match Heartbeat::load(&self.layout)? {
            None => "no heartbeat has ever been written".to_string(),
            Some(beat) => {
                let now = Utc::now();
                if !beat.is_stale(now, interval_secs) {
                    return Ok(WatchdogAction::Healthy);
                }
                format!(
                    "heartbeat stale: last beat {}s ago (pid {}, cycle {})",
                    beat.age(now).num_seconds(),
                    beat.pid,
                    beat.cycle
                )
            }
        };

        warn!(reason, "scheduler declared dead; repairing");
        self.repair(&mut config, reason).await
    }

    /// Regenerate the launch spec, refresh resolution, relaunch.
    async fn repair(&self, config: &mut SyncConfig, reason: String) -> Result<WatchdogAction> {
        let previous = LaunchSpec::load(&self.layout)?;
        let mut spec = LaunchSpec::current(&self.layout)?;
        if let Some(previous) = previous {
            spec.restarts = previous.restarts;
        }

        // Refresh the resolved container before relaunch. A failure here is
        // not a reason to skip the restart: the scheduler retries
        // resolution itself with backoff, and a live scheduler reporting
        // health beats a dead one.
        let resolver = ConfigResolver::new(self.layout.clone());
        match resolver.resolve(config).await {
            Ok(_) => debug!("configuration refreshed before relaunch"),
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => warn!(error = %e, "resolution failed; relaunching anyway"),
        }

        let pid = self.launcher.launch(&spec).await?;

        spec.restarts += 1;
        spec.last_restart_reason = Some(reason.clone());
        spec.last_restart_at = Some(Utc::now());
        spec.save(&self.layout)?;

        info!(pid, restarts = spec.restarts, reason, "scheduler relaunched");
        Ok(WatchdogAction::Restarted { reason, pid })
    }

    /// Supervision loop. Each pass is a fresh, side-effect-free read of
    /// the heartbeat; the supervisor keeps no state a crash could corrupt.
    pub async fn run(&self) -> Result<()> {
        let mut interval = tokio::time::interval(Duration::from_secs(CHECK_INTERVAL_SECS));
        info!(interval_secs = CHECK_INTERVAL_SECS, "watchdog supervising");
        loop {
            interval.tick().await;
            match self.check_and_repair().await {
                Ok(WatchdogAction::StopRequested) => {
                    info!("stop requested; watchdog exiting");
                    return Ok(());
                }
                Ok(_) => {}
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => warn!(error = %e, "supervision pass failed"),
            }
        }
    }
}
