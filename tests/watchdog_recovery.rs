//! Watchdog supervision with a recording launcher.

use async_trait::async_trait;
use chrono::Utc;
use std::sync::{Arc, Mutex};
use updraft::config::{
    atomic_write, RemoteBackend, RemoteConfig, StateLayout, SyncConfig, Tuning, WriterPolicy,
};
use updraft::error::Result;
use updraft::heartbeat::Heartbeat;
use updraft::store::ContainerId;
use updraft::watchdog::{LaunchSpec, Launcher, WatchdogAction, WatchdogSupervisor};

#[derive(Clone)]
struct RecordingLauncher {
    launched: Arc<Mutex<Vec<LaunchSpec>>>,
}

impl RecordingLauncher {
    fn new() -> Self {
        Self {
            launched: Arc::new(Mutex::new(Vec::new())),
        }
    }

    fn count(&self) -> usize {
        self.launched.lock().unwrap().len()
    }
}

#[async_trait]
impl Launcher for RecordingLauncher {
    async fn launch(&self, spec: &LaunchSpec) -> Result<u32> {
        self.launched.lock().unwrap().push(spec.clone());
        Ok(31337)
    }
}

fn write_config(layout: &StateLayout, interval_secs: u64) {
    let config = SyncConfig {
        remote: RemoteConfig {
            backend: RemoteBackend::Memory,
            container_id: ContainerId::unresolved(),
            service_account_key: None,
            oauth_token_file: None,
        },
        tuning: Tuning {
            interval_secs,
            ..Tuning::default()
        },
        writer: WriterPolicy::default(),
        roots: Vec::new(),
    };
    config.save(&layout.config_path()).unwrap();
}

#[tokio::test]
async fn test_dead_scheduler_is_relaunched_with_regenerated_spec() {
    let state = tempfile::tempdir().unwrap();
    let layout = StateLayout::new(state.path());
    write_config(&layout, 1);

    // Heartbeat from a scheduler that died long ago.
    let beat = Heartbeat {
        timestamp: Utc::now() - chrono::Duration::seconds(600),
        pid: 99,
        cycle: 12,
    };
    atomic_write(
        &layout.heartbeat_path(),
        serde_json::to_vec(&beat).unwrap().as_slice(),
    )
    .unwrap();

    // Launch spec deleted by an aggressive cleanup job.
    assert!(!layout.launch_spec_path().exists());

    let launcher = RecordingLauncher::new();
    let watchdog = WatchdogSupervisor::new(layout.clone(), Box::new(launcher.clone()));

    let action = watchdog.check_and_repair().await.unwrap();
    match action {
        WatchdogAction::Restarted { reason, pid } => {
            assert!(reason.contains("stale"));
            assert_eq!(pid, 31337);
        }
        other => panic!("expected restart, got {:?}", other),
    }
    assert_eq!(launcher.count(), 1);

    // Spec regenerated from the running binary, with restart provenance.
    let spec = LaunchSpec::load(&layout).unwrap().unwrap();
    assert_eq!(spec.restarts, 1);
    assert_eq!(spec.args[0], "run");
    assert!(spec.last_restart_at.is_some());
}

#[tokio::test]
async fn test_live_scheduler_left_alone() {
    let state = tempfile::tempdir().unwrap();
    let layout = StateLayout::new(state.path());
    write_config(&layout, 60);
    Heartbeat::beat(&layout, 1).unwrap();

    let launcher = RecordingLauncher::new();
    let watchdog = WatchdogSupervisor::new(layout, Box::new(launcher.clone()));

    assert_eq!(
        watchdog.check_and_repair().await.unwrap(),
        WatchdogAction::Healthy
    );
    assert_eq!(launcher.count(), 0);
}

#[tokio::test]
async fn test_stop_marker_blocks_restart() {
    let state = tempfile::tempdir().unwrap();
    let layout = StateLayout::new(state.path());
    write_config(&layout, 60);
    std::fs::write(layout.stop_marker_path(), b"").unwrap();

    let launcher = RecordingLauncher::new();
    let watchdog = WatchdogSupervisor::new(layout, Box::new(launcher.clone()));

    assert_eq!(
        watchdog.check_and_repair().await.unwrap(),
        WatchdogAction::StopRequested
    );
    assert_eq!(launcher.count(), 0);
}
