//! Resolution and re-resolution against an in-memory store.

use std::path::Path;
use std::sync::Arc;
use updraft::config::{RemoteBackend, RemoteConfig, StateLayout, SyncConfig, Tuning, WriterPolicy};
use updraft::resolver::{ConfigError, ConfigResolver};
use updraft::scheduler::MirrorScheduler;
use updraft::store::{ContainerId, ObjectStoreClient, RemoteStore};

fn unresolved_config(workspace: &Path) -> SyncConfig {
    SyncConfig {
        remote: RemoteConfig {
            backend: RemoteBackend::Memory,
            container_id: ContainerId::unresolved(),
            service_account_key: None,
            oauth_token_file: None,
        },
        tuning: Tuning {
            min_age_secs: 0,
            ..Tuning::default()
        },
        writer: WriterPolicy::default(),
        roots: SyncConfig::default_roots(workspace),
    }
}

#[tokio::test]
async fn test_resolve_then_sync() {
    let workspace = tempfile::tempdir().unwrap();
    let state = tempfile::tempdir().unwrap();
    let layout = StateLayout::new(state.path());

    let store: Arc<dyn RemoteStore> = Arc::new(ObjectStoreClient::memory());
    store
        .create_container(&ContainerId::new("render-shared"))
        .await
        .unwrap();

    let dir = workspace.path().join("output/alice");
    std::fs::create_dir_all(&dir).unwrap();
    std::fs::write(dir.join("a.png"), b"a").unwrap();

    let mut config = unresolved_config(workspace.path());
    let resolver = ConfigResolver::new(layout.clone());
    let id = resolver
        .resolve_with_store(&mut config, &store)
        .await
        .unwrap();
    assert_eq!(id.as_str(), "render-shared");

    // The persisted config carries the resolved ID.
    let persisted = SyncConfig::load(&layout.config_path()).unwrap();
    assert_eq!(persisted.remote.container_id, id);

    let mut scheduler = MirrorScheduler::new(store.clone(), config, layout).unwrap();
    let report = scheduler.run_cycle().await.unwrap();
    assert_eq!(report.transferred(), 1);
    assert_eq!(
        store.list("render-shared/output/alice").await.unwrap()[0].key,
        "render-shared/output/alice/a.png"
    );
}

#[tokio::test]
async fn test_unresolved_cycle_degrades_without_remote_ops() {
    let workspace = tempfile::tempdir().unwrap();
    let state = tempfile::tempdir().unwrap();
    let layout = StateLayout::new(state.path());

    let dir = workspace.path().join("output/alice");
    std::fs::create_dir_all(&dir).unwrap();
    std::fs::write(dir.join("a.png"), b"a").unwrap();

    // No container exists; config stays unresolved.
    let store: Arc<dyn RemoteStore> = Arc::new(ObjectStoreClient::memory());
    let mut config = unresolved_config(workspace.path());
    let resolver = ConfigResolver::new(layout.clone());
    let err = resolver
        .resolve_with_store(&mut config, &store)
        .await
        .unwrap_err();
    assert!(matches!(err, ConfigError::NoContainerAvailable));

    let mut scheduler = MirrorScheduler::new(store.clone(), config, layout).unwrap();
    let report = scheduler.run_cycle().await.unwrap();
    assert!(report.config_failure.is_some());
    assert!(report.outcomes.is_empty());
    assert!(store.list("").await.unwrap().is_empty());
}

#[tokio::test]
async fn test_recovery_after_container_appears() {
    let workspace = tempfile::tempdir().unwrap();
    let state = tempfile::tempdir().unwrap();
    let layout = StateLayout::new(state.path());

    let dir = workspace.path().join("output/alice");
    std::fs::create_dir_all(&dir).unwrap();
    std::fs::write(dir.join("a.png"), b"a").unwrap();

    let store: Arc<dyn RemoteStore> = Arc::new(ObjectStoreClient::memory());
    let mut config = unresolved_config(workspace.path());
    let resolver = ConfigResolver::new(layout.clone());

    assert!(resolver
        .resolve_with_store(&mut config, &store)
        .await
        .is_err());

    // Operator provisions the container; the next resolution pass succeeds
    // and syncing proceeds.
    store
        .create_container(&ContainerId::new("late"))
        .await
        .unwrap();
    resolver
        .resolve_with_store(&mut config, &store)
        .await
        .unwrap();

    let mut scheduler = MirrorScheduler::new(store.clone(), config, layout).unwrap();
    let report = scheduler.run_cycle().await.unwrap();
    assert!(report.is_clean());
    assert_eq!(report.transferred(), 1);
}
