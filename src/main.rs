/*!
 * Updraft CLI - daemon entry points and runtime control surface
 *
 * External supervisors drive these commands on exit status alone:
 * 0 success, 1 degraded (retriable), 2 fatal (no automated retry).
 */

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::{error, info, warn};
use updraft::{
    config::StateLayout,
    error::{Result, SyncError, EXIT_DEGRADED, EXIT_FATAL, EXIT_SUCCESS},
    health::HealthReporter,
    heartbeat::Heartbeat,
    logging,
    resolver::ConfigResolver,
    scheduler::MirrorScheduler,
    watchdog::{ProcessLauncher, WatchdogSupervisor},
    ContainerId, SingleWriterCoordinator, SyncConfig, WriterRole,
};

#[derive(Parser)]
#[command(name = "updraft")]
#[command(version, about = "Tenant workspace mirroring to a shared remote container", long_about = None)]
struct Cli {
    /// Durable state directory (config, heartbeat, health, outcome log)
    #[arg(
        long = "state-dir",
        value_name = "DIR",
        default_value = "/data/updraft",
        global = true
    )]
    state_dir: PathBuf,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Write JSON logs to this file instead of compact stdout
    #[arg(long = "log-file", value_name = "PATH", global = true)]
    log_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Write a default configuration for a workspace directory
    Init {
        /// Workspace whose output/, input/, workflows/ trees are synced
        #[arg(long, value_name = "DIR")]
        workspace: PathBuf,
    },

    /// Resolve configuration: detect credentials, discover the container,
    /// probe writability, persist
    Resolve,

    /// Run the reconciliation scheduler until stopped
    Run,

    /// Run exactly one reconciliation cycle and exit
    SyncOnce,

    /// Supervise the scheduler, restarting it on heartbeat staleness
    Watchdog,

    /// Print current health and heartbeat state
    Status,

    /// Request a clean scheduler shutdown after its current cycle
    Stop,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    if let Err(e) = logging::init_logging(cli.verbose, cli.log_file.as_deref()) {
        eprintln!("updraft: {}", e);
        std::process::exit(EXIT_FATAL);
    }

    let layout = StateLayout::new(&cli.state_dir);
    let code = match dispatch(cli.command, layout).await {
        Ok(code) => code,
        Err(e) => {
            error!(error = %e, "command failed");
            eprintln!("updraft: {}", e);
            e.exit_code()
        }
    };
    std::process::exit(code);
}

async fn dispatch(command: Command, layout: StateLayout) -> Result<i32> {
    match command {
        Command::Init { workspace } => init(&layout, &workspace),
        Command::Resolve => resolve(&layout).await,
        Command::Run => run(&layout).await,
        Command::SyncOnce => sync_once(&layout).await,
        Command::Watchdog => watchdog(layout).await,
        Command::Status => status(&layout).await,
        Command::Stop => stop(&layout),
    }
}

fn init(layout: &StateLayout, workspace: &std::path::Path) -> Result<i32> {
    let path = layout.config_path();
    if path.exists() {
        return Err(SyncError::Config(format!(
            "refusing to overwrite existing config at {}",
            path.display()
        )));
    }
    let config = SyncConfig {
        remote: updraft::RemoteConfig {
            backend: updraft::RemoteBackend::Memory,
            container_id: ContainerId::unresolved(),
            service_account_key: None,
            oauth_token_file: None,
        },
        tuning: Default::default(),
        writer: Default::default(),
        roots: SyncConfig::default_roots(workspace),
    };
    config.save(&path)?;
    info!(path = %path.display(), "default configuration written");
    println!("{}", path.display());
    Ok(EXIT_SUCCESS)
}

async fn resolve(layout: &StateLayout) -> Result<i32> {
    let mut config = SyncConfig::load(&layout.config_path())?;
    let resolver = ConfigResolver::new(layout.clone());
    resolver.resolve(&mut config).await?;
    println!("{}", config.remote.container_id);
    Ok(EXIT_SUCCESS)
}

async fn run(layout: &StateLayout) -> Result<i32> {
    let mut config = SyncConfig::load(&layout.config_path())?;
    let resolver = ConfigResolver::new(layout.clone());
    let store = match resolver.resolve(&mut config).await {
        Ok(store) => store,
        // A resolvable failure must not keep the daemon down; the
        // scheduler retries resolution on its own interval.
        Err(e) if !e.is_fatal() => {
            warn!(error = %e, "starting unresolved; will retry on schedule");
            let credentials = ConfigResolver::detect_credentials(
                &config.remote.backend,
                config.remote.service_account_key.as_deref(),
                config.remote.oauth_token_file.as_deref(),
            )?;
            config.remote.open_store(&credentials)?
        }
        Err(e) => return Err(e),
    };

    let coordinator = SingleWriterCoordinator::new(
        store.clone(),
        config.remote.container_id.clone(),
        &config.writer,
        config.tuning.interval_secs,
    );
    match coordinator.acquire().await {
        Ok(WriterRole::Active) => {}
        Ok(WriterRole::Disabled) => {
            info!("writer disabled on this node; nothing to do");
            return Ok(EXIT_SUCCESS);
        }
        Err(e @ SyncError::LeaseHeld { .. }) => {
            warn!(error = %e, "declining to start a second writer");
            return Ok(EXIT_DEGRADED);
        }
        Err(e) => return Err(e),
    }

    let scheduler =
        MirrorScheduler::new(store, config, layout.clone())?.with_coordinator(coordinator);
    scheduler.run().await?;
    Ok(EXIT_SUCCESS)
}

async fn sync_once(layout: &StateLayout) -> Result<i32> {
    let mut config = SyncConfig::load(&layout.config_path())?;
    let resolver = ConfigResolver::new(layout.clone());
    let store = resolver.resolve(&mut config).await?;

    let mut scheduler = MirrorScheduler::new(store, config, layout.clone())?;
    let report = scheduler.run_cycle().await?;
    info!(
        tenants = report.outcomes.len(),
        transferred = report.transferred(),
        deleted = report.deleted(),
        errors = report.tenant_errors(),
        "cycle complete"
    );
    if report.is_clean() {
        Ok(EXIT_SUCCESS)
    } else {
        Ok(EXIT_DEGRADED)
    }
}

async fn watchdog(layout: StateLayout) -> Result<i32> {
    let supervisor = WatchdogSupervisor::new(layout, Box::new(ProcessLauncher));
    supervisor.run().await?;
    Ok(EXIT_SUCCESS)
}

async fn status(layout: &StateLayout) -> Result<i32> {
    let config = SyncConfig::load(&layout.config_path())?;
    let health = HealthReporter::load(layout)?;
    let heartbeat = Heartbeat::load(layout)?;

    let heartbeat_stale = heartbeat
        .as_ref()
        .map(|b| b.is_stale(chrono::Utc::now(), config.tuning.interval_secs))
        .unwrap_or(true);

    let healthy = health.as_ref().map(|h| h.is_ok()).unwrap_or(false) && !heartbeat_stale;

    // Best effort: remote usage is informational and must not turn a
    // status query into a failure.
    let usage = remote_usage(&config).await;

    let report = serde_json::json!({
        "container": config.remote.container_id,
        "health": health,
        "heartbeat": heartbeat,
        "heartbeat_stale": heartbeat_stale,
        "usage": usage,
    });
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(if healthy { EXIT_SUCCESS } else { EXIT_DEGRADED })
}

async fn remote_usage(config: &SyncConfig) -> Option<serde_json::Value> {
    if config.remote.container_id.is_unresolved() {
        return None;
    }
    let credentials = ConfigResolver::detect_credentials(
        &config.remote.backend,
        config.remote.service_account_key.as_deref(),
        config.remote.oauth_token_file.as_deref(),
    )
    .ok()?;
    let store = config.remote.open_store(&credentials).ok()?;
    let usage = store
        .usage(config.remote.container_id.as_str())
        .await
        .ok()?;
    Some(serde_json::json!({
        "objects": usage.objects,
        "bytes": usage.bytes,
    }))
}

fn stop(layout: &StateLayout) -> Result<i32> {
    updraft::config::atomic_write(&layout.stop_marker_path(), b"")?;
    info!("stop requested; scheduler exits after its current cycle");
    Ok(EXIT_SUCCESS)
}
