/*!
 * Updraft - remote mirror synchronization for shared GPU workspaces
 *
 * Continuously reconciles per-tenant workspace directories against a
 * shared remote object-store container:
 * - Self-repairing configuration resolution (container discovery + probe)
 * - Mirrored and append-only data classes per directory tree
 * - Bounded concurrent transfers on a fixed reconciliation interval
 * - Heartbeat-based watchdog supervision and restart
 * - Single-writer coordination per shared container
 * - Machine-readable health status for external alerting
 *
 * Version: 0.3.0
 */

pub mod config;
pub mod coordinator;
pub mod error;
pub mod health;
pub mod heartbeat;
pub mod logging;
pub mod resolver;
pub mod scheduler;
pub mod store;
pub mod watchdog;

// Re-export commonly used types
pub use config::{RemoteBackend, RemoteConfig, RootConfig, StateLayout, SyncConfig, Tuning};
pub use coordinator::{SingleWriterCoordinator, WriterRole};
pub use error::{Result, SyncError, EXIT_DEGRADED, EXIT_FATAL, EXIT_SUCCESS};
pub use health::{HealthReporter, HealthState, HealthStatus};
pub use heartbeat::Heartbeat;
pub use resolver::{ConfigError, ConfigResolver};
pub use scheduler::{CycleReport, MirrorScheduler, SyncOutcome};
pub use store::{ContainerId, DataClass, RemotePrefix, RemoteStore, StoreError};
pub use watchdog::{ProcessLauncher, WatchdogAction, WatchdogSupervisor};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert_eq!(VERSION, env!("CARGO_PKG_VERSION"));
    }
}
