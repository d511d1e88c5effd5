//! Machine-readable health status
//!
//! One record, refreshed each cycle, consumed by external alerting. A
//! resolvable failure only flips the status to alert once it has persisted
//! across a configured number of consecutive cycles; fatal conditions
//! alert immediately.

use crate::config::{atomic_write, StateLayout};
use crate::error::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthState {
    Ok,
    Alert,
}

/// The status record written to `health.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthStatus {
    pub status: HealthState,

    /// Human-readable cause when degraded or alerting
    pub reason: Option<String>,

    /// Completion time of the last fully successful cycle
    pub last_success: Option<DateTime<Utc>>,
}

impl HealthStatus {
    pub fn is_ok(&self) -> bool {
        self.status == HealthState::Ok
    }
}

/// Tracks consecutive failures and writes the status record.
pub struct HealthReporter {
    layout: StateLayout,
    alert_after: u32,
    consecutive_failures: u32,
    last_success: Option<DateTime<Utc>>,
}

impl HealthReporter {
    pub fn new(layout: StateLayout, alert_after: u32) -> Self {
        // Carry the last-success timestamp across restarts so a restart
        // does not masquerade as a recent success.
        let last_success = Self::load(&layout)
            .ok()
            .flatten()
            .and_then(|status| status.last_success);
        Self {
            layout,
            alert_after,
            consecutive_failures: 0,
            last_success,
        }
    }

    /// Record a fully successful cycle: resets the failure streak.
    pub fn record_success(&mut self) -> Result<HealthStatus> {
        self.consecutive_failures = 0;
        self.last_success = Some(Utc::now());
        self.write(HealthState::Ok, None)
    }

    /// Record a failing cycle. Escalates to alert when the streak reaches
    /// the threshold, or immediately for fatal conditions.
    pub fn record_failure(&mut self, reason: &str, fatal: bool) -> Result<HealthStatus> {
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        let alerting = fatal || self.consecutive_failures >= self.alert_after;
        if alerting {
            warn!(
                reason,
                consecutive = self.consecutive_failures,
                "health status flipped to alert"
            );
            self.write(HealthState::Alert, Some(reason.to_string()))
        } else {
            self.write(HealthState::Ok, Some(reason.to_string()))
        }
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    fn write(&self, status: HealthState, reason: Option<String>) -> Result<HealthStatus> {
        let record = HealthStatus {
            status,
            reason,
            last_success: self.last_success,
        };
        atomic_write(
            &self.layout.health_path(),
            serde_json::to_vec_pretty(&record)?.as_slice(),
        )?;
        Ok(record)
    }

    pub fn load(layout: &StateLayout) -> Result<Option<HealthStatus>> {
        let path = layout.health_path();
        if !path.exists() {
            return Ok(None);
        }
        let raw = std::fs::read(&path)?;
        Ok(Some(serde_json::from_slice(&raw)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_success_resets_streak() {
        let dir = tempfile::tempdir().unwrap();
        let layout = StateLayout::new(dir.path());
        let mut reporter = HealthReporter::new(layout.clone(), 3);

        reporter.record_failure("network timeout", false).unwrap();
        reporter.record_failure("network timeout", false).unwrap();
        assert_eq!(reporter.consecutive_failures(), 2);

        let status = reporter.record_success().unwrap();
        assert!(status.is_ok());
        assert_eq!(reporter.consecutive_failures(), 0);
        assert!(status.last_success.is_some());
    }

    #[test]
    fn test_alert_after_threshold() {
        let dir = tempfile::tempdir().unwrap();
        let layout = StateLayout::new(dir.path());
        let mut reporter = HealthReporter::new(layout.clone(), 3);

        let s1 = reporter.record_failure("no container", false).unwrap();
        let s2 = reporter.record_failure("no container", false).unwrap();
        assert!(s1.is_ok());
        assert!(s2.is_ok());

        let s3 = reporter.record_failure("no container", false).unwrap();
        assert_eq!(s3.status, HealthState::Alert);
        assert_eq!(s3.reason.as_deref(), Some("no container"));

        let loaded = HealthReporter::load(&layout).unwrap().unwrap();
        assert_eq!(loaded.status, HealthState::Alert);
    }

    #[test]
    fn test_fatal_alerts_immediately() {
        let dir = tempfile::tempdir().unwrap();
        let layout = StateLayout::new(dir.path());
        let mut reporter = HealthReporter::new(layout, 5);

        let status = reporter.record_failure("no credentials", true).unwrap();
        assert_eq!(status.status, HealthState::Alert);
    }

    #[test]
    fn test_last_success_survives_restart() {
        let dir = tempfile::tempdir().unwrap();
        let layout = StateLayout::new(dir.path());

        let mut reporter = HealthReporter::new(layout.clone(), 3);
        let status = reporter.record_success().unwrap();
        let stamp = status.last_success.unwrap();

        // New reporter instance, as after a process restart.
        let mut restarted = HealthReporter::new(layout, 3);
        let status = restarted.record_failure("transient", false).unwrap();
        assert_eq!(status.last_success, Some(stamp));
    }
}
