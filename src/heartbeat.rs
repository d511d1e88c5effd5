//! Scheduler liveness heartbeat
//!
//! A timestamped record written after each completed reconciliation cycle.
//! The watchdog reads staleness from this file and nothing else; there is
//! no process-table matching anywhere.

use crate::config::{atomic_write, StateLayout};
use crate::error::Result;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Heartbeat staleness threshold, in scheduler intervals. Beyond this the
/// scheduler is declared dead.
pub const STALE_AFTER_INTERVALS: u32 = 2;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Heartbeat {
    /// Completion time of the last reconciliation cycle
    pub timestamp: DateTime<Utc>,

    /// Process that wrote the beat
    pub pid: u32,

    /// Cycle counter within that process
    pub cycle: u64,
}

impl Heartbeat {
    /// Write a fresh beat. Timestamps never move backwards even if the
    /// clock does: a stored future timestamp is kept.
    pub fn beat(layout: &StateLayout, cycle: u64) -> Result<Self> {
        let now = Utc::now();
        let timestamp = match Self::load(layout)? {
            Some(previous) if previous.timestamp > now => previous.timestamp,
            _ => now,
        };
        let beat = Self {
            timestamp,
            pid: std::process::id(),
            cycle,
        };
        atomic_write(
            &layout.heartbeat_path(),
            serde_json::to_vec_pretty(&beat)?.as_slice(),
        )?;
        Ok(beat)
    }

    /// Load the current heartbeat, if one has ever been written.
    pub fn load(layout: &StateLayout) -> Result<Option<Self>> {
        let path = layout.heartbeat_path();
        if !path.exists() {
            return Ok(None);
        }
        let raw = std::fs::read(&path)?;
        Ok(Some(serde_json::from_slice(&raw)?))
    }

    pub fn age(&self, now: DateTime<Utc>) -> Duration {
        now - self.timestamp
    }

    /// Stale beyond `STALE_AFTER_INTERVALS` scheduler intervals means
    /// "process absent".
    pub fn is_stale(&self, now: DateTime<Utc>, interval_secs: u64) -> bool {
        let threshold = Duration::seconds((interval_secs * STALE_AFTER_INTERVALS as u64) as i64);
        self.age(now) > threshold
    }
}
