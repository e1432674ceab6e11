//! Sync engine configuration.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use tilesync_common::{Error, Result};

use crate::scheduler::SyncMode;

/// Shortest allowed automatic update interval.
pub const MIN_UPDATE_INTERVAL_MINS: u64 = 15;

/// Longest allowed automatic update interval, one week.
pub const MAX_UPDATE_INTERVAL_MINS: u64 = 7 * 24 * 60;

/// Configuration for the sync engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Whether cycles run on a timer.
    pub auto_update: bool,
    /// Minutes between automatic cycles.
    pub update_interval_mins: u64,
    /// Most pages fetched for one tile/data class within a cycle.
    pub max_pages_per_sync: usize,
    /// Most tiles per export manifest request.
    pub export_batch_size: usize,
    /// Time box for a single tile/data class sync.
    pub tile_timeout_secs: Option<u64>,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            auto_update: true,
            update_interval_mins: MIN_UPDATE_INTERVAL_MINS,
            max_pages_per_sync: 1000,
            export_batch_size: 100,
            tile_timeout_secs: None,
        }
    }
}

impl SyncConfig {
    /// Reject settings the engine cannot honor.
    pub fn validate(&self) -> Result<()> {
        if self.update_interval_mins < MIN_UPDATE_INTERVAL_MINS {
            return Err(Error::Config(format!(
                "update_interval_mins must be at least {}, got {}",
                MIN_UPDATE_INTERVAL_MINS, self.update_interval_mins
            )));
        }
        if self.update_interval_mins > MAX_UPDATE_INTERVAL_MINS {
            return Err(Error::Config(format!(
                "update_interval_mins must be at most {}, got {}",
                MAX_UPDATE_INTERVAL_MINS, self.update_interval_mins
            )));
        }
        if self.max_pages_per_sync == 0 {
            return Err(Error::Config("max_pages_per_sync must be positive".to_string()));
        }
        if self.export_batch_size == 0 {
            return Err(Error::Config("export_batch_size must be positive".to_string()));
        }
        if self.tile_timeout_secs == Some(0) {
            return Err(Error::Config("tile_timeout_secs must be positive".to_string()));
        }
        Ok(())
    }

    pub fn update_interval(&self) -> Duration {
        Duration::from_secs(self.update_interval_mins.saturating_mul(60))
    }

    pub fn tile_timeout(&self) -> Option<Duration> {
        self.tile_timeout_secs.map(Duration::from_secs)
    }

    /// Scheduler mode implied by these settings.
    pub fn sync_mode(&self) -> SyncMode {
        if self.auto_update {
            SyncMode::Periodic {
                interval: self.update_interval(),
            }
        } else {
            SyncMode::Manual
        }
    }
}
