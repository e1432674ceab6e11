//! Cycle state and outcome types.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use std::time::Duration;

/// Terminal result of syncing one tile/data class incrementally.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum SyncOutcome {
    /// Caught up, or stopped defensively without error.
    Success,
    /// Failed; the pair stays due for the next cycle.
    Fail,
    /// Delta too large; the tile must be exported.
    ExportRequired,
}

impl fmt::Display for SyncOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SyncOutcome::Success => "success",
            SyncOutcome::Fail => "fail",
            SyncOutcome::ExportRequired => "export required",
        };
        f.write_str(name)
    }
}

/// Where the orchestrator is within a cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize)]
pub enum CyclePhase {
    #[default]
    Idle,
    Negotiating,
    Syncing,
    Exporting,
}

/// Counters for one completed cycle.
#[derive(Debug, Clone, Default, Serialize)]
pub struct CycleReport {
    /// Tiles the remote assigned strategies to.
    pub tiles_negotiated: usize,
    /// Tile/data-class pairs that synced successfully.
    pub classes_synced: usize,
    /// Tile/data-class pairs whose sync failed.
    pub classes_failed: usize,
    /// Tile/data-class pairs deleted locally.
    pub classes_deleted: usize,
    /// Tiles sent to the export pipeline.
    pub exports_requested: usize,
    pub exports_installed: usize,
    pub exports_failed: usize,
    pub duration: Duration,
    pub completed_at: Option<DateTime<Utc>>,
}

/// How a request to run a cycle ended.
#[derive(Debug, Clone)]
pub enum CycleOutcome {
    /// The cycle ran to the end; tile-level failures are in the report.
    Completed(CycleReport),
    /// No bounding boxes configured, nothing to do.
    NoAreaOfInterest,
    /// Another cycle was in flight; this trigger was dropped.
    Coalesced,
}

impl CycleOutcome {
    pub fn report(&self) -> Option<&CycleReport> {
        match self {
            CycleOutcome::Completed(report) => Some(report),
            _ => None,
        }
    }
}
