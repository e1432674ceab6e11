//! Tile Sync Engine
//!
//! This module keeps a tile-partitioned replica of markers and reviews in
//! step with the remote service:
//! - Status negotiation deciding sync, export, delete or nothing per tile
//! - Paged incremental sync with cursor advancement and a no-progress guard
//! - Overflow fallback to bulk export
//! - Verified, atomic snapshot installs
//! - Single-flight cycles driven by a periodic or manual scheduler

pub mod config;
pub mod executor;
pub mod export;
pub mod negotiator;
pub mod observer;
pub mod orchestrator;
pub mod scheduler;
pub mod state;

// Re-export main types
pub use config::{SyncConfig, MAX_UPDATE_INTERVAL_MINS, MIN_UPDATE_INTERVAL_MINS};
pub use executor::TileSyncExecutor;
pub use export::{ExportOutcome, ExportPipeline};
pub use negotiator::SyncStatusNegotiator;
pub use observer::{SyncEvent, SyncObserver};
pub use orchestrator::SyncOrchestrator;
pub use scheduler::{SyncMode, SyncRequest, SyncScheduler, SyncSchedulerHandle};
pub use state::{CycleOutcome, CyclePhase, CycleReport, SyncOutcome};
