//! Progress reporting from the orchestrator to interested layers.

use tokio::sync::mpsc;

use tilesync_common::{DataClass, TileCoordinate};

use crate::state::{CyclePhase, CycleReport, SyncOutcome};

/// Something that happened during a sync cycle.
#[derive(Debug, Clone)]
pub enum SyncEvent {
    CycleStarted,
    PhaseChanged(CyclePhase),
    ClassSynced {
        tile: TileCoordinate,
        class: DataClass,
        outcome: SyncOutcome,
    },
    ClassDeleted {
        tile: TileCoordinate,
        class: DataClass,
    },
    TileExported {
        tile: TileCoordinate,
        error: Option<String>,
    },
    CycleCompleted(CycleReport),
    CycleFailed(String),
    /// A trigger arrived while a cycle was running and was dropped.
    CycleCoalesced,
}

/// Receives sync events. Called inline from the cycle, so keep it cheap.
pub trait SyncObserver: Send + Sync {
    fn on_event(&self, event: &SyncEvent);
}

impl SyncObserver for mpsc::UnboundedSender<SyncEvent> {
    fn on_event(&self, event: &SyncEvent) {
        // Receiver gone means nobody is listening any more.
        let _ = self.send(event.clone());
    }
}
