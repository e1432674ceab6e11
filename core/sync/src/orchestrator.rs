//! Sync cycle orchestration: negotiate, delete, sync, export.

use futures::stream::{FuturesUnordered, StreamExt};
use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Instant;
use tracing::{debug, error, info, warn};

use tilesync_common::{BoundingBox, DataClass, Result, SyncStrategy, TileCoordinate, TileStrategies};
use tilesync_remote::RemoteSyncService;
use tilesync_store::TileStore;

use crate::config::SyncConfig;
use crate::executor::TileSyncExecutor;
use crate::export::ExportPipeline;
use crate::negotiator::SyncStatusNegotiator;
use crate::observer::{SyncEvent, SyncObserver};
use crate::scheduler::{SyncScheduler, SyncSchedulerHandle};
use crate::state::{CycleOutcome, CyclePhase, CycleReport, SyncOutcome};

/// Runs sync cycles for the configured areas of interest.
///
/// At most one cycle is in flight at a time. A cycle requested while another
/// is running returns [`CycleOutcome::Coalesced`] without doing any work.
pub struct SyncOrchestrator {
    store: Arc<dyn TileStore>,
    negotiator: SyncStatusNegotiator,
    executor: TileSyncExecutor,
    exporter: ExportPipeline,
    bounding_boxes: RwLock<Vec<BoundingBox>>,
    phase: Mutex<CyclePhase>,
    observers: RwLock<Vec<Arc<dyn SyncObserver>>>,
    scheduler: Option<SyncScheduler>,
    config: SyncConfig,
}

impl SyncOrchestrator {
    /// Create an orchestrator with no areas of interest.
    pub fn new(
        store: Arc<dyn TileStore>,
        remote: Arc<dyn RemoteSyncService>,
        config: SyncConfig,
    ) -> Result<Self> {
        config.validate()?;
        info!(
            "Sync orchestrator using store '{}' and remote '{}'",
            store.name(),
            remote.name()
        );

        Ok(Self {
            negotiator: SyncStatusNegotiator::new(store.clone(), remote.clone()),
            executor: TileSyncExecutor::new(
                store.clone(),
                remote.clone(),
                config.max_pages_per_sync,
            ),
            exporter: ExportPipeline::new(store.clone(), remote, config.export_batch_size),
            store,
            bounding_boxes: RwLock::new(Vec::new()),
            phase: Mutex::new(CyclePhase::Idle),
            observers: RwLock::new(Vec::new()),
            scheduler: None,
            config,
        })
    }

    /// Initialize the scheduler and return a handle for running it.
    pub fn init_scheduler(&mut self) -> SyncSchedulerHandle {
        let (scheduler, handle) = SyncScheduler::new(self.config.sync_mode());
        self.scheduler = Some(scheduler);
        handle
    }

    /// Get the scheduler for requesting cycles.
    pub fn scheduler(&self) -> Option<&SyncScheduler> {
        self.scheduler.as_ref()
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Replace the areas of interest. Takes effect from the next cycle.
    pub fn set_bounding_boxes(&self, boxes: Vec<BoundingBox>) -> Result<()> {
        for bbox in &boxes {
            bbox.validate()?;
        }
        *self
            .bounding_boxes
            .write()
            .unwrap_or_else(PoisonError::into_inner) = boxes;
        Ok(())
    }

    pub fn bounding_boxes(&self) -> Vec<BoundingBox> {
        self.bounding_boxes
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn add_observer(&self, observer: Arc<dyn SyncObserver>) {
        self.observers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(observer);
    }

    /// Current phase; `Idle` between cycles.
    pub fn phase(&self) -> CyclePhase {
        *self.phase.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Run one sync cycle.
    ///
    /// Tile-level failures are counted in the report and retried next cycle.
    ///
    /// # Errors
    /// Fails only when negotiation fails; nothing is modified locally then.
    pub async fn run_cycle(&self) -> Result<CycleOutcome> {
        let boxes = self.bounding_boxes();
        if boxes.is_empty() {
            debug!("No areas of interest configured, skipping cycle");
            return Ok(CycleOutcome::NoAreaOfInterest);
        }

        let Some(guard) = CycleGuard::enter(&self.phase) else {
            info!("Sync cycle already running, coalescing request");
            self.emit(&SyncEvent::CycleCoalesced);
            return Ok(CycleOutcome::Coalesced);
        };

        let start = Instant::now();
        info!("Starting sync cycle for {} areas", boxes.len());
        self.emit(&SyncEvent::CycleStarted);
        self.emit(&SyncEvent::PhaseChanged(CyclePhase::Negotiating));

        let plan = match self.negotiate(&boxes).await {
            Ok(plan) => plan,
            Err(e) => {
                error!("Sync status negotiation failed: {}", e);
                drop(guard);
                self.emit(&SyncEvent::CycleFailed(e.to_string()));
                self.emit(&SyncEvent::PhaseChanged(CyclePhase::Idle));
                return Err(e);
            }
        };

        let mut report = CycleReport {
            tiles_negotiated: plan.len(),
            ..CycleReport::default()
        };

        self.enter_phase(&guard, CyclePhase::Syncing);

        let mut review_deletes = HashSet::new();
        let mut dropped_tiles = HashSet::new();
        for (tile, strategies) in &plan {
            self.apply_deletes(*tile, strategies, &mut report, &mut review_deletes, &mut dropped_tiles)
                .await;
        }

        let mut exports: HashSet<TileCoordinate> = HashSet::new();
        let mut running = FuturesUnordered::new();
        for (tile, strategies) in &plan {
            for class in DataClass::ALL {
                match strategies.get(class) {
                    SyncStrategy::Sync | SyncStrategy::Export if dropped_tiles.contains(tile) => {
                        debug!("Tile {} was deleted, skipping {} update", tile, class);
                    }
                    SyncStrategy::Sync => running.push(self.sync_one(*tile, class)),
                    SyncStrategy::Export => {
                        exports.insert(*tile);
                    }
                    SyncStrategy::Delete | SyncStrategy::None => {}
                }
            }
        }

        while let Some((tile, class, outcome)) = running.next().await {
            match outcome {
                SyncOutcome::Success => report.classes_synced += 1,
                SyncOutcome::Fail => report.classes_failed += 1,
                SyncOutcome::ExportRequired => {
                    exports.insert(tile);
                }
            }
            self.emit(&SyncEvent::ClassSynced {
                tile,
                class,
                outcome,
            });
        }

        if !exports.is_empty() {
            self.enter_phase(&guard, CyclePhase::Exporting);
            report.exports_requested = exports.len();

            for outcome in self.exporter.export(&exports).await {
                match &outcome.result {
                    Ok(()) => {
                        report.exports_installed += 1;
                        // The snapshot replaced the whole tile, reviews included.
                        if review_deletes.contains(&outcome.tile) {
                            self.delete_reviews_again(outcome.tile).await;
                        }
                    }
                    Err(_) => report.exports_failed += 1,
                }
                self.emit(&SyncEvent::TileExported {
                    tile: outcome.tile,
                    error: outcome.result.as_ref().err().map(|e| e.to_string()),
                });
            }
        }

        report.duration = start.elapsed();
        report.completed_at = Some(chrono::Utc::now());
        info!(
            "Sync cycle completed in {:?}: {} synced, {} failed, {} deleted, {}/{} exports installed",
            report.duration,
            report.classes_synced,
            report.classes_failed,
            report.classes_deleted,
            report.exports_installed,
            report.exports_requested
        );

        drop(guard);
        self.emit(&SyncEvent::CycleCompleted(report.clone()));
        self.emit(&SyncEvent::PhaseChanged(CyclePhase::Idle));
        Ok(CycleOutcome::Completed(report))
    }

    async fn negotiate(&self, boxes: &[BoundingBox]) -> Result<Vec<(TileCoordinate, TileStrategies)>> {
        let requests = self.negotiator.build_requests(boxes).await?;
        if requests.is_empty() {
            info!("No tiles to negotiate in the configured areas");
            return Ok(Vec::new());
        }

        let version = self.store.version().await?;
        debug!("Negotiating {} tiles at local version {}", requests.len(), version);
        self.negotiator.negotiate(&requests, &version).await
    }

    async fn apply_deletes(
        &self,
        tile: TileCoordinate,
        strategies: &TileStrategies,
        report: &mut CycleReport,
        review_deletes: &mut HashSet<TileCoordinate>,
        dropped_tiles: &mut HashSet<TileCoordinate>,
    ) {
        if strategies.markers == SyncStrategy::Delete {
            // Markers own the tile: deleting them drops reviews too.
            match self.store.delete_tile(tile).await {
                Ok(()) => {
                    info!("Deleted tile {}", tile);
                    report.classes_deleted += 1;
                    if strategies.reviews == SyncStrategy::Delete {
                        report.classes_deleted += 1;
                    }
                    self.emit(&SyncEvent::ClassDeleted {
                        tile,
                        class: DataClass::Markers,
                    });
                }
                Err(e) => {
                    error!("Failed to delete tile {}: {}", tile, e);
                    report.classes_failed += 1;
                }
            }
            dropped_tiles.insert(tile);
            return;
        }

        if strategies.reviews == SyncStrategy::Delete {
            match self.store.delete_class(tile, DataClass::Reviews).await {
                Ok(()) => {
                    info!("Deleted reviews of tile {}", tile);
                    report.classes_deleted += 1;
                    review_deletes.insert(tile);
                    self.emit(&SyncEvent::ClassDeleted {
                        tile,
                        class: DataClass::Reviews,
                    });
                }
                Err(e) => {
                    error!("Failed to delete reviews of tile {}: {}", tile, e);
                    report.classes_failed += 1;
                }
            }
        }
    }

    async fn delete_reviews_again(&self, tile: TileCoordinate) {
        if let Err(e) = self.store.delete_class(tile, DataClass::Reviews).await {
            warn!("Failed to drop exported reviews of tile {}: {}", tile, e);
        }
    }

    async fn sync_one(
        &self,
        tile: TileCoordinate,
        class: DataClass,
    ) -> (TileCoordinate, DataClass, SyncOutcome) {
        let sync = self.executor.sync_class(tile, class, None);
        let outcome = match self.config.tile_timeout() {
            Some(limit) => match tokio::time::timeout(limit, sync).await {
                Ok(outcome) => outcome,
                Err(_) => {
                    warn!("Sync of tile {} {} timed out after {:?}", tile, class, limit);
                    SyncOutcome::Fail
                }
            },
            None => sync.await,
        };
        (tile, class, outcome)
    }

    fn enter_phase(&self, guard: &CycleGuard<'_>, phase: CyclePhase) {
        guard.set(phase);
        self.emit(&SyncEvent::PhaseChanged(phase));
    }

    fn emit(&self, event: &SyncEvent) {
        let observers = self
            .observers
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        for observer in observers.iter() {
            observer.on_event(event);
        }
    }
}

/// Holds the single-flight slot; returns the phase to `Idle` when dropped.
struct CycleGuard<'a> {
    phase: &'a Mutex<CyclePhase>,
}

impl<'a> CycleGuard<'a> {
    fn enter(phase: &'a Mutex<CyclePhase>) -> Option<Self> {
        let mut current = phase.lock().unwrap_or_else(PoisonError::into_inner);
        if *current != CyclePhase::Idle {
            return None;
        }
        *current = CyclePhase::Negotiating;
        Some(Self { phase })
    }

    fn set(&self, next: CyclePhase) {
        *self.phase.lock().unwrap_or_else(PoisonError::into_inner) = next;
    }
}

impl Drop for CycleGuard<'_> {
    fn drop(&mut self) {
        self.set(CyclePhase::Idle);
    }
}
