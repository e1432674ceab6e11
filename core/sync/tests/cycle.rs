//! End-to-end sync cycles against the in-memory remote.

use async_trait::async_trait;
use bytes::Bytes;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

use tilesync_common::{
    BoundingBox, DataClass, Error, Result, SyncRecord, SyncStrategy, TileCoordinate, TileCursors,
    TileSnapshot,
};
use tilesync_remote::{
    ExportManifestEntry, MemoryRemote, RemoteSyncService, ScriptedPage, SyncStatusRequest,
    SyncStatusResponse,
};
use tilesync_store::{LocalTileStore, MemoryTileStore, TileStore};
use tilesync_sync::{CycleOutcome, CyclePhase, CycleReport, SyncConfig, SyncEvent, SyncOrchestrator};

const QUIET: TileCoordinate = TileCoordinate::new(1, 2);
const SYNCED: TileCoordinate = TileCoordinate::new(3, 4);
const EXPORTED: TileCoordinate = TileCoordinate::new(5, 6);
const START: &str = "2023-01-01T00:00:00Z";

fn records(first_id: i64, count: usize, stamp: &str) -> Vec<SyncRecord> {
    (0..count as i64)
        .map(|i| {
            SyncRecord::new(first_id + i, stamp)
                .with_field("name", format!("poi {}", first_id + i).into())
        })
        .collect()
}

fn snapshot(tile: TileCoordinate, markers: usize, reviews: usize) -> TileSnapshot {
    TileSnapshot {
        tile_x: tile.tile_x,
        tile_y: tile.tile_y,
        marker_last_modified: Some("2023-03-01T00:00:00Z".into()),
        review_last_modified: (reviews > 0).then(|| "2023-03-02T00:00:00Z".to_string()),
        markers: records(1, markers, "2023-03-01T00:00:00Z"),
        reviews: records(1, reviews, "2023-03-02T00:00:00Z"),
    }
}

/// Seed a tile with one marker and one review at `START`.
async fn seed(store: &dyn TileStore, tile: TileCoordinate) {
    for class in DataClass::ALL {
        store
            .apply_page(tile, class, vec![SyncRecord::new(900, START)])
            .await
            .unwrap();
    }
}

fn orchestrator(store: Arc<dyn TileStore>, remote: Arc<dyn RemoteSyncService>) -> SyncOrchestrator {
    orchestrator_with(store, remote, SyncConfig::default())
}

fn orchestrator_with(
    store: Arc<dyn TileStore>,
    remote: Arc<dyn RemoteSyncService>,
    config: SyncConfig,
) -> SyncOrchestrator {
    let orchestrator = SyncOrchestrator::new(store, remote, config).unwrap();
    orchestrator
        .set_bounding_boxes(vec![BoundingBox::world()])
        .unwrap();
    orchestrator
}

async fn completed(orchestrator: &SyncOrchestrator) -> CycleReport {
    match orchestrator.run_cycle().await.unwrap() {
        CycleOutcome::Completed(report) => report,
        other => panic!("cycle did not complete: {:?}", other),
    }
}

#[tokio::test]
async fn test_mixed_strategies_in_one_cycle() {
    let store = Arc::new(MemoryTileStore::new());
    let remote = Arc::new(MemoryRemote::new());
    for tile in [QUIET, SYNCED, EXPORTED] {
        seed(store.as_ref(), tile).await;
    }
    remote.set_strategies(QUIET, SyncStrategy::None, SyncStrategy::None);
    remote.set_strategies(SYNCED, SyncStrategy::Sync, SyncStrategy::None);
    remote.set_strategies(EXPORTED, SyncStrategy::Export, SyncStrategy::None);
    remote.push_page(
        SYNCED,
        DataClass::Markers,
        ScriptedPage::Records(records(1, 40, "2023-02-01T00:00:00Z")),
    );
    remote.publish_snapshot(&snapshot(EXPORTED, 12, 3)).unwrap();

    let orchestrator = orchestrator(store.clone(), remote.clone());
    let report = completed(&orchestrator).await;

    assert_eq!(report.tiles_negotiated, 3);
    assert_eq!(report.classes_synced, 1);
    assert_eq!(report.classes_failed, 0);
    assert_eq!(report.exports_requested, 1);
    assert_eq!(report.exports_installed, 1);
    assert!(report.completed_at.is_some());

    // Negotiation carried every tile with its cursors.
    let negotiated = &remote.status_requests()[0];
    assert_eq!(negotiated.len(), 3);
    assert!(negotiated
        .iter()
        .all(|r| r.poi_date_last_modified.as_deref() == Some(START)));

    // Only the synced tile was paged, starting from its cursor.
    let pages = remote.page_requests();
    assert_eq!(pages.len(), 1);
    assert_eq!(pages[0].tile, SYNCED);
    assert_eq!(pages[0].cursor.as_deref(), Some(START));
    assert_eq!(
        store.cursor(SYNCED, DataClass::Markers).await.unwrap().as_deref(),
        Some("2023-02-01T00:00:00Z")
    );
    assert_eq!(store.records(SYNCED, DataClass::Markers).await.unwrap().len(), 41);

    // The exported tile now holds exactly the snapshot.
    assert_eq!(store.records(EXPORTED, DataClass::Markers).await.unwrap().len(), 12);
    assert_eq!(store.records(EXPORTED, DataClass::Reviews).await.unwrap().len(), 3);
    assert_eq!(
        store.cursor(EXPORTED, DataClass::Reviews).await.unwrap().as_deref(),
        Some("2023-03-02T00:00:00Z")
    );

    // The quiet tile is untouched.
    assert_eq!(
        store.cursor(QUIET, DataClass::Markers).await.unwrap().as_deref(),
        Some(START)
    );
    assert_eq!(orchestrator.phase(), CyclePhase::Idle);
}

#[tokio::test]
async fn test_overflow_falls_back_to_export() {
    let store = Arc::new(MemoryTileStore::new());
    let remote = Arc::new(MemoryRemote::new());
    seed(store.as_ref(), SYNCED).await;
    remote.set_strategies(SYNCED, SyncStrategy::Sync, SyncStrategy::None);
    remote.push_page(SYNCED, DataClass::Markers, ScriptedPage::Overflow);
    remote.publish_snapshot(&snapshot(SYNCED, 250, 0)).unwrap();

    let report = completed(&orchestrator(store.clone(), remote.clone())).await;

    assert_eq!(report.classes_synced, 0);
    assert_eq!(report.exports_requested, 1);
    assert_eq!(report.exports_installed, 1);
    assert_eq!(remote.manifest_requests(), vec![vec![SYNCED]]);
    assert_eq!(store.records(SYNCED, DataClass::Markers).await.unwrap().len(), 250);
    // The snapshot replaced the seeded review as well.
    assert!(store.records(SYNCED, DataClass::Reviews).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_corrupt_export_keeps_previous_tile() {
    let store = Arc::new(MemoryTileStore::new());
    let remote = Arc::new(MemoryRemote::new());
    seed(store.as_ref(), SYNCED).await;
    remote.set_strategies(SYNCED, SyncStrategy::Export, SyncStrategy::None);
    remote.set_strategies(EXPORTED, SyncStrategy::Export, SyncStrategy::None);
    seed(store.as_ref(), EXPORTED).await;

    remote.publish_snapshot(&snapshot(EXPORTED, 4, 0)).unwrap();
    let mut bad: ExportManifestEntry = remote.publish_snapshot(&snapshot(SYNCED, 4, 0)).unwrap();
    bad.gzip.md5_hash = "abc123".into();
    remote.set_manifest(bad);

    let report = completed(&orchestrator(store.clone(), remote.clone())).await;

    assert_eq!(report.exports_requested, 2);
    assert_eq!(report.exports_installed, 1);
    assert_eq!(report.exports_failed, 1);

    let kept = store.records(SYNCED, DataClass::Markers).await.unwrap();
    assert_eq!(kept.len(), 1);
    assert_eq!(kept[0].id, 900);
    assert_eq!(
        store.cursor(SYNCED, DataClass::Markers).await.unwrap().as_deref(),
        Some(START)
    );
    assert_eq!(store.records(EXPORTED, DataClass::Markers).await.unwrap().len(), 4);
}

#[tokio::test]
async fn test_marker_delete_drops_whole_tile() {
    let store = Arc::new(MemoryTileStore::new());
    let remote = Arc::new(MemoryRemote::new());
    seed(store.as_ref(), SYNCED).await;
    remote.set_strategies(SYNCED, SyncStrategy::Delete, SyncStrategy::Sync);

    let report = completed(&orchestrator(store.clone(), remote.clone())).await;

    assert_eq!(report.classes_deleted, 1);
    assert_eq!(report.classes_failed, 0);
    assert!(remote.page_requests().is_empty());
    assert!(store.snapshot_of(SYNCED).await.unwrap().is_none());
    assert!(store.cursors(SYNCED).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_review_delete_survives_marker_export() {
    let store = Arc::new(MemoryTileStore::new());
    let remote = Arc::new(MemoryRemote::new());
    seed(store.as_ref(), EXPORTED).await;
    remote.set_strategies(EXPORTED, SyncStrategy::Export, SyncStrategy::Delete);
    remote.publish_snapshot(&snapshot(EXPORTED, 5, 7)).unwrap();

    let report = completed(&orchestrator(store.clone(), remote.clone())).await;

    assert_eq!(report.classes_deleted, 1);
    assert_eq!(report.exports_installed, 1);
    assert_eq!(store.records(EXPORTED, DataClass::Markers).await.unwrap().len(), 5);
    assert!(store.records(EXPORTED, DataClass::Reviews).await.unwrap().is_empty());
    assert_eq!(store.cursor(EXPORTED, DataClass::Reviews).await.unwrap(), None);
}

#[tokio::test]
async fn test_review_delete_keeps_markers() {
    let store = Arc::new(MemoryTileStore::new());
    let remote = Arc::new(MemoryRemote::new());
    seed(store.as_ref(), SYNCED).await;
    remote.set_strategies(SYNCED, SyncStrategy::None, SyncStrategy::Delete);

    completed(&orchestrator(store.clone(), remote.clone())).await;

    assert_eq!(store.records(SYNCED, DataClass::Markers).await.unwrap().len(), 1);
    assert!(store.records(SYNCED, DataClass::Reviews).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_repeated_cycle_changes_nothing() {
    let store = Arc::new(MemoryTileStore::new());
    let remote = Arc::new(MemoryRemote::new());
    seed(store.as_ref(), SYNCED).await;
    remote.set_strategies(SYNCED, SyncStrategy::Sync, SyncStrategy::Sync);
    remote.push_page(
        SYNCED,
        DataClass::Reviews,
        ScriptedPage::Records(records(10, 5, "2023-01-10T00:00:00Z")),
    );

    let orchestrator = orchestrator(store.clone(), remote.clone());
    completed(&orchestrator).await;
    let after_first = store.snapshot_of(SYNCED).await.unwrap().unwrap();

    let second = completed(&orchestrator).await;
    let after_second = store.snapshot_of(SYNCED).await.unwrap().unwrap();

    assert_eq!(second.classes_synced, 2);
    assert_eq!(after_first.cursors, after_second.cursors);
    assert_eq!(
        after_first.records(DataClass::Reviews),
        after_second.records(DataClass::Reviews)
    );
    // The second cycle asked from the advanced cursor.
    let reviews = remote.page_requests_for(SYNCED, DataClass::Reviews);
    assert_eq!(reviews.len(), 2);
    assert_eq!(reviews[1].cursor.as_deref(), Some("2023-01-10T00:00:00Z"));
}

#[tokio::test]
async fn test_stalled_full_page_requests_once() {
    let store = Arc::new(MemoryTileStore::new());
    let remote = Arc::new(MemoryRemote::new());
    seed(store.as_ref(), SYNCED).await;
    remote.set_strategies(SYNCED, SyncStrategy::Sync, SyncStrategy::None);
    remote.repeat_page(
        SYNCED,
        DataClass::Markers,
        ScriptedPage::Records(records(1, 100, START)),
    );

    let report = completed(&orchestrator(store.clone(), remote.clone())).await;

    assert_eq!(report.classes_synced, 1);
    assert_eq!(remote.page_requests_for(SYNCED, DataClass::Markers).len(), 1);
}

#[tokio::test]
async fn test_failed_sync_is_isolated() {
    let store = Arc::new(MemoryTileStore::new());
    let remote = Arc::new(MemoryRemote::new());
    seed(store.as_ref(), SYNCED).await;
    seed(store.as_ref(), QUIET).await;
    remote.set_strategies(SYNCED, SyncStrategy::Sync, SyncStrategy::None);
    remote.set_strategies(QUIET, SyncStrategy::Sync, SyncStrategy::None);
    remote.push_page(SYNCED, DataClass::Markers, ScriptedPage::Failure("busy".into()));
    remote.push_page(
        QUIET,
        DataClass::Markers,
        ScriptedPage::Records(records(1, 3, "2023-01-04T00:00:00Z")),
    );

    let report = completed(&orchestrator(store.clone(), remote.clone())).await;

    assert_eq!(report.classes_synced, 1);
    assert_eq!(report.classes_failed, 1);
    assert_eq!(
        store.cursor(SYNCED, DataClass::Markers).await.unwrap().as_deref(),
        Some(START)
    );
    assert_eq!(
        store.cursor(QUIET, DataClass::Markers).await.unwrap().as_deref(),
        Some("2023-01-04T00:00:00Z")
    );
}

#[tokio::test]
async fn test_negotiation_failure_modifies_nothing() {
    let store = Arc::new(MemoryTileStore::new());
    let remote = Arc::new(MemoryRemote::new());
    seed(store.as_ref(), SYNCED).await;
    remote.set_strategies(SYNCED, SyncStrategy::Delete, SyncStrategy::Delete);
    remote.set_status_failure(Some("unreachable"));

    let orchestrator = orchestrator(store.clone(), remote.clone());
    assert!(orchestrator.run_cycle().await.is_err());

    assert!(store.snapshot_of(SYNCED).await.unwrap().is_some());
    assert!(remote.page_requests().is_empty());
    assert_eq!(orchestrator.phase(), CyclePhase::Idle);
}

#[tokio::test]
async fn test_empty_store_discovers_and_exports() {
    let store = Arc::new(MemoryTileStore::new());
    let remote = Arc::new(MemoryRemote::new());
    remote.set_discoverable([EXPORTED]);
    remote.set_strategies(EXPORTED, SyncStrategy::Export, SyncStrategy::Export);
    remote.publish_snapshot(&snapshot(EXPORTED, 2, 2)).unwrap();

    let orchestrator = orchestrator(store.clone(), remote.clone());
    let report = completed(&orchestrator).await;

    assert_eq!(
        remote.status_requests()[0],
        vec![SyncStatusRequest::unsynced(EXPORTED)]
    );
    assert_eq!(report.exports_requested, 1);
    assert_eq!(report.exports_installed, 1);
    assert_eq!(store.version().await.unwrap(), "2.0.0.0");
}

#[tokio::test]
async fn test_observer_sees_cycle_progress() {
    let store = Arc::new(MemoryTileStore::new());
    let remote = Arc::new(MemoryRemote::new());
    seed(store.as_ref(), SYNCED).await;
    remote.set_strategies(SYNCED, SyncStrategy::Sync, SyncStrategy::None);

    let orchestrator = orchestrator(store, remote);
    let (tx, mut rx) = mpsc::unbounded_channel::<SyncEvent>();
    orchestrator.add_observer(Arc::new(tx));

    completed(&orchestrator).await;

    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    assert!(matches!(events.first(), Some(SyncEvent::CycleStarted)));
    assert!(events.iter().any(|e| matches!(
        e,
        SyncEvent::ClassSynced {
            tile: SYNCED,
            class: DataClass::Markers,
            ..
        }
    )));
    assert!(events
        .iter()
        .any(|e| matches!(e, SyncEvent::CycleCompleted(_))));
    assert!(matches!(
        events.last(),
        Some(SyncEvent::PhaseChanged(CyclePhase::Idle))
    ));
}

#[tokio::test]
async fn test_cycle_against_local_store_persists() {
    let dir = tempfile::tempdir().unwrap();
    let remote = Arc::new(MemoryRemote::new());
    {
        let store = Arc::new(LocalTileStore::new(dir.path()).unwrap());
        seed(store.as_ref(), SYNCED).await;
        remote.set_strategies(SYNCED, SyncStrategy::Sync, SyncStrategy::None);
        remote.set_strategies(EXPORTED, SyncStrategy::Export, SyncStrategy::None);
        remote.publish_snapshot(&snapshot(EXPORTED, 6, 0)).unwrap();
        remote.push_page(
            SYNCED,
            DataClass::Markers,
            ScriptedPage::Records(records(1, 20, "2023-02-01T00:00:00Z")),
        );
        seed(store.as_ref(), EXPORTED).await;

        let report = completed(&orchestrator(store, remote.clone())).await;
        assert_eq!(report.classes_synced, 1);
        assert_eq!(report.exports_installed, 1);
    }

    let reopened = LocalTileStore::new(dir.path()).unwrap();
    assert_eq!(
        reopened.cursor(SYNCED, DataClass::Markers).await.unwrap().as_deref(),
        Some("2023-02-01T00:00:00Z")
    );
    assert_eq!(reopened.records(EXPORTED, DataClass::Markers).await.unwrap().len(), 6);
}

/// Remote whose page requests never finish in time.
struct StalledRemote {
    inner: MemoryRemote,
}

#[async_trait]
impl RemoteSyncService for StalledRemote {
    fn name(&self) -> &str {
        "stalled"
    }

    async fn sync_status(
        &self,
        local_version: &str,
        requests: &[SyncStatusRequest],
    ) -> Result<Vec<SyncStatusResponse>> {
        self.inner.sync_status(local_version, requests).await
    }

    async fn discover_tiles(&self, boxes: &[BoundingBox]) -> Result<Vec<TileCoordinate>> {
        self.inner.discover_tiles(boxes).await
    }

    async fn fetch_page(
        &self,
        _tile: TileCoordinate,
        _class: DataClass,
        _cursor: Option<&str>,
    ) -> Result<Vec<SyncRecord>> {
        tokio::time::sleep(Duration::from_secs(30)).await;
        Ok(Vec::new())
    }

    async fn export_manifest(&self, tiles: &[TileCoordinate]) -> Result<Vec<ExportManifestEntry>> {
        self.inner.export_manifest(tiles).await
    }

    async fn download(&self, url: &str) -> Result<Bytes> {
        self.inner.download(url).await
    }
}

#[tokio::test]
async fn test_slow_tile_times_out_as_failure() {
    let store = Arc::new(MemoryTileStore::new());
    seed(store.as_ref(), SYNCED).await;
    let inner = MemoryRemote::new();
    inner.set_strategies(SYNCED, SyncStrategy::Sync, SyncStrategy::None);
    let remote = Arc::new(StalledRemote { inner });

    let config = SyncConfig {
        tile_timeout_secs: Some(1),
        ..SyncConfig::default()
    };
    let report = completed(&orchestrator_with(store, remote, config)).await;

    assert_eq!(report.classes_synced, 0);
    assert_eq!(report.classes_failed, 1);
}

/// Store that refuses to drop whole tiles.
struct UndeletableStore {
    inner: MemoryTileStore,
}

#[async_trait]
impl TileStore for UndeletableStore {
    fn name(&self) -> &str {
        "undeletable"
    }

    async fn version(&self) -> Result<String> {
        self.inner.version().await
    }

    async fn cursor(&self, tile: TileCoordinate, class: DataClass) -> Result<Option<String>> {
        self.inner.cursor(tile, class).await
    }

    async fn cursors(&self, tile: TileCoordinate) -> Result<TileCursors> {
        self.inner.cursors(tile).await
    }

    async fn set_cursor(&self, tile: TileCoordinate, class: DataClass, cursor: &str) -> Result<()> {
        self.inner.set_cursor(tile, class, cursor).await
    }

    async fn apply_page(
        &self,
        tile: TileCoordinate,
        class: DataClass,
        records: Vec<SyncRecord>,
    ) -> Result<usize> {
        self.inner.apply_page(tile, class, records).await
    }

    async fn delete_class(&self, tile: TileCoordinate, class: DataClass) -> Result<()> {
        self.inner.delete_class(tile, class).await
    }

    async fn delete_tile(&self, tile: TileCoordinate) -> Result<()> {
        Err(Error::Store(format!("tile {} is locked", tile)))
    }

    async fn install_snapshot(&self, tile: TileCoordinate, snapshot: Vec<u8>) -> Result<()> {
        self.inner.install_snapshot(tile, snapshot).await
    }

    async fn tiles_in_bbox(&self, bbox: &BoundingBox) -> Result<Vec<(TileCoordinate, TileCursors)>> {
        self.inner.tiles_in_bbox(bbox).await
    }

    async fn records(&self, tile: TileCoordinate, class: DataClass) -> Result<Vec<SyncRecord>> {
        self.inner.records(tile, class).await
    }
}

#[tokio::test]
async fn test_failed_tile_delete_counts_nothing_deleted() {
    let inner = MemoryTileStore::new();
    seed(&inner, SYNCED).await;
    let store = Arc::new(UndeletableStore { inner });
    let remote = Arc::new(MemoryRemote::new());
    remote.set_strategies(SYNCED, SyncStrategy::Delete, SyncStrategy::Delete);

    let report = completed(&orchestrator(store.clone(), remote)).await;

    assert_eq!(report.classes_deleted, 0);
    assert_eq!(report.classes_failed, 1);
    assert_eq!(store.records(SYNCED, DataClass::Reviews).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_marker_and_review_delete_count_both_classes() {
    let store = Arc::new(MemoryTileStore::new());
    let remote = Arc::new(MemoryRemote::new());
    seed(store.as_ref(), SYNCED).await;
    remote.set_strategies(SYNCED, SyncStrategy::Delete, SyncStrategy::Delete);

    let report = completed(&orchestrator(store.clone(), remote)).await;

    assert_eq!(report.classes_deleted, 2);
    assert_eq!(report.classes_failed, 0);
    assert!(store.snapshot_of(SYNCED).await.unwrap().is_none());
}
