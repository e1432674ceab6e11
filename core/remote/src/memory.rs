//! In-memory remote service for testing.

use async_trait::async_trait;
use bytes::Bytes;
use flate2::write::GzEncoder;
use flate2::Compression;
use std::collections::{HashMap, VecDeque};
use std::io::Write;
use std::sync::{Mutex, MutexGuard, PoisonError};

use tilesync_common::{
    md5_hex, BoundingBox, DataClass, Error, Result, SyncRecord, SyncStrategy, TileCoordinate,
    TileSnapshot, TileStrategies,
};

use crate::contract::{ExportFile, ExportManifestEntry, SyncStatusRequest, SyncStatusResponse};
use crate::service::RemoteSyncService;

/// What the fake server answers to one incremental page request.
#[derive(Debug, Clone)]
pub enum ScriptedPage {
    /// A page of records.
    Records(Vec<SyncRecord>),
    /// The 303 "too large, export instead" answer.
    Overflow,
    /// A server error.
    Failure(String),
}

/// A page request as received by the fake server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageRequest {
    pub tile: TileCoordinate,
    pub class: DataClass,
    pub cursor: Option<String>,
}

#[derive(Default)]
struct State {
    discoverable: Vec<TileCoordinate>,
    strategies: HashMap<TileCoordinate, TileStrategies>,
    status_failure: Option<String>,
    pages: HashMap<(TileCoordinate, DataClass), VecDeque<ScriptedPage>>,
    repeating: HashMap<(TileCoordinate, DataClass), ScriptedPage>,
    manifests: HashMap<TileCoordinate, ExportManifestEntry>,
    files: HashMap<String, Bytes>,
    status_requests: Vec<Vec<SyncStatusRequest>>,
    page_requests: Vec<PageRequest>,
    manifest_requests: Vec<Vec<TileCoordinate>>,
    downloads: Vec<String>,
}

/// Scriptable in-process stand-in for the remote service.
///
/// Tests configure strategies, queue pages and publish snapshots, then
/// inspect the requests the engine made. Unscripted tiles negotiate to
/// `None` and unscripted page requests return an empty page.
#[derive(Default)]
pub struct MemoryRemote {
    state: Mutex<State>,
}

/// Gzip-compress `data` the way export files are shipped.
pub fn gzip(data: &[u8]) -> Result<Vec<u8>> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data)?;
    Ok(encoder.finish()?)
}

impl MemoryRemote {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Tiles returned by discovery when they fall inside a requested box.
    pub fn set_discoverable(&self, tiles: impl IntoIterator<Item = TileCoordinate>) {
        self.state().discoverable = tiles.into_iter().collect();
    }

    /// Strategies negotiated for `tile` from now on.
    pub fn set_strategies(&self, tile: TileCoordinate, markers: SyncStrategy, reviews: SyncStrategy) {
        self.state()
            .strategies
            .insert(tile, TileStrategies::new(markers, reviews));
    }

    /// Forget all strategies; every tile negotiates to `None` again.
    pub fn reset_strategies(&self) {
        self.state().strategies.clear();
    }

    /// Make status negotiation fail (or succeed again with `None`).
    pub fn set_status_failure(&self, failure: Option<&str>) {
        self.state().status_failure = failure.map(str::to_string);
    }

    /// Queue an answer for the next page request of a tile/data class.
    pub fn push_page(&self, tile: TileCoordinate, class: DataClass, page: ScriptedPage) {
        self.state()
            .pages
            .entry((tile, class))
            .or_default()
            .push_back(page);
    }

    /// Answer used once the queue for a tile/data class is exhausted.
    pub fn repeat_page(&self, tile: TileCoordinate, class: DataClass, page: ScriptedPage) {
        self.state().repeating.insert((tile, class), page);
    }

    /// Compress and host a snapshot, returning its manifest entry.
    pub fn publish_snapshot(&self, snapshot: &TileSnapshot) -> Result<ExportManifestEntry> {
        let compressed = gzip(&snapshot.to_vec()?)?;
        let tile = snapshot.tile();
        let url = format!("memory://exports/{}_{}.json.gz", tile.tile_x, tile.tile_y);

        let entry = ExportManifestEntry {
            tile_x: tile.tile_x,
            tile_y: tile.tile_y,
            zip: None,
            gzip: ExportFile {
                file_size: compressed.len() as u64,
                md5_hash: md5_hex(&compressed),
                url: url.clone(),
            },
        };

        let mut state = self.state();
        state.files.insert(url, Bytes::from(compressed));
        state.manifests.insert(tile, entry.clone());
        Ok(entry)
    }

    /// Replace the manifest entry served for a tile.
    pub fn set_manifest(&self, entry: ExportManifestEntry) {
        self.state().manifests.insert(entry.tile(), entry);
    }

    /// Host raw bytes at `url`.
    pub fn host_file(&self, url: impl Into<String>, data: Vec<u8>) {
        self.state().files.insert(url.into(), Bytes::from(data));
    }

    pub fn status_requests(&self) -> Vec<Vec<SyncStatusRequest>> {
        self.state().status_requests.clone()
    }

    pub fn page_requests(&self) -> Vec<PageRequest> {
        self.state().page_requests.clone()
    }

    /// Page requests made for one tile/data class.
    pub fn page_requests_for(&self, tile: TileCoordinate, class: DataClass) -> Vec<PageRequest> {
        self.state()
            .page_requests
            .iter()
            .filter(|r| r.tile == tile && r.class == class)
            .cloned()
            .collect()
    }

    pub fn manifest_requests(&self) -> Vec<Vec<TileCoordinate>> {
        self.state().manifest_requests.clone()
    }

    pub fn downloads(&self) -> Vec<String> {
        self.state().downloads.clone()
    }
}

#[async_trait]
impl RemoteSyncService for MemoryRemote {
    fn name(&self) -> &str {
        "memory"
    }

    async fn sync_status(
        &self,
        _local_version: &str,
        requests: &[SyncStatusRequest],
    ) -> Result<Vec<SyncStatusResponse>> {
        let mut state = self.state();
        state.status_requests.push(requests.to_vec());

        if let Some(failure) = &state.status_failure {
            return Err(Error::Network(failure.clone()));
        }

        Ok(requests
            .iter()
            .map(|request| {
                let tile = request.tile();
                let strategies = state.strategies.get(&tile).copied().unwrap_or_default();
                SyncStatusResponse::new(tile, strategies)
            })
            .collect())
    }

    async fn discover_tiles(&self, boxes: &[BoundingBox]) -> Result<Vec<TileCoordinate>> {
        let state = self.state();
        Ok(state
            .discoverable
            .iter()
            .filter(|tile| boxes.iter().any(|bbox| bbox.intersects(tile)))
            .copied()
            .collect())
    }

    async fn fetch_page(
        &self,
        tile: TileCoordinate,
        class: DataClass,
        cursor: Option<&str>,
    ) -> Result<Vec<SyncRecord>> {
        let mut state = self.state();
        state.page_requests.push(PageRequest {
            tile,
            class,
            cursor: cursor.map(str::to_string),
        });

        let queued = state
            .pages
            .get_mut(&(tile, class))
            .and_then(VecDeque::pop_front);
        let page = queued.or_else(|| state.repeating.get(&(tile, class)).cloned());

        match page {
            Some(ScriptedPage::Records(records)) => Ok(records),
            Some(ScriptedPage::Overflow) => Err(Error::Overflow(format!("tile {} {}", tile, class))),
            Some(ScriptedPage::Failure(message)) => Err(Error::Http {
                status: 500,
                message,
            }),
            None => Ok(Vec::new()),
        }
    }

    async fn export_manifest(&self, tiles: &[TileCoordinate]) -> Result<Vec<ExportManifestEntry>> {
        let mut state = self.state();
        state.manifest_requests.push(tiles.to_vec());
        Ok(tiles
            .iter()
            .filter_map(|tile| state.manifests.get(tile).cloned())
            .collect())
    }

    async fn download(&self, url: &str) -> Result<Bytes> {
        let mut state = self.state();
        state.downloads.push(url.to_string());
        state
            .files
            .get(url)
            .cloned()
            .ok_or_else(|| Error::NotFound(url.to_string()))
    }
}
