//! Remote sync service trait definition.

use async_trait::async_trait;
use bytes::Bytes;

use tilesync_common::{BoundingBox, DataClass, Result, SyncRecord, TileCoordinate};

use crate::contract::{ExportManifestEntry, SyncStatusRequest, SyncStatusResponse};

/// Most records the incremental sync endpoint returns per page.
pub const MAX_RESULT_COUNT: usize = 100;

/// The authoritative marker service.
///
/// Every call is a single request/response; retrying is left to the caller.
#[async_trait]
pub trait RemoteSyncService: Send + Sync {
    /// Get the service name (e.g., "http", "memory").
    fn name(&self) -> &str;

    /// Ask which strategy applies to each tile.
    async fn sync_status(
        &self,
        local_version: &str,
        requests: &[SyncStatusRequest],
    ) -> Result<Vec<SyncStatusResponse>>;

    /// Tiles holding data inside any of the boxes.
    async fn discover_tiles(&self, boxes: &[BoundingBox]) -> Result<Vec<TileCoordinate>>;

    /// One page of records modified after `cursor`.
    ///
    /// # Errors
    /// - `Error::Overflow` when the delta is too large to page through and
    ///   the tile must be exported instead
    /// - Network, HTTP and decoding errors
    async fn fetch_page(
        &self,
        tile: TileCoordinate,
        class: DataClass,
        cursor: Option<&str>,
    ) -> Result<Vec<SyncRecord>>;

    /// Snapshot descriptors for the given tiles.
    async fn export_manifest(&self, tiles: &[TileCoordinate]) -> Result<Vec<ExportManifestEntry>>;

    /// Fetch a snapshot file by URL.
    async fn download(&self, url: &str) -> Result<Bytes>;
}
