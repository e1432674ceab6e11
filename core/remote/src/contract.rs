//! Request and response bodies of the remote service.

use serde::{Deserialize, Serialize};

use tilesync_common::{SyncStrategy, TileCoordinate, TileCursors, TileStrategies};

/// One tile in a status negotiation request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncStatusRequest {
    pub tile_x: i32,
    pub tile_y: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub poi_date_last_modified: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub review_date_last_modified: Option<String>,
}

impl SyncStatusRequest {
    pub fn new(tile: TileCoordinate, cursors: TileCursors) -> Self {
        Self {
            tile_x: tile.tile_x,
            tile_y: tile.tile_y,
            poi_date_last_modified: cursors.markers,
            review_date_last_modified: cursors.reviews,
        }
    }

    /// A tile never synced before.
    pub fn unsynced(tile: TileCoordinate) -> Self {
        Self::new(tile, TileCursors::default())
    }

    pub fn tile(&self) -> TileCoordinate {
        TileCoordinate::new(self.tile_x, self.tile_y)
    }
}

/// Strategy pair the remote assigned to one tile.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncStatusResponse {
    pub tile_x: i32,
    pub tile_y: i32,
    pub poi_update_type: SyncStrategy,
    pub review_update_type: SyncStrategy,
}

impl SyncStatusResponse {
    pub fn new(tile: TileCoordinate, strategies: TileStrategies) -> Self {
        Self {
            tile_x: tile.tile_x,
            tile_y: tile.tile_y,
            poi_update_type: strategies.markers,
            review_update_type: strategies.reviews,
        }
    }

    pub fn tile(&self) -> TileCoordinate {
        TileCoordinate::new(self.tile_x, self.tile_y)
    }

    pub fn strategies(&self) -> TileStrategies {
        TileStrategies::new(self.poi_update_type, self.review_update_type)
    }
}

/// A downloadable snapshot file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportFile {
    /// Size in bytes of the compressed file.
    pub file_size: u64,
    /// Lowercase hex MD5 of the compressed file.
    pub md5_hash: String,
    pub url: String,
}

/// Export manifest for one tile.
///
/// The service offers zip and gzip encodings of the same snapshot; only the
/// gzip one is ever downloaded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportManifestEntry {
    pub tile_x: i32,
    pub tile_y: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub zip: Option<ExportFile>,
    pub gzip: ExportFile,
}

impl ExportManifestEntry {
    pub fn tile(&self) -> TileCoordinate {
        TileCoordinate::new(self.tile_x, self.tile_y)
    }
}
