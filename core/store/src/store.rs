//! Tile store trait definition.

use async_trait::async_trait;

use tilesync_common::{BoundingBox, DataClass, Result, SyncRecord, TileCoordinate, TileCursors};

/// Version reported by a store that holds no tiles yet.
pub const EMPTY_STORE_VERSION: &str = "0.0.0.0";

/// Version reported once the store holds data in the current layout.
pub const STORE_FORMAT_VERSION: &str = "2.0.0.0";

/// Persistent, tile-keyed replica of markers and reviews.
///
/// Implementations must serialize writes to the same tile (including the
/// cursor read-modify-write inside `apply_page`) while allowing reads and
/// writes on other tiles to proceed.
#[async_trait]
pub trait TileStore: Send + Sync {
    /// Get the store name (e.g., "memory", "local").
    fn name(&self) -> &str;

    /// Version string sent with status negotiation.
    async fn version(&self) -> Result<String>;

    /// Last-modified cursor of one tile/data class, `None` if never synced.
    async fn cursor(&self, tile: TileCoordinate, class: DataClass) -> Result<Option<String>>;

    /// Both cursors of a tile.
    async fn cursors(&self, tile: TileCoordinate) -> Result<TileCursors>;

    /// Overwrite a cursor.
    async fn set_cursor(&self, tile: TileCoordinate, class: DataClass, cursor: &str)
        -> Result<()>;

    /// Upsert one page of records and advance the cursor.
    ///
    /// # Postconditions
    /// - Tombstoned records are removed, all others inserted or replaced
    /// - The cursor is the greatest of its previous value and every
    ///   record's `last_modified`
    ///
    /// # Returns
    /// Number of records processed.
    async fn apply_page(
        &self,
        tile: TileCoordinate,
        class: DataClass,
        records: Vec<SyncRecord>,
    ) -> Result<usize>;

    /// Remove one data class of a tile, records and cursor.
    async fn delete_class(&self, tile: TileCoordinate, class: DataClass) -> Result<()>;

    /// Remove everything held for a tile.
    async fn delete_tile(&self, tile: TileCoordinate) -> Result<()>;

    /// Replace a tile with a decompressed export snapshot.
    ///
    /// # Postconditions
    /// - Readers observe either the old tile or the new one, never a mix
    /// - Cursors equal the snapshot's as-of timestamps
    ///
    /// # Errors
    /// - Snapshot malformed or built for a different tile
    async fn install_snapshot(&self, tile: TileCoordinate, snapshot: Vec<u8>) -> Result<()>;

    /// Known tiles overlapping `bbox`, with their cursors.
    async fn tiles_in_bbox(&self, bbox: &BoundingBox) -> Result<Vec<(TileCoordinate, TileCursors)>>;

    /// Records currently held for one tile/data class, ordered by id.
    async fn records(&self, tile: TileCoordinate, class: DataClass) -> Result<Vec<SyncRecord>>;
}
