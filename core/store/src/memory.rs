//! In-memory tile store for testing.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use tokio::sync::Mutex;

use tilesync_common::{
    BoundingBox, DataClass, Error, Result, SyncRecord, TileCoordinate, TileCursors, TileSnapshot,
};

use crate::store::{TileStore, EMPTY_STORE_VERSION, STORE_FORMAT_VERSION};
use crate::tile::TileData;

type TileSlot = Arc<Mutex<TileData>>;

/// In-memory tile store.
///
/// Each tile sits behind its own async mutex, so writers to one tile queue
/// up while other tiles stay available. All data is lost on drop.
pub struct MemoryTileStore {
    tiles: RwLock<HashMap<TileCoordinate, TileSlot>>,
}

impl MemoryTileStore {
    /// Create a new empty memory store.
    pub fn new() -> Self {
        Self {
            tiles: RwLock::new(HashMap::new()),
        }
    }

    fn existing(&self, tile: TileCoordinate) -> Result<Option<TileSlot>> {
        let tiles = self
            .tiles
            .read()
            .map_err(|_| Error::Store("Tile index lock poisoned".to_string()))?;
        Ok(tiles.get(&tile).cloned())
    }

    fn slot(&self, tile: TileCoordinate) -> Result<TileSlot> {
        if let Some(slot) = self.existing(tile)? {
            return Ok(slot);
        }
        let mut tiles = self
            .tiles
            .write()
            .map_err(|_| Error::Store("Tile index lock poisoned".to_string()))?;
        Ok(tiles.entry(tile).or_default().clone())
    }

    fn all_slots(&self) -> Result<Vec<(TileCoordinate, TileSlot)>> {
        let tiles = self
            .tiles
            .read()
            .map_err(|_| Error::Store("Tile index lock poisoned".to_string()))?;
        Ok(tiles.iter().map(|(t, s)| (*t, s.clone())).collect())
    }

    /// Copy of everything held for a tile, if anything.
    pub async fn snapshot_of(&self, tile: TileCoordinate) -> Result<Option<TileData>> {
        match self.existing(tile)? {
            Some(slot) => {
                let data = slot.lock().await;
                Ok((!data.is_empty()).then(|| data.clone()))
            }
            None => Ok(None),
        }
    }
}

impl Default for MemoryTileStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TileStore for MemoryTileStore {
    fn name(&self) -> &str {
        "memory"
    }

    async fn version(&self) -> Result<String> {
        for (_, slot) in self.all_slots()? {
            if !slot.lock().await.is_empty() {
                return Ok(STORE_FORMAT_VERSION.to_string());
            }
        }
        Ok(EMPTY_STORE_VERSION.to_string())
    }

    async fn cursor(&self, tile: TileCoordinate, class: DataClass) -> Result<Option<String>> {
        Ok(self.cursors(tile).await?.get(class).map(str::to_string))
    }

    async fn cursors(&self, tile: TileCoordinate) -> Result<TileCursors> {
        match self.existing(tile)? {
            Some(slot) => Ok(slot.lock().await.cursors.clone()),
            None => Ok(TileCursors::default()),
        }
    }

    async fn set_cursor(
        &self,
        tile: TileCoordinate,
        class: DataClass,
        cursor: &str,
    ) -> Result<()> {
        let slot = self.slot(tile)?;
        slot.lock().await.cursors.set(class, Some(cursor.to_string()));
        Ok(())
    }

    async fn apply_page(
        &self,
        tile: TileCoordinate,
        class: DataClass,
        records: Vec<SyncRecord>,
    ) -> Result<usize> {
        let slot = self.slot(tile)?;
        let mut data = slot.lock().await;
        Ok(data.apply_page(class, records))
    }

    async fn delete_class(&self, tile: TileCoordinate, class: DataClass) -> Result<()> {
        if let Some(slot) = self.existing(tile)? {
            slot.lock().await.clear(class);
        }
        Ok(())
    }

    async fn delete_tile(&self, tile: TileCoordinate) -> Result<()> {
        if let Some(slot) = self.existing(tile)? {
            *slot.lock().await = TileData::default();
        }
        Ok(())
    }

    async fn install_snapshot(&self, tile: TileCoordinate, snapshot: Vec<u8>) -> Result<()> {
        let snapshot = TileSnapshot::decode_for(&snapshot, tile)?;
        let replacement = TileData::from_snapshot(snapshot);

        let slot = self.slot(tile)?;
        *slot.lock().await = replacement;
        Ok(())
    }

    async fn tiles_in_bbox(&self, bbox: &BoundingBox) -> Result<Vec<(TileCoordinate, TileCursors)>> {
        let mut found = Vec::new();
        for (tile, slot) in self.all_slots()? {
            if !bbox.intersects(&tile) {
                continue;
            }
            let data = slot.lock().await;
            if !data.is_empty() {
                found.push((tile, data.cursors.clone()));
            }
        }
        found.sort_by_key(|(tile, _)| *tile);
        Ok(found)
    }

    async fn records(&self, tile: TileCoordinate, class: DataClass) -> Result<Vec<SyncRecord>> {
        match self.existing(tile)? {
            Some(slot) => Ok(slot.lock().await.records(class)),
            None => Ok(Vec::new()),
        }
    }
}
