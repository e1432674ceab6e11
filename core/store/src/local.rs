//! Local filesystem tile store.

use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tokio::fs;
use tracing::debug;
use uuid::Uuid;

use tilesync_common::{
    BoundingBox, DataClass, Error, Result, SyncRecord, TileCoordinate, TileCursors, TileSnapshot,
};

use crate::store::{TileStore, EMPTY_STORE_VERSION, STORE_FORMAT_VERSION};
use crate::tile::TileData;

/// Local filesystem tile store.
///
/// Keeps one `tile_<x>_<y>.json` document per tile under a root directory.
/// Every write goes to a temporary file that is renamed over the document,
/// so readers see either the previous or the next version of a tile.
pub struct LocalTileStore {
    root: PathBuf,
    write_locks: Mutex<HashMap<TileCoordinate, Arc<tokio::sync::Mutex<()>>>>,
}

impl LocalTileStore {
    /// Create a new local store rooted at the given directory.
    ///
    /// # Postconditions
    /// - Root directory is created if it doesn't exist
    ///
    /// # Errors
    /// - Permission denied
    pub fn new(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();

        if !root.exists() {
            std::fs::create_dir_all(&root)?;
        }

        Ok(Self {
            root,
            write_locks: Mutex::new(HashMap::new()),
        })
    }

    /// Root directory of this store.
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn tile_path(&self, tile: TileCoordinate) -> PathBuf {
        self.root
            .join(format!("tile_{}_{}.json", tile.tile_x, tile.tile_y))
    }

    fn parse_tile_name(name: &str) -> Option<TileCoordinate> {
        let stem = name.strip_prefix("tile_")?.strip_suffix(".json")?;
        let (x, y) = stem.split_once('_')?;
        Some(TileCoordinate::new(x.parse().ok()?, y.parse().ok()?))
    }

    fn write_lock(&self, tile: TileCoordinate) -> Result<Arc<tokio::sync::Mutex<()>>> {
        let mut locks = self
            .write_locks
            .lock()
            .map_err(|_| Error::Store("Write lock table poisoned".to_string()))?;
        Ok(locks.entry(tile).or_default().clone())
    }

    async fn read_tile(&self, tile: TileCoordinate) -> Result<Option<TileData>> {
        match fs::read(self.tile_path(tile)).await {
            Ok(bytes) => {
                let data = serde_json::from_slice(&bytes).map_err(|e| {
                    Error::Store(format!("Corrupt tile document for {}: {}", tile, e))
                })?;
                Ok(Some(data))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn write_tile(&self, tile: TileCoordinate, data: &TileData) -> Result<()> {
        let target = self.tile_path(tile);

        if data.is_empty() {
            match fs::remove_file(&target).await {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
            return Ok(());
        }

        let temp = self.root.join(format!(
            ".tile_{}_{}.{}.tmp",
            tile.tile_x,
            tile.tile_y,
            Uuid::new_v4()
        ));
        fs::write(&temp, serde_json::to_vec(data)?).await?;
        if let Err(e) = fs::rename(&temp, &target).await {
            let _ = fs::remove_file(&temp).await;
            return Err(e.into());
        }
        Ok(())
    }

    /// Read-modify-write one tile under its write lock.
    async fn modify<F, T>(&self, tile: TileCoordinate, f: F) -> Result<T>
    where
        F: FnOnce(&mut TileData) -> T + Send,
        T: Send,
    {
        let lock = self.write_lock(tile)?;
        let _guard = lock.lock().await;

        let mut data = self.read_tile(tile).await?.unwrap_or_default();
        let result = f(&mut data);
        self.write_tile(tile, &data).await?;
        Ok(result)
    }

    async fn known_tiles(&self) -> Result<Vec<TileCoordinate>> {
        let mut tiles = Vec::new();
        let mut entries = fs::read_dir(&self.root).await?;

        while let Some(entry) = entries.next_entry().await? {
            if let Some(tile) = entry.file_name().to_str().and_then(Self::parse_tile_name) {
                tiles.push(tile);
            }
        }

        tiles.sort();
        Ok(tiles)
    }
}

#[async_trait]
impl TileStore for LocalTileStore {
    fn name(&self) -> &str {
        "local"
    }

    async fn version(&self) -> Result<String> {
        if self.known_tiles().await?.is_empty() {
            Ok(EMPTY_STORE_VERSION.to_string())
        } else {
            Ok(STORE_FORMAT_VERSION.to_string())
        }
    }

    async fn cursor(&self, tile: TileCoordinate, class: DataClass) -> Result<Option<String>> {
        Ok(self.cursors(tile).await?.get(class).map(str::to_string))
    }

    async fn cursors(&self, tile: TileCoordinate) -> Result<TileCursors> {
        Ok(self
            .read_tile(tile)
            .await?
            .map(|data| data.cursors)
            .unwrap_or_default())
    }

    async fn set_cursor(
        &self,
        tile: TileCoordinate,
        class: DataClass,
        cursor: &str,
    ) -> Result<()> {
        let cursor = cursor.to_string();
        self.modify(tile, move |data| data.cursors.set(class, Some(cursor)))
            .await
    }

    async fn apply_page(
        &self,
        tile: TileCoordinate,
        class: DataClass,
        records: Vec<SyncRecord>,
    ) -> Result<usize> {
        self.modify(tile, move |data| data.apply_page(class, records))
            .await
    }

    async fn delete_class(&self, tile: TileCoordinate, class: DataClass) -> Result<()> {
        self.modify(tile, move |data| data.clear(class)).await
    }

    async fn delete_tile(&self, tile: TileCoordinate) -> Result<()> {
        self.modify(tile, |data| *data = TileData::default()).await
    }

    async fn install_snapshot(&self, tile: TileCoordinate, snapshot: Vec<u8>) -> Result<()> {
        let snapshot = TileSnapshot::decode_for(&snapshot, tile)?;
        let replacement = TileData::from_snapshot(snapshot);

        let lock = self.write_lock(tile)?;
        let _guard = lock.lock().await;
        self.write_tile(tile, &replacement).await?;
        debug!("Installed snapshot for tile {} into {}", tile, self.root.display());
        Ok(())
    }

    async fn tiles_in_bbox(&self, bbox: &BoundingBox) -> Result<Vec<(TileCoordinate, TileCursors)>> {
        let mut found = Vec::new();
        for tile in self.known_tiles().await? {
            if !bbox.intersects(&tile) {
                continue;
            }
            if let Some(data) = self.read_tile(tile).await? {
                found.push((tile, data.cursors));
            }
        }
        Ok(found)
    }

    async fn records(&self, tile: TileCoordinate, class: DataClass) -> Result<Vec<SyncRecord>> {
        Ok(self
            .read_tile(tile)
            .await?
            .map(|data| data.records(class))
            .unwrap_or_default())
    }
}
