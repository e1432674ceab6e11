//! Status negotiation: which strategy applies to each tile this cycle.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, info, warn};

use tilesync_common::{BoundingBox, Result, TileCoordinate, TileCursors, TileStrategies};
use tilesync_remote::{RemoteSyncService, SyncStatusRequest};
use tilesync_store::TileStore;

/// Builds status requests from local state and correlates the answers.
pub struct SyncStatusNegotiator {
    store: Arc<dyn TileStore>,
    remote: Arc<dyn RemoteSyncService>,
}

impl SyncStatusNegotiator {
    pub fn new(store: Arc<dyn TileStore>, remote: Arc<dyn RemoteSyncService>) -> Self {
        Self { store, remote }
    }

    /// One request per tile inside the boxes, carrying its cursors.
    ///
    /// Tiles come from the store. With nothing stored locally the remote is
    /// asked which tiles hold data, and those are requested without cursors.
    pub async fn build_requests(&self, boxes: &[BoundingBox]) -> Result<Vec<SyncStatusRequest>> {
        let mut known: BTreeMap<TileCoordinate, TileCursors> = BTreeMap::new();
        for bbox in boxes {
            for (tile, cursors) in self.store.tiles_in_bbox(bbox).await? {
                known.entry(tile).or_insert(cursors);
            }
        }

        if !known.is_empty() {
            debug!("Negotiating {} locally known tiles", known.len());
            return Ok(known
                .into_iter()
                .map(|(tile, cursors)| SyncStatusRequest::new(tile, cursors))
                .collect());
        }

        let discovered = self.remote.discover_tiles(boxes).await?;
        let mut tiles: Vec<TileCoordinate> = discovered
            .into_iter()
            .filter(|tile| {
                if !tile.is_valid() {
                    warn!("Ignoring discovered tile {} outside the grid", tile);
                }
                tile.is_valid()
            })
            .collect();
        tiles.sort();
        tiles.dedup();

        info!("No local tiles in area, discovered {} remote tiles", tiles.len());
        Ok(tiles.into_iter().map(SyncStatusRequest::unsynced).collect())
    }

    /// Send the requests and pair every submitted tile with its strategies.
    ///
    /// Tiles the response omits get `None` for both classes. Answers for
    /// tiles that were never asked about are dropped.
    ///
    /// # Errors
    /// Fails when the negotiation call itself fails.
    pub async fn negotiate(
        &self,
        requests: &[SyncStatusRequest],
        local_version: &str,
    ) -> Result<Vec<(TileCoordinate, TileStrategies)>> {
        if requests.is_empty() {
            return Ok(Vec::new());
        }

        let responses = self.remote.sync_status(local_version, requests).await?;

        let submitted: HashSet<TileCoordinate> = requests.iter().map(|r| r.tile()).collect();
        let mut answers: HashMap<TileCoordinate, TileStrategies> = HashMap::new();
        for response in responses {
            let tile = response.tile();
            if !submitted.contains(&tile) {
                debug!("Ignoring strategy for unrequested tile {}", tile);
                continue;
            }
            if answers.contains_key(&tile) {
                warn!("Duplicate strategy for tile {}, keeping the first", tile);
                continue;
            }
            answers.insert(tile, response.strategies());
        }

        let mut seen = HashSet::new();
        let mut plan = Vec::with_capacity(submitted.len());
        for request in requests {
            let tile = request.tile();
            if !seen.insert(tile) {
                continue;
            }
            let strategies = answers.remove(&tile).unwrap_or_else(|| {
                warn!("No strategy returned for tile {}, leaving it untouched", tile);
                TileStrategies::default()
            });
            plan.push((tile, strategies));
        }

        Ok(plan)
    }
}
