//! Bulk export: download, verify and install whole-tile snapshots.

use bytes::Bytes;
use flate2::read::GzDecoder;
use futures::future::join_all;
use std::collections::{HashMap, HashSet};
use std::io::Read;
use std::sync::Arc;
use tracing::{debug, info, warn};

use tilesync_common::{md5_hex, Error, Result, TileCoordinate};
use tilesync_remote::{ExportFile, ExportManifestEntry, RemoteSyncService};
use tilesync_store::TileStore;

/// Result of exporting one tile.
#[derive(Debug)]
pub struct ExportOutcome {
    pub tile: TileCoordinate,
    pub result: Result<()>,
}

impl ExportOutcome {
    pub fn is_success(&self) -> bool {
        self.result.is_ok()
    }
}

/// Replaces tiles wholesale with server-built snapshots.
///
/// A snapshot is installed only after its size and MD5 digest match the
/// manifest. Failures are reported per tile and leave local data untouched.
pub struct ExportPipeline {
    store: Arc<dyn TileStore>,
    remote: Arc<dyn RemoteSyncService>,
    batch_size: usize,
}

impl ExportPipeline {
    pub fn new(
        store: Arc<dyn TileStore>,
        remote: Arc<dyn RemoteSyncService>,
        batch_size: usize,
    ) -> Self {
        Self {
            store,
            remote,
            batch_size: batch_size.max(1),
        }
    }

    /// Export every tile in the set, one outcome per tile.
    pub async fn export(&self, tiles: &HashSet<TileCoordinate>) -> Vec<ExportOutcome> {
        if tiles.is_empty() {
            return Vec::new();
        }

        let mut ordered: Vec<TileCoordinate> = tiles.iter().copied().collect();
        ordered.sort();

        info!("Exporting {} tiles", ordered.len());
        let chunks = ordered
            .chunks(self.batch_size)
            .map(|chunk| self.export_chunk(chunk));
        let outcomes: Vec<ExportOutcome> = join_all(chunks).await.into_iter().flatten().collect();

        for outcome in &outcomes {
            if let Err(e) = &outcome.result {
                warn!("Export of tile {} failed: {}", outcome.tile, e);
            }
        }
        outcomes
    }

    async fn export_chunk(&self, chunk: &[TileCoordinate]) -> Vec<ExportOutcome> {
        let manifest = match self.remote.export_manifest(chunk).await {
            Ok(manifest) => manifest,
            Err(e) => {
                return chunk
                    .iter()
                    .map(|&tile| ExportOutcome {
                        tile,
                        result: Err(Error::Network(format!("export manifest unavailable: {}", e))),
                    })
                    .collect();
            }
        };

        let mut entries: HashMap<TileCoordinate, ExportManifestEntry> = HashMap::new();
        for entry in manifest {
            let tile = entry.tile();
            if !chunk.contains(&tile) {
                debug!("Ignoring manifest entry for unrequested tile {}", tile);
                continue;
            }
            entries.entry(tile).or_insert(entry);
        }

        let installs = chunk.iter().map(|&tile| {
            let entry = entries.remove(&tile);
            async move {
                let result = match entry {
                    Some(entry) => self.install(tile, &entry.gzip).await,
                    None => Err(Error::NotFound(format!("no export manifest entry for tile {}", tile))),
                };
                ExportOutcome { tile, result }
            }
        });
        join_all(installs).await
    }

    async fn install(&self, tile: TileCoordinate, file: &ExportFile) -> Result<()> {
        debug!("Downloading snapshot for tile {} from {}", tile, file.url);
        let data = self.remote.download(&file.url).await?;

        verify(&data, file)?;
        let snapshot = decompress(data).await?;
        self.store.install_snapshot(tile, snapshot).await?;

        info!("Installed snapshot for tile {}", tile);
        Ok(())
    }
}

/// Check downloaded bytes against their manifest descriptor.
pub fn verify(data: &[u8], file: &ExportFile) -> Result<()> {
    if data.len() as u64 != file.file_size {
        return Err(Error::Integrity(format!(
            "size mismatch for {}: expected {} bytes, got {}",
            file.url,
            file.file_size,
            data.len()
        )));
    }

    let digest = md5_hex(data);
    if !digest.eq_ignore_ascii_case(file.md5_hash.trim()) {
        return Err(Error::Integrity(format!(
            "md5 mismatch for {}: expected {}, got {}",
            file.url, file.md5_hash, digest
        )));
    }
    Ok(())
}

/// Inflate a snapshot on the blocking pool; whole tiles can be large.
async fn decompress(data: Bytes) -> Result<Vec<u8>> {
    tokio::task::spawn_blocking(move || gunzip(&data))
        .await
        .map_err(|e| Error::Decompression(format!("decompression task failed: {}", e)))?
}

fn gunzip(data: &[u8]) -> Result<Vec<u8>> {
    let mut decoded = Vec::new();
    GzDecoder::new(data)
        .read_to_end(&mut decoded)
        .map_err(|e| Error::Decompression(e.to_string()))?;
    Ok(decoded)
}
