//! Incremental, paged sync of one tile/data class.

use std::sync::Arc;
use tracing::{debug, error, info, warn};

use tilesync_common::{DataClass, TileCoordinate};
use tilesync_remote::{RemoteSyncService, MAX_RESULT_COUNT};
use tilesync_store::TileStore;

use crate::state::SyncOutcome;

/// Pages a tile/data class forward from its cursor until caught up.
///
/// Never returns an error: every failure is folded into a [`SyncOutcome`]
/// so one tile cannot abort the cycle.
pub struct TileSyncExecutor {
    store: Arc<dyn TileStore>,
    remote: Arc<dyn RemoteSyncService>,
    max_pages: usize,
}

impl TileSyncExecutor {
    pub fn new(
        store: Arc<dyn TileStore>,
        remote: Arc<dyn RemoteSyncService>,
        max_pages: usize,
    ) -> Self {
        Self {
            store,
            remote,
            max_pages,
        }
    }

    /// Sync one tile/data class.
    ///
    /// Without a `cursor` the stored one is used. A full page means more may
    /// follow, so the stored cursor is re-read and the next page requested.
    /// Stops with `Success` when a short page arrives, when a full page does
    /// not move the cursor, or when the page ceiling is reached.
    pub async fn sync_class(
        &self,
        tile: TileCoordinate,
        class: DataClass,
        cursor: Option<String>,
    ) -> SyncOutcome {
        let mut cursor = match cursor {
            Some(cursor) => cursor,
            None => match self.store.cursor(tile, class).await {
                Ok(Some(cursor)) => cursor,
                Ok(None) => {
                    warn!("No {} cursor for tile {}, cannot sync incrementally", class, tile);
                    return SyncOutcome::Fail;
                }
                Err(e) => {
                    error!("Failed to read {} cursor for tile {}: {}", class, tile, e);
                    return SyncOutcome::Fail;
                }
            },
        };

        for page in 1..=self.max_pages {
            let records = match self.remote.fetch_page(tile, class, Some(&cursor)).await {
                Ok(records) => records,
                Err(e) if e.is_overflow() => {
                    info!("Tile {} {} delta too large, export required", tile, class);
                    return SyncOutcome::ExportRequired;
                }
                Err(e) => {
                    warn!("Fetching {} page {} for tile {} failed: {}", class, page, tile, e);
                    return SyncOutcome::Fail;
                }
            };

            let count = match self.store.apply_page(tile, class, records).await {
                Ok(count) => count,
                Err(e) => {
                    error!("Applying {} page for tile {} failed: {}", class, tile, e);
                    return SyncOutcome::Fail;
                }
            };
            debug!("Tile {} {} page {}: {} records", tile, class, page, count);

            if count < MAX_RESULT_COUNT {
                return SyncOutcome::Success;
            }

            let next = match self.store.cursor(tile, class).await {
                Ok(next) => next,
                Err(e) => {
                    error!("Failed to read {} cursor for tile {}: {}", class, tile, e);
                    return SyncOutcome::Fail;
                }
            };
            match next {
                Some(next) if next != cursor => cursor = next,
                _ => {
                    warn!(
                        "Full {} page for tile {} did not advance cursor {}, stopping",
                        class, tile, cursor
                    );
                    return SyncOutcome::Success;
                }
            }
        }

        warn!(
            "Tile {} {} reached {} pages this cycle, continuing next cycle",
            tile, class, self.max_pages
        );
        SyncOutcome::Success
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tilesync_common::SyncRecord;
    use tilesync_remote::{MemoryRemote, ScriptedPage};
    use tilesync_store::MemoryTileStore;

    const TILE: TileCoordinate = TileCoordinate::new(3, 4);
    const START: &str = "2023-01-01T00:00:00Z";

    fn page(first_id: i64, count: usize, stamp: &str) -> ScriptedPage {
        ScriptedPage::Records(
            (0..count as i64)
                .map(|i| SyncRecord::new(first_id + i, stamp))
                .collect(),
        )
    }

    async fn setup(max_pages: usize) -> (Arc<MemoryTileStore>, Arc<MemoryRemote>, TileSyncExecutor) {
        let store = Arc::new(MemoryTileStore::new());
        store
            .set_cursor(TILE, DataClass::Markers, START)
            .await
            .unwrap();
        let remote = Arc::new(MemoryRemote::new());
        let executor = TileSyncExecutor::new(store.clone(), remote.clone(), max_pages);
        (store, remote, executor)
    }

    #[tokio::test]
    async fn test_short_page_finishes() {
        let (store, remote, executor) = setup(10).await;
        remote.push_page(TILE, DataClass::Markers, page(1, 40, "2023-02-01T00:00:00Z"));

        let outcome = executor.sync_class(TILE, DataClass::Markers, None).await;

        assert_eq!(outcome, SyncOutcome::Success);
        assert_eq!(remote.page_requests().len(), 1);
        assert_eq!(
            remote.page_requests()[0].cursor.as_deref(),
            Some(START)
        );
        assert_eq!(
            store.cursor(TILE, DataClass::Markers).await.unwrap().as_deref(),
            Some("2023-02-01T00:00:00Z")
        );
        assert_eq!(store.records(TILE, DataClass::Markers).await.unwrap().len(), 40);
    }

    #[tokio::test]
    async fn test_full_pages_continue_from_new_cursor() {
        let (store, remote, executor) = setup(10).await;
        remote.push_page(TILE, DataClass::Markers, page(1, 100, "2023-01-05T00:00:00Z"));
        remote.push_page(TILE, DataClass::Markers, page(101, 10, "2023-01-06T00:00:00Z"));

        let outcome = executor.sync_class(TILE, DataClass::Markers, None).await;

        assert_eq!(outcome, SyncOutcome::Success);
        let cursors: Vec<_> = remote
            .page_requests()
            .into_iter()
            .map(|r| r.cursor)
            .collect();
        assert_eq!(
            cursors,
            vec![
                Some(START.to_string()),
                Some("2023-01-05T00:00:00Z".to_string())
            ]
        );
        assert_eq!(store.records(TILE, DataClass::Markers).await.unwrap().len(), 110);
    }

    #[tokio::test]
    async fn test_stalled_cursor_stops_after_one_page() {
        let (store, remote, executor) = setup(10).await;
        remote.repeat_page(TILE, DataClass::Markers, page(1, 100, START));

        let outcome = executor.sync_class(TILE, DataClass::Markers, None).await;

        assert_eq!(outcome, SyncOutcome::Success);
        assert_eq!(remote.page_requests().len(), 1);
        assert_eq!(
            store.cursor(TILE, DataClass::Markers).await.unwrap().as_deref(),
            Some(START)
        );
    }

    #[tokio::test]
    async fn test_page_ceiling() {
        let (_store, remote, executor) = setup(3).await;
        for day in 2..=6 {
            let stamp = format!("2023-01-0{}T00:00:00Z", day);
            remote.push_page(TILE, DataClass::Markers, page(day * 1000, 100, &stamp));
        }

        let outcome = executor.sync_class(TILE, DataClass::Markers, None).await;

        assert_eq!(outcome, SyncOutcome::Success);
        assert_eq!(remote.page_requests().len(), 3);
    }

    #[tokio::test]
    async fn test_overflow_requires_export() {
        let (store, remote, executor) = setup(10).await;
        remote.push_page(TILE, DataClass::Markers, ScriptedPage::Overflow);

        let outcome = executor.sync_class(TILE, DataClass::Markers, None).await;

        assert_eq!(outcome, SyncOutcome::ExportRequired);
        assert!(store.records(TILE, DataClass::Markers).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_server_error_fails_and_keeps_cursor() {
        let (store, remote, executor) = setup(10).await;
        remote.push_page(TILE, DataClass::Markers, page(1, 100, "2023-01-05T00:00:00Z"));
        remote.push_page(TILE, DataClass::Markers, ScriptedPage::Failure("boom".into()));

        let outcome = executor.sync_class(TILE, DataClass::Markers, None).await;

        assert_eq!(outcome, SyncOutcome::Fail);
        // The first page was applied before the failure.
        assert_eq!(
            store.cursor(TILE, DataClass::Markers).await.unwrap().as_deref(),
            Some("2023-01-05T00:00:00Z")
        );
    }

    #[tokio::test]
    async fn test_missing_cursor_fails_without_request() {
        let (_store, remote, executor) = setup(10).await;

        let outcome = executor.sync_class(TILE, DataClass::Reviews, None).await;

        assert_eq!(outcome, SyncOutcome::Fail);
        assert!(remote.page_requests().is_empty());
    }

    #[tokio::test]
    async fn test_explicit_cursor_is_used() {
        let (_store, remote, executor) = setup(10).await;

        let outcome = executor
            .sync_class(TILE, DataClass::Reviews, Some("2022-06-01T00:00:00Z".into()))
            .await;

        assert_eq!(outcome, SyncOutcome::Success);
        assert_eq!(
            remote.page_requests()[0].cursor.as_deref(),
            Some("2022-06-01T00:00:00Z")
        );
    }
}
