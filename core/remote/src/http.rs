//! HTTP client for the remote marker service.

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::{header, Client, Method, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use std::time::Duration;
use tracing::debug;
use url::Url;

use tilesync_common::{BoundingBox, DataClass, Error, Result, SyncRecord, TileCoordinate};

use crate::contract::{ExportManifestEntry, SyncStatusRequest, SyncStatusResponse};
use crate::service::RemoteSyncService;

const SYNC_STATUS_PATH: &str = "api/v2.1/points-of-interest/sync-status";
const TILES_PATH: &str = "api/v2/points-of-interest/tiles";
const EXPORT_PATH: &str = "api/v2/points-of-interest/export";
const MARKER_SYNC_PATH: &str = "api/v2/points-of-interest/sync";
const REVIEW_SYNC_PATH: &str = "api/v2/reviews/sync";

/// Header carrying the application's API key.
const API_KEY_HEADER: &str = "apikey";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

const MAX_DOWNLOAD_REDIRECTS: usize = 10;

/// HTTP implementation of [`RemoteSyncService`].
///
/// API calls never follow redirects: the incremental sync endpoint answers
/// 303 when a delta is too large, and that status must reach the engine.
/// Snapshot downloads use a separate client that follows them to wherever
/// the file is hosted.
pub struct HttpSyncClient {
    http: Client,
    downloads: Client,
    base_url: String,
    api_key: String,
}

impl HttpSyncClient {
    /// Create a client for the API rooted at `base_url`.
    ///
    /// # Errors
    /// - `base_url` is not an absolute URL
    /// - HTTP client construction failed
    pub fn new(base_url: &str, api_key: impl Into<String>) -> Result<Self> {
        Url::parse(base_url)
            .map_err(|e| Error::Config(format!("Invalid API base URL {}: {}", base_url, e)))?;

        let http = Self::client_builder()
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(|e| Error::Config(format!("Failed to create HTTP client: {}", e)))?;
        let downloads = Self::client_builder()
            .redirect(reqwest::redirect::Policy::limited(MAX_DOWNLOAD_REDIRECTS))
            .build()
            .map_err(|e| Error::Config(format!("Failed to create download client: {}", e)))?;

        Ok(Self {
            http,
            downloads,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.into(),
        })
    }

    fn client_builder() -> reqwest::ClientBuilder {
        Client::builder()
            .user_agent(concat!("tilesync/", env!("CARGO_PKG_VERSION")))
            .timeout(REQUEST_TIMEOUT)
    }

    fn endpoint(&self, path: &str) -> Result<Url> {
        let raw = format!("{}/{}", self.base_url, path);
        Url::parse(&raw).map_err(|e| Error::InvalidInput(format!("Bad endpoint {}: {}", raw, e)))
    }

    fn api_request(&self, method: Method, path: &str) -> Result<RequestBuilder> {
        Ok(self
            .http
            .request(method, self.endpoint(path)?)
            .header(API_KEY_HEADER, &self.api_key)
            .header(header::ACCEPT, "application/json"))
    }

    async fn send(request: RequestBuilder) -> Result<reqwest::Response> {
        request
            .send()
            .await
            .map_err(|e| Error::Network(format!("Request failed: {}", e)))
    }

    /// Decode a successful response or turn the status into an error.
    async fn handle_response<T: DeserializeOwned>(response: reqwest::Response) -> Result<T> {
        let status = response.status();

        if status.is_success() {
            let body = response
                .bytes()
                .await
                .map_err(|e| Error::Network(format!("Failed to read response: {}", e)))?;
            Ok(serde_json::from_slice(&body)?)
        } else if status == StatusCode::NOT_FOUND {
            Err(Error::NotFound(response.url().path().to_string()))
        } else {
            let message = response.text().await.unwrap_or_default();
            Err(Error::Http {
                status: status.as_u16(),
                message,
            })
        }
    }

    fn sync_path(class: DataClass) -> &'static str {
        match class {
            DataClass::Markers => MARKER_SYNC_PATH,
            DataClass::Reviews => REVIEW_SYNC_PATH,
        }
    }
}

#[async_trait]
impl RemoteSyncService for HttpSyncClient {
    fn name(&self) -> &str {
        "http"
    }

    async fn sync_status(
        &self,
        local_version: &str,
        requests: &[SyncStatusRequest],
    ) -> Result<Vec<SyncStatusResponse>> {
        let request = self
            .api_request(Method::POST, SYNC_STATUS_PATH)?
            .query(&[("databaseVersion", local_version)])
            .json(requests);

        Self::handle_response(Self::send(request).await?).await
    }

    async fn discover_tiles(&self, boxes: &[BoundingBox]) -> Result<Vec<TileCoordinate>> {
        let request = self.api_request(Method::POST, TILES_PATH)?.json(boxes);
        Self::handle_response(Self::send(request).await?).await
    }

    async fn fetch_page(
        &self,
        tile: TileCoordinate,
        class: DataClass,
        cursor: Option<&str>,
    ) -> Result<Vec<SyncRecord>> {
        let mut query = vec![
            ("tileX", tile.tile_x.to_string()),
            ("tileY", tile.tile_y.to_string()),
        ];
        if let Some(cursor) = cursor {
            query.push(("lastModifiedAfter", cursor.to_string()));
        }

        let request = self
            .api_request(Method::GET, Self::sync_path(class))?
            .query(&query);
        let response = Self::send(request).await?;

        if response.status() == StatusCode::SEE_OTHER {
            debug!("Tile {} {} too large for incremental sync", tile, class);
            return Err(Error::Overflow(format!("tile {} {}", tile, class)));
        }

        Self::handle_response(response).await
    }

    async fn export_manifest(&self, tiles: &[TileCoordinate]) -> Result<Vec<ExportManifestEntry>> {
        let request = self.api_request(Method::POST, EXPORT_PATH)?.json(tiles);
        Self::handle_response(Self::send(request).await?).await
    }

    async fn download(&self, url: &str) -> Result<Bytes> {
        let response = Self::send(self.downloads.get(url)).await?;
        let status = response.status();

        if !status.is_success() {
            return Err(Error::Http {
                status: status.as_u16(),
                message: format!("Download of {} failed", url),
            });
        }

        response
            .bytes()
            .await
            .map_err(|e| Error::Network(format!("Failed to read {}: {}", url, e)))
    }
}
