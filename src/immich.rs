//! Immich API client and data model.
//!
//! Only the small slice of the Immich REST surface the sync needs: album
//! listing (owned plus optionally shared), per-album detail with the asset
//! list, and a connectivity probe. Authentication is a static `x-api-key`
//! header. The sync engine talks to the [`AlbumProvider`] trait rather than
//! the concrete client so tests can feed it in-memory albums.

use anyhow::{Context, Result};
use async_trait::async_trait;
use log::{info, warn};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// One remote album. The listing endpoints return albums without `assets`;
/// the detail endpoint fills them in.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Album {
    pub id: String,
    #[serde(default)]
    pub album_name: String,
    #[serde(default)]
    pub asset_count: u64,
    #[serde(default)]
    pub assets: Vec<Asset>,
    #[serde(default)]
    pub shared: bool,
}

/// One media item within an album.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Asset {
    pub id: String,
    /// Asset kind as reported by Immich ("IMAGE", "VIDEO"). Informational;
    /// anything with a linkable path is synced.
    #[serde(rename = "type", default)]
    pub kind: String,
    /// Absolute path of the file as seen inside the Immich container.
    #[serde(default)]
    pub original_path: String,
    /// Display filename; may be empty, in which case the path basename is
    /// used instead.
    #[serde(default)]
    pub original_file_name: String,
    /// Creation timestamp, informational only.
    #[serde(default)]
    pub file_created_at: Option<String>,
}

/// The remote-album operations the sync engine depends on.
#[async_trait]
pub trait AlbumProvider: Send + Sync {
    /// Probes the server; false means a run should not start.
    async fn test_connection(&self) -> bool;

    /// Lists albums, optionally merging in albums shared with this user.
    async fn list_albums(&self, include_shared: bool) -> Result<Vec<Album>>;

    /// Fetches one album with its full asset list. `None` if the album no
    /// longer exists.
    async fn get_album_detail(&self, album_id: &str) -> Result<Option<Album>>;
}

/// HTTP client for a real Immich server.
pub struct ImmichClient {
    client: Client,
    base_url: String,
    api_key: String,
}

impl ImmichClient {
    pub fn new(base_url: &str, api_key: &str) -> Result<Self> {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
        })
    }

    fn get(&self, path: &str) -> reqwest::RequestBuilder {
        self.client
            .get(format!("{}{}", self.base_url, path))
            .header("x-api-key", &self.api_key)
    }

    async fn fetch_album_list(&self, path: &str) -> Result<Vec<Album>> {
        let albums = self
            .get(path)
            .send()
            .await
            .with_context(|| format!("Failed to GET {path}"))?
            .error_for_status()
            .with_context(|| format!("Server rejected {path}"))?
            .json()
            .await
            .with_context(|| format!("Failed to parse album list from {path}"))?;
        Ok(albums)
    }
}

#[async_trait]
impl AlbumProvider for ImmichClient {
    async fn test_connection(&self) -> bool {
        match self.get("/api/server/ping").send().await {
            Ok(response) => response.status().is_success(),
            Err(e) => {
                warn!("Cannot reach Immich at {}: {e}", self.base_url);
                false
            }
        }
    }

    async fn list_albums(&self, include_shared: bool) -> Result<Vec<Album>> {
        let mut albums = self.fetch_album_list("/api/albums").await?;

        if include_shared {
            let shared = self.fetch_album_list("/api/albums?shared=true").await?;
            for album in shared {
                if !albums.iter().any(|a| a.id == album.id) {
                    albums.push(album);
                }
            }
        }

        info!("Fetched {} albums from Immich", albums.len());
        Ok(albums)
    }

    async fn get_album_detail(&self, album_id: &str) -> Result<Option<Album>> {
        let response = self
            .get(&format!("/api/albums/{album_id}"))
            .send()
            .await
            .with_context(|| format!("Failed to GET album {album_id}"))?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }

        let album = response
            .error_for_status()
            .with_context(|| format!("Server rejected album detail for {album_id}"))?
            .json()
            .await
            .with_context(|| format!("Failed to parse album detail for {album_id}"))?;

        Ok(Some(album))
    }
}
