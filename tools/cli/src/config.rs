//! On-disk configuration for the `tilesync` binary.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use tilesync_common::BoundingBox;
use tilesync_sync::SyncConfig;

/// Everything the CLI needs to run sync cycles.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Base URL of the remote service, e.g. `https://api.example.com/`.
    pub api_base_url: String,
    /// Key sent in the `apikey` header.
    pub api_key: String,
    /// Where tile files are stored.
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    /// Areas of interest.
    #[serde(default)]
    pub bounding_boxes: Vec<BoundingBox>,
    #[serde(default)]
    pub sync: SyncConfig,
}

pub fn default_data_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("tilesync")
}

pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("tilesync")
        .join("config.json")
}

impl AppConfig {
    pub fn new(api_base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            api_base_url: api_base_url.into(),
            api_key: api_key.into(),
            data_dir: default_data_dir(),
            bounding_boxes: Vec::new(),
            sync: SyncConfig::default(),
        }
    }

    /// Read and validate a configuration file.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config {}", path.display()))?;
        let config: Self = serde_json::from_str(&raw)
            .with_context(|| format!("Invalid config {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)
            .with_context(|| format!("Failed to write config {}", path.display()))?;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.api_base_url.trim().is_empty() {
            anyhow::bail!("api_base_url must not be empty");
        }
        self.sync.validate().context("Invalid sync settings")?;
        for bbox in &self.bounding_boxes {
            bbox.validate().context("Invalid bounding box")?;
        }
        Ok(())
    }
}
