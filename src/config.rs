use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::paths::PathMapping;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Base URL of the Immich server.
    pub api_url: String,
    /// Immich API key (Account Settings → API Keys).
    pub api_key: String,
    /// Directory the album tree is mirrored into.
    pub sync_dir: String,
    /// Also sync albums shared with this user.
    pub include_shared: bool,
    /// Suggested re-sync interval for external schedulers (cron, systemd
    /// timers). Not consumed by the sync itself.
    pub sync_interval_hours: u32,
    /// Ordered prefix-rewrite rules from Immich-container paths to host
    /// paths. First match wins.
    pub path_mappings: Vec<PathMapping>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_url: "http://localhost:2283".to_string(),
            api_key: String::new(),
            sync_dir: "/var/lib/jellyfin/immich-albums".to_string(),
            include_shared: true,
            sync_interval_hours: 6,
            path_mappings: vec![PathMapping {
                container: "/usr/src/app/upload".to_string(),
                host: "/mnt/immich/upload".to_string(),
            }],
        }
    }
}

impl Config {
    pub fn save_to_file(&self, path: &Path) -> Result<()> {
        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let yaml = serde_yaml::to_string(self)?;
        fs::write(path, yaml)?;

        Ok(())
    }

    pub fn load_from_file(path: &Path) -> Result<Self> {
        let yaml = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config from {}", path.display()))?;

        let config = serde_yaml::from_str(&yaml)
            .with_context(|| format!("Failed to parse config from {}", path.display()))?;

        Ok(config)
    }

    pub fn get_config_path(config_arg: &Option<PathBuf>) -> PathBuf {
        config_arg
            .clone()
            .unwrap_or_else(|| PathBuf::from("config.yaml"))
    }
}
