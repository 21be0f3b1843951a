//! Tunables of a sync session.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::{fs, path::Path, time::Duration};
use tracing::warn;

/// Session configuration, usually embedded in the driver's TOML file under `[sync]`.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Per-tick time budget for creation and upload work, in milliseconds.
    pub max_create_time_ms: u64,
    /// Whether template assets are replicated.
    pub sync_templates: bool,
    /// Whether bulk instance arrays are replicated.
    pub sync_bulk_instances: bool,
    /// Cell edge length of the spatial hash used for duplicate resolution.
    pub instance_hash_cell_size: f32,
    /// Node classes synced even when hidden from the outliner.
    pub hidden_sync_classes: Vec<String>,
    /// Engine classes replicated as session-wide configuration sets.
    pub config_set_classes: Vec<String>,
    /// Default tracing filter when `RUST_LOG` is unset.
    pub log_filter: String,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            max_create_time_ms: 40,
            sync_templates: true,
            sync_bulk_instances: true,
            instance_hash_cell_size: 100.0,
            hidden_sync_classes: Vec::new(),
            config_set_classes: Vec::new(),
            log_filter: "warn".to_string(),
        }
    }
}

impl SyncConfig {
    /// Creation budget as a duration.
    pub fn max_create_time(&self) -> Duration {
        Duration::from_millis(self.max_create_time_ms)
    }

    /// Load configuration from a path, falling back to defaults on errors.
    pub fn load_from_path(path: &Path) -> Self {
        match fs::read_to_string(path) {
            Ok(contents) => match toml::from_str::<SyncConfig>(&contents) {
                Ok(cfg) => cfg,
                Err(err) => {
                    warn!("Failed to parse {}: {err}. Using defaults", path.display());
                    SyncConfig::default()
                }
            },
            Err(err) => {
                warn!("Failed to read {}: {err}. Using defaults", path.display());
                SyncConfig::default()
            }
        }
    }

    /// Save configuration to a path.
    pub fn save_to_path(&self, path: &Path) -> Result<()> {
        let toml = toml::to_string_pretty(self)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, toml)?;
        Ok(())
    }
}
