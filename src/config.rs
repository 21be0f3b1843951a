use anyhow::Result;
use scenesync_sync::SyncConfig;
use serde::{Deserialize, Serialize};
use std::{fs, path::Path};
use tracing::warn;

const DEFAULT_CONFIG_PATH: &str = "config/scenesync.toml";

/// Settings of the headless driver. The session tunables live under `[sync]`.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct DriverConfig {
    pub sync: SyncConfig,
    pub scenario: ScenarioConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ScenarioConfig {
    /// Ticks driven after the scripted edits have been issued.
    pub settle_ticks: u64,
    /// Node limit imposed by the in-memory authority (0 disables the limit).
    pub node_limit: u32,
    /// Instances painted into the shared instance container.
    pub painted_instances: usize,
}

impl Default for ScenarioConfig {
    fn default() -> Self {
        Self {
            settle_ticks: 4,
            node_limit: 0,
            painted_instances: 8,
        }
    }
}

impl DriverConfig {
    /// Load configuration from the default path.
    pub fn load() -> Self {
        Self::load_from_path(Path::new(DEFAULT_CONFIG_PATH))
    }

    /// Load configuration from an explicit path, falling back to defaults on errors.
    pub fn load_from_path(path: &Path) -> Self {
        match fs::read_to_string(path) {
            Ok(contents) => match toml::from_str::<DriverConfig>(&contents) {
                Ok(cfg) => cfg,
                Err(err) => {
                    warn!("Failed to parse {}: {err}. Using defaults", path.display());
                    DriverConfig::default()
                }
            },
            Err(err) => {
                warn!("Failed to read {}: {err}. Using defaults", path.display());
                DriverConfig::default()
            }
        }
    }

    /// Write the configuration as pretty TOML.
    pub fn save_to_path(&self, path: &Path) -> Result<()> {
        let toml = toml::to_string_pretty(self)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, toml)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sync_table_is_read_and_the_rest_defaults() {
        let cfg: DriverConfig = toml::from_str(
            r#"
            [sync]
            max_create_time_ms = 5
            config_set_classes = ["Settings"]

            [scenario]
            node_limit = 3
            "#,
        )
        .unwrap();
        assert_eq!(cfg.sync.max_create_time_ms, 5);
        assert_eq!(cfg.sync.config_set_classes, vec!["Settings".to_string()]);
        assert!(cfg.sync.sync_templates);
        assert_eq!(cfg.scenario.node_limit, 3);
        assert_eq!(cfg.scenario.settle_ticks, 4);
    }

    #[test]
    fn missing_file_uses_defaults() {
        let cfg = DriverConfig::load_from_path(Path::new("/nonexistent/scenesync.toml"));
        assert_eq!(cfg.sync.log_filter, "warn");
        assert_eq!(cfg.scenario.painted_instances, 8);
    }

    #[test]
    fn saved_config_loads_back() {
        let dir = std::env::temp_dir().join(format!("scenesync-config-{}", std::process::id()));
        let path = dir.join("driver.toml");
        let mut cfg = DriverConfig::default();
        cfg.sync.instance_hash_cell_size = 25.0;
        cfg.scenario.settle_ticks = 9;
        cfg.save_to_path(&path).unwrap();

        let loaded = DriverConfig::load_from_path(&path);
        assert_eq!(loaded.sync.instance_hash_cell_size, 25.0);
        assert_eq!(loaded.scenario.settle_ticks, 9);
        let _ = fs::remove_dir_all(dir);
    }
}
