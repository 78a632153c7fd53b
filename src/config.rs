use std::fs;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::transfer::watch::WatchConfig;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config yaml: {0}")]
    Parse(#[from] serde_yaml::Error),
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct AppConfig {
    pub log_level: String,
    pub log_dir: String,
    pub log_file: String,
    pub use_json: bool,
    pub rotation: String,
    /// Per-block watcher logs; off caps the watchers at `info`
    #[serde(default)]
    pub enable_tracing: bool,
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub store: StoreConfig,
}

/// Transfer engine tuning
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct EngineConfig {
    /// Confirmations to wait for on every sent transaction
    pub confirmations: u32,
    pub poll_interval_ms: u64,
    /// Block range of the first fulfillment history query
    pub initial_chunk_size: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            confirmations: 1,
            poll_interval_ms: 5000,
            initial_chunk_size: 5000,
        }
    }
}

impl EngineConfig {
    pub fn watch_config(&self) -> WatchConfig {
        WatchConfig {
            poll_interval: Duration::from_millis(self.poll_interval_ms),
            initial_chunk_size: self.initial_chunk_size,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct StoreConfig {
    /// JSON file holding all persisted transfers
    pub path: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: "./data/transfers.json".to_string(),
        }
    }
}

impl AppConfig {
    /// Load configuration from YAML file
    pub fn from_file(path: &str) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_string(),
            source,
        })?;
        Ok(serde_yaml::from_str(&content)?)
    }

    /// Load `config/{env}.yaml`
    pub fn load(env: &str) -> Result<Self, ConfigError> {
        Self::from_file(&format!("config/{}.yaml", env))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_app_config_deserialize() {
        let yaml = r#"
log_level: "info"
log_dir: "./logs"
log_file: "bridge.log"
use_json: true
rotation: "daily"
enable_tracing: true
engine:
  confirmations: 3
  poll_interval_ms: 2000
  initial_chunk_size: 1000
store:
  path: "/var/lib/bridge/transfers.json"
"#;

        let config: AppConfig = serde_yaml::from_str(yaml).unwrap();

        assert_eq!(config.log_level, "info");
        assert!(config.use_json);
        assert!(config.enable_tracing);
        assert_eq!(config.engine.confirmations, 3);
        assert_eq!(config.store.path, "/var/lib/bridge/transfers.json");

        let watch = config.engine.watch_config();
        assert_eq!(watch.poll_interval, Duration::from_millis(2000));
        assert_eq!(watch.initial_chunk_size, 1000);
    }

    #[test]
    fn test_sections_default_when_missing() {
        let yaml = r#"
log_level: "debug"
log_dir: "./logs"
log_file: "bridge.log"
use_json: false
rotation: "never"
engine:
  confirmations: 2
"#;

        let config: AppConfig = serde_yaml::from_str(yaml).unwrap();

        assert!(!config.enable_tracing);
        assert_eq!(config.engine.confirmations, 2);
        assert_eq!(config.engine.poll_interval_ms, 5000);
        assert_eq!(config.store.path, "./data/transfers.json");
    }

    #[test]
    fn test_from_file() {
        let dir = format!("target/test_config_{}", std::process::id());
        let _ = fs::remove_dir_all(&dir);
        fs::create_dir_all(&dir).unwrap();
        let path = format!("{dir}/dev.yaml");
        fs::write(
            &path,
            "log_level: info\nlog_dir: logs\nlog_file: app.log\nuse_json: false\nrotation: hourly\n",
        )
        .unwrap();

        let config = AppConfig::from_file(&path).unwrap();
        assert_eq!(config.rotation, "hourly");
        assert_eq!(config.engine.confirmations, 1);

        assert!(matches!(
            AppConfig::from_file(&format!("{dir}/missing.yaml")),
            Err(ConfigError::Io { .. })
        ));
        let _ = fs::remove_dir_all(&dir);
    }
}
