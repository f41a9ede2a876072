use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct FeedConfig {
    pub base_url: String,
    pub default_limit: usize,
    pub request_timeout_secs: u64,
    pub max_retries: u8,
    pub retry_backoff_ms: u64,
    pub user_agent: String,
    pub max_entities_per_key: usize,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            base_url: "https://www.minds.com/".to_owned(),
            default_limit: 12,
            request_timeout_secs: 10,
            max_retries: 2,
            retry_backoff_ms: 500,
            user_agent: concat!("feedcache/", env!("CARGO_PKG_VERSION")).to_owned(),
            max_entities_per_key: 150,
        }
    }
}

impl FeedConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }

    /// Directory holding the config file and the local page store.
    pub fn config_dir() -> PathBuf {
        let mut dir = dirs::config_dir()
            .or_else(|| std::env::current_dir().ok())
            .unwrap_or_default();
        dir.push("feedcache");
        dir
    }

    pub fn config_file_path() -> PathBuf {
        Self::config_dir().join("config.json")
    }

    /// Reads a config file, falling back to defaults when it is missing or unreadable.
    pub fn from_file(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref();
        match std::fs::read(path) {
            Ok(bytes) => match serde_json::from_slice::<FeedConfig>(&bytes) {
                Ok(config) => config,
                Err(e) => {
                    warn!(error = %e, path = %path.display(), "invalid config, using defaults");
                    Self::default()
                }
            },
            Err(e) => {
                warn!(error = %e, path = %path.display(), "config not readable, using defaults");
                Self::default()
            }
        }
    }

    /// Loads the config from the default location.
    pub fn load() -> Self {
        let path = Self::config_file_path();
        if path.exists() {
            Self::from_file(path)
        } else {
            Self::default()
        }
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), std::io::Error> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_vec_pretty(self)?;
        std::fs::write(path, json)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_path(name: &str) -> PathBuf {
        let mut dir = std::env::temp_dir();
        dir.push(format!(
            "feedcache_config_{}_{}",
            name,
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .unwrap()
                .as_nanos()
        ));
        dir.join("config.json")
    }

    #[test]
    fn partial_file_keeps_defaults_for_missing_fields() {
        let path = temp_path("partial");
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, br#"{ "default_limit": 24 }"#).unwrap();

        let config = FeedConfig::from_file(&path);
        assert_eq!(config.default_limit, 24);
        assert_eq!(config.max_retries, FeedConfig::default().max_retries);

        let _ = std::fs::remove_dir_all(path.parent().unwrap());
    }

    #[test]
    fn corrupted_file_falls_back_to_defaults() {
        let path = temp_path("corrupt");
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, b"{ not json").unwrap();

        assert_eq!(FeedConfig::from_file(&path), FeedConfig::default());

        let _ = std::fs::remove_dir_all(path.parent().unwrap());
    }

    #[test]
    fn save_then_load_keeps_values() {
        let path = temp_path("save");
        let config = FeedConfig { retry_backoff_ms: 5, ..FeedConfig::default() };
        config.save(&path).unwrap();

        assert_eq!(FeedConfig::from_file(&path), config);

        let _ = std::fs::remove_dir_all(path.parent().unwrap());
    }
}
