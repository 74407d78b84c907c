use serde::Deserialize;
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Where refreshed datasets come from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DatasetSource {
    /// Reload the JSON files whenever they change on disk.
    Files,
    /// Refetch the full stop and route tables from the upstream API.
    Upstream,
}

/// Dataset file locations.
#[derive(Debug, Clone, Deserialize)]
pub struct DatasetConfig {
    pub stops_path: PathBuf,
    pub routes_path: PathBuf,
    #[serde(default = "default_source")]
    pub source: DatasetSource,
}

fn default_source() -> DatasetSource {
    DatasetSource::Files
}

/// Arrival cache settings (optional in config file).
#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
    #[serde(default = "default_ttl_seconds")]
    pub ttl_seconds: u64,
    #[serde(default = "default_item_limit")]
    pub item_limit: usize,
}

fn default_ttl_seconds() -> u64 {
    20
}
fn default_item_limit() -> usize {
    100
}

impl Default for CacheConfig {
    fn default() -> Self {
        CacheConfig {
            ttl_seconds: default_ttl_seconds(),
            item_limit: default_item_limit(),
        }
    }
}

/// Dataset refresh interval (optional in config file).
#[derive(Debug, Clone, Deserialize)]
pub struct RefreshConfig {
    #[serde(default = "default_interval_seconds")]
    pub interval_seconds: u64,
}

fn default_interval_seconds() -> u64 {
    86_400
}

impl Default for RefreshConfig {
    fn default() -> Self {
        RefreshConfig {
            interval_seconds: default_interval_seconds(),
        }
    }
}

/// HTTP server settings (optional in config file).
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

fn default_bind() -> String {
    "0.0.0.0:5001".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig { bind: default_bind() }
    }
}

/// Nearest-stop query limits (optional in config file).
#[derive(Debug, Clone, Deserialize)]
pub struct QueryConfig {
    #[serde(default = "default_nearest")]
    pub default_nearest: usize,
    #[serde(default = "default_max_nearest")]
    pub max_nearest: usize,
}

fn default_nearest() -> usize {
    5
}
fn default_max_nearest() -> usize {
    50
}

impl Default for QueryConfig {
    fn default() -> Self {
        QueryConfig {
            default_nearest: default_nearest(),
            max_nearest: default_max_nearest(),
        }
    }
}

/// Application configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub dataset: DatasetConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub refresh: RefreshConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub query: QueryConfig,
}

impl Config {
    /// Load configuration from a JSON file.
    ///
    /// Relative dataset paths are resolved against the config file's
    /// directory.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::Io(e.to_string()))?;
        let mut config = Self::from_json(&contents)?;
        if let Some(dir) = path.parent() {
            config.dataset.stops_path = dir.join(&config.dataset.stops_path);
            config.dataset.routes_path = dir.join(&config.dataset.routes_path);
        }
        Ok(config)
    }

    /// Parse config from a JSON string (useful for testing).
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: Config =
            serde_json::from_str(json).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache.ttl_seconds)
    }

    pub fn cache_item_limit(&self) -> NonZeroUsize {
        NonZeroUsize::new(self.cache.item_limit).unwrap_or(NonZeroUsize::MIN)
    }

    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.refresh.interval_seconds)
    }

    /// Validate config values are within acceptable ranges.
    fn validate(&self) -> Result<(), ConfigError> {
        if self.cache.ttl_seconds < 1 {
            return Err(ConfigError::Validation(
                "cache.ttl_seconds must be at least 1".to_string(),
            ));
        }
        if self.cache.item_limit < 1 {
            return Err(ConfigError::Validation(
                "cache.item_limit must be at least 1".to_string(),
            ));
        }
        if self.refresh.interval_seconds < 60 {
            return Err(ConfigError::Validation(format!(
                "refresh.interval_seconds must be at least 60, got {}",
                self.refresh.interval_seconds
            )));
        }
        if self.query.default_nearest < 1 || self.query.default_nearest > self.query.max_nearest {
            return Err(ConfigError::Validation(format!(
                "query.default_nearest must be 1-{}, got {}",
                self.query.max_nearest, self.query.default_nearest
            )));
        }
        Ok(())
    }
}

/// Configuration errors.
#[derive(Debug)]
pub enum ConfigError {
    Io(String),
    Parse(String),
    Validation(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(msg) => write!(f, "Config I/O error: {}", msg),
            ConfigError::Parse(msg) => write!(f, "Config parse error: {}", msg),
            ConfigError::Validation(msg) => write!(f, "Config validation error: {}", msg),
        }
    }
}

impl std::error::Error for ConfigError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minimal_config_defaults() {
        let json = r#"{
            "dataset": {
                "stops_path": "bus_stops.json",
                "routes_path": "bus_routes.json"
            }
        }"#;
        let config = Config::from_json(json).expect("should parse minimal config");
        assert_eq!(config.dataset.source, DatasetSource::Files);
        assert_eq!(config.cache.ttl_seconds, 20);
        assert_eq!(config.cache.item_limit, 100);
        assert_eq!(config.refresh.interval_seconds, 86_400);
        assert_eq!(config.server.bind, "0.0.0.0:5001");
        assert_eq!(config.query.default_nearest, 5);
        assert_eq!(config.cache_item_limit().get(), 100);
    }

    #[test]
    fn test_full_config() {
        let json = r#"{
            "dataset": {
                "stops_path": "data/stops.json",
                "routes_path": "data/routes.json",
                "source": "upstream"
            },
            "cache": { "ttl_seconds": 30, "item_limit": 500 },
            "refresh": { "interval_seconds": 3600 },
            "server": { "bind": "127.0.0.1:8080" },
            "query": { "default_nearest": 3, "max_nearest": 10 }
        }"#;
        let config = Config::from_json(json).unwrap();
        assert_eq!(config.dataset.source, DatasetSource::Upstream);
        assert_eq!(config.cache_ttl(), Duration::from_secs(30));
        assert_eq!(config.refresh_interval(), Duration::from_secs(3600));
        assert_eq!(config.server.bind, "127.0.0.1:8080");
        assert_eq!(config.query.max_nearest, 10);
    }

    #[test]
    fn test_validation_item_limit_zero() {
        let json = r#"{
            "dataset": { "stops_path": "s.json", "routes_path": "r.json" },
            "cache": { "item_limit": 0 }
        }"#;
        let err = Config::from_json(json).unwrap_err();
        assert!(err.to_string().contains("item_limit"));
    }

    #[test]
    fn test_validation_refresh_too_frequent() {
        let json = r#"{
            "dataset": { "stops_path": "s.json", "routes_path": "r.json" },
            "refresh": { "interval_seconds": 5 }
        }"#;
        let err = Config::from_json(json).unwrap_err();
        assert!(err.to_string().contains("interval_seconds"));
    }

    #[test]
    fn test_validation_default_nearest_above_max() {
        let json = r#"{
            "dataset": { "stops_path": "s.json", "routes_path": "r.json" },
            "query": { "default_nearest": 20, "max_nearest": 10 }
        }"#;
        let err = Config::from_json(json).unwrap_err();
        assert!(err.to_string().contains("default_nearest"));
    }

    #[test]
    fn test_missing_dataset_section() {
        let err = Config::from_json("{}").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn test_unknown_source() {
        let json = r#"{
            "dataset": { "stops_path": "s.json", "routes_path": "r.json", "source": "ftp" }
        }"#;
        assert!(Config::from_json(json).is_err());
    }
}
