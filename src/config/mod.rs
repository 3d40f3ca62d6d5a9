/// Configuration management for steward

use crate::cache::redis::redis_url;
use crate::cache::CacheSettings;
use crate::core::{ReplicaConfig, DEFAULT_MAX_ACCEPTABLE_LAG_MS, DEFAULT_REPLICA_WEIGHT};
use crate::health::HealthSettings;
use crate::router::{RouterConfig, SelectionStrategy};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::Path;
use std::time::Duration;

pub use crate::error::ConfigError;

/// Main steward configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Primary database and routing behaviour
    #[serde(default)]
    pub router: RouterSection,
    /// Read replicas registered at startup
    #[serde(default)]
    pub replicas: Vec<ReplicaSection>,
    /// Replica health check configuration
    #[serde(default)]
    pub health: HealthSection,
    /// Query cache configuration
    #[serde(default)]
    pub cache: CacheSection,
    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Router configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RouterSection {
    /// Connection target of the primary database
    pub primary: String,
    /// Upper bound for a single query in milliseconds
    pub query_timeout_ms: u64,
    /// Replica selection strategy
    pub selection: SelectionStrategy,
}

/// One read replica
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplicaSection {
    pub id: String,
    /// Connection target handed to the database client
    pub target: String,
    #[serde(default = "default_weight")]
    pub weight: usize,
    #[serde(default = "default_max_lag")]
    pub max_acceptable_lag_ms: u64,
}

/// Health check configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthSection {
    /// Health check interval in seconds
    pub interval_sec: u64,
    /// Health check timeout in seconds
    pub timeout_sec: u64,
    /// Number of consecutive failures before marking a replica unhealthy
    pub max_consecutive_errors: u32,
}

/// Cache configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheSection {
    pub enabled: bool,
    /// Redis address (`host:port` or `redis://` URL); an in-process store is
    /// used when absent
    pub redis_addr: Option<String>,
    pub key_prefix: String,
    pub default_ttl_sec: u64,
    /// Remaining TTL below which a hit is refreshed in the background
    pub stale_threshold_sec: u64,
    pub operation_timeout_ms: u64,
    pub warm_batch_size: usize,
    pub max_background_refreshes: usize,
    /// Count hits and misses in the store as well
    pub distributed_stats: bool,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (error, warn, info, debug, trace)
    pub level: String,
    /// Log format (json, text)
    pub format: String,
}

fn default_weight() -> usize {
    DEFAULT_REPLICA_WEIGHT
}

fn default_max_lag() -> u64 {
    DEFAULT_MAX_ACCEPTABLE_LAG_MS
}

impl Default for RouterSection {
    fn default() -> Self {
        Self {
            primary: "127.0.0.1:5432".to_string(),
            query_timeout_ms: 5000,
            selection: SelectionStrategy::RoundRobin,
        }
    }
}

impl Default for HealthSection {
    fn default() -> Self {
        let defaults = HealthSettings::default();
        Self {
            interval_sec: defaults.check_interval.as_secs(),
            timeout_sec: defaults.check_timeout.as_secs(),
            max_consecutive_errors: defaults.max_consecutive_errors,
        }
    }
}

impl Default for CacheSection {
    fn default() -> Self {
        let defaults = CacheSettings::default();
        Self {
            enabled: defaults.enabled,
            redis_addr: None,
            key_prefix: defaults.key_prefix,
            default_ttl_sec: defaults.default_ttl.as_secs(),
            stale_threshold_sec: defaults.stale_threshold.as_secs(),
            operation_timeout_ms: defaults.operation_timeout.as_millis() as u64,
            warm_batch_size: defaults.warm_batch_size,
            max_background_refreshes: defaults.max_background_refreshes,
            distributed_stats: defaults.distributed_stats,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "text".to_string(),
        }
    }
}

impl ReplicaSection {
    pub fn to_replica_config(&self) -> ReplicaConfig {
        ReplicaConfig::new(self.id.clone(), self.target.clone())
            .with_weight(self.weight)
            .with_max_lag_ms(self.max_acceptable_lag_ms)
    }
}

impl Config {
    /// Load configuration from TOML file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|e| ConfigError::IoError(e.to_string()))?;

        let config: Config =
            toml::from_str(&content).map_err(|e| ConfigError::ParseError(e.to_string()))?;

        config.validate()?;
        Ok(config)
    }

    /// Save configuration to TOML file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| ConfigError::SerializeError(e.to_string()))?;

        fs::write(path, content).map_err(|e| ConfigError::IoError(e.to_string()))?;

        Ok(())
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        // Validate router config
        if self.router.primary.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "router.primary cannot be empty".to_string(),
            ));
        }

        if self.router.query_timeout_ms == 0 {
            return Err(ConfigError::ValidationError(
                "router.query_timeout_ms must be greater than 0".to_string(),
            ));
        }

        // Validate replicas
        let mut seen = HashSet::new();
        for replica in &self.replicas {
            if replica.id.trim().is_empty() {
                return Err(ConfigError::ValidationError(
                    "replica id cannot be empty".to_string(),
                ));
            }
            if !seen.insert(replica.id.as_str()) {
                return Err(ConfigError::ValidationError(format!(
                    "Duplicate replica id: {}",
                    replica.id
                )));
            }
            if replica.target.trim().is_empty() {
                return Err(ConfigError::ValidationError(format!(
                    "replica {} target cannot be empty",
                    replica.id
                )));
            }
            if replica.weight == 0 {
                return Err(ConfigError::ValidationError(format!(
                    "replica {} weight must be greater than 0",
                    replica.id
                )));
            }
        }

        // Validate health config
        if self.health.interval_sec == 0 {
            return Err(ConfigError::ValidationError(
                "health check interval_sec must be greater than 0".to_string(),
            ));
        }

        if self.health.timeout_sec == 0 {
            return Err(ConfigError::ValidationError(
                "health check timeout_sec must be greater than 0".to_string(),
            ));
        }

        if self.health.timeout_sec >= self.health.interval_sec {
            return Err(ConfigError::ValidationError(
                "health check timeout_sec must be less than interval_sec".to_string(),
            ));
        }

        if self.health.max_consecutive_errors == 0 {
            return Err(ConfigError::ValidationError(
                "health max_consecutive_errors must be greater than 0".to_string(),
            ));
        }

        // Validate cache config
        if self.cache.default_ttl_sec == 0 {
            return Err(ConfigError::ValidationError(
                "cache default_ttl_sec must be greater than 0".to_string(),
            ));
        }

        if self.cache.operation_timeout_ms == 0 {
            return Err(ConfigError::ValidationError(
                "cache operation_timeout_ms must be greater than 0".to_string(),
            ));
        }

        if self.cache.warm_batch_size == 0 {
            return Err(ConfigError::ValidationError(
                "cache warm_batch_size must be greater than 0".to_string(),
            ));
        }

        if self.cache.max_background_refreshes == 0 {
            return Err(ConfigError::ValidationError(
                "cache max_background_refreshes must be greater than 0".to_string(),
            ));
        }

        if let Some(addr) = &self.cache.redis_addr {
            if addr.trim().is_empty() {
                return Err(ConfigError::ValidationError(
                    "cache redis_addr cannot be empty when set".to_string(),
                ));
            }
            if let Err(e) = redis::Client::open(redis_url(addr).as_str()) {
                return Err(ConfigError::ValidationError(format!(
                    "cache redis_addr {:?} is not a valid Redis address: {}",
                    addr, e
                )));
            }
        }

        // Validate logging config
        match self.logging.level.as_str() {
            "error" | "warn" | "info" | "debug" | "trace" => {}
            _ => {
                return Err(ConfigError::ValidationError(format!(
                    "Invalid log level: {}",
                    self.logging.level
                )))
            }
        }

        match self.logging.format.as_str() {
            "json" | "text" => {}
            _ => {
                return Err(ConfigError::ValidationError(format!(
                    "Invalid log format: {}",
                    self.logging.format
                )))
            }
        }

        Ok(())
    }

    pub fn health_settings(&self) -> HealthSettings {
        HealthSettings {
            check_interval: Duration::from_secs(self.health.interval_sec),
            check_timeout: Duration::from_secs(self.health.timeout_sec),
            max_consecutive_errors: self.health.max_consecutive_errors,
        }
    }

    pub fn router_config(&self) -> RouterConfig {
        RouterConfig::new(self.router.primary.clone())
            .with_query_timeout(Duration::from_millis(self.router.query_timeout_ms))
            .with_selection(self.router.selection)
            .with_health(self.health_settings())
    }

    pub fn cache_settings(&self) -> CacheSettings {
        CacheSettings {
            enabled: self.cache.enabled,
            key_prefix: self.cache.key_prefix.clone(),
            default_ttl: Duration::from_secs(self.cache.default_ttl_sec),
            stale_threshold: Duration::from_secs(self.cache.stale_threshold_sec),
            operation_timeout: Duration::from_millis(self.cache.operation_timeout_ms),
            warm_batch_size: self.cache.warm_batch_size,
            max_background_refreshes: self.cache.max_background_refreshes,
            distributed_stats: self.cache.distributed_stats,
        }
    }

    pub fn replica_configs(&self) -> Vec<ReplicaConfig> {
        self.replicas.iter().map(ReplicaSection::to_replica_config).collect()
    }

    /// Create example configuration file
    pub fn create_example_config<P: AsRef<Path>>(path: P) -> Result<(), ConfigError> {
        let config = Config {
            router: RouterSection {
                primary: "10.0.1.10:5432".to_string(),
                ..Default::default()
            },
            replicas: vec![
                ReplicaSection {
                    id: "replica-1".to_string(),
                    target: "10.0.1.11:5432".to_string(),
                    weight: 1,
                    max_acceptable_lag_ms: DEFAULT_MAX_ACCEPTABLE_LAG_MS,
                },
                ReplicaSection {
                    id: "replica-2".to_string(),
                    target: "10.0.1.12:5432".to_string(),
                    weight: 2,
                    max_acceptable_lag_ms: DEFAULT_MAX_ACCEPTABLE_LAG_MS,
                },
            ],
            cache: CacheSection {
                redis_addr: Some("10.0.1.20:6379".to_string()),
                ..Default::default()
            },
            ..Default::default()
        };

        config.save_to_file(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    fn with_replica(id: &str) -> ReplicaSection {
        ReplicaSection {
            id: id.to_string(),
            target: format!("{}:5432", id),
            weight: 1,
            max_acceptable_lag_ms: 5000,
        }
    }

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.health.interval_sec, 30);
        assert_eq!(config.health.max_consecutive_errors, 3);
        assert_eq!(config.cache.key_prefix, "qc:");
        assert_eq!(config.cache.stale_threshold_sec, 60);
    }

    #[test]
    fn test_config_validation() {
        let mut config = Config::default();
        config.replicas = vec![with_replica("r1"), with_replica("r1")];
        assert!(config.validate().is_err());

        config.replicas = vec![with_replica("r1"), with_replica("r2")];
        assert!(config.validate().is_ok());

        config.replicas[1].weight = 0;
        assert!(config.validate().is_err());
        config.replicas[1].weight = 1;

        config.health.timeout_sec = config.health.interval_sec;
        assert!(config.validate().is_err());
        config.health.timeout_sec = 5;

        config.health.max_consecutive_errors = 0;
        assert!(config.validate().is_err());
        config.health.max_consecutive_errors = 3;

        config.cache.warm_batch_size = 0;
        assert!(config.validate().is_err());
        config.cache.warm_batch_size = 10;

        config.cache.redis_addr = Some("cache:notaport".to_string());
        assert!(config.validate().is_err());
        config.cache.redis_addr = Some("redis://cache:6379/0".to_string());
        assert!(config.validate().is_ok());

        config.logging.format = "xml".to_string();
        assert!(config.validate().is_err());
        config.logging.format = "json".to_string();

        config.router.primary = " ".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_partial_config_uses_defaults() {
        let config: Config = toml::from_str(
            r#"
            [router]
            primary = "db-primary:5432"
            selection = "weighted_round_robin"

            [[replicas]]
            id = "r1"
            target = "db-r1:5432"

            [cache]
            redis_addr = "cache:6379"
            "#,
        )
        .unwrap();

        assert!(config.validate().is_ok());
        assert_eq!(config.router.query_timeout_ms, 5000);
        assert_eq!(config.router.selection, SelectionStrategy::WeightedRoundRobin);
        assert_eq!(config.replicas[0].weight, 1);
        assert_eq!(config.replicas[0].max_acceptable_lag_ms, 5000);
        assert_eq!(config.cache.default_ttl_sec, 300);
        assert!(config.cache.enabled);

        let replicas = config.replica_configs();
        assert_eq!(replicas[0].connection_target, "db-r1:5432");
    }

    #[test]
    fn test_settings_conversion() {
        let config = Config::default();
        let router = config.router_config();
        assert_eq!(router.query_timeout, Duration::from_secs(5));
        assert_eq!(router.health.check_interval, Duration::from_secs(30));
        assert!(router.validate().is_ok());

        let cache = config.cache_settings();
        assert_eq!(cache.operation_timeout, Duration::from_millis(1000));
        assert_eq!(cache.max_background_refreshes, 16);
    }

    #[test]
    fn test_config_file_operations() {
        let temp_file = NamedTempFile::new().unwrap();

        Config::create_example_config(temp_file.path()).unwrap();
        let loaded_config = Config::load_from_file(temp_file.path()).unwrap();
        assert_eq!(loaded_config.replicas.len(), 2);
        assert_eq!(loaded_config.cache.redis_addr.as_deref(), Some("10.0.1.20:6379"));
    }

    #[test]
    fn test_invalid_file_is_rejected() {
        let temp_file = NamedTempFile::new().unwrap();
        fs::write(temp_file.path(), "[router\nprimary = ").unwrap();
        assert!(matches!(
            Config::load_from_file(temp_file.path()),
            Err(ConfigError::ParseError(_))
        ));
        assert!(matches!(
            Config::load_from_file("/nonexistent/steward.toml"),
            Err(ConfigError::IoError(_))
        ));
    }
}
