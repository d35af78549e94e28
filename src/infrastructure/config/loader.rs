use std::path::Path;

use anyhow::{Context, Result};
use figment::Figment;
use figment::providers::{Env, Format, Serialized, Yaml};
use thiserror::Error;

use crate::domain::models::config::Config;

/// Project-local configuration directory
pub const CONFIG_DIR: &str = ".capture";

/// Prefix for environment overrides; nested keys use `__`
pub const ENV_PREFIX: &str = "CAPTURE_";

/// Configuration error types
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid {field}: {value}. Must be at least 1")]
    ZeroCapacity { field: &'static str, value: usize },

    #[error("Invalid max_retries: {0}. Must be at least 1")]
    InvalidMaxRetries(u32),

    #[error("Invalid retry_interval_ms: {0}. Must be positive")]
    InvalidRetryInterval(u64),

    #[error("Invalid lease ttl_ms: {0}. Must be positive")]
    InvalidLeaseTtl(u64),

    #[error("Invalid log level: {0}. Must be one of: trace, debug, info, warn, error")]
    InvalidLogLevel(String),

    #[error("Invalid log format: {0}. Must be one of: json, pretty")]
    InvalidLogFormat(String),

    #[error("Invalid log rotation: {0}. Must be one of: daily, hourly, never")]
    InvalidRotation(String),

    #[error("Database path cannot be empty")]
    EmptyDatabasePath,

    #[error("Invalid max_connections: {0}. Must be at least 1")]
    InvalidMaxConnections(u32),

    #[error("Fetcher path template must contain {{conversation_id}}: {0}")]
    InvalidPathTemplate(String),
}

/// Configuration loader with hierarchical merging
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration with hierarchical merging
    ///
    /// Precedence (lowest to highest):
    /// 1. Programmatic defaults (Serialized)
    /// 2. .capture/config.yaml
    /// 3. .capture/local.yaml (optional local overrides)
    /// 4. Environment variables (CAPTURE_* prefix, highest priority)
    pub fn load() -> Result<Config> {
        Self::load_from_dir(CONFIG_DIR)
    }

    /// Same hierarchy as [`Self::load`] rooted at `dir`.
    pub fn load_from_dir(dir: impl AsRef<Path>) -> Result<Config> {
        let dir = dir.as_ref();
        let config: Config = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Yaml::file(dir.join("config.yaml")))
            .merge(Yaml::file(dir.join("local.yaml")))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()
            .context("Failed to extract configuration from figment")?;

        Self::validate(&config)?;
        Ok(config)
    }

    /// Load configuration from a specific file
    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Config> {
        let config: Config = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Yaml::file(path.as_ref()))
            .extract()
            .with_context(|| format!("Failed to load config from {}", path.as_ref().display()))?;

        Self::validate(&config)?;
        Ok(config)
    }

    /// Validate configuration after loading
    pub fn validate(config: &Config) -> Result<(), ConfigError> {
        let capacities = [
            ("attempt_capacity", config.engine.attempt_capacity),
            ("alias_capacity", config.engine.alias_capacity),
            ("conversation_capacity", config.engine.conversation_capacity),
        ];
        for (field, value) in capacities {
            if value == 0 {
                return Err(ConfigError::ZeroCapacity { field, value });
            }
        }

        if config.stabilization.max_retries == 0 {
            return Err(ConfigError::InvalidMaxRetries(config.stabilization.max_retries));
        }
        if config.stabilization.retry_interval_ms == 0 {
            return Err(ConfigError::InvalidRetryInterval(
                config.stabilization.retry_interval_ms,
            ));
        }

        if config.lease.ttl_ms == 0 {
            return Err(ConfigError::InvalidLeaseTtl(config.lease.ttl_ms));
        }

        if config.database.path.is_empty() {
            return Err(ConfigError::EmptyDatabasePath);
        }
        if config.database.max_connections == 0 {
            return Err(ConfigError::InvalidMaxConnections(
                config.database.max_connections,
            ));
        }

        if !config.fetcher.path_template.contains("{conversation_id}") {
            return Err(ConfigError::InvalidPathTemplate(
                config.fetcher.path_template.clone(),
            ));
        }

        let valid_log_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_log_levels.contains(&config.logging.level.as_str()) {
            return Err(ConfigError::InvalidLogLevel(config.logging.level.clone()));
        }

        let valid_log_formats = ["json", "pretty"];
        if !valid_log_formats.contains(&config.logging.format.as_str()) {
            return Err(ConfigError::InvalidLogFormat(config.logging.format.clone()));
        }

        let valid_rotations = ["daily", "hourly", "never"];
        if !valid_rotations.contains(&config.logging.rotation.as_str()) {
            return Err(ConfigError::InvalidRotation(config.logging.rotation.clone()));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::LeaseBackend;
    use std::fs;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.stabilization.max_retries, 6);
        assert_eq!(config.gate.max_wait_ms, 30_000);
        assert_eq!(config.lease.backend, LeaseBackend::Memory);
        assert_eq!(config.database.path, ".capture/leases.db");
        ConfigLoader::validate(&config).expect("Default config should be valid");
    }

    #[test]
    fn test_yaml_parsing() {
        let yaml = r"
stabilization:
  initial_delay_ms: 500
  max_retries: 3
lease:
  ttl_ms: 2000
  backend: sqlite
fetcher:
  base_url: http://localhost:8080
logging:
  level: debug
  format: json
";

        let config: Config = serde_yaml::from_str(yaml).expect("YAML should parse");

        assert_eq!(config.stabilization.initial_delay_ms, 500);
        assert_eq!(config.stabilization.max_retries, 3);
        assert_eq!(config.stabilization.retry_interval_ms, 2_500);
        assert_eq!(config.lease.backend, LeaseBackend::Sqlite);
        assert_eq!(config.fetcher.base_url.as_deref(), Some("http://localhost:8080"));
        assert_eq!(config.logging.format, "json");

        ConfigLoader::validate(&config).expect("Parsed config should be valid");
    }

    #[test]
    fn test_validate_zero_capacity() {
        let mut config = Config::default();
        config.engine.alias_capacity = 0;

        assert!(matches!(
            ConfigLoader::validate(&config),
            Err(ConfigError::ZeroCapacity { field: "alias_capacity", .. })
        ));
    }

    #[test]
    fn test_validate_zero_max_retries() {
        let mut config = Config::default();
        config.stabilization.max_retries = 0;

        assert!(matches!(
            ConfigLoader::validate(&config),
            Err(ConfigError::InvalidMaxRetries(0))
        ));
    }

    #[test]
    fn test_validate_zero_lease_ttl() {
        let mut config = Config::default();
        config.lease.ttl_ms = 0;

        assert!(matches!(
            ConfigLoader::validate(&config),
            Err(ConfigError::InvalidLeaseTtl(0))
        ));
    }

    #[test]
    fn test_validate_invalid_log_level() {
        let mut config = Config::default();
        config.logging.level = "invalid".to_string();

        match ConfigLoader::validate(&config) {
            Err(ConfigError::InvalidLogLevel(level)) => assert_eq!(level, "invalid"),
            other => panic!("Expected InvalidLogLevel error, got {other:?}"),
        }
    }

    #[test]
    fn test_validate_path_template_needs_placeholder() {
        let mut config = Config::default();
        config.fetcher.path_template = "/conversation".to_string();

        assert!(matches!(
            ConfigLoader::validate(&config),
            Err(ConfigError::InvalidPathTemplate(_))
        ));
    }

    #[test]
    fn test_zero_gate_wait_is_valid() {
        let mut config = Config::default();
        config.gate.max_wait_ms = 0;
        assert!(ConfigLoader::validate(&config).is_ok());
    }

    #[test]
    fn test_hierarchical_merging() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join("config.yaml"),
            "stabilization:\n  max_retries: 4\nlogging:\n  level: info\n  format: json\n",
        )
        .unwrap();
        fs::write(
            dir.path().join("local.yaml"),
            "stabilization:\n  max_retries: 9\nlogging:\n  level: debug\n",
        )
        .unwrap();

        let config = temp_env::with_vars_unset(
            ["CAPTURE_STABILIZATION__MAX_RETRIES", "CAPTURE_LOGGING__LEVEL"],
            || ConfigLoader::load_from_dir(dir.path()),
        )
        .unwrap();

        assert_eq!(config.stabilization.max_retries, 9, "Override should win");
        assert_eq!(config.logging.level, "debug");
        assert_eq!(config.logging.format, "json", "Base value should persist");
    }

    #[test]
    fn test_env_override() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("config.yaml"), "lease:\n  ttl_ms: 1000\n").unwrap();

        let config = temp_env::with_vars(
            [
                ("CAPTURE_LEASE__TTL_MS", Some("7000")),
                ("CAPTURE_LEASE__BACKEND", Some("sqlite")),
                ("CAPTURE_LOGGING__LEVEL", Some("warn")),
            ],
            || ConfigLoader::load_from_dir(dir.path()),
        )
        .unwrap();

        assert_eq!(config.lease.ttl_ms, 7000);
        assert_eq!(config.lease.backend, LeaseBackend::Sqlite);
        assert_eq!(config.logging.level, "warn");
    }

    #[test]
    fn test_invalid_env_value_fails_validation() {
        let dir = tempfile::tempdir().unwrap();
        let result = temp_env::with_var("CAPTURE_LOGGING__FORMAT", Some("xml"), || {
            ConfigLoader::load_from_dir(dir.path())
        });
        assert!(result.is_err());
    }
}
