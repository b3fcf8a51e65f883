//! Configuration management for the facetgate engine.
//!
//! This module provides configuration loading with multiple sources:
//! 1. Default values (hardcoded)
//! 2. Configuration file (YAML)
//! 3. Environment variables (override)
//!
//! # Configuration Hierarchy
//!
//! Environment variables take precedence over config file values,
//! which take precedence over defaults.
//!
//! # Example
//!
//! ```ignore
//! use facetgate_engine::config::EngineConfig;
//!
//! // Load from file with env overrides
//! let config = EngineConfig::load("facetgate.yaml")?;
//!
//! // Or load from environment only
//! let config = EngineConfig::from_env()?;
//! ```

use std::path::Path;
use std::time::Duration;

use config::{Config, ConfigError, Environment, File, FileFormat};
use facetgate_domain::model::schema::CONFIGURATION_ROOT;
use facetgate_domain::{DecisionCacheConfig, ProjectionConfig, ResolverConfig};
use serde::{Deserialize, Serialize};
use tracing::Level;

use crate::logging::LoggingConfig;

/// Engine configuration.
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
pub struct EngineConfig {
    /// Rule model settings
    #[serde(default)]
    pub rules: RuleSettings,

    /// Decision cache settings
    #[serde(default)]
    pub cache: CacheSettings,

    /// Virtual projection settings
    #[serde(default)]
    pub projection: ProjectionSettings,

    /// Logging settings
    #[serde(default)]
    pub logging: LoggingSettings,
}

/// Where the rule model lives in the content tree.
///
/// - `FACETGATE_RULES__CONFIGURATION_ROOT=/hippo:configuration`
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct RuleSettings {
    /// Absolute path of the configuration root holding `hippo:domains`
    #[serde(default = "default_configuration_root")]
    pub configuration_root: String,
}

impl Default for RuleSettings {
    fn default() -> Self {
        Self {
            configuration_root: default_configuration_root(),
        }
    }
}

fn default_configuration_root() -> String {
    CONFIGURATION_ROOT.to_string()
}

/// Per-session decision cache settings.
///
/// # Example YAML Configuration
///
/// ```yaml
/// cache:
///   enabled: true
///   max_capacity: 10000
///   ttl_secs: 300
///   max_inheritance_depth: 64
/// ```
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct CacheSettings {
    /// Memoize per-node decisions.
    /// Environment variable: `FACETGATE_CACHE__ENABLED`
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Maximum number of cached decisions per session
    #[serde(default = "default_max_capacity")]
    pub max_capacity: u64,

    /// Upper bound on the lifetime of a cached decision, in seconds
    #[serde(default = "default_ttl_secs")]
    pub ttl_secs: u64,

    /// Ancestors inspected when inheriting write from a readable document
    #[serde(default = "default_max_inheritance_depth")]
    pub max_inheritance_depth: usize,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            max_capacity: default_max_capacity(),
            ttl_secs: default_ttl_secs(),
            max_inheritance_depth: default_max_inheritance_depth(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_max_capacity() -> u64 {
    10_000
}

fn default_ttl_secs() -> u64 {
    300
}

fn default_max_inheritance_depth() -> usize {
    64
}

/// Virtual projection settings.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct ProjectionSettings {
    /// Maximum number of nested mirror/facetsearch nodes on one path
    #[serde(default = "default_max_depth")]
    pub max_depth: usize,
}

impl Default for ProjectionSettings {
    fn default() -> Self {
        Self {
            max_depth: default_max_depth(),
        }
    }
}

fn default_max_depth() -> usize {
    8
}

/// Logging settings.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct LoggingSettings {
    /// Log level: "trace", "debug", "info", "warn", "error"
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Use JSON format (true for production, false for development)
    #[serde(default)]
    pub json: bool,

    /// Extra filter directives, e.g. "facetgate_domain::cache=trace"
    #[serde(default)]
    pub directives: Vec<String>,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
            directives: Vec::new(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Error type for configuration loading.
#[derive(Debug, thiserror::Error)]
pub enum ConfigLoadError {
    #[error("failed to load configuration: {0}")]
    Load(#[from] ConfigError),

    #[error("configuration file not found: {path}")]
    FileNotFound { path: String },

    #[error("invalid configuration: {message}")]
    Invalid { message: String },
}

impl EngineConfig {
    /// Load configuration from a YAML file with environment variable overrides.
    ///
    /// Environment variables are prefixed with `FACETGATE_` and use `__` as
    /// separator, e.g. `FACETGATE_CACHE__MAX_CAPACITY=500` overrides
    /// `cache.max_capacity`.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigLoadError> {
        let path = path.as_ref();

        if !path.exists() {
            return Err(ConfigLoadError::FileNotFound {
                path: path.display().to_string(),
            });
        }

        let config = Config::builder()
            .add_source(Config::try_from(&EngineConfig::default())?)
            .add_source(File::from(path).format(FileFormat::Yaml))
            // FACETGATE_CACHE__TTL_SECS -> cache.ttl_secs
            .add_source(
                Environment::with_prefix("FACETGATE")
                    .prefix_separator("_")
                    .separator("__"),
            )
            .build()?;

        let engine_config: EngineConfig = config.try_deserialize()?;
        engine_config.validate()?;

        Ok(engine_config)
    }

    /// Load configuration from environment variables only.
    pub fn from_env() -> Result<Self, ConfigLoadError> {
        let config = Config::builder()
            .add_source(Config::try_from(&EngineConfig::default())?)
            .add_source(
                Environment::with_prefix("FACETGATE")
                    .prefix_separator("_")
                    .separator("__"),
            )
            .build()?;

        let engine_config: EngineConfig = config.try_deserialize()?;
        engine_config.validate()?;

        Ok(engine_config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigLoadError> {
        let root = self.rules.configuration_root.as_str();
        if !root.starts_with('/') || root == "/" || root.ends_with('/') {
            return Err(ConfigLoadError::Invalid {
                message: format!(
                    "rules.configuration_root must be an absolute path below the root, got: {root}"
                ),
            });
        }

        if self.cache.enabled && self.cache.max_capacity == 0 {
            return Err(ConfigLoadError::Invalid {
                message: "cache.max_capacity must be greater than 0 when the cache is enabled"
                    .to_string(),
            });
        }

        if self.cache.ttl_secs == 0 {
            return Err(ConfigLoadError::Invalid {
                message: "cache.ttl_secs must be greater than 0".to_string(),
            });
        }

        if self.projection.max_depth == 0 {
            return Err(ConfigLoadError::Invalid {
                message: "projection.max_depth must be greater than 0".to_string(),
            });
        }

        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.to_lowercase().as_str()) {
            return Err(ConfigLoadError::Invalid {
                message: format!(
                    "logging.level must be one of: {:?}, got: {}",
                    valid_levels, self.logging.level
                ),
            });
        }

        Ok(())
    }

    /// Authorizer settings for new sessions.
    pub fn resolver_config(&self) -> ResolverConfig {
        ResolverConfig::default()
            .with_max_inheritance_depth(self.cache.max_inheritance_depth)
            .with_cache(
                DecisionCacheConfig::default()
                    .with_enabled(self.cache.enabled)
                    .with_max_capacity(self.cache.max_capacity)
                    .with_ttl(Duration::from_secs(self.cache.ttl_secs)),
            )
    }

    pub fn projection_config(&self) -> ProjectionConfig {
        ProjectionConfig::default().with_max_depth(self.projection.max_depth)
    }

    /// Logging setup; the level is validated by [`validate`](Self::validate).
    pub fn logging_config(&self) -> LoggingConfig {
        let level = self
            .logging
            .level
            .to_lowercase()
            .parse::<Level>()
            .unwrap_or(Level::INFO);
        let config = if self.logging.json {
            LoggingConfig::json()
        } else {
            LoggingConfig::text()
        };
        self.logging
            .directives
            .iter()
            .fold(config.with_level(level), |config, directive| {
                config.with_directive(directive.clone())
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::io::Write;
    use tempfile::NamedTempFile;

    /// Test: Can load config from YAML file
    #[test]
    #[serial]
    fn test_can_load_config_from_yaml_file() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
rules:
  configuration_root: "/acme:configuration"

cache:
  enabled: false
  max_capacity: 500
  ttl_secs: 30

projection:
  max_depth: 3

logging:
  level: debug
  json: true
"#
        )
        .unwrap();

        let config = EngineConfig::load(file.path()).unwrap();

        assert_eq!(config.rules.configuration_root, "/acme:configuration");
        assert!(!config.cache.enabled);
        assert_eq!(config.cache.max_capacity, 500);
        assert_eq!(config.cache.ttl_secs, 30);
        assert_eq!(config.cache.max_inheritance_depth, 64);
        assert_eq!(config.projection.max_depth, 3);
        assert_eq!(config.logging.level, "debug");
        assert!(config.logging.json);
    }

    /// Test: Can override config with env vars
    #[test]
    #[serial]
    fn test_can_override_config_with_env_vars() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
cache:
  max_capacity: 500
"#
        )
        .unwrap();

        std::env::set_var("FACETGATE_CACHE__MAX_CAPACITY", "42");
        std::env::set_var("FACETGATE_LOGGING__LEVEL", "warn");

        let config = EngineConfig::load(file.path());

        std::env::remove_var("FACETGATE_CACHE__MAX_CAPACITY");
        std::env::remove_var("FACETGATE_LOGGING__LEVEL");

        let config = config.unwrap();
        assert_eq!(config.cache.max_capacity, 42);
        assert_eq!(config.logging.level, "warn");
        assert_eq!(config.rules.configuration_root, CONFIGURATION_ROOT);
    }

    /// Test: Config validation catches errors
    #[test]
    fn test_config_validation_catches_errors() {
        let cases: [(fn(&mut EngineConfig), &str); 6] = [
            (|c| c.rules.configuration_root = "relative".into(), "configuration_root"),
            (|c| c.rules.configuration_root = "/".into(), "configuration_root"),
            (|c| c.cache.max_capacity = 0, "max_capacity"),
            (|c| c.cache.ttl_secs = 0, "ttl_secs"),
            (|c| c.projection.max_depth = 0, "max_depth"),
            (|c| c.logging.level = "loud".into(), "logging.level"),
        ];
        for (mutate, needle) in cases {
            let mut config = EngineConfig::default();
            mutate(&mut config);
            let err = config.validate().unwrap_err();
            assert!(
                err.to_string().contains(needle),
                "expected '{needle}' in '{err}'"
            );
        }

        // A disabled cache may have zero capacity
        let mut config = EngineConfig::default();
        config.cache.enabled = false;
        config.cache.max_capacity = 0;
        assert!(config.validate().is_ok());
    }

    /// Test: Invalid config returns clear error
    #[test]
    fn test_invalid_config_returns_clear_error() {
        let err = EngineConfig::load("/nonexistent/path/facetgate.yaml").unwrap_err();
        assert!(matches!(err, ConfigLoadError::FileNotFound { .. }));
        assert!(err.to_string().contains("not found"));

        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "invalid: yaml: syntax: [").unwrap();
        let err = EngineConfig::load(file.path()).unwrap_err();
        assert!(matches!(err, ConfigLoadError::Load(_)));
    }

    /// Test: Default config is valid
    #[test]
    fn test_default_config_is_valid() {
        let config = EngineConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.rules.configuration_root, CONFIGURATION_ROOT);
        assert!(config.cache.enabled);
        assert_eq!(config.projection.max_depth, 8);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    #[serial]
    fn test_from_env_loads_defaults_with_env_overrides() {
        std::env::set_var("FACETGATE_PROJECTION__MAX_DEPTH", "2");
        let config = EngineConfig::from_env();
        std::env::remove_var("FACETGATE_PROJECTION__MAX_DEPTH");

        let config = config.unwrap();
        assert_eq!(config.projection.max_depth, 2);
        assert_eq!(config.cache.max_capacity, 10_000);
    }

    #[test]
    fn test_settings_translate_to_domain_configs() {
        let mut config = EngineConfig::default();
        config.cache.max_capacity = 7;
        config.cache.ttl_secs = 9;
        config.projection.max_depth = 4;

        let resolver = config.resolver_config();
        assert_eq!(resolver.cache.max_capacity, 7);
        assert_eq!(resolver.cache.ttl, Duration::from_secs(9));
        assert_eq!(config.projection_config().max_depth, 4);
        assert_eq!(config.logging_config().default_level, Level::INFO);

        config.logging.directives = vec!["facetgate_domain::cache=trace".into()];
        assert!(config
            .logging_config()
            .filter_directives()
            .ends_with("facetgate_domain::cache=trace"));
    }
}
