//! YAML configuration parsing.
//!
//! Parses and validates scheduler configuration from YAML files.

use std::path::Path;

use super::error::ConfigError;
use super::types::SchedulerConfig;

/// YAML configuration loader.
pub struct YamlLoader;

impl YamlLoader {
    /// Load scheduler configuration from a file.
    pub fn load_scheduler_config(path: impl AsRef<Path>) -> Result<SchedulerConfig, ConfigError> {
        let path = path.as_ref();
        let content =
            std::fs::read_to_string(path).map_err(|source| ConfigError::FileReadError {
                path: path.to_path_buf(),
                source,
            })?;
        Self::parse_scheduler_config(&content)
    }

    /// Parse scheduler configuration from a YAML string.
    pub fn parse_scheduler_config(yaml: &str) -> Result<SchedulerConfig, ConfigError> {
        let config: SchedulerConfig = serde_yaml::from_str(yaml)?;
        Self::validate(&config)?;
        Ok(config)
    }

    /// Validate a scheduler configuration.
    pub fn validate(config: &SchedulerConfig) -> Result<(), ConfigError> {
        if config.poll_interval.is_zero() {
            return Err(ConfigError::InvalidConfig(
                "poll_interval_secs cannot be zero".into(),
            ));
        }

        if config.namespace.is_empty() {
            return Err(ConfigError::InvalidConfig("namespace cannot be empty".into()));
        }

        if !config
            .namespace
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_')
        {
            return Err(ConfigError::InvalidConfig(format!(
                "namespace '{}' may only contain letters, digits and underscores",
                config.namespace
            )));
        }

        if config.cache.enabled && config.cache.capacity == 0 {
            return Err(ConfigError::InvalidConfig(
                "cache capacity cannot be zero".into(),
            ));
        }

        Ok(())
    }
}

impl SchedulerConfig {
    /// Parse and validate a configuration from YAML.
    pub fn from_yaml_str(yaml: &str) -> Result<Self, ConfigError> {
        YamlLoader::parse_scheduler_config(yaml)
    }

    /// Load and validate a configuration file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        YamlLoader::load_scheduler_config(path)
    }

    /// Check the configuration for invalid values.
    pub fn validate(&self) -> Result<(), ConfigError> {
        YamlLoader::validate(self)
    }
}
