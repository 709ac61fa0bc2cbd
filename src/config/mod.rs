//! Configuration loading and parsing.
//!
//! This module provides YAML-based configuration for the scheduler.

mod error;
mod types;
mod yaml;

pub use error::ConfigError;
pub use types::{
    CacheConfig, DEFAULT_CACHE_CAPACITY, DEFAULT_NAMESPACE, DEFAULT_POLL_INTERVAL, PollMode,
    SchedulerConfig, StorageConfig,
};
pub use yaml::YamlLoader;
