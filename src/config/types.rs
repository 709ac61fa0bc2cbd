//! Configuration type definitions.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default namespace records are stored under.
pub const DEFAULT_NAMESPACE: &str = "jobsDb";

/// Default time between poll ticks.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(60);

/// Default number of records the LRU cache holds.
pub const DEFAULT_CACHE_CAPACITY: usize = 1024;

/// Scheduler configuration (kronos.yaml).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Time between poll ticks, in whole seconds.
    #[serde(rename = "poll_interval_secs", with = "duration_secs")]
    pub poll_interval: Duration,
    /// Logical database the records live in.
    pub namespace: String,
    /// Whether a background loop drives the ticks.
    pub poll_mode: PollMode,
    /// Storage backend.
    pub storage: StorageConfig,
    /// Cache in front of the storage backend.
    pub cache: CacheConfig,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
            namespace: DEFAULT_NAMESPACE.to_string(),
            poll_mode: PollMode::default(),
            storage: StorageConfig::default(),
            cache: CacheConfig::default(),
        }
    }
}

impl SchedulerConfig {
    /// Set the poll interval.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Set the namespace.
    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    /// Set the poll mode.
    pub fn with_poll_mode(mut self, mode: PollMode) -> Self {
        self.poll_mode = mode;
        self
    }

    /// Set the cache configuration.
    pub fn with_cache(mut self, cache: CacheConfig) -> Self {
        self.cache = cache;
        self
    }
}

/// How poll ticks are driven.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PollMode {
    /// A background task ticks once per poll interval.
    #[default]
    Background,
    /// No background task; the caller drives ticks.
    Manual,
}

/// Storage configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum StorageConfig {
    /// In-memory storage (default, non-persistent).
    #[serde(rename = "memory")]
    #[default]
    Memory,
    /// SQLite storage.
    #[serde(rename = "sqlite")]
    Sqlite {
        /// Path to the database file.
        path: String,
    },
}

/// Cache configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Whether to put an LRU cache in front of the store.
    pub enabled: bool,
    /// Maximum number of cached records.
    pub capacity: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            capacity: DEFAULT_CACHE_CAPACITY,
        }
    }
}

/// Serde helper for `Duration` stored as whole seconds.
mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_secs())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        Ok(Duration::from_secs(u64::deserialize(deserializer)?))
    }
}
