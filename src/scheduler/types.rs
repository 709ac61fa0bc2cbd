//! Scheduler type definitions.
//!
//! This module contains error types, state enums, and command types for the scheduler.

use crate::config::ConfigError;
use crate::core::job::RegistryError;
use crate::storage::StoreError;
use thiserror::Error;
use tokio::sync::oneshot;

/// Errors that can occur in the scheduler.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// `init` was called on a running scheduler.
    #[error("scheduler already initialized")]
    AlreadyInitialized,

    /// The operation needs an initialized scheduler.
    #[error("scheduler is not initialized")]
    NotInitialized,

    /// Job registration or lookup failed.
    #[error("registry error: {0}")]
    Registry(#[from] RegistryError),

    /// Storage error.
    #[error("storage error: {0}")]
    Storage(#[from] StoreError),

    /// Invalid configuration.
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// A schedule request that cannot be honored.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// A record could not be serialized.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Scheduler state lock was poisoned.
    #[error("scheduler state lock poisoned")]
    LockPoisoned,

    /// Channel error.
    #[error("channel error: {0}")]
    ChannelError(String),
}

/// State of the scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    /// Scheduler is stopped.
    Stopped,
    /// Scheduler is running.
    Running,
    /// Scheduler is paused.
    Paused,
}

/// Commands that can be sent to the poll loop.
pub(crate) enum SchedulerCommand {
    /// Pause the scheduler.
    Pause { response: oneshot::Sender<()> },
    /// Resume the scheduler.
    Resume { response: oneshot::Sender<()> },
    /// Shutdown the scheduler.
    Shutdown { response: oneshot::Sender<()> },
}
