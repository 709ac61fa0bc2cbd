//! Lifecycle events and event handling.
//!
//! This module provides event emission for record lifecycle transitions,
//! enabling observability into what the engine did on each tick.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

use crate::core::record::OvershotAction;
use crate::core::types::JobId;

/// Lifecycle events emitted by the engine.
#[derive(Debug, Clone)]
pub enum Event {
    /// A record was claimed and its job is about to execute.
    JobStarted {
        record_id: JobId,
        job_name: String,
        cycle_number: u32,
        timestamp: Instant,
    },

    /// A record finished executing, after any retries.
    JobCompleted {
        record_id: JobId,
        job_name: String,
        cycle_number: u32,
        success: bool,
        /// Executions made, including the first one.
        attempts: u32,
        duration: Duration,
        timestamp: Instant,
    },

    /// The successor of a repeating record was persisted.
    JobRescheduled {
        origin_id: JobId,
        next_id: JobId,
        job_name: String,
        timestamp: Instant,
    },

    /// The engine removed a record without a successor.
    JobDropped {
        record_id: JobId,
        job_name: String,
        last_job: bool,
        timestamp: Instant,
    },

    /// The job's veto gate skipped a due record.
    JobVetoed {
        record_id: JobId,
        job_name: String,
        cycle_number: u32,
        timestamp: Instant,
    },

    /// A record was found past its deadline.
    JobOvershot {
        record_id: JobId,
        job_name: String,
        action: OvershotAction,
        timestamp: Instant,
    },
}

impl Event {
    /// Get the timestamp of the event.
    pub fn timestamp(&self) -> Instant {
        match self {
            Event::JobStarted { timestamp, .. } => *timestamp,
            Event::JobCompleted { timestamp, .. } => *timestamp,
            Event::JobRescheduled { timestamp, .. } => *timestamp,
            Event::JobDropped { timestamp, .. } => *timestamp,
            Event::JobVetoed { timestamp, .. } => *timestamp,
            Event::JobOvershot { timestamp, .. } => *timestamp,
        }
    }

    /// Name of the job the event concerns.
    pub fn job_name(&self) -> &str {
        match self {
            Event::JobStarted { job_name, .. }
            | Event::JobCompleted { job_name, .. }
            | Event::JobRescheduled { job_name, .. }
            | Event::JobDropped { job_name, .. }
            | Event::JobVetoed { job_name, .. }
            | Event::JobOvershot { job_name, .. } => job_name,
        }
    }

    /// Create a JobStarted event.
    pub fn job_started(record_id: JobId, job_name: impl Into<String>, cycle_number: u32) -> Self {
        Event::JobStarted {
            record_id,
            job_name: job_name.into(),
            cycle_number,
            timestamp: Instant::now(),
        }
    }

    /// Create a JobCompleted event.
    pub fn job_completed(
        record_id: JobId,
        job_name: impl Into<String>,
        cycle_number: u32,
        success: bool,
        attempts: u32,
        duration: Duration,
    ) -> Self {
        Event::JobCompleted {
            record_id,
            job_name: job_name.into(),
            cycle_number,
            success,
            attempts,
            duration,
            timestamp: Instant::now(),
        }
    }

    /// Create a JobRescheduled event.
    pub fn job_rescheduled(origin_id: JobId, next_id: JobId, job_name: impl Into<String>) -> Self {
        Event::JobRescheduled {
            origin_id,
            next_id,
            job_name: job_name.into(),
            timestamp: Instant::now(),
        }
    }

    /// Create a JobDropped event.
    pub fn job_dropped(record_id: JobId, job_name: impl Into<String>, last_job: bool) -> Self {
        Event::JobDropped {
            record_id,
            job_name: job_name.into(),
            last_job,
            timestamp: Instant::now(),
        }
    }

    /// Create a JobVetoed event.
    pub fn job_vetoed(record_id: JobId, job_name: impl Into<String>, cycle_number: u32) -> Self {
        Event::JobVetoed {
            record_id,
            job_name: job_name.into(),
            cycle_number,
            timestamp: Instant::now(),
        }
    }

    /// Create a JobOvershot event.
    pub fn job_overshot(
        record_id: JobId,
        job_name: impl Into<String>,
        action: OvershotAction,
    ) -> Self {
        Event::JobOvershot {
            record_id,
            job_name: job_name.into(),
            action,
            timestamp: Instant::now(),
        }
    }
}

/// Handler for receiving lifecycle events.
#[async_trait]
pub trait EventHandler: Send + Sync {
    /// Handle an event.
    async fn handle(&self, event: &Event);
}

/// Event bus for distributing events to registered handlers.
pub struct EventBus {
    handlers: RwLock<Vec<Arc<dyn EventHandler>>>,
}

impl EventBus {
    /// Create a new event bus with no handlers.
    pub fn new() -> Self {
        Self {
            handlers: RwLock::new(Vec::new()),
        }
    }

    /// Register an event handler.
    pub async fn register(&self, handler: Arc<dyn EventHandler>) {
        let mut handlers = self.handlers.write().await;
        handlers.push(handler);
    }

    /// Emit an event to all registered handlers.
    pub async fn emit(&self, event: Event) {
        let handlers = self.handlers.read().await;
        for handler in handlers.iter() {
            handler.handle(&event).await;
        }
    }

    /// Get the number of registered handlers.
    pub async fn handler_count(&self) -> usize {
        self.handlers.read().await.len()
    }

    /// Remove every handler.
    pub async fn clear(&self) {
        self.handlers.write().await.clear();
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
