//! Kronos: persistent job scheduling.
//!
//! Jobs are registered by name. Scheduling a job writes a [`JobRecord`] to a
//! [`JobStore`]; a poll loop wakes once a minute, validates every record
//! against the clock and runs the due ones with bounded retries. Repeating
//! records (fixed interval or calendar [`Periodic`] rule) are replaced by
//! their successor before they execute.
//!
//! ```no_run
//! use async_trait::async_trait;
//! use kronos::{Job, JobParams, ScheduleRequest, Scheduler, SchedulerConfig, Start};
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! struct SayHello;
//!
//! #[async_trait]
//! impl Job for SayHello {
//!     fn name(&self) -> &str {
//!         "say-hello"
//!     }
//!
//!     async fn execute(&self, cycle_number: u32, _params: &JobParams) -> bool {
//!         println!("hello #{cycle_number}");
//!         true
//!     }
//! }
//!
//! # async fn example() -> Result<(), kronos::SchedulerError> {
//! let scheduler = Scheduler::new();
//! scheduler.init_from_config(SchedulerConfig::default()).await?;
//! scheduler.register(Arc::new(SayHello))?;
//!
//! scheduler
//!     .schedule(
//!         ScheduleRequest::new("say-hello")
//!             .with_start(Start::After(Duration::from_secs(120)))
//!             .with_interval(Duration::from_secs(3600))
//!             .with_max_cycles(5),
//!     )
//!     .await?;
//! # Ok(())
//! # }
//! ```

pub mod cache;
pub mod config;
pub mod core;
pub mod events;
pub mod scheduler;
pub mod storage;
pub mod testing;

pub use cache::{CacheLayer, CacheStats, LruCache, NoCache, StoreFuture};
pub use config::{CacheConfig, ConfigError, PollMode, SchedulerConfig, StorageConfig};
pub use core::job::{Job, JobRegistry, RegistryError};
pub use core::periodic::{Every, Periodic, PeriodicError};
pub use core::record::{CYCLE_NUMBER_KEY, JobParams, JobRecord, OvershotAction};
pub use core::types::JobId;
pub use core::validate::{Validity, validate};
pub use events::{Event, EventBus, EventHandler};
pub use scheduler::{
    Dispatched, Engine, ScheduleRequest, Scheduler, SchedulerError, SchedulerState, Start,
};
#[cfg(feature = "sqlite")]
pub use storage::SqliteStore;
pub use storage::{CounterField, Filter, InMemoryStore, JobStore, StoreError};
