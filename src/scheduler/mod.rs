//! Scheduling API, execution engine and lifecycle control.
//!
//! [`Scheduler`] is the entry point: it registers jobs, turns
//! [`ScheduleRequest`]s into stored records and drives the [`Engine`],
//! either from a background poll loop or from explicit ticks.

mod engine;
mod handle;
mod lifecycle;
mod request;
mod types;

pub use engine::{Dispatched, Engine, SharedRegistry};
pub use lifecycle::Scheduler;
pub use request::{ScheduleRequest, Start};
pub use types::{SchedulerError, SchedulerState};
