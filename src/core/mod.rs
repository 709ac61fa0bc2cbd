//! Core scheduling types: identifiers, records, calendar rules, job
//! behaviors and due-time validation.

pub mod job;
pub mod periodic;
pub mod record;
pub mod types;
pub mod validate;
