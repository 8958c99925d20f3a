// src/events/mod.rs

//! Append-only structured event log.
//!
//! - [`event`] defines the [`Event`] record and the canonical [`EventType`]s.
//! - [`log`] owns the ND-JSON writer plus [`read_events`] / [`filter_events`].
//!
//! The event log is the only state that survives a crash, so resume logic
//! reads it (never the manifest) to decide which steps already succeeded.

pub mod event;
pub mod log;

pub use event::{Event, EventType};
pub use log::{filter_events, prior_successes, read_events, EventLog, PriorSuccess, EVENTS_FILE};
