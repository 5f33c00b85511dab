//! # gamehub-core
//!
//! Foundation types shared by the gamehub crates:
//!
//! - [`event`]: inbound telemetry events and the known-tag sum type used for logging
//! - [`stats`]: process-wide aggregation of events by type and channel
//! - [`ids`]: connection identifiers
//! - [`errors`]: frame decoding errors
//! - [`logging`]: `tracing` subscriber setup

#![deny(unsafe_code)]
#![deny(missing_docs)]

pub mod errors;
pub mod event;
pub mod ids;
pub mod logging;
pub mod stats;

pub use errors::FrameError;
pub use event::{EventKind, GameEvent};
pub use ids::ConnectionId;
pub use stats::{GlobalStats, SessionStats, StatsAggregator};

/// Current wall-clock time as unix milliseconds.
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
