//! # gamehub-server
//!
//! Axum HTTP + `WebSocket` gateway for the telemetry hub.
//!
//! - `/ws`: game clients and dashboards connect here; every inbound event is
//!   counted and rebroadcast to all live connections
//! - `/health`, `/stats`: read-only projections of the aggregate counters
//! - `/metrics`: Prometheus exposition
//! - Graceful shutdown via `CancellationToken`: live connections receive a
//!   normal close frame before the listener stops

#![deny(unsafe_code)]
#![deny(missing_docs)]

pub mod config;
pub mod errors;
pub mod health;
pub mod metrics;
pub mod protocol;
pub mod server;
pub mod shutdown;
pub mod websocket;

pub use config::ServerConfig;
pub use errors::ServerError;
pub use server::{AppState, GameHubServer};
