//! `/health` endpoint.

use chrono::{DateTime, Utc};
use gamehub_core::GlobalStats;
use serde::Serialize;

/// Health check response body.
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// Always `"ok"` when the server is running.
    pub status: &'static str,
    /// Current number of open WebSocket connections.
    pub clients: usize,
    /// Milliseconds since the aggregator started.
    pub uptime: i64,
    /// Full counters snapshot.
    pub stats: GlobalStats,
}

/// Build a health response from live counters.
pub fn health_check(stats: GlobalStats, clients: usize, now: DateTime<Utc>) -> HealthResponse {
    HealthResponse {
        status: "ok",
        clients,
        uptime: stats.uptime_millis(now),
        stats,
    }
}
