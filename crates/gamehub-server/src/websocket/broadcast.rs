//! Event fan-out to connected WebSocket clients.

use std::sync::Arc;

use gamehub_core::{ConnectionId, GameEvent, StatsAggregator};
use metrics::counter;
use tracing::{debug, info, warn};

use super::connection::SendError;
use super::registry::ConnectionRegistry;
use crate::metrics::{HUB_EVENTS_TOTAL, WS_BROADCAST_DROPS_TOTAL};
use crate::protocol;

/// Policy-violation close code used for clients that cannot keep up.
pub const SLOW_CLIENT_CLOSE_CODE: u16 = 1008;
/// Reason paired with [`SLOW_CLIENT_CLOSE_CODE`].
pub const SLOW_CLIENT_CLOSE_REASON: &str = "Too many dropped messages";

/// Outcome of a single dispatch.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DispatchReport {
    /// Connections whose queue accepted the envelope.
    pub recipients: usize,
    /// Connections that were skipped (full, closed, or no longer open).
    pub failed: usize,
}

/// Records inbound events and rebroadcasts them to every open connection.
pub struct BroadcastEngine {
    registry: Arc<ConnectionRegistry>,
    stats: Arc<StatsAggregator>,
    max_total_drops: u64,
}

impl BroadcastEngine {
    /// Create an engine over a registry and aggregator.
    pub fn new(
        registry: Arc<ConnectionRegistry>,
        stats: Arc<StatsAggregator>,
        max_total_drops: u64,
    ) -> Self {
        Self {
            registry,
            stats,
            max_total_drops,
        }
    }

    /// Count `event`, log it, then enqueue one envelope per open connection.
    ///
    /// The sender is included. A failed enqueue never blocks or aborts the
    /// fan-out; clients that exceed the drop limit are asked to close.
    pub async fn dispatch(
        &self,
        event: &GameEvent,
        origin: &ConnectionId,
        received_at: i64,
    ) -> DispatchReport {
        self.stats.record(event);
        counter!(HUB_EVENTS_TOTAL, "type" => event.event_type().to_owned()).increment(1);

        info!(
            target: "gamehub::events",
            client_id = %origin,
            event_type = event.event_type(),
            channel = event.channel().unwrap_or("unknown"),
            event_time = ?event.timestamp_utc(),
            "{}",
            event.summary()
        );

        let json = match protocol::game_event_frame(event.raw(), received_at, origin) {
            Ok(json) => Arc::new(json),
            Err(e) => {
                warn!(event_type = event.event_type(), error = %e, "failed to serialize envelope");
                return DispatchReport::default();
            }
        };

        let mut report = DispatchReport::default();
        for conn in self.registry.snapshot().await {
            match conn.send(Arc::clone(&json)) {
                Ok(()) => report.recipients += 1,
                Err(SendError::NotOpen) => {
                    report.failed += 1;
                    debug!(client_id = %conn.id, "skipping connection that is no longer open");
                }
                Err(e) => {
                    report.failed += 1;
                    counter!(WS_BROADCAST_DROPS_TOTAL).increment(1);
                    let drops = conn.drop_count();
                    if drops >= self.max_total_drops {
                        warn!(client_id = %conn.id, drops, error = %e, "closing slow client");
                        conn.request_close(SLOW_CLIENT_CLOSE_CODE, SLOW_CLIENT_CLOSE_REASON);
                    } else {
                        warn!(client_id = %conn.id, drops, error = %e, "failed to send event to client");
                    }
                }
            }
        }

        debug!(
            event_type = event.event_type(),
            recipients = report.recipients,
            failed = report.failed,
            "broadcast event to all"
        );
        report
    }
}
