//! Process-wide event aggregation.
//!
//! [`StatsAggregator`] owns a single [`GlobalStats`] behind one mutex. Every
//! [`record`](StatsAggregator::record) applies all of its counter updates while
//! holding the lock, so [`export`](StatsAggregator::export) never sees an event
//! half-counted.
//!
//! Session timestamps come from the producer, not the server clock. They are
//! trusted as-is and may move backwards if clients disagree about the time.

use std::collections::BTreeMap;

use chrono::{DateTime, SecondsFormat, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::event::GameEvent;

/// Aggregate for one channel (game session).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionStats {
    /// Timestamp of the first event seen on this channel. Never updated.
    #[serde(with = "millis_opt")]
    pub first_seen: Option<DateTime<Utc>>,
    /// Timestamp of the most recently received event on this channel.
    #[serde(with = "millis_opt")]
    pub last_seen: Option<DateTime<Utc>>,
    /// Number of events received on this channel.
    pub event_count: u64,
}

/// Snapshot of all aggregate counters.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GlobalStats {
    /// Total events recorded.
    pub total_events: u64,
    /// Event count per `type` tag.
    pub event_types: BTreeMap<String, u64>,
    /// Per-channel aggregates.
    pub sessions: BTreeMap<String, SessionStats>,
    /// When aggregation started.
    #[serde(with = "millis")]
    pub start_time: DateTime<Utc>,
}

impl GlobalStats {
    fn new(start_time: DateTime<Utc>) -> Self {
        Self {
            total_events: 0,
            event_types: BTreeMap::new(),
            sessions: BTreeMap::new(),
            start_time,
        }
    }

    /// Milliseconds elapsed since `start_time`.
    pub fn uptime_millis(&self, now: DateTime<Utc>) -> i64 {
        (now - self.start_time).num_milliseconds()
    }
}

/// RFC 3339 with exactly three fractional digits, e.g. `2024-01-01T00:00:00.000Z`.
mod millis {
    use chrono::{DateTime, Utc};
    use serde::{Deserialize, Deserializer, Serializer, de::Error};

    use super::SecondsFormat;

    pub fn serialize<S: Serializer>(t: &DateTime<Utc>, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&t.to_rfc3339_opts(SecondsFormat::Millis, true))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<DateTime<Utc>, D::Error> {
        let raw = String::deserialize(d)?;
        DateTime::parse_from_rfc3339(&raw)
            .map(|t| t.with_timezone(&Utc))
            .map_err(D::Error::custom)
    }
}

mod millis_opt {
    use chrono::{DateTime, Utc};
    use serde::{Deserialize, Deserializer, Serializer, de::Error};

    use super::SecondsFormat;

    pub fn serialize<S: Serializer>(t: &Option<DateTime<Utc>>, s: S) -> Result<S::Ok, S::Error> {
        match t {
            Some(t) => s.serialize_str(&t.to_rfc3339_opts(SecondsFormat::Millis, true)),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        d: D,
    ) -> Result<Option<DateTime<Utc>>, D::Error> {
        Option::<String>::deserialize(d)?
            .map(|raw| {
                DateTime::parse_from_rfc3339(&raw)
                    .map(|t| t.with_timezone(&Utc))
                    .map_err(D::Error::custom)
            })
            .transpose()
    }
}

/// Shared aggregator. Wrap in an `Arc` and hand a clone to every connection.
pub struct StatsAggregator {
    inner: Mutex<GlobalStats>,
}

impl StatsAggregator {
    /// Create an aggregator whose `start_time` is now.
    pub fn new() -> Self {
        Self::with_start_time(Utc::now())
    }

    /// Create an aggregator with an explicit `start_time`.
    pub fn with_start_time(start_time: DateTime<Utc>) -> Self {
        Self {
            inner: Mutex::new(GlobalStats::new(start_time)),
        }
    }

    /// Count one event.
    pub fn record(&self, event: &GameEvent) {
        let mut stats = self.inner.lock();
        stats.total_events += 1;
        *stats
            .event_types
            .entry(event.event_type().to_owned())
            .or_insert(0) += 1;

        if let Some(channel) = event.channel() {
            let seen = event.timestamp_utc();
            let session = stats
                .sessions
                .entry(channel.to_owned())
                .or_insert_with(|| SessionStats {
                    first_seen: seen,
                    last_seen: seen,
                    event_count: 0,
                });
            session.last_seen = seen;
            session.event_count += 1;
        }
    }

    /// Consistent copy of the current counters.
    pub fn export(&self) -> GlobalStats {
        self.inner.lock().clone()
    }

    /// Total events recorded so far.
    pub fn total_events(&self) -> u64 {
        self.inner.lock().total_events
    }

    /// When aggregation started.
    pub fn start_time(&self) -> DateTime<Utc> {
        self.inner.lock().start_time
    }
}

impl Default for StatsAggregator {
    fn default() -> Self {
        Self::new()
    }
}
