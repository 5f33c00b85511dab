//! Settings types. Field names are camelCase in the JSON file.

use serde::{Deserialize, Serialize};

/// Root settings object.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct HubSettings {
    /// Network and connection handling.
    pub server: ServerSettings,
    /// Log output.
    pub logging: LoggingSettings,
}

/// Server network and connection settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerSettings {
    /// Bind address.
    pub host: String,
    /// Listen port for HTTP and WebSocket traffic.
    pub port: u16,
    /// Largest inbound WebSocket message accepted, in bytes.
    pub max_message_size: usize,
    /// Outbound frames buffered per connection before sends start failing.
    pub send_queue_capacity: usize,
    /// Upper bound for a single socket write, in milliseconds.
    pub send_timeout_ms: u64,
    /// Interval between server pings, in seconds.
    pub ping_interval_secs: u64,
    /// Close a connection that has not answered a ping for this long, in seconds.
    pub pong_timeout_secs: u64,
    /// Lifetime dropped frames after which a slow connection is closed.
    pub max_total_drops: u64,
    /// How long shutdown waits for connections to drain, in seconds.
    pub shutdown_timeout_secs: u64,
    /// Text of the welcome frame's `message` field.
    pub welcome_message: String,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            max_message_size: 1024 * 1024,
            send_queue_capacity: 256,
            send_timeout_ms: 5_000,
            ping_interval_secs: 30,
            pong_timeout_secs: 60,
            max_total_drops: 100,
            shutdown_timeout_secs: 10,
            welcome_message: "Connected to A.S.S WebSocket Test Server".to_string(),
        }
    }
}

/// Log output settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    /// Filter directive used when `RUST_LOG` is unset.
    pub level: String,
    /// Emit JSON lines instead of compact text.
    pub json: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}
