//! Server configuration.

use std::time::Duration;

use gamehub_settings::ServerSettings;
use serde::{Deserialize, Serialize};

/// Configuration for the gamehub server.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Host to bind (default `"127.0.0.1"`).
    pub host: String,
    /// Port to bind (default `0` for auto-assign).
    pub port: u16,
    /// Max inbound WebSocket message size in bytes.
    pub max_message_size: usize,
    /// Per-connection outbound queue length.
    pub send_queue_capacity: usize,
    /// Bound on a single socket write, in milliseconds.
    pub send_timeout_ms: u64,
    /// Ping interval in seconds.
    pub ping_interval_secs: u64,
    /// Close after this many seconds without a pong.
    pub pong_timeout_secs: u64,
    /// Lifetime dropped frames before a slow client is closed.
    pub max_total_drops: u64,
    /// Drain window on shutdown, in seconds.
    pub shutdown_timeout_secs: u64,
    /// `message` field of the welcome frame.
    pub welcome_message: String,
}

impl ServerConfig {
    /// Socket write bound.
    pub fn send_timeout(&self) -> Duration {
        Duration::from_millis(self.send_timeout_ms)
    }

    /// Ping interval.
    pub fn ping_interval(&self) -> Duration {
        Duration::from_secs(self.ping_interval_secs.max(1))
    }

    /// Pong timeout.
    pub fn pong_timeout(&self) -> Duration {
        Duration::from_secs(self.pong_timeout_secs)
    }

    /// Shutdown drain window.
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }

    /// `host:port` bind address.
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 0,
            max_message_size: 1024 * 1024, // 1 MB
            send_queue_capacity: 256,
            send_timeout_ms: 5_000,
            ping_interval_secs: 30,
            pong_timeout_secs: 60,
            max_total_drops: 100,
            shutdown_timeout_secs: 10,
            welcome_message: "Connected to A.S.S WebSocket Test Server".into(),
        }
    }
}

impl From<&ServerSettings> for ServerConfig {
    fn from(s: &ServerSettings) -> Self {
        Self {
            host: s.host.clone(),
            port: s.port,
            max_message_size: s.max_message_size,
            send_queue_capacity: s.send_queue_capacity,
            send_timeout_ms: s.send_timeout_ms,
            ping_interval_secs: s.ping_interval_secs,
            pong_timeout_secs: s.pong_timeout_secs,
            max_total_drops: s.max_total_drops,
            shutdown_timeout_secs: s.shutdown_timeout_secs,
            welcome_message: s.welcome_message.clone(),
        }
    }
}
