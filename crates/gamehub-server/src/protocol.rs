//! Outbound wire frames.
//!
//! Every frame is a JSON object sent as a WebSocket text message. Timestamps
//! are unix milliseconds taken from the server clock.

use gamehub_core::ConnectionId;
use serde::Serialize;
use serde_json::Value;

/// `type` of the frame sent once when a connection opens.
pub const WELCOME_TYPE: &str = "server_welcome";
/// `type` of the frame wrapping a rebroadcast event.
pub const GAME_EVENT_TYPE: &str = "game_event";

/// Greeting sent immediately after accept.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerWelcome<'a> {
    /// Always [`WELCOME_TYPE`].
    #[serde(rename = "type")]
    pub frame_type: &'static str,
    /// Id assigned to the new connection.
    pub client_id: &'a ConnectionId,
    /// Send time, unix millis.
    pub timestamp: i64,
    /// Configured greeting text.
    pub message: &'a str,
}

/// Envelope around a forwarded inbound event.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GameEventEnvelope<'a> {
    /// Always [`GAME_EVENT_TYPE`].
    #[serde(rename = "type")]
    pub frame_type: &'static str,
    /// The inbound event exactly as parsed.
    pub original_event: &'a Value,
    /// Arrival time at the hub, unix millis.
    pub received_at: i64,
    /// Connection the event arrived on.
    pub client_id: &'a ConnectionId,
}

/// Serialize the welcome frame.
pub fn welcome_frame(
    client_id: &ConnectionId,
    message: &str,
    timestamp: i64,
) -> serde_json::Result<String> {
    serde_json::to_string(&ServerWelcome {
        frame_type: WELCOME_TYPE,
        client_id,
        timestamp,
        message,
    })
}

/// Serialize a broadcast envelope.
pub fn game_event_frame(
    original_event: &Value,
    received_at: i64,
    origin: &ConnectionId,
) -> serde_json::Result<String> {
    serde_json::to_string(&GameEventEnvelope {
        frame_type: GAME_EVENT_TYPE,
        original_event,
        received_at,
        client_id: origin,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn welcome_has_required_fields() {
        let id = ConnectionId::from("client_1_abc");
        let frame = welcome_frame(&id, "hello", 1_700_000_000_000).unwrap();
        let parsed: Value = serde_json::from_str(&frame).unwrap();
        assert_eq!(parsed["type"], "server_welcome");
        assert_eq!(parsed["clientId"], "client_1_abc");
        assert_eq!(parsed["timestamp"], 1_700_000_000_000_i64);
        assert_eq!(parsed["message"], "hello");
    }

    #[test]
    fn envelope_wraps_event_verbatim() {
        let id = ConnectionId::from("client_2_def");
        let original = json!({
            "type": "boss_spawned",
            "timestamp": 1000,
            "channel": "s1",
            "data": {"boss_name": "Hydra"},
            "extra": [1, 2],
        });
        let frame = game_event_frame(&original, 42, &id).unwrap();
        let parsed: Value = serde_json::from_str(&frame).unwrap();
        assert_eq!(parsed["type"], "game_event");
        assert_eq!(parsed["originalEvent"], original);
        assert_eq!(parsed["receivedAt"], 42);
        assert_eq!(parsed["clientId"], "client_2_def");
    }

    #[test]
    fn envelope_keeps_original_key_order() {
        let id = ConnectionId::from("client_3_ghi");
        let raw = r#"{"type":"mxp_spent","zeta":1,"data":{"upgrade_type":"speed","amount":5},"alpha":2}"#;
        let original: Value = serde_json::from_str(raw).unwrap();
        let frame = game_event_frame(&original, 7, &id).unwrap();
        assert!(
            frame.contains(&format!("\"originalEvent\":{raw}")),
            "key order changed: {frame}"
        );
    }
}
