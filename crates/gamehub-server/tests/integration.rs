//! End-to-end integration tests using a real WebSocket client.

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use serde_json::{Value, json};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;

use gamehub_server::config::ServerConfig;
use gamehub_server::server::GameHubServer;
use gamehub_server::shutdown::DrainOutcome;

const TIMEOUT: Duration = Duration::from_secs(5);
/// How long to wait before concluding no further frame is coming.
const QUIET: Duration = Duration::from_millis(300);
/// Window for tests that push tens of megabytes through loopback.
const BULK_TIMEOUT: Duration = Duration::from_secs(20);

type WsStream = tokio_tungstenite::WebSocketStream<
    tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
>;

struct TestHub {
    server: Arc<GameHubServer>,
    addr: SocketAddr,
    handle: Option<JoinHandle<()>>,
}

impl TestHub {
    fn ws_url(&self) -> String {
        format!("ws://{}/ws", self.addr)
    }

    async fn get(&self, path: &str) -> Value {
        reqwest::get(format!("http://{}{path}", self.addr))
            .await
            .unwrap()
            .json()
            .await
            .unwrap()
    }

    /// Poll `/health` until `clients` equals `expected`.
    async fn wait_for_clients(&self, expected: u64) {
        let poll = async {
            loop {
                if self.get("/health").await["clients"] == expected {
                    return;
                }
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
        };
        timeout(TIMEOUT, poll)
            .await
            .unwrap_or_else(|_| panic!("clients never reached {expected}"));
    }
}

/// Boot a test server on an ephemeral port.
async fn boot_server() -> TestHub {
    boot_with(ServerConfig::default()).await
}

async fn boot_with(config: ServerConfig) -> TestHub {
    let server = Arc::new(GameHubServer::new(config));
    let (addr, handle) = server.listen().await.unwrap();
    TestHub {
        server,
        addr,
        handle: Some(handle),
    }
}

/// Connect and consume the welcome frame. Returns the assigned client ID.
async fn connect(hub: &TestHub) -> (WsStream, String) {
    let (mut ws, _) = connect_async(hub.ws_url()).await.unwrap();
    let welcome = read_json(&mut ws).await;
    assert_eq!(welcome["type"], "server_welcome");
    let id = welcome["clientId"].as_str().unwrap().to_owned();
    (ws, id)
}

/// Read the next text message as JSON.
async fn read_json(ws: &mut WsStream) -> Value {
    loop {
        let msg = timeout(TIMEOUT, ws.next())
            .await
            .expect("timeout waiting for message")
            .expect("stream closed")
            .expect("ws error");
        if let Message::Text(text) = msg {
            return serde_json::from_str(&text).unwrap();
        }
    }
}

/// Assert nothing but control frames arrive within [`QUIET`].
async fn assert_no_text(ws: &mut WsStream) {
    let quiet = async {
        loop {
            match ws.next().await {
                Some(Ok(Message::Text(text))) => panic!("unexpected frame: {text}"),
                Some(Ok(_)) => {}
                _ => return,
            }
        }
    };
    let _ = timeout(QUIET, quiet).await;
}

async fn send_json(ws: &mut WsStream, value: &Value) {
    ws.send(Message::text(value.to_string())).await.unwrap();
}

/// Skip text until the server's close frame arrives.
async fn read_close(ws: &mut WsStream) -> CloseFrame {
    loop {
        let msg = timeout(TIMEOUT, ws.next())
            .await
            .expect("timeout waiting for close")
            .expect("stream ended before close frame")
            .expect("ws error");
        if let Message::Close(frame) = msg {
            return frame.expect("close frame without code");
        }
    }
}

/// Split a client and count incoming text frames on a background task.
fn count_incoming(ws: WsStream) -> (SplitSink<WsStream, Message>, Arc<AtomicUsize>) {
    let (sink, mut stream) = ws.split();
    let count = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&count);
    tokio::spawn(async move {
        while let Some(Ok(msg)) = stream.next().await {
            if msg.is_text() {
                let _ = counter.fetch_add(1, Ordering::Relaxed);
            }
        }
    });
    (sink, count)
}

async fn wait_for_count(count: &AtomicUsize, expected: usize) {
    let poll = async {
        while count.load(Ordering::Relaxed) < expected {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    };
    timeout(BULK_TIMEOUT, poll).await.unwrap_or_else(|_| {
        panic!(
            "received {} of {expected} frames",
            count.load(Ordering::Relaxed)
        )
    });
}

/// Event large enough that a few hundred fill a non-reading peer's socket buffers.
fn bulky_event(seq: usize) -> Value {
    json!({
        "type": "custom_blob",
        "channel": "bulk",
        "data": {"seq": seq, "blob": "x".repeat(64 * 1024)},
    })
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn e2e_welcome_on_connect() {
    let hub = boot_server().await;
    let (mut ws, _) = connect_async(hub.ws_url()).await.unwrap();

    let msg = read_json(&mut ws).await;
    assert_eq!(msg["type"], "server_welcome");
    assert!(msg["clientId"].as_str().unwrap().starts_with("client_"));
    assert!(msg["timestamp"].is_i64());
    assert_eq!(msg["message"], "Connected to A.S.S WebSocket Test Server");
}

#[tokio::test]
async fn e2e_welcome_message_is_configurable() {
    let hub = boot_with(ServerConfig {
        welcome_message: "hi there".into(),
        ..ServerConfig::default()
    })
    .await;
    let (mut ws, _) = connect_async(hub.ws_url()).await.unwrap();
    assert_eq!(read_json(&mut ws).await["message"], "hi there");
}

#[tokio::test]
async fn e2e_client_ids_are_distinct() {
    let hub = boot_server().await;
    let (_a, id_a) = connect(&hub).await;
    let (_b, id_b) = connect(&hub).await;
    assert_ne!(id_a, id_b);
}

#[tokio::test]
async fn e2e_boss_spawned_is_broadcast_and_counted() {
    let hub = boot_server().await;
    let (mut a, id_a) = connect(&hub).await;
    let (mut b, _) = connect(&hub).await;

    let event = json!({
        "type": "boss_spawned",
        "timestamp": 1000,
        "channel": "s1",
        "data": {"boss_name": "Hydra"},
    });
    send_json(&mut a, &event).await;

    let envelope = read_json(&mut b).await;
    assert_eq!(envelope["type"], "game_event");
    assert_eq!(envelope["clientId"], id_a.as_str());
    assert_eq!(envelope["originalEvent"], event);
    assert!(envelope["receivedAt"].is_i64());
    assert_no_text(&mut b).await;

    // Sender receives its own event too.
    let echo = read_json(&mut a).await;
    assert_eq!(echo["originalEvent"]["type"], "boss_spawned");

    let stats = hub.get("/stats").await;
    assert_eq!(stats["totalEvents"], 1);
    assert_eq!(stats["eventTypes"]["boss_spawned"], 1);
    assert_eq!(stats["sessions"]["s1"]["eventCount"], 1);
}

#[tokio::test]
async fn e2e_malformed_frames_are_dropped_without_disconnect() {
    let hub = boot_server().await;
    let (mut a, _) = connect(&hub).await;

    a.send(Message::text("not json")).await.unwrap();
    send_json(&mut a, &json!({"no_type": 1})).await;
    send_json(&mut a, &json!([1, 2, 3])).await;
    send_json(&mut a, &json!({"type": 7})).await;
    assert_no_text(&mut a).await;

    let stats = hub.get("/stats").await;
    assert_eq!(stats["totalEvents"], 0);
    assert_eq!(stats["eventTypes"], json!({}));

    // Still connected: a well-formed event goes through.
    send_json(&mut a, &json!({"type": "session_start", "channel": "s2"})).await;
    let envelope = read_json(&mut a).await;
    assert_eq!(envelope["originalEvent"]["type"], "session_start");
    assert_eq!(hub.get("/stats").await["totalEvents"], 1);
}

#[tokio::test]
async fn e2e_binary_utf8_frame_treated_as_text() {
    let hub = boot_server().await;
    let (mut a, _) = connect(&hub).await;

    let payload = json!({"type": "level_up", "channel": "s3", "data": {"level": 4}});
    a.send(Message::binary(payload.to_string().into_bytes()))
        .await
        .unwrap();

    let envelope = read_json(&mut a).await;
    assert_eq!(envelope["originalEvent"], payload);
}

#[tokio::test]
async fn e2e_health_after_connect() {
    let hub = boot_server().await;
    let (_a, _) = connect(&hub).await;

    let health = hub.get("/health").await;
    assert_eq!(health["status"], "ok");
    assert_eq!(health["clients"], 1);
    assert_eq!(health["stats"]["totalEvents"], 0);
    assert!(health["uptime"].as_i64().unwrap() >= 0);
}

#[tokio::test]
async fn e2e_disconnect_decrements_clients() {
    let hub = boot_server().await;
    let (mut a, _) = connect(&hub).await;
    let (mut b, _) = connect(&hub).await;
    hub.wait_for_clients(2).await;

    a.close(None).await.unwrap();
    hub.wait_for_clients(1).await;

    // Remaining client still receives broadcasts.
    send_json(&mut b, &json!({"type": "player_death", "channel": "s4"})).await;
    assert_eq!(read_json(&mut b).await["originalEvent"]["type"], "player_death");
}

#[tokio::test]
async fn e2e_concurrent_producers_all_counted() {
    const PRODUCERS: usize = 4;
    const EVENTS_EACH: usize = 10;

    let hub = boot_server().await;
    let mut clients = Vec::new();
    for _ in 0..PRODUCERS {
        clients.push(connect(&hub).await.0);
    }
    hub.wait_for_clients(PRODUCERS as u64).await;

    let mut tasks = Vec::new();
    for (p, mut ws) in clients.into_iter().enumerate() {
        tasks.push(tokio::spawn(async move {
            for i in 0..EVENTS_EACH {
                let event = json!({
                    "type": "experience_gained",
                    "channel": format!("s{p}"),
                    "data": {"amount": i},
                });
                send_json(&mut ws, &event).await;
            }
            let mut received = 0;
            while received < PRODUCERS * EVENTS_EACH {
                let envelope = read_json(&mut ws).await;
                assert_eq!(envelope["type"], "game_event");
                received += 1;
            }
            received
        }));
    }
    for task in tasks {
        assert_eq!(task.await.unwrap(), PRODUCERS * EVENTS_EACH);
    }

    let stats = hub.get("/stats").await;
    assert_eq!(stats["totalEvents"], (PRODUCERS * EVENTS_EACH) as u64);
    assert_eq!(
        stats["eventTypes"]["experience_gained"],
        (PRODUCERS * EVENTS_EACH) as u64
    );
    for p in 0..PRODUCERS {
        assert_eq!(stats["sessions"][format!("s{p}")]["eventCount"], EVENTS_EACH as u64);
    }
}

#[tokio::test]
async fn e2e_shutdown_sends_normal_close() {
    let mut hub = boot_server().await;
    let (mut a, _) = connect(&hub).await;
    hub.wait_for_clients(1).await;

    let server = Arc::clone(&hub.server);
    let handle = hub.handle.take().unwrap();
    let shutdown = tokio::spawn(async move { server.graceful_shutdown(handle).await });

    let frame = read_close(&mut a).await;
    assert_eq!(u16::from(frame.code), 1000);
    assert_eq!(frame.reason.as_str(), "Server shutting down");

    assert_eq!(shutdown.await.unwrap(), DrainOutcome::Drained);
    assert_eq!(hub.server.registry().connection_count(), 0);

    // Listener no longer accepts.
    assert!(connect_async(hub.ws_url()).await.is_err());
}

#[tokio::test]
async fn e2e_unresponsive_client_closed_on_pong_timeout() {
    let hub = boot_with(ServerConfig {
        ping_interval_secs: 1,
        pong_timeout_secs: 1,
        ..ServerConfig::default()
    })
    .await;
    let (mut silent, _) = connect(&hub).await;
    hub.wait_for_clients(1).await;

    // Not polling the socket means pings go unanswered.
    hub.wait_for_clients(0).await;

    let frame = read_close(&mut silent).await;
    assert_eq!(u16::from(frame.code), 1008);
    assert_eq!(frame.reason.as_str(), "Pong timeout");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn e2e_stalled_write_drops_only_that_client() {
    const EVENTS: usize = 400;

    let hub = boot_with(ServerConfig {
        send_timeout_ms: 1_000,
        send_queue_capacity: 1024,
        max_total_drops: u64::MAX,
        ..ServerConfig::default()
    })
    .await;
    // Never read, so its socket buffers fill and writes to it stall.
    let (_stalled, _) = connect(&hub).await;
    let (observer, _) = connect(&hub).await;
    let (producer, _) = connect(&hub).await;
    hub.wait_for_clients(3).await;

    let (_observer_tx, observed) = count_incoming(observer);
    let (mut producer_tx, echoed) = count_incoming(producer);
    for seq in 0..EVENTS {
        producer_tx
            .send(Message::text(bulky_event(seq).to_string()))
            .await
            .unwrap();
    }

    hub.wait_for_clients(2).await;
    wait_for_count(&observed, EVENTS).await;
    wait_for_count(&echoed, EVENTS).await;
    assert_eq!(hub.get("/stats").await["totalEvents"], EVENTS as u64);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn e2e_slow_client_receives_policy_close() {
    const EVENTS: usize = 400;

    let hub = boot_with(ServerConfig {
        send_queue_capacity: 1,
        max_total_drops: 2,
        send_timeout_ms: 60_000,
        ..ServerConfig::default()
    })
    .await;
    let (mut slow, _) = connect(&hub).await;
    let (mut producer, _) = connect(&hub).await;
    hub.wait_for_clients(2).await;

    // Lockstep keeps the producer's own one-slot queue from overflowing.
    for seq in 0..EVENTS {
        send_json(&mut producer, &bulky_event(seq)).await;
        assert_eq!(read_json(&mut producer).await["originalEvent"]["data"]["seq"], seq);
        if hub.server.registry().connection_count() == 1 {
            break;
        }
    }
    hub.wait_for_clients(1).await;

    let frame = read_close(&mut slow).await;
    assert_eq!(u16::from(frame.code), 1008);
    assert_eq!(frame.reason.as_str(), "Too many dropped messages");

    // Producer is unaffected.
    send_json(&mut producer, &json!({"type": "game_paused"})).await;
    assert_eq!(read_json(&mut producer).await["originalEvent"]["type"], "game_paused");
}
