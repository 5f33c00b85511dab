//! WebSocket client connection state.

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use gamehub_core::ConnectionId;
use parking_lot::{Mutex, RwLock};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};

/// Lifecycle of a connection. Transitions only move forward.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum ConnectionState {
    /// Accepted, not yet registered.
    Connecting = 0,
    /// Registered and eligible for broadcast.
    Open = 1,
    /// Leaving the registry; sends are refused.
    Closing = 2,
    /// Session finished.
    Closed = 3,
}

impl ConnectionState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Connecting,
            1 => Self::Open,
            2 => Self::Closing,
            _ => Self::Closed,
        }
    }
}

/// Why a send to a connection did not enqueue.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum SendError {
    /// The connection is not in the `Open` state.
    #[error("connection is not open")]
    NotOpen,
    /// The outbound queue is at capacity.
    #[error("send queue full")]
    QueueFull,
    /// The outbound task has gone away.
    #[error("send queue closed")]
    QueueClosed,
}

/// Close frame the outbound task should emit.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CloseRequest {
    /// WebSocket close code.
    pub code: u16,
    /// Close reason text.
    pub reason: &'static str,
}

/// Represents a connected WebSocket client.
pub struct ClientConnection {
    /// Unique connection ID.
    pub id: ConnectionId,
    /// Peer address, when the transport exposes one.
    pub remote_addr: Option<SocketAddr>,
    /// Send channel to the client's WebSocket write task. Taken on close.
    tx: RwLock<Option<mpsc::Sender<Arc<String>>>>,
    state: AtomicU8,
    /// When this connection was established.
    pub connected_at: Instant,
    /// When the last Pong (or any activity) was received.
    last_pong: Mutex<Instant>,
    /// Count of messages dropped due to full channel.
    dropped_messages: AtomicU64,
    close: CancellationToken,
    close_request: Mutex<Option<CloseRequest>>,
}

impl ClientConnection {
    /// Create a new connection in the `Connecting` state.
    pub fn new(
        id: ConnectionId,
        tx: mpsc::Sender<Arc<String>>,
        remote_addr: Option<SocketAddr>,
    ) -> Self {
        let now = Instant::now();
        Self {
            id,
            remote_addr,
            tx: RwLock::new(Some(tx)),
            state: AtomicU8::new(ConnectionState::Connecting as u8),
            connected_at: now,
            last_pong: Mutex::new(now),
            dropped_messages: AtomicU64::new(0),
            close: CancellationToken::new(),
            close_request: Mutex::new(None),
        }
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ConnectionState {
        ConnectionState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Advance to `next`. Returns `false` if that would move backwards.
    pub fn advance(&self, next: ConnectionState) -> bool {
        let next = next as u8;
        self.state
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |cur| {
                (next > cur).then_some(next)
            })
            .is_ok()
    }

    /// Whether this connection is eligible for broadcast.
    pub fn is_open(&self) -> bool {
        self.state() == ConnectionState::Open
    }

    /// Enqueue a text frame without waiting.
    ///
    /// Full or closed queues increment the dropped message counter.
    pub fn send(&self, message: Arc<String>) -> Result<(), SendError> {
        // Held across the state check so `begin_close` cannot slip in between.
        let tx = self.tx.read();
        let Some(tx) = tx.as_ref().filter(|_| self.is_open()) else {
            return Err(SendError::NotOpen);
        };
        match tx.try_send(message) {
            Ok(()) => Ok(()),
            Err(e) => {
                let _ = self.dropped_messages.fetch_add(1, Ordering::Relaxed);
                Err(match e {
                    mpsc::error::TrySendError::Full(_) => SendError::QueueFull,
                    mpsc::error::TrySendError::Closed(_) => SendError::QueueClosed,
                })
            }
        }
    }

    /// Move to `Closing` and release the sender.
    ///
    /// Once this returns no further message can be enqueued, and the writer
    /// sees the queue end after draining what was already accepted.
    pub fn begin_close(&self) {
        let mut tx = self.tx.write();
        let _ = self.advance(ConnectionState::Closing);
        *tx = None;
    }

    /// Total messages dropped for this connection.
    pub fn drop_count(&self) -> u64 {
        self.dropped_messages.load(Ordering::Relaxed)
    }

    /// Mark the connection as alive (pong or any frame received).
    pub fn mark_alive(&self) {
        *self.last_pong.lock() = Instant::now();
    }

    /// Duration since the last pong (or connection establishment).
    pub fn last_pong_elapsed(&self) -> Duration {
        self.last_pong.lock().elapsed()
    }

    /// Ask the session to close. The first request's code and reason win.
    pub fn request_close(&self, code: u16, reason: &'static str) {
        {
            let mut slot = self.close_request.lock();
            if slot.is_none() {
                *slot = Some(CloseRequest { code, reason });
            }
        }
        self.close.cancel();
    }

    /// The pending close request, if any.
    pub fn close_request(&self) -> Option<CloseRequest> {
        self.close_request.lock().clone()
    }

    /// Whether a close has been requested.
    pub fn is_close_requested(&self) -> bool {
        self.close.is_cancelled()
    }

    /// Resolves once a close has been requested.
    pub fn closed(&self) -> WaitForCancellationFuture<'_> {
        self.close.cancelled()
    }

    /// Connection age.
    pub fn age(&self) -> Duration {
        self.connected_at.elapsed()
    }
}
