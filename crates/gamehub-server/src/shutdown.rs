//! Graceful shutdown: stop accepting, close live sessions, wait for them to
//! leave the registry.

use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::websocket::registry::ConnectionRegistry;

/// Drain window used by [`ShutdownCoordinator::default`].
pub const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

/// How often the drain re-checks the live connection count.
const DRAIN_POLL_INTERVAL: Duration = Duration::from_millis(25);

/// How a [`ShutdownCoordinator::drain`] ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DrainOutcome {
    /// The listener stopped and every session unregistered.
    Drained,
    /// The window elapsed first; the listener task was aborted.
    TimedOut {
        /// Sessions still registered when the window closed.
        remaining: usize,
    },
}

impl DrainOutcome {
    /// Whether everything finished inside the window.
    pub fn is_drained(self) -> bool {
        self == Self::Drained
    }
}

/// Owns the shutdown signal and the drain window.
pub struct ShutdownCoordinator {
    token: CancellationToken,
    timeout: Duration,
}

impl ShutdownCoordinator {
    /// Create a coordinator that waits at most `timeout` for sessions.
    pub fn new(timeout: Duration) -> Self {
        Self {
            token: CancellationToken::new(),
            timeout,
        }
    }

    /// Get a clone of the cancellation token.
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Initiate shutdown. New upgrades are refused from here on.
    pub fn shutdown(&self) {
        self.token.cancel();
    }

    /// Whether a shutdown has been initiated.
    pub fn is_shutting_down(&self) -> bool {
        self.token.is_cancelled()
    }

    /// The drain window.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Cancel, ask every registered session to close, then wait for
    /// `serve_task` to end and the registry to empty.
    ///
    /// The token is cancelled before the registry is walked, so a session
    /// registering concurrently either is seen here or sees the cancellation
    /// itself.
    pub async fn drain(
        &self,
        serve_task: JoinHandle<()>,
        registry: &ConnectionRegistry,
    ) -> DrainOutcome {
        self.shutdown();
        let closing = registry.close_all().await;
        info!(
            closing,
            timeout_ms = self.timeout.as_millis() as u64,
            "shutdown requested, closing live connections"
        );

        let listener = serve_task.abort_handle();
        let wait = async {
            if let Err(e) = serve_task.await {
                warn!(error = %e, "listener task failed");
            }
            while registry.connection_count() > 0 {
                tokio::time::sleep(DRAIN_POLL_INTERVAL).await;
            }
        };

        if tokio::time::timeout(self.timeout, wait).await.is_ok() {
            info!("all sessions drained");
            return DrainOutcome::Drained;
        }
        listener.abort();
        let remaining = registry.connection_count();
        warn!(
            remaining,
            "shutdown timed out after {:?}, aborting listener", self.timeout
        );
        DrainOutcome::TimedOut { remaining }
    }
}

impl Default for ShutdownCoordinator {
    fn default() -> Self {
        Self::new(DEFAULT_SHUTDOWN_TIMEOUT)
    }
}
