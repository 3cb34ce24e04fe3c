//! Viewer connection state.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use gomer_core::ConnectionId;
use parking_lot::Mutex;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::{SendTimeoutError, TrySendError};

/// A frame could not be handed to a viewer's writer task.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum SendError {
    /// The writer task is gone (socket closed or session ended).
    #[error("connection closed")]
    Closed,
    /// The outbound queue stayed full for the whole send timeout.
    #[error("send timed out after {0:?}")]
    Timeout(Duration),
    /// The outbound queue had no room for an immediate send.
    #[error("outbound queue full")]
    Full,
    /// The dispatch task for this send did not complete.
    #[error("dispatch task failed: {0}")]
    Aborted(String),
}

/// One connected viewer.
///
/// Outbound frames go through a bounded queue drained by the session's writer
/// task, which owns the socket sink.
pub struct ClientConnection {
    /// Registry and exclusion key.
    pub id: ConnectionId,
    tx: mpsc::Sender<Arc<String>>,
    send_timeout: Duration,
    connected_at: Instant,
    /// Whether the viewer answered since the last heartbeat check.
    pub is_alive: AtomicBool,
    last_pong: Mutex<Instant>,
    /// Frames that could not be enqueued.
    pub dropped_messages: AtomicU64,
}

impl ClientConnection {
    /// Create a connection feeding `tx`.
    pub fn new(id: ConnectionId, tx: mpsc::Sender<Arc<String>>, send_timeout: Duration) -> Self {
        let now = Instant::now();
        Self {
            id,
            tx,
            send_timeout,
            connected_at: now,
            is_alive: AtomicBool::new(true),
            last_pong: Mutex::new(now),
            dropped_messages: AtomicU64::new(0),
        }
    }

    /// Enqueue a text frame, waiting up to the send timeout for capacity.
    ///
    /// Completion means the writer task owns the frame.
    pub async fn send(&self, message: Arc<String>) -> Result<(), SendError> {
        let result = self
            .tx
            .send_timeout(message, self.send_timeout)
            .await
            .map_err(|e| match e {
                SendTimeoutError::Timeout(_) => SendError::Timeout(self.send_timeout),
                SendTimeoutError::Closed(_) => SendError::Closed,
            });
        if result.is_err() {
            let _ = self.dropped_messages.fetch_add(1, Ordering::Relaxed);
        }
        result
    }

    /// Enqueue a text frame without waiting.
    pub fn try_send(&self, message: Arc<String>) -> Result<(), SendError> {
        let result = self.tx.try_send(message).map_err(|e| match e {
            TrySendError::Full(_) => SendError::Full,
            TrySendError::Closed(_) => SendError::Closed,
        });
        if result.is_err() {
            let _ = self.dropped_messages.fetch_add(1, Ordering::Relaxed);
        }
        result
    }

    /// Total frames dropped for this connection.
    pub fn drop_count(&self) -> u64 {
        self.dropped_messages.load(Ordering::Relaxed)
    }

    /// Whether the writer task has gone away.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    /// Resolves once the writer task has dropped its receiver.
    pub async fn closed(&self) {
        self.tx.closed().await;
    }

    /// Record a pong (or any other sign of life).
    pub fn mark_alive(&self) {
        self.is_alive.store(true, Ordering::Relaxed);
        *self.last_pong.lock() = Instant::now();
    }

    /// Time since the last pong, or since connecting.
    pub fn last_pong_elapsed(&self) -> Duration {
        self.last_pong.lock().elapsed()
    }

    /// Read and clear the alive flag.
    pub fn check_alive(&self) -> bool {
        self.is_alive.swap(false, Ordering::Relaxed)
    }

    /// Connection age.
    pub fn age(&self) -> Duration {
        self.connected_at.elapsed()
    }
}
