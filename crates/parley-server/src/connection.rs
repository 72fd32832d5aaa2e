//! Per-user WebSocket connection state.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use parley_core::ids::UserId;

/// The live channel handle for one connected user.
///
/// `epoch` distinguishes successive connections of the same user: when a
/// reconnect supersedes an old handle, the old heartbeat compares its
/// connection's epoch against the registry and self-terminates.
pub struct Connection {
    user_id: UserId,
    epoch: u64,
    /// Send channel to the connection's WebSocket write task.
    tx: mpsc::Sender<String>,
    pub connected_at: Instant,
    /// When the last liveness acknowledgement was received.
    last_pong: Mutex<Instant>,
    /// Cancels the heartbeat monitor on unregister.
    cancel: CancellationToken,
    /// Count of events dropped due to a full send queue.
    pub dropped_events: AtomicU64,
}

impl Connection {
    pub fn new(user_id: UserId, epoch: u64, tx: mpsc::Sender<String>) -> Self {
        let now = Instant::now();
        Self {
            user_id,
            epoch,
            tx,
            connected_at: now,
            last_pong: Mutex::new(now),
            cancel: CancellationToken::new(),
            dropped_events: AtomicU64::new(0),
        }
    }

    pub fn user_id(&self) -> &UserId {
        &self.user_id
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    /// Queue a text frame for the write task.
    ///
    /// Returns `false` if the queue is full or the write task is gone;
    /// the registry treats either as a write failure.
    pub fn send(&self, text: String) -> bool {
        if self.tx.try_send(text).is_ok() {
            true
        } else {
            let _ = self.dropped_events.fetch_add(1, Ordering::Relaxed);
            false
        }
    }

    /// Record a liveness acknowledgement (pong frame or protocol pong).
    pub fn mark_alive(&self) {
        *self.last_pong.lock() = Instant::now();
    }

    /// Time since the last pong (or connection establishment).
    pub fn last_pong_elapsed(&self) -> Duration {
        self.last_pong.lock().elapsed()
    }

    pub fn cancel_heartbeat(&self) {
        self.cancel.cancel();
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }
}
