//! WebSocket client connection state.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use agora_core::{Envelope, ParticipantId, ServerEvent, SessionId};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::warn;

/// Frame queued for a client's write task.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Outbound {
    /// Encoded envelope.
    Text(Arc<str>),
    /// Transport-level liveness check.
    Ping,
    /// Close the socket after flushing earlier frames.
    Close,
}

/// A connected participant bound to one session.
pub struct ClientConnection {
    /// Unique connection ID.
    pub id: String,
    session_id: SessionId,
    participant_id: ParticipantId,
    tx: mpsc::Sender<Outbound>,
    /// When this connection was established.
    pub connected_at: Instant,
    last_seen: Mutex<Instant>,
    dropped_messages: AtomicU64,
}

impl ClientConnection {
    /// Create a connection bound to `session_id`.
    pub fn new(
        id: String,
        session_id: SessionId,
        participant_id: ParticipantId,
        tx: mpsc::Sender<Outbound>,
    ) -> Self {
        let now = Instant::now();
        Self {
            id,
            session_id,
            participant_id,
            tx,
            connected_at: now,
            last_seen: Mutex::new(now),
            dropped_messages: AtomicU64::new(0),
        }
    }

    /// Session this client joined.
    pub fn session_id(&self) -> &SessionId {
        &self.session_id
    }

    /// Participant behind this client.
    pub fn participant_id(&self) -> &ParticipantId {
        &self.participant_id
    }

    /// Queue an encoded frame.
    ///
    /// Returns `false` if the queue is full or closed, and counts the drop.
    pub fn send(&self, frame: Arc<str>) -> bool {
        self.enqueue(Outbound::Text(frame))
    }

    /// Encode and queue a single event for this client.
    pub fn send_event(&self, event: ServerEvent) -> bool {
        match Envelope::new(Some(self.session_id.clone()), event).encode() {
            Ok(json) => self.send(Arc::from(json)),
            Err(error) => {
                warn!(client_id = %self.id, %error, "failed to encode event");
                false
            }
        }
    }

    /// Queue a Ping frame.
    pub fn ping(&self) -> bool {
        self.enqueue(Outbound::Ping)
    }

    /// Queue a Close frame; the write task stops after sending it.
    pub fn close(&self) -> bool {
        self.enqueue(Outbound::Close)
    }

    fn enqueue(&self, frame: Outbound) -> bool {
        if self.tx.try_send(frame).is_ok() {
            true
        } else {
            let _ = self.dropped_messages.fetch_add(1, Ordering::Relaxed);
            false
        }
    }

    /// Total frames dropped for this connection.
    pub fn drop_count(&self) -> u64 {
        self.dropped_messages.load(Ordering::Relaxed)
    }

    /// Record inbound activity of any kind.
    pub fn mark_alive(&self) {
        *self.last_seen.lock() = Instant::now();
    }

    /// Time since the last inbound activity.
    pub fn idle_for(&self) -> Duration {
        self.last_seen.lock().elapsed()
    }

    /// Connection age.
    pub fn age(&self) -> Duration {
        self.connected_at.elapsed()
    }
}
