//! Runtime state for one registered agent connection.

use axum::extract::ws::Message;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::time::Instant;
use tokio::sync::{mpsc, watch};

use skyhook_common::{ClientId, TunnelError, TunnelResult};
use skyhook_protocol::Frame;

/// One live agent connection.
///
/// Exists from the WebSocket upgrade until its read/write loops exit. At
/// most one instance per client id is in the connection table; a second
/// register evicts the first.
pub struct Connection {
    pub client_id: ClientId,
    send_queue: mpsc::Sender<Message>,
    last_seen: Mutex<Instant>,
    pub connected_at: Instant,
    cancel: watch::Sender<bool>,
    /// Set once the CONTROL/REGISTER handshake completed
    registered: AtomicBool,
    /// Last observed agent round-trip time, milliseconds; -1 = unknown
    rtt_ms: AtomicI64,
}

impl Connection {
    pub fn new(client_id: ClientId, send_queue: mpsc::Sender<Message>) -> Self {
        let (cancel, _) = watch::channel(false);
        Self {
            client_id,
            send_queue,
            last_seen: Mutex::new(Instant::now()),
            connected_at: Instant::now(),
            cancel,
            registered: AtomicBool::new(false),
            rtt_ms: AtomicI64::new(-1),
        }
    }

    /// Record read-side activity.
    pub fn touch(&self) {
        *self.last_seen.lock() = Instant::now();
    }

    pub fn last_seen(&self) -> Instant {
        *self.last_seen.lock()
    }

    pub fn mark_registered(&self) {
        self.registered.store(true, Ordering::Release);
    }

    pub fn is_registered(&self) -> bool {
        self.registered.load(Ordering::Acquire)
    }

    pub fn record_rtt(&self, rtt_ms: i64) {
        self.rtt_ms.store(rtt_ms, Ordering::Relaxed);
    }

    pub fn rtt_ms(&self) -> Option<i64> {
        match self.rtt_ms.load(Ordering::Relaxed) {
            v if v >= 0 => Some(v),
            _ => None,
        }
    }

    /// Tear down both loops. Idempotent, and observable even by a loop
    /// that has not subscribed yet.
    pub fn cancel(&self) {
        self.cancel.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.cancel.borrow()
    }

    pub fn cancelled(&self) -> watch::Receiver<bool> {
        self.cancel.subscribe()
    }

    /// Non-blocking enqueue of an encoded frame.
    pub fn enqueue_frame(&self, frame: &Frame) -> TunnelResult<()> {
        let text = frame.encode().map_err(|e| TunnelError::Protocol {
            message: format!("failed to encode frame: {e}"),
            client_id: Some(self.client_id.to_string()),
        })?;
        self.enqueue(Message::Text(text))
    }

    /// Non-blocking enqueue of a raw WebSocket message.
    pub fn enqueue(&self, message: Message) -> TunnelResult<()> {
        self.send_queue
            .try_send(message)
            .map_err(|err| match err {
                mpsc::error::TrySendError::Full(_) => TunnelError::QueueFull {
                    client_id: self.client_id.to_string(),
                },
                mpsc::error::TrySendError::Closed(_) => TunnelError::NotConnected {
                    client_id: self.client_id.to_string(),
                },
            })
    }
}
