//! Pending-request table.
//!
//! One entry per in-flight proxied HTTP call, keyed by `msg_id`. The entry
//! holds a single-shot result slot; exactly one of delivery, timeout, or
//! cancellation terminates the waiter, and the entry is removed from the
//! table before the result is observable, giving at-most-once delivery.

use dashmap::DashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::oneshot;
use tracing::{debug, warn};

use skyhook_common::{ClientId, MsgId, TunnelError, TunnelResult};
use skyhook_protocol::ResponsePayload;

struct PendingEntry {
    client_id: ClientId,
    slot: oneshot::Sender<ResponsePayload>,
    deadline: Instant,
}

/// Handle returned from [`PendingTable::register`]; consumed by
/// [`PendingTable::wait`].
pub struct PendingHandle {
    msg_id: MsgId,
    rx: oneshot::Receiver<ResponsePayload>,
    timeout: Duration,
}

impl PendingHandle {
    pub fn msg_id(&self) -> &MsgId {
        &self.msg_id
    }
}

/// Correlates outbound REQUEST frames to inbound RESPONSE frames.
#[derive(Clone, Default)]
pub struct PendingTable {
    entries: Arc<DashMap<String, PendingEntry>>,
}

impl PendingTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert an entry with a fresh result slot. Rejects duplicate ids.
    pub fn register(
        &self,
        msg_id: MsgId,
        client_id: ClientId,
        timeout: Duration,
    ) -> TunnelResult<PendingHandle> {
        let (tx, rx) = oneshot::channel();
        match self.entries.entry(msg_id.to_string()) {
            dashmap::mapref::entry::Entry::Occupied(_) => Err(TunnelError::DuplicateMsgId {
                msg_id: msg_id.to_string(),
            }),
            dashmap::mapref::entry::Entry::Vacant(vacant) => {
                vacant.insert(PendingEntry {
                    client_id,
                    slot: tx,
                    deadline: Instant::now() + timeout,
                });
                Ok(PendingHandle {
                    msg_id,
                    rx,
                    timeout,
                })
            }
        }
    }

    /// Deliver a response to the waiter, non-blocking. Returns false when no
    /// entry exists (late or unsolicited response); the caller logs and
    /// drops.
    pub fn resolve(&self, msg_id: &str, response: ResponsePayload) -> bool {
        match self.entries.remove(msg_id) {
            Some((_, entry)) => {
                // The waiter may already have given up; a closed slot is
                // equivalent to a dropped response.
                if entry.slot.send(response).is_err() {
                    debug!(msg_id, "waiter gone before response delivery");
                }
                true
            }
            None => false,
        }
    }

    /// Remove an entry and fail its waiter as cancelled.
    pub fn cancel(&self, msg_id: &str) {
        // Dropping the sender wakes the receiver with RecvError.
        self.entries.remove(msg_id);
    }

    /// Block the caller until the slot fills or the deadline fires.
    pub async fn wait(&self, handle: PendingHandle) -> TunnelResult<ResponsePayload> {
        let msg_id = handle.msg_id.to_string();
        match tokio::time::timeout(handle.timeout, handle.rx).await {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(_closed)) => Err(TunnelError::internal(format!(
                "pending request cancelled: {msg_id}"
            ))),
            Err(_elapsed) => {
                self.entries.remove(&msg_id);
                Err(TunnelError::Timeout {
                    operation: "proxy request".to_string(),
                    duration_ms: handle.timeout.as_millis() as u64,
                    msg_id: Some(msg_id),
                })
            }
        }
    }

    /// Evict entries past their deadline, failing each with a synthetic 504.
    /// Returns the number of entries evicted.
    pub fn sweep(&self) -> usize {
        let now = Instant::now();
        let expired: Vec<String> = self
            .entries
            .iter()
            .filter(|entry| entry.deadline < now)
            .map(|entry| entry.key().clone())
            .collect();

        for msg_id in &expired {
            if let Some((_, entry)) = self.entries.remove(msg_id) {
                warn!(
                    msg_id = %msg_id,
                    client_id = %entry.client_id,
                    "pending request expired, failing with timeout"
                );
                let _ = entry.slot.send(ResponsePayload::timeout());
            }
        }
        expired.len()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
