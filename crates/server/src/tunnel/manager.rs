//! Agent connection manager.
//!
//! One `TunnelManager` owns the connection table and the pending-request
//! table for the whole process. Each accepted WebSocket runs two loops: a
//! reader that dispatches inbound frames and a writer that drains the
//! connection's bounded send queue and emits protocol pings. PING/PONG
//! bookkeeping stays on the read loop so liveness decisions are never
//! delayed by handler backlog; everything else is offloaded to a bounded
//! worker pool.

use axum::extract::ws::{close_code, CloseFrame, Message, WebSocket};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, watch, Semaphore};
use tracing::{debug, info, warn};

use skyhook_common::{epoch_ms, ClientId, ClientStatus, MsgId, Registry, TunnelError, TunnelResult};
use skyhook_config::ServerConfig;
use skyhook_protocol::{
    AckPayload, DecodeError, ErrorPayload, Frame, FrameType, Op, PingPayload, PongPayload,
    RegisterAckPayload, RegisterPayload, RequestPayload, ResponsePayload, RouteSyncPayload,
    SyncedRoute,
};

use crate::store::{ClientStore, RouteStore};

use super::connection::Connection;
use super::pending::PendingTable;

/// Cadence of the pending-table sweep; entries carry their own deadlines.
const SWEEP_INTERVAL: Duration = Duration::from_secs(30);

/// Coalesced liveness sample headed for the client store.
struct HeartbeatUpdate {
    client_id: String,
    last_seen_ms: i64,
}

/// Counters exposed through the management API.
#[derive(Debug, Clone)]
pub struct ManagerStats {
    pub connected_clients: usize,
    pub pending_requests: usize,
    pub total_connections: u64,
}

struct ManagerInner {
    config: Arc<ServerConfig>,
    clients: ClientStore,
    routes: RouteStore,
    connections: Registry<Connection>,
    pending: PendingTable,
    heartbeat_tx: mpsc::Sender<HeartbeatUpdate>,
    workers: Arc<Semaphore>,
    shutdown: watch::Sender<bool>,
    total_connections: AtomicU64,
}

/// Process-wide connection manager.
#[derive(Clone)]
pub struct TunnelManager {
    inner: Arc<ManagerInner>,
}

impl TunnelManager {
    pub fn new(config: Arc<ServerConfig>, clients: ClientStore, routes: RouteStore) -> Self {
        let (heartbeat_tx, heartbeat_rx) = mpsc::channel(config.heartbeat_queue_size);
        let (shutdown, _) = watch::channel(false);

        let manager = Self {
            inner: Arc::new(ManagerInner {
                workers: Arc::new(Semaphore::new(config.worker_pool_size)),
                config,
                clients: clients.clone(),
                routes,
                connections: Registry::new(),
                pending: PendingTable::new(),
                heartbeat_tx,
                shutdown,
                total_connections: AtomicU64::new(0),
            }),
        };

        manager.spawn_background_tasks(heartbeat_rx, clients);
        manager
    }

    fn spawn_background_tasks(
        &self,
        heartbeat_rx: mpsc::Receiver<HeartbeatUpdate>,
        clients: ClientStore,
    ) {
        let flush_interval = self.inner.config.heartbeat_flush_interval();
        tokio::spawn(drain_heartbeats(
            heartbeat_rx,
            clients,
            flush_interval,
            self.inner.shutdown.subscribe(),
        ));

        tokio::spawn(check_liveness(
            self.inner.connections.clone(),
            self.inner.config.ping_interval(),
            self.inner.config.liveness_timeout(),
            self.inner.shutdown.subscribe(),
        ));

        tokio::spawn(sweep_pending(
            self.inner.pending.clone(),
            self.inner.shutdown.subscribe(),
        ));
    }

    // ------------------------------------------------------------------
    // Connection lifecycle
    // ------------------------------------------------------------------

    /// Run one upgraded agent socket to completion.
    ///
    /// The caller has already verified the query-string credentials. A
    /// CONTROL/REGISTER frame must arrive within the configured window and
    /// re-present the auth token before the connection becomes eligible
    /// for proxy traffic.
    pub async fn handle_socket(&self, socket: WebSocket, client_id: ClientId) {
        let config = &self.inner.config;
        let (sink, mut stream) = socket.split();
        let (tx, rx) = mpsc::channel(config.send_queue_size);
        let conn = Arc::new(Connection::new(client_id.clone(), tx));

        // New connection wins: the previous holder of this client id is
        // cancelled before the replacement is inserted.
        if let Some(prev) = self.inner.connections.get(client_id.as_str()).await {
            warn!(client_id = %client_id, "replacing existing connection for client");
            prev.cancel();
        }
        self.inner
            .connections
            .insert(client_id.as_str(), conn.clone())
            .await;
        self.inner
            .total_connections
            .fetch_add(1, Ordering::Relaxed);

        let writer = tokio::spawn(write_loop(
            sink,
            rx,
            conn.clone(),
            config.ping_interval(),
            config.write_timeout(),
        ));

        let registered = tokio::time::timeout(
            config.register_timeout(),
            wait_for_register(&mut stream, &conn),
        )
        .await;

        match registered {
            Ok(Some(payload)) => {
                if self.complete_registration(&conn, payload) {
                    info!(client_id = %client_id, "agent registered");
                    self.read_loop(stream, &conn).await;
                } else {
                    self.close_with_policy_violation(&conn, "registration rejected");
                }
            }
            Ok(None) => {
                debug!(client_id = %client_id, "socket closed before register");
            }
            Err(_elapsed) => {
                warn!(client_id = %client_id, "no REGISTER frame within window, closing");
                self.close_with_policy_violation(&conn, "register timeout");
            }
        }

        conn.cancel();
        let was_current = self
            .inner
            .connections
            .remove_if_same(client_id.as_str(), &conn)
            .await;

        // Mark offline asynchronously, single attempt; the socket task never
        // blocks on the store.
        if was_current && conn.is_registered() {
            let clients = self.inner.clients.clone();
            let id = client_id.to_string();
            tokio::spawn(async move {
                if let Err(err) = clients.set_status(&id, ClientStatus::Offline) {
                    warn!(client_id = %id, error = %err, "failed to mark client offline");
                }
            });
        }

        let _ = writer.await;
        info!(client_id = %client_id, "agent disconnected");
    }

    /// Verify the REGISTER payload against the client store and, on
    /// success, flip the connection into registered state.
    fn complete_registration(&self, conn: &Arc<Connection>, payload: RegisterPayload) -> bool {
        let client_id = &conn.client_id;
        let record = match self.inner.clients.get(client_id.as_str()) {
            Some(record) => record,
            None => {
                warn!(client_id = %client_id, "register from unknown client");
                self.send_register_ack(conn, false, "Client not found");
                return false;
            }
        };
        if !record.enabled {
            warn!(client_id = %client_id, "register from disabled client");
            self.send_register_ack(conn, false, "Client is disabled");
            return false;
        }
        if payload.auth_token.is_empty() || record.auth_token != payload.auth_token {
            warn!(client_id = %client_id, "register with invalid auth token");
            self.send_register_ack(conn, false, "Invalid auth token");
            return false;
        }

        conn.mark_registered();

        if let Err(err) = self
            .inner
            .clients
            .set_status(client_id.as_str(), ClientStatus::Online)
        {
            warn!(client_id = %client_id, error = %err, "failed to mark client online");
        }
        let _ = self
            .inner
            .clients
            .update_last_seen(client_id.as_str(), epoch_ms());
        if !payload.local_ips.is_empty() {
            if let Err(err) = self
                .inner
                .clients
                .update_local_ips(client_id.as_str(), payload.local_ips.clone())
            {
                warn!(client_id = %client_id, error = %err, "failed to store local ips");
            }
        }

        debug!(
            client_id = %client_id,
            version = %payload.version,
            local_ips = ?payload.local_ips,
            "register accepted"
        );
        self.send_register_ack(conn, true, "Registration successful");
        self.send_route_sync(conn);
        true
    }

    fn send_register_ack(&self, conn: &Connection, success: bool, message: &str) {
        let payload = RegisterAckPayload {
            success,
            message: message.to_string(),
        };
        match Frame::control(Op::RegisterAck, conn.client_id.clone(), &payload) {
            Ok(frame) => {
                if let Err(err) = conn.enqueue_frame(&frame) {
                    warn!(client_id = %conn.client_id, error = %err, "failed to send REGISTER_ACK");
                }
            }
            Err(err) => warn!(error = %err, "failed to build REGISTER_ACK"),
        }
    }

    /// Advisory: push this client's routes after registration. Agents do
    /// not keep a route table; dispatch always arrives as REQUEST frames.
    fn send_route_sync(&self, conn: &Connection) {
        let routes: Vec<SyncedRoute> = self
            .inner
            .routes
            .list()
            .into_iter()
            .filter(|route| route.client_id == conn.client_id.as_str())
            .map(|route| SyncedRoute {
                url_pattern: route.url_pattern,
                targets_json: route.targets_json,
                route_mode: route.mode.to_string(),
                enabled: route.enabled,
            })
            .collect();
        if routes.is_empty() {
            return;
        }
        let payload = RouteSyncPayload { routes };
        if let Ok(frame) = Frame::control(Op::RouteSync, conn.client_id.clone(), &payload) {
            let _ = conn.enqueue_frame(&frame);
        }
    }

    fn close_with_policy_violation(&self, conn: &Connection, reason: &'static str) {
        let _ = conn.enqueue(Message::Close(Some(CloseFrame {
            code: close_code::POLICY,
            reason: reason.into(),
        })));
    }

    // ------------------------------------------------------------------
    // Read path
    // ------------------------------------------------------------------

    async fn read_loop(&self, mut stream: SplitStream<WebSocket>, conn: &Arc<Connection>) {
        let mut cancelled = conn.cancelled();
        // A replacement connection may have evicted this one during the
        // handshake, before this subscription existed.
        if conn.is_cancelled() {
            return;
        }
        loop {
            tokio::select! {
                _ = cancelled.changed() => break,
                next = stream.next() => match next {
                    None => break,
                    Some(Err(err)) => {
                        debug!(client_id = %conn.client_id, error = %err, "websocket read error");
                        break;
                    }
                    Some(Ok(message)) => {
                        if !self.handle_ws_message(conn, message) {
                            break;
                        }
                    }
                }
            }
        }
    }

    /// Returns false when the connection should close.
    fn handle_ws_message(&self, conn: &Arc<Connection>, message: Message) -> bool {
        match message {
            Message::Text(text) => {
                conn.touch();
                self.dispatch_frame(conn, &text);
                true
            }
            Message::Binary(data) => {
                // Binary frames are outside the protocol; note and ignore.
                conn.touch();
                debug!(client_id = %conn.client_id, len = data.len(), "ignoring binary frame");
                true
            }
            Message::Ping(_) | Message::Pong(_) => {
                conn.touch();
                true
            }
            Message::Close(_) => false,
        }
    }

    fn dispatch_frame(&self, conn: &Arc<Connection>, text: &str) {
        let frame = match Frame::decode(text) {
            Ok(frame) => frame,
            Err(DecodeError::UnknownOp { op }) => {
                warn!(client_id = %conn.client_id, op = %op, "ignoring unknown op");
                return;
            }
            Err(DecodeError::Malformed(err)) => {
                warn!(client_id = %conn.client_id, error = %err, "dropping malformed frame");
                return;
            }
        };

        match (frame.frame_type, frame.op) {
            // Liveness bookkeeping happens inline on the read loop.
            (FrameType::Control, Op::Ping) => self.handle_ping(conn, &frame),
            (FrameType::Control, Op::Pong) => self.handle_pong(conn, &frame),
            (FrameType::Control, Op::Register) => {
                debug!(client_id = %conn.client_id, "duplicate REGISTER ignored");
            }
            _ => self.offload_frame(conn, frame),
        }
    }

    /// Hand a frame to the worker pool; a saturated pool falls back to the
    /// read loop itself so no frame is ever silently dropped.
    fn offload_frame(&self, conn: &Arc<Connection>, frame: Frame) {
        match Arc::clone(&self.inner.workers).try_acquire_owned() {
            Ok(permit) => {
                let manager = self.clone();
                let conn = Arc::clone(conn);
                tokio::spawn(async move {
                    manager.handle_frame(&conn, frame);
                    drop(permit);
                });
            }
            Err(_) => {
                warn!(client_id = %conn.client_id, "worker pool saturated, handling frame inline");
                self.handle_frame(conn, frame);
            }
        }
    }

    fn handle_frame(&self, conn: &Arc<Connection>, frame: Frame) {
        match (frame.frame_type, frame.op) {
            (FrameType::Message, Op::Response) => self.handle_response(conn, &frame),
            (FrameType::Ack, _) | (_, Op::Ack) => match frame.parse_payload::<AckPayload>() {
                Ok(ack) => debug!(
                    client_id = %conn.client_id,
                    msg_id = %ack.msg_id,
                    success = ack.success,
                    "received ACK"
                ),
                Err(err) => {
                    warn!(client_id = %conn.client_id, error = %err, "malformed ACK payload")
                }
            },
            (FrameType::Error, _) => self.handle_error_frame(conn, &frame),
            (frame_type, op) => {
                warn!(
                    client_id = %conn.client_id,
                    frame_type = ?frame_type,
                    op = ?op,
                    "unexpected frame"
                );
            }
        }
    }

    fn handle_ping(&self, conn: &Arc<Connection>, frame: &Frame) {
        // An empty or malformed payload still gets a PONG; echo our own
        // clock in that case.
        let timestamp = frame
            .parse_payload::<PingPayload>()
            .map(|p| p.timestamp)
            .unwrap_or_else(|_| epoch_ms());

        let pong = PongPayload { timestamp };
        if let Ok(reply) = Frame::control(Op::Pong, conn.client_id.clone(), &pong) {
            if let Err(err) = conn.enqueue_frame(&reply) {
                warn!(client_id = %conn.client_id, error = %err, "failed to enqueue PONG");
            }
        }
        self.push_heartbeat(conn);
    }

    fn handle_pong(&self, conn: &Arc<Connection>, frame: &Frame) {
        if let Ok(pong) = frame.parse_payload::<PongPayload>() {
            let rtt = epoch_ms() - pong.timestamp;
            if rtt >= 0 {
                conn.record_rtt(rtt);
                debug!(client_id = %conn.client_id, rtt_ms = rtt, "pong received");
            }
        }
        self.push_heartbeat(conn);
    }

    fn handle_response(&self, conn: &Arc<Connection>, frame: &Frame) {
        let msg_id = match &frame.msg_id {
            Some(id) => id.clone(),
            None => {
                warn!(client_id = %conn.client_id, "RESPONSE frame missing msg_id");
                return;
            }
        };
        let payload = match frame.parse_payload::<ResponsePayload>() {
            Ok(payload) => payload,
            Err(err) => {
                warn!(
                    client_id = %conn.client_id,
                    msg_id = %msg_id,
                    error = %err,
                    "malformed RESPONSE payload"
                );
                return;
            }
        };

        debug!(
            client_id = %conn.client_id,
            msg_id = %msg_id,
            status = payload.http_status,
            latency_ms = payload.latency_ms,
            "response received"
        );

        if !self.inner.pending.resolve(msg_id.as_str(), payload) {
            warn!(
                client_id = %conn.client_id,
                msg_id = %msg_id,
                "no pending waiter for response, dropping"
            );
        }
    }

    fn handle_error_frame(&self, conn: &Arc<Connection>, frame: &Frame) {
        let payload = frame.parse_payload::<ErrorPayload>().unwrap_or(ErrorPayload {
            code: "UNKNOWN".to_string(),
            message: "unparsable error payload".to_string(),
            details: String::new(),
        });
        warn!(
            client_id = %conn.client_id,
            code = %payload.code,
            message = %payload.message,
            msg_id = ?frame.msg_id,
            "error frame from agent"
        );
        if let Some(msg_id) = &frame.msg_id {
            self.inner
                .pending
                .resolve(msg_id.as_str(), ResponsePayload::failed(payload.message));
        }
    }

    fn push_heartbeat(&self, conn: &Connection) {
        let update = HeartbeatUpdate {
            client_id: conn.client_id.to_string(),
            last_seen_ms: epoch_ms(),
        };
        if self.inner.heartbeat_tx.try_send(update).is_err() {
            warn!(client_id = %conn.client_id, "heartbeat queue full, dropping update");
        }
    }

    // ------------------------------------------------------------------
    // Send path
    // ------------------------------------------------------------------

    /// Dispatch a REQUEST frame and wait for its RESPONSE or deadline.
    pub async fn send_request(
        &self,
        client_id: &ClientId,
        payload: RequestPayload,
        timeout: Duration,
    ) -> TunnelResult<ResponsePayload> {
        let msg_id = MsgId::generate();
        let handle = self
            .inner
            .pending
            .register(msg_id.clone(), client_id.clone(), timeout)?;

        let frame = Frame::message(Op::Request, client_id.clone(), msg_id.clone(), &payload)
            .map_err(|err| {
                self.inner.pending.cancel(msg_id.as_str());
                TunnelError::Protocol {
                    message: format!("failed to encode REQUEST: {err}"),
                    client_id: Some(client_id.to_string()),
                }
            })?;

        debug!(
            client_id = %client_id,
            msg_id = %msg_id,
            method = %payload.http_method,
            path = %payload.url_suffix,
            "dispatching tunneled request"
        );

        if let Err(err) = self.send_to_client(client_id, &frame).await {
            self.inner.pending.cancel(msg_id.as_str());
            return Err(err);
        }

        self.inner.pending.wait(handle).await
    }

    /// Serialize and enqueue a frame for a connected client. Distinguishes
    /// "not connected" from "queue full".
    pub async fn send_to_client(&self, client_id: &ClientId, frame: &Frame) -> TunnelResult<()> {
        let conn = self
            .inner
            .connections
            .get(client_id.as_str())
            .await
            .ok_or_else(|| TunnelError::NotConnected {
                client_id: client_id.to_string(),
            })?;
        conn.enqueue_frame(frame)
    }

    // ------------------------------------------------------------------
    // Queries and control
    // ------------------------------------------------------------------

    /// A client is connected once its register handshake completed.
    pub async fn is_connected(&self, client_id: &str) -> bool {
        match self.inner.connections.get(client_id).await {
            Some(conn) => conn.is_registered(),
            None => false,
        }
    }

    pub async fn connected_count(&self) -> usize {
        self.inner.connections.len().await
    }

    pub fn pending_count(&self) -> usize {
        self.inner.pending.len()
    }

    /// Forcibly close a client's connection (used when an operator disables
    /// a client mid-session).
    pub async fn disconnect(&self, client_id: &str) -> TunnelResult<()> {
        match self.inner.connections.get(client_id).await {
            Some(conn) => {
                conn.cancel();
                Ok(())
            }
            None => Err(TunnelError::NotConnected {
                client_id: client_id.to_string(),
            }),
        }
    }

    pub async fn stats(&self) -> ManagerStats {
        ManagerStats {
            connected_clients: self.inner.connections.len().await,
            pending_requests: self.inner.pending.len(),
            total_connections: self.inner.total_connections.load(Ordering::Relaxed),
        }
    }

    /// Stop background tasks, cancel every connection, and wait for the
    /// connection table to drain (bounded by the grace period).
    pub async fn shutdown(&self) {
        let _ = self.inner.shutdown.send(true);
        for (_, conn) in self.inner.connections.snapshot().await {
            conn.cancel();
        }

        let deadline = Instant::now() + self.inner.config.shutdown_grace();
        while !self.inner.connections.is_empty().await && Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(25)).await;
        }
    }
}

// ----------------------------------------------------------------------
// Connection loops and background tasks
// ----------------------------------------------------------------------

/// Read frames until a CONTROL/REGISTER arrives; other traffic before the
/// handshake is logged and ignored. Returns `None` when the socket dies
/// first.
async fn wait_for_register(
    stream: &mut SplitStream<WebSocket>,
    conn: &Arc<Connection>,
) -> Option<RegisterPayload> {
    while let Some(next) = stream.next().await {
        match next {
            Ok(Message::Text(text)) => {
                conn.touch();
                match Frame::decode(&text) {
                    Ok(frame)
                        if frame.frame_type == FrameType::Control
                            && frame.op == Op::Register =>
                    {
                        match frame.parse_payload::<RegisterPayload>() {
                            Ok(payload) => return Some(payload),
                            Err(err) => {
                                warn!(
                                    client_id = %conn.client_id,
                                    error = %err,
                                    "malformed REGISTER payload"
                                );
                                return Some(RegisterPayload {
                                    auth_token: String::new(),
                                    version: String::new(),
                                    local_ips: Vec::new(),
                                });
                            }
                        }
                    }
                    Ok(frame) => {
                        debug!(
                            client_id = %conn.client_id,
                            op = ?frame.op,
                            "frame before REGISTER ignored"
                        );
                    }
                    Err(err) => {
                        warn!(client_id = %conn.client_id, error = %err, "dropping pre-register frame");
                    }
                }
            }
            Ok(Message::Close(_)) | Err(_) => return None,
            Ok(_) => conn.touch(),
        }
    }
    None
}

/// Drain the send queue and emit protocol pings. Any write failure or
/// missed write deadline cancels the connection.
async fn write_loop(
    mut sink: SplitSink<WebSocket, Message>,
    mut queue: mpsc::Receiver<Message>,
    conn: Arc<Connection>,
    ping_interval: Duration,
    write_timeout: Duration,
) {
    let mut ticker = tokio::time::interval_at(
        tokio::time::Instant::now() + ping_interval,
        ping_interval,
    );
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    let mut cancelled = conn.cancelled();

    loop {
        if conn.is_cancelled() {
            let _ = sink
                .send(Message::Close(Some(CloseFrame {
                    code: close_code::NORMAL,
                    reason: "connection closed".into(),
                })))
                .await;
            break;
        }
        tokio::select! {
            _ = cancelled.changed() => {
                let _ = sink
                    .send(Message::Close(Some(CloseFrame {
                        code: close_code::NORMAL,
                        reason: "connection closed".into(),
                    })))
                    .await;
                break;
            }
            next = queue.recv() => match next {
                None => break,
                Some(message) => {
                    let closing = matches!(message, Message::Close(_));
                    if !write_with_deadline(&mut sink, message, write_timeout, &conn).await
                        || closing
                    {
                        break;
                    }
                }
            },
            _ = ticker.tick() => {
                let ping = PingPayload { timestamp: epoch_ms() };
                let frame = match Frame::control(Op::Ping, conn.client_id.clone(), &ping)
                    .and_then(|f| f.encode())
                {
                    Ok(text) => Message::Text(text),
                    Err(err) => {
                        warn!(error = %err, "failed to build PING");
                        continue;
                    }
                };
                if !write_with_deadline(&mut sink, frame, write_timeout, &conn).await {
                    break;
                }
            }
        }
    }
}

/// Returns false (and cancels the connection) on write error or deadline.
async fn write_with_deadline(
    sink: &mut SplitSink<WebSocket, Message>,
    message: Message,
    write_timeout: Duration,
    conn: &Connection,
) -> bool {
    match tokio::time::timeout(write_timeout, sink.send(message)).await {
        Ok(Ok(())) => true,
        Ok(Err(err)) => {
            debug!(client_id = %conn.client_id, error = %err, "websocket write failed");
            conn.cancel();
            false
        }
        Err(_elapsed) => {
            warn!(client_id = %conn.client_id, "websocket write deadline exceeded");
            conn.cancel();
            false
        }
    }
}

/// Coalesce last-seen samples and flush them to the client store in
/// batches, bounding store write amplification.
async fn drain_heartbeats(
    mut queue: mpsc::Receiver<HeartbeatUpdate>,
    clients: ClientStore,
    flush_interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut updates: HashMap<String, i64> = HashMap::new();
    let mut ticker = tokio::time::interval(flush_interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            next = queue.recv() => match next {
                None => break,
                Some(update) => {
                    updates.insert(update.client_id, update.last_seen_ms);
                }
            },
            _ = ticker.tick() => {
                if updates.is_empty() {
                    continue;
                }
                debug!(count = updates.len(), "flushing heartbeat updates");
                for (client_id, last_seen_ms) in updates.drain() {
                    if let Err(err) = clients.update_last_seen(&client_id, last_seen_ms) {
                        debug!(client_id = %client_id, error = %err, "heartbeat flush skipped");
                    }
                }
            }
        }
    }
}

/// Forcibly close connections that have gone silent for longer than the
/// liveness threshold.
async fn check_liveness(
    connections: Registry<Connection>,
    interval: Duration,
    liveness_timeout: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            _ = ticker.tick() => {
                for (client_id, conn) in connections.snapshot().await {
                    let idle = conn.last_seen().elapsed();
                    if idle > liveness_timeout {
                        warn!(
                            client_id = %client_id,
                            idle_ms = idle.as_millis() as u64,
                            threshold_ms = liveness_timeout.as_millis() as u64,
                            "connection inactive, disconnecting"
                        );
                        conn.cancel();
                    }
                }
            }
        }
    }
}

/// Periodic eviction of abandoned pending entries.
async fn sweep_pending(pending: PendingTable, mut shutdown: watch::Receiver<bool>) {
    let mut ticker = tokio::time::interval(SWEEP_INTERVAL);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            _ = ticker.tick() => {
                let evicted = pending.sweep();
                if evicted > 0 {
                    debug!(count = evicted, "evicted expired pending requests");
                }
            }
        }
    }
}
