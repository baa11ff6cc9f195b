//! Agent transport: the persistent outbound control channel.
//!
//! One connection lifecycle: dial `<ws|wss>://host/ws?client_id=..&token=..`,
//! send CONTROL/REGISTER, await REGISTER_ACK, then run three tasks: a
//! single writer owning the socket sink, a heartbeat loop, and the read
//! loop dispatching inbound frames. Any terminal failure tears the trio
//! down and the outer loop reconnects with exponential backoff, forever.

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch, Semaphore};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{
    connect_async, connect_async_tls_with_config, Connector, MaybeTlsStream, WebSocketStream,
};
use tracing::{debug, info, warn};

use skyhook_common::{epoch_ms, Backoff, ClientId, TunnelError, TunnelResult};
use skyhook_config::AgentConfig;
use skyhook_protocol::{
    DecodeError, Frame, FrameType, Op, PingPayload, PongPayload, RegisterAckPayload,
    RegisterPayload, RequestPayload, PROTOCOL_VERSION,
};

use crate::executor::Executor;
use crate::netinfo;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Window for the server's REGISTER_ACK after we send REGISTER.
const REGISTER_ACK_TIMEOUT: Duration = Duration::from_secs(10);

/// Transient ping write failures tolerated before forcing a reconnect.
const MAX_PING_FAILURES: u32 = 3;

enum ConnectionEnd {
    Shutdown,
    Retry,
}

/// Link quality bookkeeping, shared between the heartbeat loop (writes
/// ping times, checks pong age) and the read loop (records pongs).
struct LinkHealth {
    last_ping: Option<Instant>,
    last_pong: Instant,
    rtt: Option<Duration>,
    /// Rolling 0..1 score derived from RTT; informational only
    quality: f64,
}

impl LinkHealth {
    fn new() -> Self {
        Self {
            last_ping: None,
            last_pong: Instant::now(),
            rtt: None,
            quality: 0.0,
        }
    }

    fn record_pong(&mut self) {
        let now = Instant::now();
        self.last_pong = now;
        if let Some(pinged) = self.last_ping {
            let rtt = now.duration_since(pinged);
            self.rtt = Some(rtt);
            self.update_quality(rtt);
        }
    }

    fn update_quality(&mut self, rtt: Duration) {
        let rtt_ms = rtt.as_millis() as f64;
        let sample = match rtt_ms {
            ms if ms <= 50.0 => 1.0,
            ms if ms <= 100.0 => 0.8,
            ms if ms <= 200.0 => 0.6,
            ms if ms <= 500.0 => 0.4,
            _ => 0.2,
        };
        // Smoothed so one slow round trip does not swing the score.
        self.quality = self.quality * 0.7 + sample * 0.3;
    }
}

/// The agent's persistent control channel.
pub struct Agent {
    config: Arc<AgentConfig>,
    executor: Arc<Executor>,
    workers: Arc<Semaphore>,
    shutdown: watch::Sender<bool>,
}

impl Agent {
    pub fn new(config: AgentConfig) -> TunnelResult<Self> {
        let executor = Arc::new(Executor::new(config.http_timeout())?);
        let workers = Arc::new(Semaphore::new(config.worker_pool_size));
        let (shutdown, _) = watch::channel(false);
        Ok(Self {
            config: Arc::new(config),
            executor,
            workers,
            shutdown,
        })
    }

    /// Signal the reconnect loop and any live connection to stop.
    pub fn shutdown(&self) {
        self.shutdown.send_replace(true);
    }

    /// Run until [`Agent::shutdown`] is called. Reconnects forever with
    /// exponential backoff; there is no attempt limit.
    pub async fn run(&self) {
        let mut backoff = Backoff::new(self.config.backoff());
        let mut shutdown_rx = self.shutdown.subscribe();

        loop {
            if *shutdown_rx.borrow() {
                break;
            }

            match self.run_connection(&mut shutdown_rx, &mut backoff).await {
                ConnectionEnd::Shutdown => break,
                ConnectionEnd::Retry => {}
            }

            let delay = backoff.next_delay();
            info!(
                delay_ms = delay.as_millis() as u64,
                attempt = backoff.attempt(),
                "reconnecting after backoff"
            );
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = shutdown_rx.changed() => break,
            }
        }

        info!("agent stopped");
    }

    /// One full connection lifecycle: dial, register, serve, tear down.
    async fn run_connection(
        &self,
        shutdown_rx: &mut watch::Receiver<bool>,
        backoff: &mut Backoff,
    ) -> ConnectionEnd {
        let stream = match self.dial().await {
            Ok(stream) => stream,
            Err(err) => {
                warn!(error = %err, "failed to connect");
                return ConnectionEnd::Retry;
            }
        };
        info!(server = %self.config.server_url, "connected to server");

        let (sink, mut reader) = stream.split();
        let (outbound, outbound_rx) = mpsc::channel::<Message>(self.config.send_queue_size);
        let (cancel, _) = watch::channel(false);

        let writer = tokio::spawn(write_loop(sink, outbound_rx, cancel.clone()));

        // Register, then wait for the ack before serving traffic.
        if let Err(err) = self.send_register(&outbound).await {
            warn!(error = %err, "failed to send REGISTER");
            return finish(cancel, writer, ConnectionEnd::Retry).await;
        }
        match tokio::time::timeout(REGISTER_ACK_TIMEOUT, wait_register_ack(&mut reader)).await {
            Ok(Some(ack)) if ack.success => {
                info!(message = %ack.message, "registered with server");
                backoff.reset();
            }
            Ok(Some(ack)) => {
                warn!(message = %ack.message, "registration rejected");
                return finish(cancel, writer, ConnectionEnd::Retry).await;
            }
            Ok(None) => {
                warn!("connection closed before REGISTER_ACK");
                return finish(cancel, writer, ConnectionEnd::Retry).await;
            }
            Err(_elapsed) => {
                warn!("no REGISTER_ACK within window");
                return finish(cancel, writer, ConnectionEnd::Retry).await;
            }
        }

        let health = Arc::new(Mutex::new(LinkHealth::new()));
        let heartbeat = tokio::spawn(heartbeat_loop(
            self.config.clone(),
            outbound.clone(),
            health.clone(),
            cancel.clone(),
        ));

        let outcome = self
            .read_loop(&mut reader, &outbound, &health, shutdown_rx, &cancel)
            .await;

        cancel.send_replace(true);
        let _ = heartbeat.await;
        let _ = writer.await;
        outcome
    }

    async fn dial(&self) -> TunnelResult<WsStream> {
        let url = self.build_url();
        debug!(url = %redact_token(&url), "dialing server");

        let use_tls = url.starts_with("wss://");
        let stream = if use_tls && self.config.tls_insecure_skip_verify {
            let connector = native_tls::TlsConnector::builder()
                .danger_accept_invalid_certs(true)
                .build()
                .map_err(|e| TunnelError::internal(format!("tls connector: {e}")))?;
            let (stream, _response) = connect_async_tls_with_config(
                url.as_str(),
                None,
                false,
                Some(Connector::NativeTls(connector)),
            )
            .await
            .map_err(|e| TunnelError::internal(format!("websocket dial failed: {e}")))?;
            stream
        } else {
            let (stream, _response) = connect_async(url.as_str())
                .await
                .map_err(|e| TunnelError::internal(format!("websocket dial failed: {e}")))?;
            stream
        };
        Ok(stream)
    }

    fn build_url(&self) -> String {
        let base = self.config.server_url.trim_end_matches('/');
        format!(
            "{base}/ws?client_id={}&token={}",
            url_encode(&self.config.client_id),
            url_encode(&self.config.auth_token)
        )
    }

    async fn send_register(&self, outbound: &mpsc::Sender<Message>) -> TunnelResult<()> {
        let payload = RegisterPayload {
            auth_token: self.config.auth_token.clone(),
            version: PROTOCOL_VERSION.to_string(),
            local_ips: netinfo::local_ips(),
        };
        let frame = Frame::control(
            Op::Register,
            ClientId::new(self.config.client_id.clone()),
            &payload,
        )
        .and_then(|f| f.encode())
        .map_err(|e| TunnelError::Protocol {
            message: format!("failed to build REGISTER: {e}"),
            client_id: Some(self.config.client_id.clone()),
        })?;

        outbound
            .send(Message::Text(frame))
            .await
            .map_err(|_| TunnelError::NotConnected {
                client_id: self.config.client_id.clone(),
            })
    }

    async fn read_loop(
        &self,
        reader: &mut SplitStream<WsStream>,
        outbound: &mpsc::Sender<Message>,
        health: &Arc<Mutex<LinkHealth>>,
        shutdown_rx: &mut watch::Receiver<bool>,
        cancel: &watch::Sender<bool>,
    ) -> ConnectionEnd {
        let mut cancelled = cancel.subscribe();
        loop {
            if *cancel.borrow() {
                return ConnectionEnd::Retry;
            }
            tokio::select! {
                _ = shutdown_rx.changed() => return ConnectionEnd::Shutdown,
                _ = cancelled.changed() => return ConnectionEnd::Retry,
                next = reader.next() => match next {
                    None => return ConnectionEnd::Retry,
                    Some(Err(err)) => {
                        warn!(error = %err, "read error, reconnecting");
                        return ConnectionEnd::Retry;
                    }
                    Some(Ok(Message::Text(text))) => self.handle_frame(&text, outbound, health),
                    Some(Ok(Message::Close(frame))) => {
                        info!(?frame, "server closed connection");
                        return ConnectionEnd::Retry;
                    }
                    // The protocol layer answers WebSocket pings on its own.
                    Some(Ok(_)) => {}
                }
            }
        }
    }

    fn handle_frame(
        &self,
        text: &str,
        outbound: &mpsc::Sender<Message>,
        health: &Arc<Mutex<LinkHealth>>,
    ) {
        let frame = match Frame::decode(text) {
            Ok(frame) => frame,
            Err(DecodeError::UnknownOp { op }) => {
                warn!(op = %op, "ignoring unknown op");
                return;
            }
            Err(DecodeError::Malformed(err)) => {
                warn!(error = %err, "dropping malformed frame");
                return;
            }
        };

        match frame.op {
            Op::Ping => {
                let timestamp = frame
                    .parse_payload::<PingPayload>()
                    .map(|p| p.timestamp)
                    .unwrap_or_else(|_| epoch_ms());
                let pong = PongPayload { timestamp };
                if let Ok(reply) = Frame::control(
                    Op::Pong,
                    ClientId::new(self.config.client_id.clone()),
                    &pong,
                )
                .and_then(|f| f.encode())
                {
                    if outbound.try_send(Message::Text(reply)).is_err() {
                        warn!("failed to enqueue PONG");
                    }
                }
            }
            Op::Pong => {
                let mut guard = health.lock();
                guard.record_pong();
                if let Some(rtt) = guard.rtt {
                    debug!(
                        rtt_ms = rtt.as_millis() as u64,
                        quality = guard.quality,
                        "pong received"
                    );
                }
            }
            Op::Request => self.handle_request(frame, outbound),
            Op::RouteSync => {
                // Advisory only; the agent keeps no route table.
                debug!("route sync received");
            }
            Op::RegisterAck => debug!("late REGISTER_ACK ignored"),
            Op::Ack => debug!("ACK received"),
            Op::Error => warn!(payload = %frame.payload, "error frame from server"),
            Op::Register | Op::Response => {
                warn!(op = ?frame.op, "unexpected frame from server");
            }
        }
    }

    /// Execute a tunneled request off the read loop, bounded by the worker
    /// pool, and send the RESPONSE frame with the original msg_id.
    fn handle_request(&self, frame: Frame, outbound: &mpsc::Sender<Message>) {
        let msg_id = match frame.msg_id.clone() {
            Some(id) => id,
            None => {
                warn!("REQUEST frame missing msg_id");
                return;
            }
        };
        let payload = match frame.parse_payload::<RequestPayload>() {
            Ok(payload) => payload,
            Err(err) => {
                warn!(msg_id = %msg_id, error = %err, "malformed REQUEST payload");
                return;
            }
        };

        debug!(
            msg_id = %msg_id,
            method = %payload.http_method,
            path = %payload.url_suffix,
            "request received"
        );

        let executor = self.executor.clone();
        let workers = self.workers.clone();
        let outbound = outbound.clone();
        let client_id = ClientId::new(self.config.client_id.clone());

        tokio::spawn(async move {
            let _permit = match workers.acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => return,
            };
            let response = executor.execute(&payload).await;
            match Frame::message(Op::Response, client_id, msg_id.clone(), &response)
                .and_then(|f| f.encode())
            {
                Ok(text) => {
                    if outbound.send(Message::Text(text)).await.is_err() {
                        warn!(msg_id = %msg_id, "connection gone, response dropped");
                    }
                }
                Err(err) => warn!(msg_id = %msg_id, error = %err, "failed to encode RESPONSE"),
            }
        });
    }
}

/// Tear down the writer and return the given outcome.
async fn finish(
    cancel: watch::Sender<bool>,
    writer: JoinHandle<()>,
    outcome: ConnectionEnd,
) -> ConnectionEnd {
    cancel.send_replace(true);
    let _ = writer.await;
    outcome
}

/// Single writer: every socket write goes through this task, as required
/// by the WebSocket library contract.
async fn write_loop(
    mut sink: SplitSink<WsStream, Message>,
    mut outbound: mpsc::Receiver<Message>,
    cancel: watch::Sender<bool>,
) {
    let mut cancelled = cancel.subscribe();
    loop {
        if *cancel.borrow() {
            let _ = sink
                .send(Message::Close(Some(CloseFrame {
                    code: CloseCode::Normal,
                    reason: "shutting down".into(),
                })))
                .await;
            break;
        }
        tokio::select! {
            _ = cancelled.changed() => {
                let _ = sink
                    .send(Message::Close(Some(CloseFrame {
                        code: CloseCode::Normal,
                        reason: "shutting down".into(),
                    })))
                    .await;
                break;
            }
            next = outbound.recv() => match next {
                None => break,
                Some(message) => {
                    let closing = matches!(message, Message::Close(_));
                    if let Err(err) = sink.send(message).await {
                        debug!(error = %err, "write failed");
                        cancel.send_replace(true);
                        break;
                    }
                    if closing {
                        cancel.send_replace(true);
                        break;
                    }
                }
            }
        }
    }
}

/// Read frames until the REGISTER_ACK arrives. Returns `None` when the
/// socket dies first.
async fn wait_register_ack(reader: &mut SplitStream<WsStream>) -> Option<RegisterAckPayload> {
    while let Some(next) = reader.next().await {
        match next {
            Ok(Message::Text(text)) => match Frame::decode(&text) {
                Ok(frame)
                    if frame.frame_type == FrameType::Control && frame.op == Op::RegisterAck =>
                {
                    match frame.parse_payload::<RegisterAckPayload>() {
                        Ok(ack) => return Some(ack),
                        Err(err) => {
                            warn!(error = %err, "malformed REGISTER_ACK payload");
                            return None;
                        }
                    }
                }
                Ok(frame) => debug!(op = ?frame.op, "frame before REGISTER_ACK ignored"),
                Err(err) => warn!(error = %err, "dropping frame before REGISTER_ACK"),
            },
            Ok(Message::Close(_)) | Err(_) => return None,
            Ok(_) => {}
        }
    }
    None
}

/// Send protocol pings and police pong freshness. A silent link (no pong
/// for three intervals) or three consecutive enqueue failures closes the
/// connection to trigger a reconnect.
async fn heartbeat_loop(
    config: Arc<AgentConfig>,
    outbound: mpsc::Sender<Message>,
    health: Arc<Mutex<LinkHealth>>,
    cancel: watch::Sender<bool>,
) {
    let interval = config.ping_interval();
    let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + interval, interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    let mut cancelled = cancel.subscribe();
    let mut consecutive_failures: u32 = 0;
    loop {
        if *cancel.borrow() {
            break;
        }
        tokio::select! {
            _ = cancelled.changed() => break,
            _ = ticker.tick() => {
                let pong_age = health.lock().last_pong.elapsed();
                if pong_age > config.ping_timeout() {
                    warn!(
                        pong_age_ms = pong_age.as_millis() as u64,
                        threshold_ms = config.ping_timeout().as_millis() as u64,
                        "heartbeat timeout, closing connection"
                    );
                    let _ = outbound
                        .try_send(Message::Close(Some(CloseFrame {
                            code: CloseCode::Away,
                            reason: "heartbeat timeout".into(),
                        })));
                    cancel.send_replace(true);
                    break;
                }

                let ping = PingPayload { timestamp: epoch_ms() };
                let frame = Frame::control(
                    Op::Ping,
                    ClientId::new(config.client_id.clone()),
                    &ping,
                )
                .and_then(|f| f.encode());
                let sent = match frame {
                    Ok(text) => outbound.try_send(Message::Text(text)).is_ok(),
                    Err(_) => false,
                };

                if sent {
                    consecutive_failures = 0;
                    health.lock().last_ping = Some(Instant::now());
                } else {
                    consecutive_failures += 1;
                    warn!(
                        failures = consecutive_failures,
                        max = MAX_PING_FAILURES,
                        "failed to send ping"
                    );
                    if consecutive_failures >= MAX_PING_FAILURES {
                        warn!("too many ping failures, closing connection");
                        cancel.send_replace(true);
                        break;
                    }
                }
            }
        }
    }
}

/// Percent-encode a query-string value.
fn url_encode(value: &str) -> String {
    let mut encoded = String::with_capacity(value.len());
    for byte in value.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                encoded.push(byte as char)
            }
            other => {
                encoded.push('%');
                encoded.push_str(&format!("{other:02X}"));
            }
        }
    }
    encoded
}

/// Strip the token value from a dial URL before logging it.
fn redact_token(url: &str) -> String {
    match url.find("token=") {
        Some(idx) => format!("{}token=***", &url[..idx]),
        None => url.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn url_encode_passes_unreserved() {
        assert_eq!(url_encode("agent-1_x.y~z"), "agent-1_x.y~z");
    }

    #[test]
    fn url_encode_escapes_reserved() {
        assert_eq!(url_encode("a b&c=d"), "a%20b%26c%3Dd");
    }

    #[test]
    fn redact_token_hides_secret() {
        let url = "ws://h:1/ws?client_id=a&token=secret";
        assert_eq!(redact_token(url), "ws://h:1/ws?client_id=a&token=***");
    }

    #[test]
    fn quality_score_tracks_rtt() {
        let mut health = LinkHealth::new();
        health.last_ping = Some(Instant::now());
        health.record_pong();
        // A fast RTT pulls the smoothed score up from zero.
        assert!(health.quality > 0.0);
        assert!(health.rtt.is_some());
    }
}
