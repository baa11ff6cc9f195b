//! Shared fixtures for the tunnel integration tests.
//!
//! Provides a server started on ephemeral ports, an HTTP target that
//! records what it receives, and both a scripted WebSocket "agent" (for
//! protocol-level scenarios) and the real agent (for end-to-end ones).

#![allow(dead_code)]

use std::collections::HashMap;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::Request;
use axum::http::StatusCode;
use axum::routing::any;
use axum::Router;
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use skyhook_common::{ClientId, RouteMode};
use skyhook_config::{AgentConfig, ServerConfig};
use skyhook_protocol::{
    Frame, FrameType, Op, RegisterAckPayload, RegisterPayload, PROTOCOL_VERSION,
};
use skyhook_server::app::{serve, AppState, RunningServer};
use skyhook_server::store::{NewClient, NewRoute};

pub const TEST_TOKEN: &str = "test-token";
pub const ADMIN_PASSWORD: &str = "test-password";

/// Server configuration on ephemeral ports with timings short enough for
/// tests.
pub fn test_config() -> ServerConfig {
    ServerConfig {
        host: "127.0.0.1".to_string(),
        api_port: 0,
        websocket_port: 0,
        proxy_port: 0,
        ping_interval_ms: 200,
        request_timeout_ms: 2_000,
        register_timeout_ms: 2_000,
        jwt_secret: "test-secret".to_string(),
        admin_password: ADMIN_PASSWORD.to_string(),
        shutdown_grace_ms: 1_000,
        ..Default::default()
    }
}

pub async fn start_server(config: ServerConfig) -> RunningServer {
    serve(config).await.expect("failed to start test server")
}

/// Seed one enabled client record.
pub fn create_client(state: &AppState, client_id: &str) {
    state
        .clients
        .create(NewClient {
            client_id: client_id.to_string(),
            name: String::new(),
            description: String::new(),
            auth_token: TEST_TOKEN.to_string(),
            enabled: true,
        })
        .expect("failed to create client");
}

/// Seed one enabled route.
pub fn create_route(state: &AppState, pattern: &str, client_id: &str, target: &str) -> u64 {
    state
        .routes
        .create(NewRoute {
            url_pattern: pattern.to_string(),
            client_id: client_id.to_string(),
            targets_json: target.to_string(),
            mode: RouteMode::OriginalPath,
            delivery_policy: String::new(),
            enabled: true,
            description: String::new(),
        })
        .expect("failed to create route")
        .id
}

// ----------------------------------------------------------------------
// Recording HTTP target
// ----------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub method: String,
    pub path: String,
    pub body: String,
    pub headers: HashMap<String, String>,
}

/// An intranet target standing in for the service behind the agent.
pub struct TargetServer {
    pub addr: SocketAddr,
    pub requests: Arc<Mutex<Vec<RecordedRequest>>>,
}

impl TargetServer {
    pub fn base_url(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub fn last_request(&self) -> Option<RecordedRequest> {
        self.requests.lock().last().cloned()
    }

    pub fn request_count(&self) -> usize {
        self.requests.lock().len()
    }
}

/// Start a target that answers every request with `body` and records what
/// it saw.
pub async fn start_target(body: &'static str) -> TargetServer {
    let requests: Arc<Mutex<Vec<RecordedRequest>>> = Arc::new(Mutex::new(Vec::new()));
    let recorder = requests.clone();

    let app = Router::new().fallback(any(move |request: Request| {
        let recorder = recorder.clone();
        async move {
            let method = request.method().to_string();
            let path = request.uri().path().to_string();
            let mut headers = HashMap::new();
            for (name, value) in request.headers() {
                if let Ok(value) = value.to_str() {
                    headers.insert(name.as_str().to_string(), value.to_string());
                }
            }
            let bytes = axum::body::to_bytes(request.into_body(), usize::MAX)
                .await
                .unwrap_or_default();
            recorder.lock().push(RecordedRequest {
                method,
                path,
                body: String::from_utf8_lossy(&bytes).into_owned(),
                headers,
            });
            (StatusCode::OK, body)
        }
    }));

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("failed to bind target");
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });

    TargetServer { addr, requests }
}

// ----------------------------------------------------------------------
// Scripted agent (raw WebSocket)
// ----------------------------------------------------------------------

pub type WsClient = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Dial the agent endpoint with query credentials.
pub async fn connect_agent_socket(ws_addr: SocketAddr, client_id: &str, token: &str) -> WsClient {
    let url = format!("ws://{ws_addr}/ws?client_id={client_id}&token={token}");
    let (stream, _response) = connect_async(url).await.expect("websocket connect failed");
    stream
}

/// Send CONTROL/REGISTER and wait for a successful REGISTER_ACK.
pub async fn register_agent(stream: &mut WsClient, client_id: &str, token: &str) {
    let frame = Frame::control(
        Op::Register,
        ClientId::new(client_id),
        &RegisterPayload {
            auth_token: token.to_string(),
            version: PROTOCOL_VERSION.to_string(),
            local_ips: vec!["10.0.0.99".to_string()],
        },
    )
    .unwrap();
    stream
        .send(Message::Text(frame.encode().unwrap()))
        .await
        .expect("failed to send REGISTER");

    let ack = wait_for_frame(stream, |frame| {
        frame.frame_type == FrameType::Control && frame.op == Op::RegisterAck
    })
    .await
    .expect("no REGISTER_ACK");
    let payload: RegisterAckPayload = ack.parse_payload().unwrap();
    assert!(payload.success, "registration rejected: {}", payload.message);
}

/// Read frames until one satisfies the predicate, with a 5 s cap.
pub async fn wait_for_frame(
    stream: &mut WsClient,
    predicate: impl Fn(&Frame) -> bool,
) -> Option<Frame> {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        let next = tokio::time::timeout_at(deadline, stream.next()).await.ok()??;
        match next {
            Ok(Message::Text(text)) => {
                if let Ok(frame) = Frame::decode(&text) {
                    if predicate(&frame) {
                        return Some(frame);
                    }
                }
            }
            Ok(Message::Close(_)) | Err(_) => return None,
            Ok(_) => {}
        }
    }
}

// ----------------------------------------------------------------------
// Real agent
// ----------------------------------------------------------------------

pub fn agent_config(ws_addr: SocketAddr, client_id: &str) -> AgentConfig {
    AgentConfig {
        server_url: format!("ws://{ws_addr}"),
        client_id: client_id.to_string(),
        auth_token: TEST_TOKEN.to_string(),
        ping_interval_ms: 200,
        reconnect_initial_delay_ms: 100,
        reconnect_max_delay_ms: 500,
        reconnect_jitter: 0.0,
        ..Default::default()
    }
}

/// Start the real agent in-process.
pub fn spawn_agent(config: AgentConfig) -> (Arc<skyhook_agent::Agent>, tokio::task::JoinHandle<()>) {
    let agent = Arc::new(skyhook_agent::Agent::new(config).expect("failed to build agent"));
    let runner = {
        let agent = agent.clone();
        tokio::spawn(async move { agent.run().await })
    };
    (agent, runner)
}

// ----------------------------------------------------------------------
// Polling helper
// ----------------------------------------------------------------------

/// Poll an async condition until it holds, panicking after ~5 s.
pub async fn wait_until<F, Fut>(what: &str, mut condition: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    for _ in 0..100 {
        if condition().await {
            return;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    panic!("timed out waiting for {what}");
}
