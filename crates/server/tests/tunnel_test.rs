//! End-to-end tunnel tests: real listeners, real sockets, and (where the
//! scenario calls for it) the real agent executing against a local target.

mod common;

use std::time::{Duration, Instant};

use futures_util::SinkExt;
use tokio_tungstenite::tungstenite::Message;

use skyhook_common::ClientId;
use skyhook_protocol::{Frame, FrameType, Op, RequestPayload, ResponsePayload};

use common::*;

#[tokio::test]
async fn exact_match_happy_path() {
    let server = start_server(test_config()).await;
    let target = start_target("OK").await;

    create_client(&server.state, "agent-a");
    create_route(&server.state, "/api/users", "agent-a", &target.base_url());

    let (agent, runner) = spawn_agent(agent_config(server.ws_addr, "agent-a"));
    let manager = server.state.manager.clone();
    wait_until("agent online", || {
        let manager = manager.clone();
        async move { manager.is_connected("agent-a").await }
    })
    .await;

    let response = reqwest::get(format!("http://{}/api/users", server.proxy_addr))
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 200);
    assert_eq!(response.text().await.unwrap(), "OK");

    // The agent hit the target with the original method and path.
    let seen = target.last_request().expect("target never called");
    assert_eq!(seen.method, "GET");
    assert_eq!(seen.path, "/api/users");

    // Status flipped to online in the store.
    let record = server.state.clients.get("agent-a").unwrap();
    assert_eq!(record.status.to_string(), "online");

    agent.shutdown();
    let _ = runner.await;
    server.shutdown().await;
}

#[tokio::test]
async fn request_body_and_headers_travel_through() {
    let server = start_server(test_config()).await;
    let target = start_target("created").await;

    create_client(&server.state, "agent-a");
    create_route(&server.state, "/api/**", "agent-a", &target.base_url());

    let (agent, runner) = spawn_agent(agent_config(server.ws_addr, "agent-a"));
    let manager = server.state.manager.clone();
    wait_until("agent online", || {
        let manager = manager.clone();
        async move { manager.is_connected("agent-a").await }
    })
    .await;

    let client = reqwest::Client::new();
    let response = client
        .post(format!("http://{}/api/things", server.proxy_addr))
        .header("x-request-source", "integration-test")
        .body("{\"name\":\"thing\"}")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 200);

    let seen = target.last_request().expect("target never called");
    assert_eq!(seen.method, "POST");
    assert_eq!(seen.path, "/api/things");
    assert_eq!(seen.body, "{\"name\":\"thing\"}");
    assert_eq!(
        seen.headers.get("x-request-source").map(String::as_str),
        Some("integration-test")
    );

    agent.shutdown();
    let _ = runner.await;
    server.shutdown().await;
}

#[tokio::test]
async fn wildcard_priority_prefers_single_wildcard() {
    let server = start_server(test_config()).await;
    let single_target = start_target("single").await;
    let double_target = start_target("double").await;

    create_client(&server.state, "agent-a");
    // Created first so a priority tie would pick the wrong one.
    create_route(
        &server.state,
        "/api/**/users",
        "agent-a",
        &double_target.base_url(),
    );
    create_route(
        &server.state,
        "/api/*/users",
        "agent-a",
        &single_target.base_url(),
    );

    let (agent, runner) = spawn_agent(agent_config(server.ws_addr, "agent-a"));
    let manager = server.state.manager.clone();
    wait_until("agent online", || {
        let manager = manager.clone();
        async move { manager.is_connected("agent-a").await }
    })
    .await;

    let response = reqwest::get(format!("http://{}/api/v1/users", server.proxy_addr))
        .await
        .unwrap();
    assert_eq!(response.text().await.unwrap(), "single");
    assert_eq!(single_target.request_count(), 1);
    assert_eq!(double_target.request_count(), 0);

    agent.shutdown();
    let _ = runner.await;
    server.shutdown().await;
}

#[tokio::test]
async fn disabled_client_falls_back_to_enabled_one() {
    let server = start_server(test_config()).await;
    let target_a = start_target("from-a").await;
    let target_b = start_target("from-b").await;

    create_client(&server.state, "agent-a");
    create_client(&server.state, "agent-b");
    // agent-b's route is created first so it is tried first within the
    // priority bucket.
    create_route(&server.state, "/api/data", "agent-b", &target_b.base_url());
    create_route(&server.state, "/api/data", "agent-a", &target_a.base_url());

    let (agent_a, runner_a) = spawn_agent(agent_config(server.ws_addr, "agent-a"));
    let (agent_b, runner_b) = spawn_agent(agent_config(server.ws_addr, "agent-b"));
    let manager = server.state.manager.clone();
    wait_until("both agents online", || {
        let manager = manager.clone();
        async move {
            manager.is_connected("agent-a").await && manager.is_connected("agent-b").await
        }
    })
    .await;

    // Disable B in the store while its connection stays up.
    server.state.clients.set_enabled("agent-b", false).unwrap();

    let response = reqwest::get(format!("http://{}/api/data", server.proxy_addr))
        .await
        .unwrap();
    assert_eq!(response.text().await.unwrap(), "from-a");
    assert_eq!(target_b.request_count(), 0);

    agent_a.shutdown();
    agent_b.shutdown();
    let _ = runner_a.await;
    let _ = runner_b.await;
    server.shutdown().await;
}

#[tokio::test]
async fn offline_agent_returns_503_and_unknown_route_404() {
    let server = start_server(test_config()).await;
    create_client(&server.state, "agent-a");
    create_route(&server.state, "/api/users", "agent-a", "http://127.0.0.1:9000");

    // Route exists but no agent is connected.
    let response = reqwest::get(format!("http://{}/api/users", server.proxy_addr))
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 503);
    assert_eq!(response.text().await.unwrap(), "No available backend");

    // No route at all.
    let response = reqwest::get(format!("http://{}/nowhere", server.proxy_addr))
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 404);

    // Root catch-all is rejected outright.
    let response = reqwest::get(format!("http://{}/", server.proxy_addr))
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 400);

    server.shutdown().await;
}

#[tokio::test]
async fn unresponsive_agent_times_out_with_504_and_late_response_is_dropped() {
    let mut config = test_config();
    config.request_timeout_ms = 300;
    // The scripted agent never answers pings; keep the liveness cutoff far
    // beyond the test timeline.
    config.ping_interval_ms = 2_000;
    let server = start_server(config).await;

    create_client(&server.state, "agent-a");
    create_route(&server.state, "/api/slow", "agent-a", "http://127.0.0.1:9000");

    // Scripted agent: registers, then sits on the REQUEST without answering.
    let mut socket = connect_agent_socket(server.ws_addr, "agent-a", TEST_TOKEN).await;
    register_agent(&mut socket, "agent-a", TEST_TOKEN).await;
    let manager = server.state.manager.clone();
    wait_until("agent online", || {
        let manager = manager.clone();
        async move { manager.is_connected("agent-a").await }
    })
    .await;

    let started = Instant::now();
    let response_task = tokio::spawn(reqwest::get(format!(
        "http://{}/api/slow",
        server.proxy_addr
    )));

    // Capture the REQUEST frame so the late response can carry its msg_id.
    let request_frame = wait_for_frame(&mut socket, |frame| {
        frame.frame_type == FrameType::Message && frame.op == Op::Request
    })
    .await
    .expect("no REQUEST frame reached the agent");
    let payload: RequestPayload = request_frame.parse_payload().unwrap();
    assert_eq!(payload.url_suffix, "/api/slow");

    let response = response_task.await.unwrap().unwrap();
    assert_eq!(response.status().as_u16(), 504);
    // Deadline bound: well inside timeout + grace.
    assert!(started.elapsed() < Duration::from_secs(2));

    // The table is empty once the waiter timed out.
    assert_eq!(server.state.manager.pending_count(), 0);

    // A response arriving after the deadline is dropped with a log line,
    // not delivered.
    let late = Frame::message(
        Op::Response,
        ClientId::new("agent-a"),
        request_frame.msg_id.clone().unwrap(),
        &ResponsePayload {
            http_status: 200,
            headers: Default::default(),
            body: "too late".to_string(),
            latency_ms: 400,
            error: None,
        },
    )
    .unwrap();
    socket
        .send(Message::Text(late.encode().unwrap()))
        .await
        .unwrap();

    // The server stays healthy after the drop.
    tokio::time::sleep(Duration::from_millis(200)).await;
    let health = reqwest::get(format!("http://{}/health", server.api_addr))
        .await
        .unwrap();
    assert_eq!(health.status().as_u16(), 200);

    server.shutdown().await;
}

#[tokio::test]
async fn second_register_evicts_first_connection() {
    let server = start_server(test_config()).await;
    create_client(&server.state, "agent-a");

    let mut first = connect_agent_socket(server.ws_addr, "agent-a", TEST_TOKEN).await;
    register_agent(&mut first, "agent-a", TEST_TOKEN).await;

    let mut second = connect_agent_socket(server.ws_addr, "agent-a", TEST_TOKEN).await;
    register_agent(&mut second, "agent-a", TEST_TOKEN).await;

    // The first connection is cancelled: it observes a close (or EOF).
    let evicted = wait_for_frame(&mut first, |_| false).await;
    assert!(evicted.is_none(), "first connection should have been closed");

    // Exactly one live connection remains for the client.
    let manager = server.state.manager.clone();
    wait_until("single connection", || {
        let manager = manager.clone();
        async move { manager.connected_count().await == 1 }
    })
    .await;
    assert!(server.state.manager.is_connected("agent-a").await);

    server.shutdown().await;
}

#[tokio::test]
async fn bad_credentials_are_rejected_before_upgrade() {
    let server = start_server(test_config()).await;
    create_client(&server.state, "agent-a");

    // Wrong token.
    let url = format!(
        "ws://{}/ws?client_id=agent-a&token=wrong-token",
        server.ws_addr
    );
    assert!(tokio_tungstenite::connect_async(url).await.is_err());

    // Unknown client.
    let url = format!("ws://{}/ws?client_id=ghost&token={TEST_TOKEN}", server.ws_addr);
    assert!(tokio_tungstenite::connect_async(url).await.is_err());

    // Missing credentials.
    let url = format!("ws://{}/ws", server.ws_addr);
    assert!(tokio_tungstenite::connect_async(url).await.is_err());

    server.shutdown().await;
}

#[tokio::test]
async fn agent_reconnects_with_same_identity() {
    let server = start_server(test_config()).await;
    let target = start_target("OK").await;

    create_client(&server.state, "agent-a");
    create_route(&server.state, "/api/users", "agent-a", &target.base_url());

    let (agent, runner) = spawn_agent(agent_config(server.ws_addr, "agent-a"));
    let manager = server.state.manager.clone();
    wait_until("agent online", || {
        let manager = manager.clone();
        async move { manager.is_connected("agent-a").await }
    })
    .await;

    // Kill the connection server-side; the agent must come back on its own.
    server.state.manager.disconnect("agent-a").await.unwrap();
    wait_until("agent offline", || {
        let manager = manager.clone();
        async move { !manager.is_connected("agent-a").await }
    })
    .await;
    wait_until("agent reconnected", || {
        let manager = manager.clone();
        async move { manager.is_connected("agent-a").await }
    })
    .await;

    let response = reqwest::get(format!("http://{}/api/users", server.proxy_addr))
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 200);
    assert_eq!(response.text().await.unwrap(), "OK");

    agent.shutdown();
    let _ = runner.await;
    server.shutdown().await;
}

#[tokio::test]
async fn proxy_prefix_on_api_port_strips_prefix() {
    let server = start_server(test_config()).await;
    let target = start_target("via-prefix").await;

    create_client(&server.state, "agent-a");
    create_route(&server.state, "/api/users", "agent-a", &target.base_url());

    let (agent, runner) = spawn_agent(agent_config(server.ws_addr, "agent-a"));
    let manager = server.state.manager.clone();
    wait_until("agent online", || {
        let manager = manager.clone();
        async move { manager.is_connected("agent-a").await }
    })
    .await;

    let response = reqwest::get(format!("http://{}/proxy/api/users", server.api_addr))
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 200);
    assert_eq!(response.text().await.unwrap(), "via-prefix");

    // The prefix is stripped before matching: the target saw /api/users.
    let seen = target.last_request().unwrap();
    assert_eq!(seen.path, "/api/users");

    agent.shutdown();
    let _ = runner.await;
    server.shutdown().await;
}
