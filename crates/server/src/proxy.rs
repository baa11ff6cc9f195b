//! Proxy front door.
//!
//! Two entry points share one forwarding path: the catch-all on the proxy
//! port, and the `/proxy/<path>` prefix route on the API port (prefix
//! stripped before matching). Bodies are buffered fully since the tunnel
//! does not stream, and the agent's status, headers, and body are copied
//! back verbatim.

use axum::body::Body;
use axum::extract::{Query, Request, State};
use axum::http::header::{HeaderName, HeaderValue};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use std::collections::HashMap;
use tracing::{debug, warn};

use skyhook_common::{ClientId, TunnelError};
use skyhook_protocol::RequestPayload;

use crate::app::AppState;
use crate::routing;
use crate::store::RouteRecord;

/// Catch-all handler on the proxy port.
pub async fn handle_direct(State(state): State<AppState>, request: Request) -> Response {
    let path = request.uri().path().to_string();
    if path == "/" {
        return (StatusCode::BAD_REQUEST, "Root path not allowed").into_response();
    }
    forward(state, path, request).await
}

/// `/proxy/<path>` on the API port; the prefix is stripped before pattern
/// matching.
pub async fn handle_prefixed(State(state): State<AppState>, request: Request) -> Response {
    let full_path = request.uri().path();
    let path = full_path
        .strip_prefix("/proxy")
        .unwrap_or(full_path)
        .to_string();
    if path.is_empty() || path == "/" {
        return (StatusCode::BAD_REQUEST, "Invalid proxy path").into_response();
    }
    forward(state, path, request).await
}

async fn forward(state: AppState, path: String, request: Request) -> Response {
    let matched = routing::match_routes(state.routes.list(), &path);
    if matched.is_empty() {
        debug!(path = %path, "no route found");
        return (StatusCode::NOT_FOUND, "Route not found").into_response();
    }

    // First matching route whose client is live and enabled wins.
    let mut selected: Option<RouteRecord> = None;
    for route in matched {
        if !state.manager.is_connected(&route.client_id).await {
            debug!(path = %path, client_id = %route.client_id, "client not connected, trying next");
            continue;
        }
        match state.clients.get(&route.client_id) {
            Some(client) if client.enabled => {
                selected = Some(route);
                break;
            }
            _ => {
                debug!(path = %path, client_id = %route.client_id, "skipping disabled client");
            }
        }
    }
    let route = match selected {
        Some(route) => route,
        None => {
            warn!(path = %path, "no available backend");
            return (StatusCode::SERVICE_UNAVAILABLE, "No available backend").into_response();
        }
    };

    let params = Query::<HashMap<String, String>>::try_from_uri(request.uri())
        .map(|Query(params)| params)
        .unwrap_or_default();

    let method = request.method().as_str().to_string();
    let mut headers = HashMap::new();
    for (name, value) in request.headers() {
        if let Ok(value) = value.to_str() {
            headers.insert(name.as_str().to_string(), value.to_string());
        }
    }

    // The whole body is buffered; the tunnel does not stream.
    let body_bytes = match axum::body::to_bytes(request.into_body(), usize::MAX).await {
        Ok(bytes) => bytes,
        Err(err) => {
            warn!(path = %path, error = %err, "failed to buffer request body");
            return (StatusCode::BAD_REQUEST, "Failed to read request body").into_response();
        }
    };

    let payload = RequestPayload {
        http_method: method,
        url_suffix: path.clone(),
        headers,
        params,
        body: String::from_utf8_lossy(&body_bytes).into_owned(),
        timeout_ms: state.config.request_timeout_ms,
        targets_json: route.targets_json.clone(),
        delivery_policy: route.delivery_policy.clone(),
        route_mode: route.mode.to_string(),
    };

    let client_id = ClientId::new(route.client_id.clone());
    let response = match state
        .manager
        .send_request(&client_id, payload, state.config.request_timeout())
        .await
    {
        Ok(response) => response,
        Err(err) => {
            warn!(
                path = %path,
                client_id = %client_id,
                error = %err,
                "tunneled request failed"
            );
            let status = StatusCode::from_u16(err.http_status())
                .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
            let body = match err {
                TunnelError::Timeout { .. } => "Request timeout",
                TunnelError::NoAvailableBackend { .. } => "No available backend",
                _ => "Backend request failed",
            };
            return (status, body).into_response();
        }
    };

    if let Some(error) = &response.error {
        debug!(path = %path, client_id = %client_id, error = %error, "backend reported error");
    }

    // Copy status, headers, and body back to the caller verbatim.
    let status =
        StatusCode::from_u16(response.http_status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    let mut builder = Response::builder().status(status);
    if let Some(headers) = builder.headers_mut() {
        for (name, value) in &response.headers {
            // Length/framing is recomputed for the buffered body.
            if name.eq_ignore_ascii_case("content-length")
                || name.eq_ignore_ascii_case("transfer-encoding")
            {
                continue;
            }
            if let (Ok(name), Ok(value)) = (
                HeaderName::try_from(name.as_str()),
                HeaderValue::try_from(value.as_str()),
            ) {
                headers.insert(name, value);
            }
        }
    }

    builder
        .body(Body::from(response.body))
        .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
}
