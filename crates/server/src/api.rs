//! Management REST API and operator authentication.
//!
//! JSON REST under `/api/v1`: CRUD for clients and routes, enable/disable,
//! and stats. Everything except `POST /api/v1/auth/login` requires a JWT
//! bearer token issued by the login endpoint. Client responses never carry
//! the auth token itself, only a `has_auth_token` flag.

use axum::extract::{Path, Request, State};
use axum::http::{header, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::Json;
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{info, warn};

use skyhook_common::{epoch_ms, TunnelError};

use crate::app::AppState;
use crate::store::{ClientRecord, ClientUpdate, NewClient, NewRoute, RouteUpdate};

// ----------------------------------------------------------------------
// Authentication
// ----------------------------------------------------------------------

#[derive(Debug, Serialize, Deserialize)]
struct Claims {
    sub: String,
    iat: i64,
    exp: i64,
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

pub async fn login(
    State(state): State<AppState>,
    Json(request): Json<LoginRequest>,
) -> Response {
    let config = &state.config;
    if config.jwt_secret.is_empty() || config.admin_password.is_empty() {
        return error_response(StatusCode::SERVICE_UNAVAILABLE, "login is not configured");
    }
    if request.username != config.admin_username || request.password != config.admin_password {
        warn!(username = %request.username, "login failed");
        return error_response(StatusCode::UNAUTHORIZED, "invalid credentials");
    }

    let now = epoch_ms() / 1000;
    let claims = Claims {
        sub: request.username,
        iat: now,
        exp: now + config.jwt_expiry_secs as i64,
    };
    match encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(config.jwt_secret.as_bytes()),
    ) {
        Ok(token) => {
            info!(username = %claims.sub, "operator logged in");
            Json(json!({ "token": token })).into_response()
        }
        Err(err) => {
            warn!(error = %err, "failed to issue token");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "failed to issue token")
        }
    }
}

/// Bearer-token middleware for all authenticated management routes.
pub async fn require_auth(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    let secret = &state.config.jwt_secret;
    if secret.is_empty() {
        return error_response(StatusCode::SERVICE_UNAVAILABLE, "authentication is not configured");
    }

    let token = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "));

    let token = match token {
        Some(token) => token,
        None => return error_response(StatusCode::UNAUTHORIZED, "missing bearer token"),
    };

    if let Err(err) = decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::default(),
    ) {
        warn!(error = %err, "rejected management request");
        return error_response(StatusCode::UNAUTHORIZED, "invalid token");
    }

    next.run(request).await
}

// ----------------------------------------------------------------------
// Views
// ----------------------------------------------------------------------

/// Client record as exposed over the API: the secret never leaves the
/// store.
#[derive(Debug, Serialize)]
pub struct ClientView {
    pub client_id: String,
    pub name: String,
    pub description: String,
    pub has_auth_token: bool,
    pub enabled: bool,
    pub status: String,
    pub last_seen_ms: Option<i64>,
    pub local_ips: Vec<String>,
    pub created_at_ms: i64,
    pub updated_at_ms: i64,
}

impl From<ClientRecord> for ClientView {
    fn from(record: ClientRecord) -> Self {
        Self {
            client_id: record.client_id,
            name: record.name,
            description: record.description,
            has_auth_token: !record.auth_token.is_empty(),
            enabled: record.enabled,
            status: record.status.to_string(),
            last_seen_ms: record.last_seen_ms,
            local_ips: record.local_ips,
            created_at_ms: record.created_at_ms,
            updated_at_ms: record.updated_at_ms,
        }
    }
}

fn error_response(status: StatusCode, message: &str) -> Response {
    (status, Json(json!({ "error": message }))).into_response()
}

fn tunnel_error_response(err: TunnelError) -> Response {
    let status =
        StatusCode::from_u16(err.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    (status, Json(json!({ "error": err.to_string() }))).into_response()
}

// ----------------------------------------------------------------------
// Clients
// ----------------------------------------------------------------------

pub async fn list_clients(State(state): State<AppState>) -> Response {
    let clients: Vec<ClientView> = state.clients.list().into_iter().map(Into::into).collect();
    Json(clients).into_response()
}

pub async fn create_client(
    State(state): State<AppState>,
    Json(new): Json<NewClient>,
) -> Response {
    match state.clients.create(new) {
        Ok(record) => (StatusCode::CREATED, Json(ClientView::from(record))).into_response(),
        Err(err) => tunnel_error_response(err),
    }
}

pub async fn get_client(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    match state.clients.get(&id) {
        Some(record) => Json(ClientView::from(record)).into_response(),
        None => error_response(StatusCode::NOT_FOUND, "client not found"),
    }
}

pub async fn update_client(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(update): Json<ClientUpdate>,
) -> Response {
    let disabling = update.enabled == Some(false);
    match state.clients.update(&id, update) {
        Ok(record) => {
            if disabling {
                disconnect_if_connected(&state, &id).await;
            }
            Json(ClientView::from(record)).into_response()
        }
        Err(err) => tunnel_error_response(err),
    }
}

pub async fn delete_client(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    match state.clients.delete(&id) {
        Ok(()) => {
            disconnect_if_connected(&state, &id).await;
            StatusCode::NO_CONTENT.into_response()
        }
        Err(err) => tunnel_error_response(err),
    }
}

pub async fn enable_client(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    match state.clients.set_enabled(&id, true) {
        Ok(record) => Json(ClientView::from(record)).into_response(),
        Err(err) => tunnel_error_response(err),
    }
}

/// Disabling a client forcibly closes its live tunnel.
pub async fn disable_client(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    match state.clients.set_enabled(&id, false) {
        Ok(record) => {
            disconnect_if_connected(&state, &id).await;
            Json(ClientView::from(record)).into_response()
        }
        Err(err) => tunnel_error_response(err),
    }
}

async fn disconnect_if_connected(state: &AppState, client_id: &str) {
    if state.manager.disconnect(client_id).await.is_ok() {
        info!(client_id = %client_id, "forcibly disconnected client");
    }
}

// ----------------------------------------------------------------------
// Routes
// ----------------------------------------------------------------------

pub async fn list_routes(State(state): State<AppState>) -> Response {
    Json(state.routes.list()).into_response()
}

pub async fn create_route(State(state): State<AppState>, Json(new): Json<NewRoute>) -> Response {
    match state.routes.create(new) {
        Ok(record) => (StatusCode::CREATED, Json(record)).into_response(),
        Err(err) => tunnel_error_response(err),
    }
}

pub async fn get_route(State(state): State<AppState>, Path(id): Path<u64>) -> Response {
    match state.routes.get(id) {
        Some(record) => Json(record).into_response(),
        None => error_response(StatusCode::NOT_FOUND, "route not found"),
    }
}

pub async fn update_route(
    State(state): State<AppState>,
    Path(id): Path<u64>,
    Json(update): Json<RouteUpdate>,
) -> Response {
    match state.routes.update(id, update) {
        Ok(record) => Json(record).into_response(),
        Err(err) => tunnel_error_response(err),
    }
}

pub async fn delete_route(State(state): State<AppState>, Path(id): Path<u64>) -> Response {
    match state.routes.delete(id) {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(err) => tunnel_error_response(err),
    }
}

pub async fn enable_route(State(state): State<AppState>, Path(id): Path<u64>) -> Response {
    match state.routes.set_enabled(id, true) {
        Ok(record) => Json(record).into_response(),
        Err(err) => tunnel_error_response(err),
    }
}

pub async fn disable_route(State(state): State<AppState>, Path(id): Path<u64>) -> Response {
    match state.routes.set_enabled(id, false) {
        Ok(record) => Json(record).into_response(),
        Err(err) => tunnel_error_response(err),
    }
}

// ----------------------------------------------------------------------
// Stats and health
// ----------------------------------------------------------------------

pub async fn stats(State(state): State<AppState>) -> Response {
    let stats = state.manager.stats().await;
    Json(json!({
        "connected_clients": stats.connected_clients,
        "pending_requests": stats.pending_requests,
        "total_connections": stats.total_connections,
        "clients": state.clients.list().len(),
        "routes": state.routes.list().len(),
        "uptime_seconds": state.started_at.elapsed().as_secs(),
    }))
    .into_response()
}

/// Unauthenticated liveness probe.
pub async fn health(State(state): State<AppState>) -> Response {
    Json(json!({
        "status": "ok",
        "connections": state.manager.connected_count().await,
        "uptime_seconds": state.started_at.elapsed().as_secs(),
    }))
    .into_response()
}
