//! Agent WebSocket endpoint: `GET /ws?client_id=<id>&token=<auth_token>`.
//!
//! Credentials are pre-checked against the client store before the upgrade
//! is accepted; a failed pre-check is an HTTP rejection, not a WebSocket
//! close. The CONTROL/REGISTER handshake re-verifies the token after the
//! upgrade (see [`crate::tunnel::TunnelManager::handle_socket`]).

use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Deserialize;
use tracing::{info, warn};

use skyhook_common::ClientId;

use crate::app::AppState;

#[derive(Debug, Deserialize)]
pub struct WsQuery {
    #[serde(default)]
    pub client_id: String,
    #[serde(default)]
    pub token: String,
}

pub async fn ws_handler(
    State(state): State<AppState>,
    Query(query): Query<WsQuery>,
    ws: WebSocketUpgrade,
) -> Response {
    if query.client_id.is_empty() {
        return (StatusCode::BAD_REQUEST, "client_id is required").into_response();
    }
    if query.token.is_empty() {
        return (StatusCode::UNAUTHORIZED, "token is required").into_response();
    }

    let record = match state.clients.get(&query.client_id) {
        Some(record) => record,
        None => {
            warn!(client_id = %query.client_id, "upgrade rejected: client not found");
            return (StatusCode::NOT_FOUND, "Client not found").into_response();
        }
    };
    if !record.enabled {
        warn!(client_id = %query.client_id, "upgrade rejected: client disabled");
        return (StatusCode::FORBIDDEN, "Client is disabled").into_response();
    }
    if record.auth_token != query.token {
        warn!(client_id = %query.client_id, "upgrade rejected: invalid auth token");
        return (StatusCode::UNAUTHORIZED, "Invalid auth token").into_response();
    }

    info!(client_id = %query.client_id, "agent connecting");

    let manager = state.manager.clone();
    let client_id = ClientId::new(query.client_id);
    ws.on_upgrade(move |socket| async move {
        manager.handle_socket(socket, client_id).await;
    })
}
