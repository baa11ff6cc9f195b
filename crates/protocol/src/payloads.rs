//! Typed payloads for each operation.
//!
//! The `body` fields on REQUEST/RESPONSE are opaque strings; the tunnel
//! never inspects them. Content negotiation stays between the external HTTP
//! caller and the intranet target.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// CONTROL/REGISTER, agent to server.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterPayload {
    pub auth_token: String,
    pub version: String,
    /// Local interface addresses reported by the agent, display only
    #[serde(default)]
    pub local_ips: Vec<String>,
}

/// CONTROL/REGISTER_ACK, server to agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterAckPayload {
    pub success: bool,
    pub message: String,
}

/// CONTROL/PING, either direction.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct PingPayload {
    /// Sender clock, epoch milliseconds
    pub timestamp: i64,
}

/// CONTROL/PONG, echoing the PING timestamp so the sender can compute RTT.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct PongPayload {
    pub timestamp: i64,
}

/// One entry of an advisory CONTROL/ROUTE_SYNC.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncedRoute {
    pub url_pattern: String,
    pub targets_json: String,
    pub route_mode: String,
    pub enabled: bool,
}

/// CONTROL/ROUTE_SYNC, server to agent. Advisory only: agents do not keep a
/// route table; dispatch always arrives as REQUEST frames.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouteSyncPayload {
    pub routes: Vec<SyncedRoute>,
}

/// One resolved tunnel target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteTarget {
    pub url: String,
}

/// MESSAGE/REQUEST, server to agent.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RequestPayload {
    pub http_method: String,
    /// Inbound path as matched by the router
    pub url_suffix: String,
    #[serde(default)]
    pub headers: HashMap<String, String>,
    #[serde(default)]
    pub params: HashMap<String, String>,
    /// Opaque request body
    #[serde(default)]
    pub body: String,
    /// Per-request timeout; 0 means use the agent's configured default
    #[serde(default)]
    pub timeout_ms: u64,
    /// Either a bare URL or a JSON array of `{url}` objects
    #[serde(default)]
    pub targets_json: String,
    /// Carried through but never consulted; semantics unspecified
    #[serde(default)]
    pub delivery_policy: String,
    /// `original_path` or `path_transform`
    #[serde(default)]
    pub route_mode: String,
}

impl RequestPayload {
    /// Resolve `targets_json` into a target list.
    ///
    /// Accepts a JSON array of `{url}` objects, falling back to treating the
    /// trimmed string itself as a single URL.
    pub fn targets(&self) -> Vec<RouteTarget> {
        if self.targets_json.is_empty() {
            return Vec::new();
        }
        if let Ok(targets) = serde_json::from_str::<Vec<RouteTarget>>(&self.targets_json) {
            return targets;
        }
        let url = self.targets_json.trim();
        if url.is_empty() {
            return Vec::new();
        }
        vec![RouteTarget {
            url: url.to_string(),
        }]
    }
}

/// MESSAGE/RESPONSE, agent to server.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponsePayload {
    pub http_status: u16,
    #[serde(default)]
    pub headers: HashMap<String, String>,
    /// Opaque response body
    #[serde(default)]
    pub body: String,
    #[serde(default)]
    pub latency_ms: i64,
    /// Transport-level failure description; null on success
    #[serde(default)]
    pub error: Option<String>,
}

impl ResponsePayload {
    /// Synthetic response for a pending entry that hit its deadline.
    pub fn timeout() -> Self {
        Self {
            http_status: 504,
            headers: HashMap::new(),
            body: String::new(),
            latency_ms: 0,
            error: Some("Request timeout".to_string()),
        }
    }

    /// Synthetic response for a request failed by an ERROR frame.
    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            http_status: 500,
            headers: HashMap::new(),
            body: String::new(),
            latency_ms: 0,
            error: Some(message.into()),
        }
    }
}

/// ACK payload, either direction. Optional for MESSAGE frames.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AckPayload {
    pub msg_id: String,
    pub success: bool,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub message: String,
}

/// ERROR payload, either direction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorPayload {
    pub code: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub details: String,
}
