//! Persisted record types.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

use skyhook_common::{ClientStatus, RouteMode};

/// Identity record for one agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientRecord {
    /// Unique, immutable primary key
    pub client_id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// Shared secret the agent presents on register; non-empty for any
    /// usable client
    pub auth_token: String,
    pub enabled: bool,
    /// Derived: online while a registered connection is live
    pub status: ClientStatus,
    #[serde(default)]
    pub last_seen_ms: Option<i64>,
    /// Interface addresses reported by the agent, display only
    #[serde(default)]
    pub local_ips: Vec<String>,
    pub created_at_ms: i64,
    pub updated_at_ms: i64,
}

/// One dispatch rule mapping a URL pattern to an agent and a target.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouteRecord {
    pub id: u64,
    /// Validated pattern; see [`crate::routing::pattern`]
    pub url_pattern: String,
    pub client_id: String,
    /// Bare URL or JSON array of `{url}` objects
    pub targets_json: String,
    pub mode: RouteMode,
    /// Carried through to REQUEST frames, never consulted
    #[serde(default)]
    pub delivery_policy: String,
    pub enabled: bool,
    #[serde(default)]
    pub description: String,
    pub created_at_ms: i64,
    pub updated_at_ms: i64,
}

/// Partial update for a route; `None` fields keep their current value.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RouteUpdate {
    pub url_pattern: Option<String>,
    pub client_id: Option<String>,
    pub targets_json: Option<String>,
    pub mode: Option<RouteMode>,
    pub delivery_policy: Option<String>,
    pub enabled: Option<bool>,
    pub description: Option<String>,
}

/// The full persisted state.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StateSnapshot {
    #[serde(default)]
    pub clients: HashMap<String, ClientRecord>,
    #[serde(default)]
    pub routes: BTreeMap<u64, RouteRecord>,
    #[serde(default)]
    pub next_route_id: u64,
}
