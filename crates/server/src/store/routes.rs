//! Route catalog.

use serde::Deserialize;
use std::sync::Arc;

use skyhook_common::{epoch_ms, RouteMode, TunnelError, TunnelResult};

use super::records::{RouteRecord, RouteUpdate};
use super::StateStore;
use crate::routing::pattern;

/// Input for creating a route record.
#[derive(Debug, Clone, Deserialize)]
pub struct NewRoute {
    pub url_pattern: String,
    pub client_id: String,
    pub targets_json: String,
    #[serde(default)]
    pub mode: RouteMode,
    #[serde(default)]
    pub delivery_policy: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub description: String,
}

fn default_enabled() -> bool {
    true
}

/// Catalog of route records. Routes are independent rows; storage never
/// resolves shadowing between them, that happens at match time.
#[derive(Clone)]
pub struct RouteStore {
    inner: Arc<StateStore>,
}

impl RouteStore {
    pub(super) fn new(inner: Arc<StateStore>) -> Self {
        Self { inner }
    }

    pub fn list(&self) -> Vec<RouteRecord> {
        self.inner
            .read(|state| state.routes.values().cloned().collect())
    }

    pub fn get(&self, id: u64) -> Option<RouteRecord> {
        self.inner.read(|state| state.routes.get(&id).cloned())
    }

    pub fn create(&self, new: NewRoute) -> TunnelResult<RouteRecord> {
        let url_pattern = pattern::normalize(&new.url_pattern);
        if !pattern::is_valid(&url_pattern) {
            return Err(TunnelError::InvalidPattern {
                pattern: new.url_pattern,
            });
        }
        if new.targets_json.trim().is_empty() {
            return Err(TunnelError::store("route target must not be empty"));
        }
        if new.client_id.is_empty() {
            return Err(TunnelError::store("route client_id must not be empty"));
        }

        self.inner.write(|state| {
            state.next_route_id += 1;
            let now = epoch_ms();
            let record = RouteRecord {
                id: state.next_route_id,
                url_pattern,
                client_id: new.client_id,
                targets_json: new.targets_json,
                mode: new.mode,
                delivery_policy: new.delivery_policy,
                enabled: new.enabled,
                description: new.description,
                created_at_ms: now,
                updated_at_ms: now,
            };
            state.routes.insert(record.id, record.clone());
            Ok(record)
        })
    }

    pub fn update(&self, id: u64, update: RouteUpdate) -> TunnelResult<RouteRecord> {
        let url_pattern = match update.url_pattern {
            Some(raw) => {
                let normalized = pattern::normalize(&raw);
                if !pattern::is_valid(&normalized) {
                    return Err(TunnelError::InvalidPattern { pattern: raw });
                }
                Some(normalized)
            }
            None => None,
        };
        if let Some(targets) = &update.targets_json {
            if targets.trim().is_empty() {
                return Err(TunnelError::store("route target must not be empty"));
            }
        }

        self.inner.write(|state| {
            let record = state.routes.get_mut(&id).ok_or_else(|| {
                TunnelError::store(format!("route not found: {id}"))
            })?;
            if let Some(p) = url_pattern {
                record.url_pattern = p;
            }
            if let Some(client_id) = update.client_id {
                record.client_id = client_id;
            }
            if let Some(targets) = update.targets_json {
                record.targets_json = targets;
            }
            if let Some(mode) = update.mode {
                record.mode = mode;
            }
            if let Some(policy) = update.delivery_policy {
                record.delivery_policy = policy;
            }
            if let Some(enabled) = update.enabled {
                record.enabled = enabled;
            }
            if let Some(description) = update.description {
                record.description = description;
            }
            record.updated_at_ms = epoch_ms();
            Ok(record.clone())
        })
    }

    pub fn delete(&self, id: u64) -> TunnelResult<()> {
        self.inner.write(|state| {
            state
                .routes
                .remove(&id)
                .map(|_| ())
                .ok_or_else(|| TunnelError::store(format!("route not found: {id}")))
        })
    }

    pub fn set_enabled(&self, id: u64, enabled: bool) -> TunnelResult<RouteRecord> {
        self.update(
            id,
            RouteUpdate {
                enabled: Some(enabled),
                ..Default::default()
            },
        )
    }
}
