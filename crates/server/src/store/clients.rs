//! Client catalog.

use serde::Deserialize;
use std::sync::Arc;

use skyhook_common::{epoch_ms, ClientStatus, TunnelError, TunnelResult};

use super::records::ClientRecord;
use super::StateStore;

/// Input for creating a client record.
#[derive(Debug, Clone, Deserialize)]
pub struct NewClient {
    pub client_id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub auth_token: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}

/// Partial update; `None` fields keep their current value.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ClientUpdate {
    pub name: Option<String>,
    pub description: Option<String>,
    pub auth_token: Option<String>,
    pub enabled: Option<bool>,
}

/// Catalog of client records.
#[derive(Clone)]
pub struct ClientStore {
    inner: Arc<StateStore>,
}

impl ClientStore {
    pub(super) fn new(inner: Arc<StateStore>) -> Self {
        Self { inner }
    }

    pub fn list(&self) -> Vec<ClientRecord> {
        self.inner.read(|state| {
            let mut clients: Vec<ClientRecord> = state.clients.values().cloned().collect();
            clients.sort_by(|a, b| a.client_id.cmp(&b.client_id));
            clients
        })
    }

    /// Strongly consistent with the last successful write from this
    /// process; the connection manager consults this on every register.
    pub fn get(&self, client_id: &str) -> Option<ClientRecord> {
        self.inner.read(|state| state.clients.get(client_id).cloned())
    }

    pub fn create(&self, new: NewClient) -> TunnelResult<ClientRecord> {
        if new.client_id.is_empty() {
            return Err(TunnelError::store("client_id must not be empty"));
        }
        if new.auth_token.is_empty() {
            return Err(TunnelError::store("auth_token must not be empty"));
        }
        self.inner.write(|state| {
            if state.clients.contains_key(&new.client_id) {
                return Err(TunnelError::store(format!(
                    "client already exists: {}",
                    new.client_id
                )));
            }
            let now = epoch_ms();
            let record = ClientRecord {
                client_id: new.client_id.clone(),
                name: new.name,
                description: new.description,
                auth_token: new.auth_token,
                enabled: new.enabled,
                status: if new.enabled {
                    ClientStatus::Offline
                } else {
                    ClientStatus::Disabled
                },
                last_seen_ms: None,
                local_ips: Vec::new(),
                created_at_ms: now,
                updated_at_ms: now,
            };
            state.clients.insert(new.client_id, record.clone());
            Ok(record)
        })
    }

    pub fn update(&self, client_id: &str, update: ClientUpdate) -> TunnelResult<ClientRecord> {
        if let Some(token) = &update.auth_token {
            if token.is_empty() {
                return Err(TunnelError::store("auth_token must not be empty"));
            }
        }
        self.mutate(client_id, |record| {
            if let Some(name) = update.name {
                record.name = name;
            }
            if let Some(description) = update.description {
                record.description = description;
            }
            if let Some(token) = update.auth_token {
                record.auth_token = token;
            }
            if let Some(enabled) = update.enabled {
                record.enabled = enabled;
                if !enabled {
                    record.status = ClientStatus::Disabled;
                } else if record.status == ClientStatus::Disabled {
                    record.status = ClientStatus::Offline;
                }
            }
        })
    }

    pub fn delete(&self, client_id: &str) -> TunnelResult<()> {
        self.inner.write(|state| {
            state
                .clients
                .remove(client_id)
                .map(|_| ())
                .ok_or_else(|| TunnelError::ClientNotFound {
                    client_id: client_id.to_string(),
                })
        })
    }

    pub fn set_enabled(&self, client_id: &str, enabled: bool) -> TunnelResult<ClientRecord> {
        self.update(
            client_id,
            ClientUpdate {
                enabled: Some(enabled),
                ..Default::default()
            },
        )
    }

    /// Record liveness. Disabled clients stay `disabled` regardless of
    /// connection state.
    pub fn set_status(&self, client_id: &str, status: ClientStatus) -> TunnelResult<ClientRecord> {
        self.mutate(client_id, |record| {
            record.status = if record.enabled {
                status
            } else {
                ClientStatus::Disabled
            };
        })
    }

    pub fn update_last_seen(&self, client_id: &str, last_seen_ms: i64) -> TunnelResult<()> {
        self.mutate(client_id, |record| {
            record.last_seen_ms = Some(last_seen_ms);
        })
        .map(|_| ())
    }

    pub fn update_local_ips(&self, client_id: &str, local_ips: Vec<String>) -> TunnelResult<()> {
        self.mutate(client_id, |record| {
            record.local_ips = local_ips;
        })
        .map(|_| ())
    }

    fn mutate(
        &self,
        client_id: &str,
        f: impl FnOnce(&mut ClientRecord),
    ) -> TunnelResult<ClientRecord> {
        self.inner.write(|state| {
            let record =
                state
                    .clients
                    .get_mut(client_id)
                    .ok_or_else(|| TunnelError::ClientNotFound {
                        client_id: client_id.to_string(),
                    })?;
            f(record);
            record.updated_at_ms = epoch_ms();
            Ok(record.clone())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::open;

    fn store() -> ClientStore {
        open(None).unwrap().0
    }

    fn new_client(id: &str) -> NewClient {
        NewClient {
            client_id: id.to_string(),
            name: String::new(),
            description: String::new(),
            auth_token: "secret".to_string(),
            enabled: true,
        }
    }

    #[test]
    fn create_get_roundtrip() {
        let clients = store();
        clients.create(new_client("agent-1")).unwrap();
        let record = clients.get("agent-1").unwrap();
        assert_eq!(record.status, ClientStatus::Offline);
        assert!(record.enabled);
    }

    #[test]
    fn duplicate_id_rejected() {
        let clients = store();
        clients.create(new_client("agent-1")).unwrap();
        assert!(clients.create(new_client("agent-1")).is_err());
    }

    #[test]
    fn empty_auth_token_rejected() {
        let clients = store();
        let mut client = new_client("agent-1");
        client.auth_token = String::new();
        assert!(clients.create(client).is_err());
    }

    #[test]
    fn disabling_derives_status() {
        let clients = store();
        clients.create(new_client("agent-1")).unwrap();
        let record = clients.set_enabled("agent-1", false).unwrap();
        assert_eq!(record.status, ClientStatus::Disabled);

        // Status writes cannot resurrect a disabled client.
        let record = clients.set_status("agent-1", ClientStatus::Online).unwrap();
        assert_eq!(record.status, ClientStatus::Disabled);

        let record = clients.set_enabled("agent-1", true).unwrap();
        assert_eq!(record.status, ClientStatus::Offline);
    }

    #[test]
    fn last_seen_and_ips_update() {
        let clients = store();
        clients.create(new_client("agent-1")).unwrap();
        clients.update_last_seen("agent-1", 12345).unwrap();
        clients
            .update_local_ips("agent-1", vec!["10.0.0.5".into()])
            .unwrap();
        let record = clients.get("agent-1").unwrap();
        assert_eq!(record.last_seen_ms, Some(12345));
        assert_eq!(record.local_ips, vec!["10.0.0.5"]);
    }

    #[test]
    fn missing_client_errors() {
        let clients = store();
        assert!(matches!(
            clients.set_status("ghost", ClientStatus::Online),
            Err(TunnelError::ClientNotFound { .. })
        ));
    }
}
