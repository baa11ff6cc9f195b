//! Client and route catalogs.
//!
//! Both catalogs live in one process-wide state snapshot guarded by an
//! RwLock: reads copy records out, writes serialize through the write lock
//! and are persisted durably before they return. Persistence is a swappable
//! collaborator; the rest of the server depends only on the store APIs.

mod clients;
mod persistence;
mod records;
mod routes;

pub use clients::{ClientStore, ClientUpdate, NewClient};
pub use persistence::{JsonFilePersistence, MemoryPersistence, Persistence};
pub use records::{ClientRecord, RouteRecord, RouteUpdate, StateSnapshot};
pub use routes::{NewRoute, RouteStore};

use parking_lot::RwLock;
use std::path::PathBuf;
use std::sync::Arc;

use skyhook_common::{ClientStatus, TunnelResult};

/// Shared state backing both stores.
pub(crate) struct StateStore {
    state: RwLock<StateSnapshot>,
    persistence: Box<dyn Persistence>,
}

impl StateStore {
    fn new(persistence: Box<dyn Persistence>) -> TunnelResult<Self> {
        let mut state = persistence.load()?.unwrap_or_default();

        // Liveness state does not survive a restart: every enabled client
        // starts offline until its agent re-registers.
        for client in state.clients.values_mut() {
            client.status = if client.enabled {
                ClientStatus::Offline
            } else {
                ClientStatus::Disabled
            };
        }

        Ok(Self {
            state: RwLock::new(state),
            persistence,
        })
    }

    pub(crate) fn read<R>(&self, f: impl FnOnce(&StateSnapshot) -> R) -> R {
        f(&self.state.read())
    }

    /// Apply a mutation and persist the result before returning.
    ///
    /// The write lock is held across persistence so concurrent writers
    /// cannot reorder their snapshots on disk.
    pub(crate) fn write<R>(
        &self,
        f: impl FnOnce(&mut StateSnapshot) -> TunnelResult<R>,
    ) -> TunnelResult<R> {
        let mut guard = self.state.write();
        let result = f(&mut guard)?;
        self.persistence.save(&guard)?;
        Ok(result)
    }
}

/// Open the client and route stores over a shared backing store.
///
/// `path = None` keeps all records in memory; otherwise the snapshot is
/// loaded from and durably written to the given JSON file.
pub fn open(path: Option<PathBuf>) -> TunnelResult<(ClientStore, RouteStore)> {
    let persistence: Box<dyn Persistence> = match path {
        Some(p) => Box::new(JsonFilePersistence::new(p)),
        None => Box::new(MemoryPersistence),
    };
    let inner = Arc::new(StateStore::new(persistence)?);
    Ok((ClientStore::new(inner.clone()), RouteStore::new(inner)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_memory_stores() {
        let (clients, routes) = open(None).unwrap();
        assert!(clients.list().is_empty());
        assert!(routes.list().is_empty());
    }

    #[test]
    fn statuses_reset_on_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");

        {
            let (clients, _routes) = open(Some(path.clone())).unwrap();
            clients
                .create(NewClient {
                    client_id: "agent-1".into(),
                    name: String::new(),
                    description: String::new(),
                    auth_token: "secret".into(),
                    enabled: true,
                })
                .unwrap();
            clients
                .set_status("agent-1", ClientStatus::Online)
                .unwrap();
        }

        let (clients, _routes) = open(Some(path)).unwrap();
        let record = clients.get("agent-1").unwrap();
        assert_eq!(record.status, ClientStatus::Offline);
        assert_eq!(record.auth_token, "secret");
    }
}
