//! Durable persistence for the state snapshot.
//!
//! The store treats persistence as a black box with two operations: load
//! the last snapshot, and durably save a new one. The JSON file backend
//! writes a sibling temp file and renames it over the target so a crash
//! mid-write never leaves a torn snapshot.

use std::fs;
use std::path::PathBuf;

use skyhook_common::{TunnelError, TunnelResult};

use super::records::StateSnapshot;

/// Durable snapshot storage.
pub trait Persistence: Send + Sync {
    fn load(&self) -> TunnelResult<Option<StateSnapshot>>;
    fn save(&self, snapshot: &StateSnapshot) -> TunnelResult<()>;
}

/// In-memory only; nothing survives a restart.
pub struct MemoryPersistence;

impl Persistence for MemoryPersistence {
    fn load(&self) -> TunnelResult<Option<StateSnapshot>> {
        Ok(None)
    }

    fn save(&self, _snapshot: &StateSnapshot) -> TunnelResult<()> {
        Ok(())
    }
}

/// Atomic JSON snapshot file.
pub struct JsonFilePersistence {
    path: PathBuf,
}

impl JsonFilePersistence {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }
}

impl Persistence for JsonFilePersistence {
    fn load(&self) -> TunnelResult<Option<StateSnapshot>> {
        if !self.path.exists() {
            return Ok(None);
        }
        let content = fs::read_to_string(&self.path).map_err(|e| TunnelError::Store {
            message: format!("failed to read {}: {e}", self.path.display()),
            source: Some(Box::new(e)),
        })?;
        let snapshot = serde_json::from_str(&content).map_err(|e| TunnelError::Store {
            message: format!("corrupt snapshot {}: {e}", self.path.display()),
            source: Some(Box::new(e)),
        })?;
        Ok(Some(snapshot))
    }

    fn save(&self, snapshot: &StateSnapshot) -> TunnelResult<()> {
        let content = serde_json::to_vec_pretty(snapshot).map_err(|e| TunnelError::Store {
            message: format!("failed to serialize snapshot: {e}"),
            source: Some(Box::new(e)),
        })?;

        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, &content).map_err(|e| TunnelError::Store {
            message: format!("failed to write {}: {e}", tmp.display()),
            source: Some(Box::new(e)),
        })?;
        fs::rename(&tmp, &self.path).map_err(|e| TunnelError::Store {
            message: format!("failed to replace {}: {e}", self.path.display()),
            source: Some(Box::new(e)),
        })?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::records::ClientRecord;
    use skyhook_common::ClientStatus;

    #[test]
    fn file_persistence_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let persistence = JsonFilePersistence::new(dir.path().join("state.json"));

        assert!(persistence.load().unwrap().is_none());

        let mut snapshot = StateSnapshot::default();
        snapshot.clients.insert(
            "agent-1".to_string(),
            ClientRecord {
                client_id: "agent-1".to_string(),
                name: "Agent One".to_string(),
                description: String::new(),
                auth_token: "secret".to_string(),
                enabled: true,
                status: ClientStatus::Offline,
                last_seen_ms: None,
                local_ips: vec![],
                created_at_ms: 1,
                updated_at_ms: 1,
            },
        );
        persistence.save(&snapshot).unwrap();

        let loaded = persistence.load().unwrap().unwrap();
        assert_eq!(loaded.clients.len(), 1);
        assert_eq!(loaded.clients["agent-1"].auth_token, "secret");
    }

    #[test]
    fn save_leaves_no_temp_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        let persistence = JsonFilePersistence::new(path.clone());
        persistence.save(&StateSnapshot::default()).unwrap();

        let names: Vec<String> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["state.json".to_string()]);
    }
}
