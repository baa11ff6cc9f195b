//! Type-safe identifier newtypes for Skyhook.
//!
//! These types prevent accidental mixing of different identifier kinds,
//! e.g. passing a message id where a client id is expected. Both are thin
//! wrappers over strings because they travel over a JSON wire protocol.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Identifier of an agent (the `client_id` field on every frame).
///
/// Opaque, unique, immutable; chosen by the operator when the client record
/// is created.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClientId(String);

impl ClientId {
    pub fn new(id: impl Into<String>) -> Self {
        ClientId(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for ClientId {
    fn from(s: String) -> Self {
        ClientId(s)
    }
}

impl From<&str> for ClientId {
    fn from(s: &str) -> Self {
        ClientId(s.to_string())
    }
}

/// Correlation id for a REQUEST/RESPONSE pair across the tunnel.
///
/// Always a UUID v4 generated at dispatch time on the server.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MsgId(String);

impl MsgId {
    /// Generate a fresh random message id.
    pub fn generate() -> Self {
        MsgId(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MsgId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for MsgId {
    fn from(s: String) -> Self {
        MsgId(s)
    }
}

impl From<&str> for MsgId {
    fn from(s: &str) -> Self {
        MsgId(s.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_msg_ids_are_unique() {
        let a = MsgId::generate();
        let b = MsgId::generate();
        assert_ne!(a, b);
    }

    #[test]
    fn client_id_roundtrips_through_serde() {
        let id = ClientId::new("agent-1");
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"agent-1\"");
        let back: ClientId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
    }
}
