//! Common type definitions shared between the server and agent.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Derived liveness state of a client record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClientStatus {
    /// A registered connection is live
    Online,
    /// No live connection
    Offline,
    /// Administratively disabled
    Disabled,
}

impl fmt::Display for ClientStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ClientStatus::Online => "online",
            ClientStatus::Offline => "offline",
            ClientStatus::Disabled => "disabled",
        };
        write!(f, "{s}")
    }
}

/// How the agent builds the target URL from a REQUEST frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RouteMode {
    /// Target is `scheme://host:port[/prefix]`; the inbound path is appended
    /// verbatim.
    OriginalPath,
    /// Target is the complete URL; the inbound path is informational.
    PathTransform,
}

impl RouteMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            RouteMode::OriginalPath => "original_path",
            RouteMode::PathTransform => "path_transform",
        }
    }
}

impl Default for RouteMode {
    fn default() -> Self {
        RouteMode::OriginalPath
    }
}

impl fmt::Display for RouteMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for RouteMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "original_path" => Ok(RouteMode::OriginalPath),
            "path_transform" => Ok(RouteMode::PathTransform),
            other => Err(format!("unknown route mode: {other}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn route_mode_parses_wire_names() {
        assert_eq!(
            "original_path".parse::<RouteMode>().unwrap(),
            RouteMode::OriginalPath
        );
        assert_eq!(
            "path_transform".parse::<RouteMode>().unwrap(),
            RouteMode::PathTransform
        );
        assert!("round_robin".parse::<RouteMode>().is_err());
    }

    #[test]
    fn status_display_matches_store_values() {
        assert_eq!(ClientStatus::Online.to_string(), "online");
        assert_eq!(ClientStatus::Offline.to_string(), "offline");
        assert_eq!(ClientStatus::Disabled.to_string(), "disabled");
    }
}
