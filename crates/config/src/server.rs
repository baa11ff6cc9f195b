//! Server configuration.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use skyhook_common::{TunnelError, TunnelResult};

use crate::defaults;
use crate::{env_parse, env_string};

/// Listener TLS material. Carried in configuration and validated for
/// existence; the reference deployment terminates TLS in front of the
/// server and serves plaintext internally.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TlsConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub cert_file: Option<PathBuf>,
    #[serde(default)]
    pub key_file: Option<PathBuf>,
}

/// Top-level server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Bind address shared by all three listeners
    #[serde(default = "defaults::host")]
    pub host: String,
    /// Management API + `/proxy` prefix listener
    #[serde(default = "defaults::api_port")]
    pub api_port: u16,
    /// Agent WebSocket listener
    #[serde(default = "defaults::websocket_port")]
    pub websocket_port: u16,
    /// Proxy front-door listener
    #[serde(default = "defaults::proxy_port")]
    pub proxy_port: u16,

    #[serde(default)]
    pub tls: TlsConfig,

    /// HS256 secret for operator JWTs; empty disables the management API
    /// login (all authenticated routes then reject)
    #[serde(default = "defaults::jwt_secret")]
    pub jwt_secret: String,
    #[serde(default = "defaults::jwt_expiry_secs")]
    pub jwt_expiry_secs: u64,
    #[serde(default = "defaults::admin_username")]
    pub admin_username: String,
    #[serde(default)]
    pub admin_password: String,

    /// Server-side protocol ping cadence; liveness threshold is 3x this
    #[serde(default = "defaults::ping_interval_ms")]
    pub ping_interval_ms: u64,
    /// Deadline for a proxied request end to end
    #[serde(default = "defaults::request_timeout_ms")]
    pub request_timeout_ms: u64,
    /// Window for the CONTROL/REGISTER frame after upgrade
    #[serde(default = "defaults::register_timeout_ms")]
    pub register_timeout_ms: u64,
    /// Per-frame WebSocket write deadline
    #[serde(default = "defaults::write_timeout_ms")]
    pub write_timeout_ms: u64,

    /// Bounded outbound frame queue per connection
    #[serde(default = "defaults::send_queue_size")]
    pub send_queue_size: usize,
    /// Bounded queue coalescing persisted last-seen updates
    #[serde(default = "defaults::heartbeat_queue_size")]
    pub heartbeat_queue_size: usize,
    /// Drain cadence for the heartbeat queue
    #[serde(default = "defaults::heartbeat_flush_ms")]
    pub heartbeat_flush_ms: u64,
    /// Max concurrently executing frame handlers off the read loops
    #[serde(default = "defaults::worker_pool_size")]
    pub worker_pool_size: usize,
    #[serde(default = "defaults::shutdown_grace_ms")]
    pub shutdown_grace_ms: u64,

    /// State snapshot path; empty keeps all records in memory only
    #[serde(default)]
    pub store_path: Option<PathBuf>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        // serde(default) on a unit struct goes through Deserialize, so an
        // empty document produces exactly the defaults.
        serde_yaml::from_str("{}").expect("default server config")
    }
}

impl ServerConfig {
    /// Load from an optional YAML file, then apply environment overrides,
    /// then validate.
    pub fn load(path: Option<&Path>) -> TunnelResult<Self> {
        let mut config = match path {
            Some(p) => crate::read_yaml(p)?,
            None => Self::default(),
        };
        config.apply_env();
        config.validate()?;
        Ok(config)
    }

    fn apply_env(&mut self) {
        env_string("SKYHOOK_HOST", &mut self.host);
        env_parse("SKYHOOK_API_PORT", &mut self.api_port);
        env_parse("SKYHOOK_WEBSOCKET_PORT", &mut self.websocket_port);
        env_parse("SKYHOOK_PROXY_PORT", &mut self.proxy_port);
        env_string("SKYHOOK_JWT_SECRET", &mut self.jwt_secret);
        env_string("SKYHOOK_ADMIN_USERNAME", &mut self.admin_username);
        env_string("SKYHOOK_ADMIN_PASSWORD", &mut self.admin_password);
        env_parse("SKYHOOK_PING_INTERVAL_MS", &mut self.ping_interval_ms);
        env_parse("SKYHOOK_REQUEST_TIMEOUT_MS", &mut self.request_timeout_ms);
        env_parse("SKYHOOK_SEND_QUEUE_SIZE", &mut self.send_queue_size);
        env_parse("SKYHOOK_WORKER_POOL_SIZE", &mut self.worker_pool_size);
        if let Ok(path) = std::env::var("SKYHOOK_STORE_PATH") {
            if !path.is_empty() {
                self.store_path = Some(PathBuf::from(path));
            }
        }
    }

    /// Reject configurations that cannot work.
    pub fn validate(&self) -> TunnelResult<()> {
        if self.host.is_empty() {
            return Err(TunnelError::config("host must not be empty"));
        }
        let ports = [self.api_port, self.websocket_port, self.proxy_port];
        for (i, a) in ports.iter().enumerate() {
            for b in &ports[i + 1..] {
                if a == b && *a != 0 {
                    return Err(TunnelError::config(format!(
                        "api, websocket, and proxy ports must differ (got {a} twice)"
                    )));
                }
            }
        }
        if self.ping_interval_ms == 0 {
            return Err(TunnelError::config("ping_interval_ms must be positive"));
        }
        if self.request_timeout_ms == 0 {
            return Err(TunnelError::config("request_timeout_ms must be positive"));
        }
        if self.send_queue_size == 0 {
            return Err(TunnelError::config("send_queue_size must be positive"));
        }
        if self.worker_pool_size == 0 {
            return Err(TunnelError::config("worker_pool_size must be positive"));
        }
        if self.tls.enabled {
            for (name, file) in [("cert_file", &self.tls.cert_file), ("key_file", &self.tls.key_file)]
            {
                match file {
                    Some(p) if p.exists() => {}
                    Some(p) => {
                        return Err(TunnelError::config(format!(
                            "tls.{name} does not exist: {}",
                            p.display()
                        )))
                    }
                    None => {
                        return Err(TunnelError::config(format!(
                            "tls.enabled requires tls.{name}"
                        )))
                    }
                }
            }
        }
        Ok(())
    }

    pub fn ping_interval(&self) -> Duration {
        Duration::from_millis(self.ping_interval_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn register_timeout(&self) -> Duration {
        Duration::from_millis(self.register_timeout_ms)
    }

    pub fn write_timeout(&self) -> Duration {
        Duration::from_millis(self.write_timeout_ms)
    }

    pub fn heartbeat_flush_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_flush_ms)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }

    /// Liveness threshold: a connection silent for longer than this is
    /// forcibly closed.
    pub fn liveness_timeout(&self) -> Duration {
        self.ping_interval() * 3
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_are_valid() {
        let config = ServerConfig::default();
        assert_eq!(config.api_port, 8080);
        assert_eq!(config.websocket_port, 8081);
        assert_eq!(config.proxy_port, 8082);
        assert_eq!(config.send_queue_size, 1000);
        config.validate().unwrap();
    }

    #[test]
    fn yaml_file_overrides_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "proxy_port: 9999\nping_interval_ms: 5000\nadmin_password: hunter2"
        )
        .unwrap();

        let config = ServerConfig::load(Some(file.path())).unwrap();
        assert_eq!(config.proxy_port, 9999);
        assert_eq!(config.ping_interval_ms, 5000);
        assert_eq!(config.admin_password, "hunter2");
        // Untouched fields keep their defaults.
        assert_eq!(config.api_port, 8080);
    }

    #[test]
    fn duplicate_ports_rejected() {
        let config = ServerConfig {
            proxy_port: 8080,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn liveness_is_three_ping_intervals() {
        let config = ServerConfig::default();
        assert_eq!(config.liveness_timeout(), config.ping_interval() * 3);
    }
}
