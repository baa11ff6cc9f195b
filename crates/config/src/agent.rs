//! Agent configuration.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use skyhook_common::backoff::BackoffConfig;
use skyhook_common::{TunnelError, TunnelResult};

use crate::defaults;
use crate::{env_parse, env_string};

/// Configuration for one agent process.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// `ws://host:port` or `wss://host:port` of the server's WebSocket
    /// listener; the `/ws` path and credentials are appended at dial time
    #[serde(default)]
    pub server_url: String,
    #[serde(default)]
    pub client_id: String,
    #[serde(default)]
    pub auth_token: String,

    /// Protocol ping cadence
    #[serde(default = "defaults::ping_interval_ms")]
    pub ping_interval_ms: u64,
    /// Default timeout for executing tunneled requests
    #[serde(default = "defaults::http_timeout_ms")]
    pub http_timeout_ms: u64,

    /// Skip certificate verification when dialing a `wss://` server
    #[serde(default)]
    pub tls_insecure_skip_verify: bool,

    #[serde(default = "defaults::reconnect_initial_delay_ms")]
    pub reconnect_initial_delay_ms: u64,
    #[serde(default = "defaults::reconnect_max_delay_ms")]
    pub reconnect_max_delay_ms: u64,
    #[serde(default = "defaults::reconnect_multiplier")]
    pub reconnect_multiplier: f64,
    #[serde(default = "defaults::reconnect_jitter")]
    pub reconnect_jitter: f64,

    /// Max concurrently executing tunneled requests
    #[serde(default = "defaults::worker_pool_size")]
    pub worker_pool_size: usize,
    #[serde(default = "defaults::send_queue_size")]
    pub send_queue_size: usize,
}

impl Default for AgentConfig {
    fn default() -> Self {
        serde_yaml::from_str("{}").expect("default agent config")
    }
}

impl AgentConfig {
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
        env_string("SKYHOOK_SERVER_URL", &mut self.server_url);
        env_string("SKYHOOK_CLIENT_ID", &mut self.client_id);
        env_string("SKYHOOK_AUTH_TOKEN", &mut self.auth_token);
        env_parse("SKYHOOK_PING_INTERVAL_MS", &mut self.ping_interval_ms);
        env_parse("SKYHOOK_HTTP_TIMEOUT_MS", &mut self.http_timeout_ms);
        env_parse(
            "SKYHOOK_TLS_INSECURE_SKIP_VERIFY",
            &mut self.tls_insecure_skip_verify,
        );
    }

    pub fn validate(&self) -> TunnelResult<()> {
        if self.server_url.is_empty() {
            return Err(TunnelError::config("server_url is required"));
        }
        if !self.server_url.starts_with("ws://") && !self.server_url.starts_with("wss://") {
            return Err(TunnelError::config(format!(
                "server_url must be ws:// or wss://, got {}",
                self.server_url
            )));
        }
        if self.client_id.is_empty() {
            return Err(TunnelError::config("client_id is required"));
        }
        if self.auth_token.is_empty() {
            return Err(TunnelError::config("auth_token is required"));
        }
        if self.ping_interval_ms == 0 {
            return Err(TunnelError::config("ping_interval_ms must be positive"));
        }
        if self.reconnect_multiplier < 1.0 {
            return Err(TunnelError::config("reconnect_multiplier must be >= 1.0"));
        }
        Ok(())
    }

    pub fn ping_interval(&self) -> Duration {
        Duration::from_millis(self.ping_interval_ms)
    }

    /// Missed-pong threshold before the socket is closed to force reconnect.
    pub fn ping_timeout(&self) -> Duration {
        self.ping_interval() * 3
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_millis(self.http_timeout_ms)
    }

    pub fn backoff(&self) -> BackoffConfig {
        BackoffConfig {
            initial_delay: Duration::from_millis(self.reconnect_initial_delay_ms),
            multiplier: self.reconnect_multiplier,
            max_delay: Duration::from_millis(self.reconnect_max_delay_ms),
            jitter: self.reconnect_jitter,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal() -> AgentConfig {
        AgentConfig {
            server_url: "ws://127.0.0.1:8081".into(),
            client_id: "agent-1".into(),
            auth_token: "secret".into(),
            ..Default::default()
        }
    }

    #[test]
    fn minimal_config_is_valid() {
        minimal().validate().unwrap();
    }

    #[test]
    fn missing_identity_rejected() {
        let config = AgentConfig {
            client_id: String::new(),
            ..minimal()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn http_url_rejected() {
        let config = AgentConfig {
            server_url: "http://127.0.0.1:8081".into(),
            ..minimal()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn backoff_mirrors_reconnect_settings() {
        let config = minimal();
        let backoff = config.backoff();
        assert_eq!(backoff.initial_delay, Duration::from_secs(1));
        assert_eq!(backoff.max_delay, Duration::from_secs(30));
        assert_eq!(backoff.multiplier, 2.0);
    }
}
