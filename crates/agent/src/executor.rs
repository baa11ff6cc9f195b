//! Agent-side request executor.
//!
//! A pure request/response relay: resolve the target URL from the REQUEST
//! payload's route mode, execute the HTTP call, and report status, headers,
//! body, and wall-clock latency back. Transport failures become RESPONSE
//! payloads with `http_status = 500` and a non-null `error`; the executor
//! itself never fails a frame.

use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::Method;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use skyhook_common::{RouteMode, TunnelError, TunnelResult};
use skyhook_protocol::{RequestPayload, ResponsePayload};

pub struct Executor {
    client: reqwest::Client,
    /// Intranet HTTPS targets routinely present self-signed certificates;
    /// verification is disabled for them as a documented trade-off.
    insecure_client: reqwest::Client,
    default_timeout: Duration,
}

impl Executor {
    pub fn new(default_timeout: Duration) -> TunnelResult<Self> {
        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| TunnelError::internal(format!("failed to build http client: {e}")))?;
        let insecure_client = reqwest::Client::builder()
            .danger_accept_invalid_certs(true)
            .build()
            .map_err(|e| TunnelError::internal(format!("failed to build http client: {e}")))?;
        Ok(Self {
            client,
            insecure_client,
            default_timeout,
        })
    }

    /// Execute one tunneled request.
    pub async fn execute(&self, payload: &RequestPayload) -> ResponsePayload {
        let target = match resolve_target(payload) {
            Ok(target) => target,
            Err(message) => {
                warn!(path = %payload.url_suffix, error = %message, "cannot resolve target");
                return ResponsePayload::failed(message);
            }
        };

        let method = Method::from_bytes(payload.http_method.as_bytes())
            .unwrap_or(Method::GET);
        let timeout = if payload.timeout_ms > 0 {
            Duration::from_millis(payload.timeout_ms)
        } else {
            self.default_timeout
        };

        let is_https = target.to_ascii_lowercase().starts_with("https://");
        let client = if is_https {
            &self.insecure_client
        } else {
            &self.client
        };

        debug!(method = %method, target = %target, timeout_ms = timeout.as_millis() as u64, "executing tunneled request");

        let mut request = client
            .request(method, &target)
            .headers(copy_headers(&payload.headers))
            .timeout(timeout);
        if !payload.body.is_empty() {
            request = request.body(payload.body.clone());
        }

        let start = Instant::now();
        let response = match request.send().await {
            Ok(response) => response,
            Err(err) => {
                let latency_ms = start.elapsed().as_millis() as i64;
                warn!(target = %target, error = %err, "tunneled request failed");
                return ResponsePayload {
                    http_status: 500,
                    headers: HashMap::new(),
                    body: String::new(),
                    latency_ms,
                    error: Some(format!("request failed: {err}")),
                };
            }
        };

        let status = response.status().as_u16();
        let mut headers = HashMap::new();
        for (name, value) in response.headers() {
            if let Ok(value) = value.to_str() {
                headers.insert(name.as_str().to_string(), value.to_string());
            }
        }

        let body = match response.text().await {
            Ok(body) => body,
            Err(err) => {
                let latency_ms = start.elapsed().as_millis() as i64;
                warn!(target = %target, error = %err, "failed to read response body");
                return ResponsePayload {
                    http_status: 500,
                    headers: HashMap::new(),
                    body: String::new(),
                    latency_ms,
                    error: Some(format!("failed to read response body: {err}")),
                };
            }
        };

        let latency_ms = start.elapsed().as_millis().max(1) as i64;
        debug!(target = %target, status, latency_ms, "tunneled request complete");

        ResponsePayload {
            http_status: status,
            headers,
            body,
            latency_ms,
            error: None,
        }
    }
}

/// Build the target URL according to the route mode.
///
/// Original-path mode joins the configured base with the inbound path;
/// path-transform mode uses the configured URL verbatim. When
/// `targets_json` is an array, the first entry wins.
fn resolve_target(payload: &RequestPayload) -> Result<String, String> {
    let targets = payload.targets();
    let target = targets
        .first()
        .ok_or_else(|| "no target configured".to_string())?;

    let mode = payload
        .route_mode
        .parse::<RouteMode>()
        .unwrap_or_default();

    match mode {
        RouteMode::PathTransform => Ok(target.url.clone()),
        RouteMode::OriginalPath => {
            let base = target.url.trim_end_matches('/');
            if base.is_empty() {
                return Err("empty target url".to_string());
            }
            Ok(format!("{base}{}", payload.url_suffix))
        }
    }
}

/// Copy request headers; `Host` is set by the HTTP client from the target
/// authority, and framing headers are recomputed for the buffered body.
fn copy_headers(headers: &HashMap<String, String>) -> HeaderMap {
    let mut map = HeaderMap::new();
    for (name, value) in headers {
        if name.eq_ignore_ascii_case("host")
            || name.eq_ignore_ascii_case("content-length")
            || name.eq_ignore_ascii_case("transfer-encoding")
        {
            continue;
        }
        if let (Ok(name), Ok(value)) = (
            HeaderName::try_from(name.as_str()),
            HeaderValue::try_from(value.as_str()),
        ) {
            map.insert(name, value);
        }
    }
    map
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payload(mode: &str, targets: &str, suffix: &str) -> RequestPayload {
        RequestPayload {
            http_method: "GET".into(),
            url_suffix: suffix.into(),
            route_mode: mode.into(),
            targets_json: targets.into(),
            ..Default::default()
        }
    }

    #[test]
    fn original_path_appends_suffix() {
        let p = payload("original_path", "http://127.0.0.1:9000", "/api/users");
        assert_eq!(
            resolve_target(&p).unwrap(),
            "http://127.0.0.1:9000/api/users"
        );
    }

    #[test]
    fn original_path_trims_trailing_slash() {
        let p = payload("original_path", "http://127.0.0.1:9000/", "/api/users");
        assert_eq!(
            resolve_target(&p).unwrap(),
            "http://127.0.0.1:9000/api/users"
        );
    }

    #[test]
    fn original_path_keeps_base_prefix() {
        let p = payload("original_path", "http://127.0.0.1:9000/v2", "/api/users");
        assert_eq!(
            resolve_target(&p).unwrap(),
            "http://127.0.0.1:9000/v2/api/users"
        );
    }

    #[test]
    fn path_transform_uses_target_verbatim() {
        let p = payload(
            "path_transform",
            "http://127.0.0.1:9000/internal/handler",
            "/api/users",
        );
        assert_eq!(
            resolve_target(&p).unwrap(),
            "http://127.0.0.1:9000/internal/handler"
        );
    }

    #[test]
    fn array_targets_first_entry_wins() {
        let p = payload(
            "original_path",
            r#"[{"url":"http://10.0.0.1:9000"},{"url":"http://10.0.0.2:9000"}]"#,
            "/x",
        );
        assert_eq!(resolve_target(&p).unwrap(), "http://10.0.0.1:9000/x");
    }

    #[test]
    fn unknown_mode_falls_back_to_original_path() {
        let p = payload("", "http://127.0.0.1:9000", "/x");
        assert_eq!(resolve_target(&p).unwrap(), "http://127.0.0.1:9000/x");
    }

    #[test]
    fn missing_target_is_an_error() {
        let p = payload("original_path", "", "/x");
        assert!(resolve_target(&p).is_err());
    }

    #[test]
    fn hop_headers_are_skipped() {
        let mut headers = HashMap::new();
        headers.insert("Host".to_string(), "example.com".to_string());
        headers.insert("Content-Length".to_string(), "42".to_string());
        headers.insert("X-Custom".to_string(), "1".to_string());
        let map = copy_headers(&headers);
        assert!(map.get("host").is_none());
        assert!(map.get("content-length").is_none());
        assert_eq!(map.get("x-custom").unwrap(), "1");
    }

    #[tokio::test]
    async fn execute_returns_500_on_connect_failure() {
        let executor = Executor::new(Duration::from_millis(500)).unwrap();
        // Port 9 (discard) is not listening on loopback in test environments.
        let p = payload("original_path", "http://127.0.0.1:9", "/x");
        let response = executor.execute(&p).await;
        assert_eq!(response.http_status, 500);
        assert!(response.error.is_some());
    }
}
