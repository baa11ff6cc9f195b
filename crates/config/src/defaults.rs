//! Default configuration values.
//!
//! Kept as free functions so serde `#[serde(default = "...")]` attributes
//! and tests reference the same source of truth.

pub fn host() -> String {
    "0.0.0.0".to_string()
}

pub fn api_port() -> u16 {
    8080
}

pub fn websocket_port() -> u16 {
    8081
}

pub fn proxy_port() -> u16 {
    8082
}

pub fn jwt_secret() -> String {
    String::new()
}

pub fn jwt_expiry_secs() -> u64 {
    24 * 3600
}

pub fn admin_username() -> String {
    "admin".to_string()
}

pub fn ping_interval_ms() -> u64 {
    10_000
}

pub fn request_timeout_ms() -> u64 {
    30_000
}

pub fn register_timeout_ms() -> u64 {
    10_000
}

pub fn write_timeout_ms() -> u64 {
    10_000
}

pub fn send_queue_size() -> usize {
    1000
}

pub fn heartbeat_queue_size() -> usize {
    1000
}

pub fn heartbeat_flush_ms() -> u64 {
    2_000
}

pub fn worker_pool_size() -> usize {
    10
}

pub fn shutdown_grace_ms() -> u64 {
    5_000
}

pub fn http_timeout_ms() -> u64 {
    30_000
}

pub fn reconnect_initial_delay_ms() -> u64 {
    1_000
}

pub fn reconnect_max_delay_ms() -> u64 {
    30_000
}

pub fn reconnect_multiplier() -> f64 {
    2.0
}

pub fn reconnect_jitter() -> f64 {
    0.1
}
