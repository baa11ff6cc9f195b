//! Common utilities and shared components for the Skyhook tunnel
//!
//! This crate provides shared functionality used by both the server and the
//! agent: error types, identifier newtypes, reconnect backoff, and the
//! registry abstraction used for runtime connection tables.
//!
//! # Module Organization
//!
//! - [`ids`]: Type-safe identifier newtypes (ClientId, MsgId)
//! - [`types`]: Common type definitions (ClientStatus, RouteMode)
//! - [`errors`]: Error types and result aliases
//! - [`backoff`]: Exponential backoff with jitter for reconnect loops
//! - [`registry`]: Generic thread-safe registry abstraction

pub mod backoff;
pub mod errors;
pub mod ids;
pub mod registry;
pub mod types;

pub use backoff::{Backoff, BackoffConfig};
pub use errors::{TunnelError, TunnelResult};
pub use ids::{ClientId, MsgId};
pub use registry::Registry;
pub use types::{ClientStatus, RouteMode};

/// Current wall-clock time as epoch milliseconds.
///
/// The wire protocol timestamps every frame with the producer's clock in
/// this format.
pub fn epoch_ms() -> i64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}
