//! Skyhook tunnel agent
//!
//! The agent runs inside the private network. It keeps one outbound
//! WebSocket to the server, registers with its client id and auth token,
//! executes tunneled HTTP requests against intranet targets, and
//! reconnects with exponential backoff whenever the link drops.
//!
//! # Module Organization
//!
//! - [`transport`]: persistent control channel (dial, register, heartbeat,
//!   reconnect)
//! - [`executor`]: tunneled request execution against intranet targets
//! - [`netinfo`]: best-effort local address discovery for registration

pub mod executor;
pub mod netinfo;
pub mod transport;

pub use executor::Executor;
pub use transport::Agent;
