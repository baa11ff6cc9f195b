//! Wire protocol for the Skyhook control channel.
//!
//! Every message between server and agent is a single WebSocket text frame
//! containing one UTF-8 JSON envelope (a [`Frame`]). The envelope carries a
//! coarse [`FrameType`], a fine-grained [`Op`], the sending/receiving
//! client id, an optional correlation id, a producer timestamp, and an
//! operation-specific payload.
//!
//! Non-text WebSocket frames (binary, ping, pong, close) are handled at the
//! WebSocket layer and never reach this parser.

mod message;
mod payloads;

pub use message::{DecodeError, Frame, FrameType, Op, PROTOCOL_VERSION};
pub use payloads::{
    AckPayload, ErrorPayload, PingPayload, PongPayload, RegisterAckPayload, RegisterPayload,
    RequestPayload, ResponsePayload, RouteSyncPayload, RouteTarget, SyncedRoute,
};
